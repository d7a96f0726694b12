//! Flow Definition Parser
//!
//! Loads flow definitions from YAML files and writes them back out.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::FlowDefinition;
use super::validator::validate_definition;
use super::ConfigError;

/// Loads and validates a flow definition from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use phaseflow::config::load_flow_definition;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_flow_definition("flows/orders.yaml")?;
///     println!("Loaded {} handlers", definition.handlers.len());
///     Ok(())
/// }
/// ```
pub fn load_flow_definition(path: impl AsRef<Path>) -> Result<FlowDefinition, ConfigError> {
    let path = path.as_ref();
    info!("Loading flow definition from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());
    parse_flow_definition(&yaml_content)
}

/// Parses and validates a flow definition from YAML text.
pub fn parse_flow_definition(yaml: &str) -> Result<FlowDefinition, ConfigError> {
    let definition: FlowDefinition = serde_yaml::from_str(yaml)?;

    info!(
        "Parsed flow definition '{}': {} handlers, {} flows",
        definition.name,
        definition.handlers.len(),
        definition.flows.iter().count()
    );

    validate_definition(&definition)?;
    Ok(definition)
}

/// Serializes a flow definition to YAML.
pub fn to_yaml(definition: &FlowDefinition) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(definition)?)
}
