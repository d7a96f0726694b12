//! Flow Definition Validation
//!
//! Structural checks run before a definition is resolved into chains:
//! - Handler declarations have names and kinds, and names are unique
//! - Phase names are non-empty and unique within their direction
//! - Handler references have names and self-consistent placement rules
//!
//! References to handlers the file does not declare are only warned
//! about, since the registry passed alongside the definition may provide
//! them.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::model::{FlowDefinition, HandlerRef};
use super::ConfigError;
use crate::flow::PhaseRuleError;

/// Validates a flow definition.
pub fn validate_definition(definition: &FlowDefinition) -> Result<(), ConfigError> {
    let mut declared: HashSet<&str> = HashSet::new();
    for decl in &definition.handlers {
        let name = decl.name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyName("handler".to_string()));
        }
        if decl.kind.trim().is_empty() {
            return Err(ConfigError::EmptyName(format!("kind of handler '{}'", name)));
        }
        if !declared.insert(name) {
            return Err(ConfigError::DuplicateHandler(name.to_string()));
        }
    }

    for (direction, phases) in definition.flows.iter() {
        let mut seen_phases: HashSet<&str> = HashSet::new();

        for phase in phases {
            let phase_name = phase.name.trim();
            if phase_name.is_empty() {
                return Err(ConfigError::EmptyName(format!("{} flow phase", direction)));
            }
            if !seen_phases.insert(phase_name) {
                return Err(ConfigError::DuplicatePhase {
                    direction,
                    phase: phase_name.to_string(),
                });
            }
            if phase.handlers.is_empty() {
                debug!("Phase '{}' of the {} flow is empty", phase_name, direction);
            }

            for handler in &phase.handlers {
                validate_reference(handler)?;

                if !declared.contains(handler.name.as_str()) {
                    warn!(
                        "Phase '{}' references handler '{}' which is not declared in the file",
                        phase_name, handler.name
                    );
                }
            }
        }
    }

    info!(
        "Flow definition validated: {} handlers, {} flows",
        definition.handlers.len(),
        definition.flows.iter().count()
    );
    Ok(())
}

fn validate_reference(handler: &HandlerRef) -> Result<(), ConfigError> {
    let name = handler.name.trim();
    if name.is_empty() {
        return Err(ConfigError::EmptyName("handler reference".to_string()));
    }

    let rule = &handler.rule;
    if rule.phase_first && rule.phase_last {
        return Err(PhaseRuleError::FirstAndLast {
            handler: name.to_string(),
        }
        .into());
    }
    if rule.before.as_deref() == Some(name) || rule.after.as_deref() == Some(name) {
        return Err(PhaseRuleError::SelfReference {
            handler: name.to_string(),
        }
        .into());
    }
    Ok(())
}
