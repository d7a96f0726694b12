//! Flow Configurations
//!
//! A [`FlowConfiguration`] holds one execution chain per configured
//! direction plus the registry of every handler placed in them. It is
//! built once, either programmatically through [`FlowBuilder`] or from a
//! flow definition file, and then shared by engines and checkpoint
//! restores.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use super::model::FlowDefinition;
use super::parser::load_flow_definition;
use super::validator::validate_definition;
use super::ConfigError;
use crate::flow::{ExecutionChain, FlowDirection, Phase, PhaseRule};
use crate::handler::registry::checked_name;
use crate::handler::{builtin, Handler, HandlerRegistry};

/// Built execution chains and the handlers they use.
pub struct FlowConfiguration {
    name: String,
    registry: HandlerRegistry,
    chains: HashMap<FlowDirection, Arc<ExecutionChain>>,
}

impl FlowConfiguration {
    /// Starts a programmatic configuration.
    pub fn builder() -> FlowBuilder {
        FlowBuilder::new()
    }

    /// Resolves a flow definition into chains.
    ///
    /// Handlers are looked up in `registry` first; declarations the registry
    /// does not cover are instantiated as built-ins.
    pub fn from_definition(
        definition: &FlowDefinition,
        registry: HandlerRegistry,
    ) -> Result<Self, ConfigError> {
        validate_definition(definition)?;

        let mut builder = FlowBuilder::with_registry(registry);
        builder.name = definition.name.clone();

        for decl in &definition.handlers {
            if builder.registry.contains(decl.name.trim()) {
                debug!("Handler '{}' provided by the registry", decl.name);
                continue;
            }
            builder.registry.register(builtin::instantiate(decl)?)?;
        }

        for (direction, phases) in definition.flows.iter() {
            for phase in phases {
                builder.add_phase(direction, &phase.name)?;

                for reference in &phase.handlers {
                    let handler = builder.registry.get(&reference.name).ok_or_else(|| {
                        ConfigError::UnknownHandler {
                            name: reference.name.clone(),
                            phase: phase.name.clone(),
                        }
                    })?;
                    builder.register_handler_with_rule(
                        direction,
                        &phase.name,
                        handler,
                        reference.rule.clone(),
                    )?;
                }
            }
        }

        Ok(builder.build())
    }

    /// Loads a flow definition file and resolves it with built-in handlers.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let definition = load_flow_definition(path)?;
        Self::from_definition(&definition, HandlerRegistry::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the chain of a direction, if one is configured.
    pub fn chain(&self, direction: FlowDirection) -> Option<&Arc<ExecutionChain>> {
        self.chains.get(&direction)
    }

    /// Looks up a handler by name.
    pub fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Configured directions, in canonical order.
    pub fn directions(&self) -> Vec<FlowDirection> {
        FlowDirection::ALL
            .into_iter()
            .filter(|d| self.chains.contains_key(d))
            .collect()
    }
}

impl fmt::Debug for FlowConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowConfiguration")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .field("directions", &self.directions())
            .finish()
    }
}

/// Programmatic builder for a [`FlowConfiguration`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use phaseflow::config::FlowConfiguration;
/// use phaseflow::flow::FlowDirection;
/// use phaseflow::handler::builtin::SuspendHandler;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut builder = FlowConfiguration::builder();
///     builder
///         .add_phase(FlowDirection::In, "Dispatch")?
///         .register_handler(FlowDirection::In, "Dispatch", Arc::new(SuspendHandler::new("hold")))?;
///     let config = builder.build();
///     assert_eq!(config.directions(), vec![FlowDirection::In]);
///     Ok(())
/// }
/// ```
#[derive(Default)]
pub struct FlowBuilder {
    name: String,
    registry: HandlerRegistry,
    chains: BTreeMap<FlowDirection, ExecutionChain>,
}

impl FlowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing registry.
    pub fn with_registry(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    /// Sets the configuration name.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Appends an empty phase to the chain of `direction`.
    pub fn add_phase(&mut self, direction: FlowDirection, name: &str) -> Result<&mut Self, ConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyName(format!("{} flow phase", direction)));
        }

        let chain = self
            .chains
            .entry(direction)
            .or_insert_with(|| ExecutionChain::new(direction));
        if chain.phase(name).is_some() {
            return Err(ConfigError::DuplicatePhase {
                direction,
                phase: name.to_string(),
            });
        }

        chain.add_phase(Phase::new(name));
        Ok(self)
    }

    /// Appends a handler to a phase.
    pub fn register_handler(
        &mut self,
        direction: FlowDirection,
        phase: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, ConfigError> {
        self.register_handler_with_rule(direction, phase, handler, PhaseRule::default())
    }

    /// Places a handler in a phase according to `rule`.
    ///
    /// The handler is also registered by name. The same instance may be
    /// placed any number of times; a different instance under a name already
    /// in use is rejected.
    pub fn register_handler_with_rule(
        &mut self,
        direction: FlowDirection,
        phase: &str,
        handler: Arc<dyn Handler>,
        rule: PhaseRule,
    ) -> Result<&mut Self, ConfigError> {
        let name = checked_name(handler.as_ref())?;
        if let Some(existing) = self.registry.get(name) {
            if !Arc::ptr_eq(&existing, &handler) {
                return Err(ConfigError::DuplicateHandler(name.to_string()));
            }
        }

        let target = self
            .chains
            .get_mut(&direction)
            .and_then(|c| c.phase_mut(phase.trim()))
            .ok_or_else(|| ConfigError::UnknownPhase {
                direction,
                phase: phase.to_string(),
            })?;
        target.add_handler_with_rule(Arc::clone(&handler), rule)?;

        self.registry.register(handler)?;
        Ok(self)
    }

    /// Freezes the chains into a configuration.
    pub fn build(self) -> FlowConfiguration {
        let chains: HashMap<FlowDirection, Arc<ExecutionChain>> = self
            .chains
            .into_iter()
            .map(|(direction, chain)| {
                info!(
                    "Built {} flow: {} phases, {} handlers",
                    direction,
                    chain.len(),
                    chain.handler_count()
                );
                (direction, Arc::new(chain))
            })
            .collect();

        FlowConfiguration {
            name: self.name,
            registry: self.registry,
            chains,
        }
    }
}
