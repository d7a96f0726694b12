//! Engine
//!
//! Binds the chain driver and the checkpoint codec to one flow
//! configuration.

use std::sync::Arc;

use log::info;
use serde_json::Value;

use super::driver::{self, RunOutcome};
use crate::checkpoint;
use crate::config::FlowConfiguration;
use crate::context::{ContextState, WorkContext};
use crate::error::{EngineError, Result};
use crate::flow::FlowDirection;

/// Pipeline engine for one flow configuration.
///
/// The engine holds no per-message state; one instance can drive any number
/// of contexts, from any number of threads.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use phaseflow::config::FlowConfiguration;
/// use phaseflow::engine::{Engine, RunOutcome};
/// use phaseflow::flow::FlowDirection;
/// use phaseflow::handler::builtin::SuspendHandler;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut builder = FlowConfiguration::builder();
///     builder
///         .add_phase(FlowDirection::In, "Dispatch")?
///         .register_handler(FlowDirection::In, "Dispatch", Arc::new(SuspendHandler::new("hold")))?;
///     let engine = Engine::new(builder.build());
///
///     let mut ctx = engine.create_context(FlowDirection::In, serde_json::json!({"id": 1}))?;
///     assert_eq!(engine.drive(&mut ctx)?, RunOutcome::Suspended);
///
///     let bytes = engine.checkpoint(&ctx)?;
///     let mut restored = engine.restore(&bytes)?;
///     assert_eq!(engine.resume(&mut restored)?, RunOutcome::Completed);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Engine {
    config: Arc<FlowConfiguration>,
}

impl Engine {
    pub fn new(config: impl Into<Arc<FlowConfiguration>>) -> Self {
        Self {
            config: config.into(),
        }
    }

    pub fn configuration(&self) -> &Arc<FlowConfiguration> {
        &self.config
    }

    /// Creates a context bound to the chain of `direction`.
    pub fn create_context(&self, direction: FlowDirection, payload: Value) -> Result<WorkContext> {
        let chain = self
            .config
            .chain(direction)
            .ok_or(EngineError::UnknownFlow(direction))?;
        Ok(WorkContext::new(Arc::clone(chain), payload))
    }

    /// See [`driver::drive`].
    pub fn drive(&self, ctx: &mut WorkContext) -> Result<RunOutcome> {
        driver::drive(ctx)
    }

    /// See [`driver::resume`].
    pub fn resume(&self, ctx: &mut WorkContext) -> Result<RunOutcome> {
        driver::resume(ctx)
    }

    /// Moves a faulted context onto the fault flow of its direction.
    ///
    /// The context restarts at the beginning of the fault chain with an
    /// empty history. Payload, properties, self-managed data and the failure
    /// record are kept so fault handlers can inspect them.
    pub fn rebind_to_fault_flow(&self, ctx: &mut WorkContext) -> Result<()> {
        if ctx.state() != ContextState::Faulted {
            return Err(EngineError::InvalidState {
                message_id: ctx.message_id(),
                operation: "rebind to the fault flow",
                state: ctx.state(),
            });
        }

        let target = ctx.direction().fault_counterpart();
        let chain = self
            .config
            .chain(target)
            .ok_or(EngineError::UnknownFlow(target))?;

        info!(
            "{} Moving from the {} flow to the {} flow",
            ctx.log_id(),
            ctx.direction(),
            target
        );
        ctx.rebind(Arc::clone(chain));
        Ok(())
    }

    /// Serializes a context. See [`checkpoint::serialize`].
    pub fn checkpoint(&self, ctx: &WorkContext) -> Result<Vec<u8>> {
        checkpoint::serialize(ctx)
    }

    /// Restores a context against this engine's configuration.
    pub fn restore(&self, bytes: &[u8]) -> Result<WorkContext> {
        checkpoint::restore(bytes, &self.config)
    }
}
