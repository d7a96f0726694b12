//! Pipeline Handlers
//!
//! A handler is a single step of an execution chain. Handlers are built once
//! at configuration time and shared by every work context that runs through
//! their chain, so they must be reentrant: all per-message state belongs in
//! the [`WorkContext`], never in the handler itself.
//!
//! # Structure
//!
//! - [`Handler`]: the step contract (`invoke` + `flow_complete`)
//! - [`SelfManagedDataManager`]: opt-in checkpointing of handler-private data
//! - [`registry`]: explicit name-to-handler lookup
//! - [`builtin`]: generic handlers usable from flow definition files

pub mod builtin;
pub mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::WorkContext;

pub use registry::HandlerRegistry;

/// What the engine should do after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationResponse {
    /// Proceed with the next handler in the chain.
    Continue,
    /// Freeze the pipeline. The context becomes paused and checkpointable;
    /// a later resume starts at the handler after this one.
    Suspend,
    /// Stop the flow without a fault. Already executed handlers (including
    /// this one) receive `flow_complete`.
    Abort,
}

/// Fault raised by a handler's `invoke`.
///
/// The engine surfaces it unmodified to the caller of `drive`/`resume`
/// after unwinding the chain.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("[{code}] {reason}")]
pub struct HandlerFault {
    /// Machine-readable fault code (e.g. "Client", "Server")
    pub code: String,
    /// Human-readable reason
    pub reason: String,
}

impl HandlerFault {
    /// Creates a new fault.
    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

/// A single pipeline step.
///
/// # Example
///
/// ```
/// use phaseflow::context::WorkContext;
/// use phaseflow::handler::{Handler, HandlerFault, InvocationResponse};
///
/// struct Stamp;
///
/// impl Handler for Stamp {
///     fn name(&self) -> &str {
///         "stamp"
///     }
///
///     fn invoke(&self, ctx: &mut WorkContext) -> Result<InvocationResponse, HandlerFault> {
///         ctx.set_property("stamped", serde_json::Value::Bool(true));
///         Ok(InvocationResponse::Continue)
///     }
/// }
/// ```
pub trait Handler: Send + Sync {
    /// Stable identity. Used to rebind handlers after a restore and as the
    /// owner key of self-managed data.
    fn name(&self) -> &str;

    /// Processes the work context.
    fn invoke(&self, ctx: &mut WorkContext) -> Result<InvocationResponse, HandlerFault>;

    /// Called once the flow this handler took part in has finished, either
    /// normally or by unwinding after a fault or abort. Must not fail.
    fn flow_complete(&self, _ctx: &mut WorkContext) {}

    /// Returns the self-managed data capability, if this handler has private
    /// state that needs custom checkpointing.
    fn self_managed(&self) -> Option<&dyn SelfManagedDataManager> {
        None
    }
}

impl fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.name()).finish()
    }
}

/// Custom checkpointing for a handler's self-managed data.
///
/// During a checkpoint the codec calls [`serialize_self_managed`] exactly
/// once per distinct handler that owns data in the context, regardless of
/// how many chain positions the handler occupies. On restore,
/// [`restore_self_managed`] receives the same bytes and is expected to put
/// the data back into the context.
///
/// [`serialize_self_managed`]: SelfManagedDataManager::serialize_self_managed
/// [`restore_self_managed`]: SelfManagedDataManager::restore_self_managed
pub trait SelfManagedDataManager: Send + Sync {
    /// Produces the bytes to persist, or `None` when there is nothing to save.
    fn serialize_self_managed(&self, ctx: &WorkContext) -> Option<Vec<u8>>;

    /// Restores previously serialized data into `ctx`.
    fn restore_self_managed(&self, data: &[u8], ctx: &mut WorkContext) -> Result<(), HandlerFault>;
}
