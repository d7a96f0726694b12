//! Engine Errors
//!
//! Error types surfaced by the execution engine and the checkpoint codec.
//! Configuration-time errors live in [`crate::config::ConfigError`].

use thiserror::Error;
use uuid::Uuid;

use crate::context::ContextState;
use crate::flow::FlowDirection;
use crate::handler::HandlerFault;

/// Errors produced while driving, resuming, checkpointing or restoring a
/// work context.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A handler failed during `invoke`. Always the originating fault,
    /// surfaced only after the unwind has completed.
    #[error("Handler fault: {0}")]
    HandlerFault(#[from] HandlerFault),

    /// The requested operation is not valid for the context's current state.
    #[error("Cannot {operation} message {message_id}: context is {state}")]
    InvalidState {
        message_id: Uuid,
        operation: &'static str,
        state: ContextState,
    },

    /// A checkpoint references a handler the current configuration cannot
    /// provide (renamed, removed, or lacking the self-managed capability).
    #[error("Configuration mismatch for handler '{handler}': {reason}")]
    ConfigurationMismatch { handler: String, reason: String },

    /// No execution chain is configured for the requested direction.
    #[error("No execution chain configured for the '{0}' flow")]
    UnknownFlow(FlowDirection),

    /// The checkpoint parsed but is structurally inconsistent.
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// The checkpoint was written with a schema version this build cannot read.
    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedCheckpointVersion { found: u32, expected: u32 },

    /// No checkpoint stored for the given message.
    #[error("No checkpoint found for message {0}")]
    CheckpointNotFound(Uuid),

    /// Checkpoint (de)serialization failure.
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure in a checkpoint store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other checkpoint storage failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Returns the originating handler fault, if this error carries one.
    pub fn fault(&self) -> Option<&HandlerFault> {
        match self {
            Self::HandlerFault(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Result alias used by the engine and checkpoint APIs.
pub type Result<T> = std::result::Result<T, EngineError>;
