//! Checkpoint Codec
//!
//! Converts a work context to a versioned JSON checkpoint and back.
//!
//! Self-managed data is written per owner. An owner whose handler in the
//! chain implements [`SelfManagedDataManager`](crate::handler::SelfManagedDataManager)
//! is asked for its bytes exactly once, however many positions it occupies.
//! Other owners' entries are written one by one when they are bytes or
//! JSON; opaque values cannot be written and are dropped with a warning.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::FlowConfiguration;
use crate::context::{ContextState, FailureRecord, SelfManagedStore, SelfManagedValue, WorkContext};
use crate::error::{EngineError, Result};
use crate::flow::{ChainPosition, ExecutionChain, FlowDirection, Phase, PhaseLayout};
use crate::handler::Handler;

/// Schema version written by this build.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Serialized form of a work context.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub version: u32,
    pub message_id: Uuid,
    pub direction: FlowDirection,

    /// Phase and handler names of the chain the context was bound to
    pub chain: Vec<PhaseLayout>,

    /// Next handler to run
    pub position: ChainPosition,

    /// Names of the handlers already invoked, in order
    pub executed: Vec<String>,

    pub state: ContextState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,

    pub payload: Value,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub self_managed: Vec<SelfManagedEntry>,

    pub created_at: DateTime<Utc>,
    pub checkpointed_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Total handlers in the recorded chain.
    pub fn handler_count(&self) -> usize {
        self.chain.iter().map(|p| p.handlers.len()).sum()
    }
}

/// How a self-managed entry was encoded.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryEncoding {
    /// Bytes produced by the owner's own serialize callback
    Handler,
    /// A raw bytes value
    Bytes,
    /// A JSON value
    Json,
}

/// One persisted self-managed entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelfManagedEntry {
    pub owner: String,

    /// Entry key; absent for [`EntryEncoding::Handler`] entries, which
    /// cover everything the owner stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub encoding: EntryEncoding,

    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(de::Error::custom)
    }
}

/// A self-managed value left out of a checkpoint because it could not be
/// serialized. Not an error: the checkpoint is still usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationDropped {
    pub owner: String,
    pub key: String,
}

impl fmt::Display for SerializationDropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Self-managed value '{}' of handler '{}' is not serializable and was dropped",
            self.key, self.owner
        )
    }
}

/// Captures a context, returning the checkpoint and every value that had to
/// be dropped.
///
/// A context in the middle of a drive or resume cannot be captured.
pub fn capture(ctx: &WorkContext) -> Result<(Checkpoint, Vec<SerializationDropped>)> {
    if ctx.state == ContextState::Running {
        return Err(EngineError::InvalidState {
            message_id: ctx.message_id,
            operation: "checkpoint",
            state: ctx.state,
        });
    }

    let mut entries = Vec::new();
    let mut dropped = Vec::new();

    for owner in ctx.self_managed.owners() {
        let manager = ctx.manager_for(owner).and_then(|h| h.self_managed());

        if let Some(manager) = manager {
            match manager.serialize_self_managed(ctx) {
                Some(data) => entries.push(SelfManagedEntry {
                    owner: owner.to_string(),
                    key: None,
                    encoding: EntryEncoding::Handler,
                    data,
                }),
                None => debug!("{} '{}' has no self-managed data to save", ctx.log_id(), owner),
            }
            continue;
        }

        for (key, value) in ctx.self_managed.entries_for(owner) {
            let (encoding, data) = match value {
                SelfManagedValue::Bytes(bytes) => (EntryEncoding::Bytes, bytes.clone()),
                SelfManagedValue::Json(json) => (EntryEncoding::Json, serde_json::to_vec(json)?),
                SelfManagedValue::Opaque(_) => {
                    let notice = SerializationDropped {
                        owner: owner.to_string(),
                        key: key.to_string(),
                    };
                    warn!("{} {}", ctx.log_id(), notice);
                    dropped.push(notice);
                    continue;
                }
            };
            entries.push(SelfManagedEntry {
                owner: owner.to_string(),
                key: Some(key.to_string()),
                encoding,
                data,
            });
        }
    }

    let checkpoint = Checkpoint {
        version: CHECKPOINT_VERSION,
        message_id: ctx.message_id,
        direction: ctx.direction(),
        chain: ctx.chain.layout(),
        position: ctx.position,
        executed: ctx.executed_names(),
        state: ctx.state,
        failure: ctx.failure.clone(),
        payload: ctx.payload.clone(),
        properties: ctx.properties.clone(),
        self_managed: entries,
        created_at: ctx.created_at,
        checkpointed_at: Utc::now(),
    };

    Ok((checkpoint, dropped))
}

/// Serializes a context to checkpoint bytes.
pub fn serialize(ctx: &WorkContext) -> Result<Vec<u8>> {
    let (checkpoint, dropped) = capture(ctx)?;
    let bytes = serde_json::to_vec_pretty(&checkpoint)?;

    info!(
        "{} Checkpointed at handler {} of {} ({} self-managed entries, {} dropped, {} bytes)",
        ctx.log_id(),
        ctx.flat_position(),
        checkpoint.handler_count(),
        checkpoint.self_managed.len(),
        dropped.len(),
        bytes.len()
    );
    Ok(bytes)
}

/// Parses checkpoint bytes without binding them to a configuration.
pub fn decode(bytes: &[u8]) -> Result<Checkpoint> {
    let raw: Value = serde_json::from_slice(bytes)?;

    let version = raw
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| EngineError::InvalidCheckpoint("missing schema version".to_string()))?;
    if version != u64::from(CHECKPOINT_VERSION) {
        return Err(EngineError::UnsupportedCheckpointVersion {
            found: u32::try_from(version).unwrap_or(u32::MAX),
            expected: CHECKPOINT_VERSION,
        });
    }

    Ok(serde_json::from_value(raw)?)
}

/// Rebuilds a work context from checkpoint bytes.
///
/// Handlers are resolved by name through `config`. Restoring fails as a
/// whole, returning no context, when the chain cannot be rebuilt, the
/// recorded position or history does not fit it, or a self-managed owner
/// is missing or lacks the capability to restore its data.
pub fn restore(bytes: &[u8], config: &FlowConfiguration) -> Result<WorkContext> {
    let checkpoint = decode(bytes)?;
    restore_checkpoint(checkpoint, config)
}

/// Rebuilds a work context from an already decoded checkpoint.
pub fn restore_checkpoint(checkpoint: Checkpoint, config: &FlowConfiguration) -> Result<WorkContext> {
    if checkpoint.state == ContextState::Running {
        return Err(EngineError::InvalidCheckpoint(
            "captured while running".to_string(),
        ));
    }

    let chain = resolve_chain(&checkpoint, config)?;

    if !chain.is_valid(checkpoint.position) {
        return Err(EngineError::InvalidCheckpoint(format!(
            "position {} is outside the {} flow",
            checkpoint.position, checkpoint.direction
        )));
    }

    let names = chain.handler_names();
    let executed_count = checkpoint.executed.len();
    if executed_count > names.len() || names[..executed_count] != checkpoint.executed[..] {
        return Err(EngineError::InvalidCheckpoint(
            "executed history is not a prefix of the chain".to_string(),
        ));
    }
    if checkpoint.state == ContextState::Suspended
        && executed_count != chain.flat_index(checkpoint.position)
    {
        return Err(EngineError::InvalidCheckpoint(format!(
            "suspended at {} with {} executed handlers",
            checkpoint.position, executed_count
        )));
    }

    // Resolve every callback owner before touching any state
    let mut callbacks: Vec<(Arc<dyn Handler>, Vec<u8>)> = Vec::new();
    let mut generic: Vec<(String, String, SelfManagedValue)> = Vec::new();

    for entry in checkpoint.self_managed {
        match entry.encoding {
            EntryEncoding::Handler => {
                let handler = chain
                    .find_handler(&entry.owner)
                    .cloned()
                    .or_else(|| config.handler(&entry.owner))
                    .ok_or_else(|| EngineError::ConfigurationMismatch {
                        handler: entry.owner.clone(),
                        reason: "owns self-managed data but is not configured".to_string(),
                    })?;
                if handler.self_managed().is_none() {
                    return Err(EngineError::ConfigurationMismatch {
                        handler: entry.owner,
                        reason: "can no longer restore its self-managed data".to_string(),
                    });
                }
                callbacks.push((handler, entry.data));
            }
            EntryEncoding::Bytes | EntryEncoding::Json => {
                let key = entry.key.ok_or_else(|| {
                    EngineError::InvalidCheckpoint(format!(
                        "self-managed entry of '{}' has no key",
                        entry.owner
                    ))
                })?;
                let value = if entry.encoding == EntryEncoding::Json {
                    SelfManagedValue::Json(serde_json::from_slice(&entry.data)?)
                } else {
                    SelfManagedValue::Bytes(entry.data)
                };
                generic.push((entry.owner, key, value));
            }
        }
    }

    let executed: Vec<ChainPosition> = chain
        .flattened()
        .take(executed_count)
        .map(|(pos, _)| pos)
        .collect();

    let mut ctx = WorkContext {
        message_id: checkpoint.message_id,
        chain,
        payload: checkpoint.payload,
        position: checkpoint.position,
        executed,
        state: checkpoint.state,
        failure: checkpoint.failure,
        self_managed: SelfManagedStore::new(),
        managers: callbacks
            .iter()
            .map(|(handler, _)| (handler.name().to_string(), Arc::clone(handler)))
            .collect(),
        properties: checkpoint.properties,
        created_at: checkpoint.created_at,
    };

    for (owner, key, value) in generic {
        ctx.self_managed.set(&owner, &key, value);
    }

    for (handler, data) in callbacks {
        if let Some(manager) = handler.self_managed() {
            manager.restore_self_managed(&data, &mut ctx).map_err(|fault| {
                error!(
                    "{} '{}' failed to restore its self-managed data: {}",
                    ctx.log_id(),
                    handler.name(),
                    fault
                );
                EngineError::HandlerFault(fault)
            })?;
        }
    }

    info!(
        "{} Restored {} context at handler {} of the {} flow",
        ctx.log_id(),
        ctx.state,
        ctx.flat_position(),
        ctx.direction()
    );
    Ok(ctx)
}

/// Returns the configured chain when its layout matches the checkpoint,
/// otherwise rebuilds one from the recorded layout.
fn resolve_chain(checkpoint: &Checkpoint, config: &FlowConfiguration) -> Result<Arc<ExecutionChain>> {
    if let Some(configured) = config.chain(checkpoint.direction) {
        if configured.layout() == checkpoint.chain {
            return Ok(Arc::clone(configured));
        }
        warn!(
            "Checkpoint {} was taken against a different {} flow layout, rebuilding it",
            checkpoint.message_id, checkpoint.direction
        );
    }

    let mut chain = ExecutionChain::new(checkpoint.direction);
    for layout in &checkpoint.chain {
        let mut phase = Phase::new(layout.name.as_str());
        for name in &layout.handlers {
            let handler = config
                .handler(name)
                .ok_or_else(|| EngineError::ConfigurationMismatch {
                    handler: name.clone(),
                    reason: format!("not provided by the configuration (phase '{}')", layout.name),
                })?;
            phase
                .add_handler(handler)
                .map_err(|e| EngineError::InvalidCheckpoint(e.to_string()))?;
        }
        chain.add_phase(phase);
    }
    Ok(Arc::new(chain))
}
