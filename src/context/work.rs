//! Work Context
//!
//! The unit of work flowing through an execution chain.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::data::{SelfManagedStore, SelfManagedValue};
use crate::flow::{ChainPosition, ExecutionChain, FlowDirection};
use crate::handler::{Handler, HandlerFault};

/// Lifecycle state of a work context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// Bound to a chain, not yet driven
    Created,
    /// Inside `drive` or `resume`
    Running,
    /// Paused by a handler and checkpointable
    Suspended,
    /// Reached the end of the chain
    Completed,
    /// A handler failed; the chain has been unwound
    Faulted,
    /// A handler aborted the flow; the chain has been unwound
    Aborted,
}

impl ContextState {
    /// Returns true for states the engine never leaves on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Faulted | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fault that stopped a flow and where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub fault: HandlerFault,
    /// Position of the failing handler
    pub position: ChainPosition,
    /// Name of the failing handler
    pub handler: String,
}

/// A message travelling through an execution chain.
///
/// The context is exclusively owned by whoever is driving it. It is `Send`,
/// so a suspended context can be handed to another thread and resumed there.
pub struct WorkContext {
    pub(crate) message_id: Uuid,
    pub(crate) chain: Arc<ExecutionChain>,
    pub(crate) payload: Value,
    pub(crate) position: ChainPosition,
    pub(crate) executed: Vec<ChainPosition>,
    pub(crate) state: ContextState,
    pub(crate) failure: Option<FailureRecord>,
    pub(crate) self_managed: SelfManagedStore,
    /// Handlers with the self-managed capability that own data in this
    /// context, kept across rebinds to another chain
    pub(crate) managers: BTreeMap<String, Arc<dyn Handler>>,
    pub(crate) properties: Map<String, Value>,
    pub(crate) created_at: DateTime<Utc>,
}

impl WorkContext {
    /// Creates a context bound to `chain`, positioned at its first handler.
    pub fn new(chain: Arc<ExecutionChain>, payload: Value) -> Self {
        let position = chain.start();
        Self {
            message_id: Uuid::new_v4(),
            chain,
            payload,
            position,
            executed: Vec::new(),
            state: ContextState::Created,
            failure: None,
            self_managed: SelfManagedStore::new(),
            managers: BTreeMap::new(),
            properties: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Replaces the generated message id.
    pub fn with_message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Short id used as a log prefix.
    pub fn log_id(&self) -> String {
        let id = self.message_id.simple().to_string();
        format!("[{}]", &id[..8])
    }

    pub fn direction(&self) -> FlowDirection {
        self.chain.direction()
    }

    pub fn chain(&self) -> &Arc<ExecutionChain> {
        &self.chain
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Value {
        &mut self.payload
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = payload;
    }

    /// Position of the next handler to run.
    pub fn position(&self) -> ChainPosition {
        self.position
    }

    /// Position as an index into the flattened chain.
    pub fn flat_position(&self) -> usize {
        self.chain.flat_index(self.position)
    }

    /// Positions of handlers already invoked, in invocation order.
    pub fn executed(&self) -> &[ChainPosition] {
        &self.executed
    }

    /// Names of handlers already invoked, in invocation order.
    pub fn executed_names(&self) -> Vec<String> {
        self.executed
            .iter()
            .filter_map(|pos| self.chain.handler_at(*pos))
            .map(|h| h.name().to_string())
            .collect()
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == ContextState::Suspended
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        self.failure.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.properties.insert(key.into(), value)
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// Stores handler-private data. Setting an existing key overwrites it.
    ///
    /// If `owner` names a handler of the bound chain that can checkpoint its
    /// own data, that handler stays responsible for the data even after the
    /// context moves to another chain.
    pub fn set_self_managed(&mut self, owner: &str, key: &str, value: SelfManagedValue) {
        if !self.managers.contains_key(owner) {
            if let Some(handler) = self
                .chain
                .find_handler(owner)
                .filter(|h| h.self_managed().is_some())
            {
                self.managers.insert(owner.to_string(), Arc::clone(handler));
            }
        }
        self.self_managed.set(owner, key, value);
    }

    pub fn self_managed(&self, owner: &str, key: &str) -> Option<&SelfManagedValue> {
        self.self_managed.get(owner, key)
    }

    pub fn contains_self_managed(&self, owner: &str, key: &str) -> bool {
        self.self_managed.contains(owner, key)
    }

    pub fn remove_self_managed(&mut self, owner: &str, key: &str) -> Option<SelfManagedValue> {
        self.self_managed.remove(owner, key)
    }

    pub fn self_managed_store(&self) -> &SelfManagedStore {
        &self.self_managed
    }

    /// Returns the handler that checkpoints `owner`'s data, if any.
    pub(crate) fn manager_for(&self, owner: &str) -> Option<&Arc<dyn Handler>> {
        self.managers
            .get(owner)
            .or_else(|| self.chain.find_handler(owner))
            .filter(|h| h.self_managed().is_some())
    }

    /// Rebinds the context to another chain and rewinds it to the start.
    pub(crate) fn rebind(&mut self, chain: Arc<ExecutionChain>) {
        self.position = chain.start();
        self.chain = chain;
        self.executed.clear();
        self.state = ContextState::Created;
    }
}

impl fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkContext")
            .field("message_id", &self.message_id)
            .field("direction", &self.direction())
            .field("state", &self.state)
            .field("position", &self.position)
            .field("executed", &self.executed_names())
            .field("failure", &self.failure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Phase;
    use crate::handler::InvocationResponse;
    use crate::testing::{Behavior, Journal, RecordingHandler, StatefulHandler};

    fn chain() -> Arc<ExecutionChain> {
        let journal = Journal::new();
        let mut phase = Phase::new("Only");
        phase
            .add_handler(RecordingHandler::shared("H1", &journal, Behavior::Continue))
            .unwrap();
        Arc::new(ExecutionChain::from_phases(FlowDirection::Out, vec![phase]))
    }

    #[test]
    fn test_new_context() {
        let ctx = WorkContext::new(chain(), Value::from("hello"));
        assert_eq!(ctx.state(), ContextState::Created);
        assert_eq!(ctx.position(), ChainPosition::START);
        assert_eq!(ctx.direction(), FlowDirection::Out);
        assert_eq!(ctx.payload(), &Value::from("hello"));
        assert!(ctx.executed().is_empty());
        assert!(ctx.failure().is_none());
        assert!(!ctx.is_paused());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = WorkContext::new(chain(), Value::Null);
        let b = WorkContext::new(chain(), Value::Null);
        assert_ne!(a.message_id(), b.message_id());

        let fixed = Uuid::new_v4();
        let c = WorkContext::new(chain(), Value::Null).with_message_id(fixed);
        assert_eq!(c.message_id(), fixed);
        assert_eq!(c.log_id().len(), 10);
    }

    #[test]
    fn test_properties() {
        let mut ctx = WorkContext::new(chain(), Value::Null);
        assert!(ctx.set_property("a", Value::from(1)).is_none());
        assert_eq!(ctx.set_property("a", Value::from(2)), Some(Value::from(1)));
        assert_eq!(ctx.property("a"), Some(&Value::from(2)));
        assert_eq!(ctx.remove_property("a"), Some(Value::from(2)));
        assert!(ctx.properties().is_empty());
    }

    #[test]
    fn test_self_managed_overwrite() {
        let mut ctx = WorkContext::new(chain(), Value::Null);
        ctx.set_self_managed("H1", "k", SelfManagedValue::bytes("one"));
        ctx.set_self_managed("H1", "k", SelfManagedValue::bytes("two"));

        assert_eq!(ctx.self_managed_store().len(), 1);
        assert_eq!(
            ctx.self_managed("H1", "k").and_then(|v| v.as_bytes()),
            Some(&b"two"[..])
        );
    }

    #[test]
    fn test_manager_survives_rebind() {
        let keeper: Arc<dyn Handler> = StatefulHandler::new("keeper", InvocationResponse::Continue);
        let mut phase = Phase::new("Only");
        phase.add_handler(keeper).unwrap();
        let mut ctx = WorkContext::new(
            Arc::new(ExecutionChain::from_phases(FlowDirection::In, vec![phase])),
            Value::Null,
        );

        ctx.set_self_managed("keeper", "token", SelfManagedValue::opaque(7u32));
        ctx.set_self_managed("stranger", "k", SelfManagedValue::bytes("x"));
        ctx.rebind(chain());

        assert_eq!(ctx.manager_for("keeper").map(|h| h.name()), Some("keeper"));
        assert!(ctx.manager_for("stranger").is_none());
        // In the chain but without the capability
        assert!(ctx.manager_for("H1").is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ContextState::Suspended.to_string(), "suspended");
        assert!(ContextState::Aborted.is_terminal());
        assert!(!ContextState::Suspended.is_terminal());
        let json = serde_json::to_string(&ContextState::Faulted).unwrap();
        assert_eq!(json, "\"faulted\"");
    }

    #[test]
    fn test_context_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WorkContext>();
    }
}
