//! Test Fixtures
//!
//! Recording handlers shared by the unit tests of every module.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::config::FlowConfiguration;
use crate::context::{SelfManagedValue, WorkContext};
use crate::flow::{ExecutionChain, FlowDirection, Phase};
use crate::handler::{Handler, HandlerFault, InvocationResponse, SelfManagedDataManager};

/// Shared, ordered log of handler events.
///
/// `invoke` is recorded as the handler name, `flow_complete` as `FC:name`.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Invoke events only.
    pub fn invoked(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| !e.starts_with("FC:"))
            .collect()
    }

    /// `flow_complete` events only, without the prefix.
    pub fn completed(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix("FC:").map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// What a [`RecordingHandler`] does when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Continue,
    Suspend,
    Fail(&'static str),
    Abort,
    /// Continues, then panics in `flow_complete`
    PanicOnComplete,
}

pub struct RecordingHandler {
    name: String,
    journal: Journal,
    behavior: Behavior,
}

impl RecordingHandler {
    pub fn shared(name: &str, journal: &Journal, behavior: Behavior) -> Arc<dyn Handler> {
        Arc::new(Self {
            name: name.to_string(),
            journal: journal.clone(),
            behavior,
        })
    }
}

impl Handler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, _ctx: &mut WorkContext) -> Result<InvocationResponse, HandlerFault> {
        self.journal.record(self.name.clone());
        match self.behavior {
            Behavior::Continue | Behavior::PanicOnComplete => Ok(InvocationResponse::Continue),
            Behavior::Suspend => Ok(InvocationResponse::Suspend),
            Behavior::Abort => Ok(InvocationResponse::Abort),
            Behavior::Fail(code) => Err(HandlerFault::new(code, format!("{} failed", self.name))),
        }
    }

    fn flow_complete(&self, _ctx: &mut WorkContext) {
        self.journal.record(format!("FC:{}", self.name));
        if self.behavior == Behavior::PanicOnComplete {
            panic!("{} exploded during flow_complete", self.name);
        }
    }
}

/// Handler with self-managed data and counted checkpoint callbacks.
///
/// Each invoke bumps a `visits` counter stored as JSON self-managed data and
/// records the context's payload under `last_payload`.
pub struct StatefulHandler {
    name: String,
    response: InvocationResponse,
    serialize_calls: AtomicUsize,
    restore_calls: AtomicUsize,
}

impl StatefulHandler {
    pub fn new(name: &str, response: InvocationResponse) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            response,
            serialize_calls: AtomicUsize::new(0),
            restore_calls: AtomicUsize::new(0),
        })
    }

    pub fn serialize_calls(&self) -> usize {
        self.serialize_calls.load(Ordering::SeqCst)
    }

    pub fn restore_calls(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }

    pub fn visits(&self, ctx: &WorkContext) -> u64 {
        ctx.self_managed(&self.name, "visits")
            .and_then(|v| v.as_json())
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

impl Handler for StatefulHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, ctx: &mut WorkContext) -> Result<InvocationResponse, HandlerFault> {
        let visits = self.visits(ctx) + 1;
        let payload = ctx.payload().clone();
        ctx.set_self_managed(&self.name, "visits", SelfManagedValue::json(Value::from(visits)));
        ctx.set_self_managed(&self.name, "last_payload", SelfManagedValue::json(payload));
        Ok(self.response)
    }

    fn self_managed(&self) -> Option<&dyn SelfManagedDataManager> {
        Some(self)
    }
}

impl SelfManagedDataManager for StatefulHandler {
    fn serialize_self_managed(&self, ctx: &WorkContext) -> Option<Vec<u8>> {
        self.serialize_calls.fetch_add(1, Ordering::SeqCst);
        let entries: Map<String, Value> = ctx
            .self_managed_store()
            .entries_for(&self.name)
            .filter_map(|(key, value)| value.as_json().map(|v| (key.to_string(), v.clone())))
            .collect();
        if entries.is_empty() {
            return None;
        }
        serde_json::to_vec(&entries).ok()
    }

    fn restore_self_managed(&self, data: &[u8], ctx: &mut WorkContext) -> Result<(), HandlerFault> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        let entries: Map<String, Value> = serde_json::from_slice(data)
            .map_err(|e| HandlerFault::new("Server", e.to_string()))?;
        for (key, value) in entries {
            ctx.set_self_managed(&self.name, &key, SelfManagedValue::json(value));
        }
        Ok(())
    }
}

/// Appends its name to the payload, turning the payload into an array first.
pub struct PayloadHandler {
    name: String,
    response: InvocationResponse,
}

impl PayloadHandler {
    pub fn shared(name: &str, response: InvocationResponse) -> Arc<dyn Handler> {
        Arc::new(Self {
            name: name.to_string(),
            response,
        })
    }
}

impl Handler for PayloadHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, ctx: &mut WorkContext) -> Result<InvocationResponse, HandlerFault> {
        if !ctx.payload().is_array() {
            ctx.set_payload(Value::Array(Vec::new()));
        }
        if let Some(items) = ctx.payload_mut().as_array_mut() {
            items.push(Value::from(self.name.clone()));
        }
        Ok(self.response)
    }
}

/// Builds a chain of `direction` from `(phase name, handlers)` pairs.
pub fn chain_of(
    direction: FlowDirection,
    phases: Vec<(&str, Vec<Arc<dyn Handler>>)>,
) -> Arc<ExecutionChain> {
    let mut chain = ExecutionChain::new(direction);
    for (name, handlers) in phases {
        let mut phase = Phase::new(name);
        for handler in handlers {
            phase.add_handler(handler).unwrap();
        }
        chain.add_phase(phase);
    }
    Arc::new(chain)
}

/// Inbound chain with a single phase.
pub fn single_phase(handlers: Vec<Arc<dyn Handler>>) -> Arc<ExecutionChain> {
    chain_of(FlowDirection::In, vec![("Main", handlers)])
}

/// Configuration with one chain of `direction` built from `(phase name,
/// handlers)` pairs.
pub fn config_of(
    direction: FlowDirection,
    phases: Vec<(&str, Vec<Arc<dyn Handler>>)>,
) -> FlowConfiguration {
    let mut builder = FlowConfiguration::builder();
    for (name, handlers) in phases {
        builder.add_phase(direction, name).unwrap();
        for handler in handlers {
            builder.register_handler(direction, name, handler).unwrap();
        }
    }
    builder.build()
}
