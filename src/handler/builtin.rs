//! Built-in Handlers
//!
//! Generic handlers that can be referenced from a flow definition file by
//! `kind`, so a flow can be exercised without writing custom handlers.
//!
//! | kind           | behavior                                               |
//! |----------------|--------------------------------------------------------|
//! | `log`          | logs the message and continues                         |
//! | `suspend`      | records when it paused and suspends the flow           |
//! | `fail`         | raises a fault with the configured `code`/`reason`     |
//! | `abort`        | aborts the flow                                        |
//! | `set_property` | sets property `key` to `value` and continues           |

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use serde_json::Value;

use super::{Handler, HandlerFault, InvocationResponse, SelfManagedDataManager};
use crate::config::{ConfigError, HandlerDecl};
use crate::context::{SelfManagedValue, WorkContext};

/// Self-managed key under which [`SuspendHandler`] records its pause time.
pub const SUSPENDED_AT_KEY: &str = "suspended_at";

/// Instantiates the built-in handler described by `decl`.
pub fn instantiate(decl: &HandlerDecl) -> Result<Arc<dyn Handler>, ConfigError> {
    let name = decl.name.trim().to_string();
    if name.is_empty() {
        return Err(ConfigError::EmptyName("handler".to_string()));
    }

    let handler: Arc<dyn Handler> = match decl.kind.as_str() {
        "log" => Arc::new(LoggingHandler {
            name,
            message: string_param(decl, "message")?,
        }),
        "suspend" => Arc::new(SuspendHandler { name }),
        "fail" => Arc::new(FaultHandler {
            fault: HandlerFault::new(
                string_param(decl, "code")?.unwrap_or_else(|| "Server".to_string()),
                string_param(decl, "reason")?.unwrap_or_else(|| format!("{} failed", decl.name)),
            ),
            name,
        }),
        "abort" => Arc::new(AbortHandler { name }),
        "set_property" => {
            let key = string_param(decl, "key")?.ok_or_else(|| ConfigError::InvalidParameter {
                handler: name.clone(),
                param: "key".to_string(),
                reason: "required for set_property".to_string(),
            })?;
            let value = decl.params.get("value").cloned().unwrap_or(Value::Bool(true));
            Arc::new(PropertyHandler { name, key, value })
        }
        other => {
            return Err(ConfigError::UnknownKind {
                handler: name,
                kind: other.to_string(),
            })
        }
    };

    Ok(handler)
}

/// Reads an optional string parameter.
fn string_param(decl: &HandlerDecl, param: &str) -> Result<Option<String>, ConfigError> {
    match decl.params.get(param) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ConfigError::InvalidParameter {
            handler: decl.name.clone(),
            param: param.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

/// Logs each message it sees and continues.
pub struct LoggingHandler {
    name: String,
    message: Option<String>,
}

impl Handler for LoggingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, ctx: &mut WorkContext) -> Result<InvocationResponse, HandlerFault> {
        match &self.message {
            Some(message) => info!("{} {}: {}", ctx.log_id(), self.name, message),
            None => info!(
                "{} {} at {} of the {} flow",
                ctx.log_id(),
                self.name,
                ctx.flat_position(),
                ctx.direction()
            ),
        }
        Ok(InvocationResponse::Continue)
    }

    fn flow_complete(&self, ctx: &mut WorkContext) {
        debug!("{} {}: flow complete", ctx.log_id(), self.name);
    }
}

/// Suspends the flow, remembering when it did so.
///
/// The pause time is self-managed data, so it survives a checkpoint through
/// this handler's own serialize/restore callbacks.
pub struct SuspendHandler {
    name: String,
}

impl SuspendHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Handler for SuspendHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, ctx: &mut WorkContext) -> Result<InvocationResponse, HandlerFault> {
        let now = Utc::now().to_rfc3339();
        info!("{} {}: suspending flow", ctx.log_id(), self.name);
        ctx.set_self_managed(&self.name, SUSPENDED_AT_KEY, SelfManagedValue::bytes(now));
        Ok(InvocationResponse::Suspend)
    }

    fn flow_complete(&self, ctx: &mut WorkContext) {
        ctx.remove_self_managed(&self.name, SUSPENDED_AT_KEY);
    }

    fn self_managed(&self) -> Option<&dyn SelfManagedDataManager> {
        Some(self)
    }
}

impl SelfManagedDataManager for SuspendHandler {
    fn serialize_self_managed(&self, ctx: &WorkContext) -> Option<Vec<u8>> {
        ctx.self_managed(&self.name, SUSPENDED_AT_KEY)
            .and_then(|value| value.as_bytes())
            .map(|bytes| bytes.to_vec())
    }

    fn restore_self_managed(&self, data: &[u8], ctx: &mut WorkContext) -> Result<(), HandlerFault> {
        ctx.set_self_managed(&self.name, SUSPENDED_AT_KEY, SelfManagedValue::bytes(data));
        Ok(())
    }
}

/// Always fails with a fixed fault.
pub struct FaultHandler {
    name: String,
    fault: HandlerFault,
}

impl FaultHandler {
    pub fn new(name: impl Into<String>, fault: HandlerFault) -> Self {
        Self {
            name: name.into(),
            fault,
        }
    }
}

impl Handler for FaultHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, _ctx: &mut WorkContext) -> Result<InvocationResponse, HandlerFault> {
        Err(self.fault.clone())
    }
}

/// Aborts the flow.
pub struct AbortHandler {
    name: String,
}

impl Handler for AbortHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, ctx: &mut WorkContext) -> Result<InvocationResponse, HandlerFault> {
        info!("{} {}: aborting flow", ctx.log_id(), self.name);
        Ok(InvocationResponse::Abort)
    }
}

/// Sets a context property.
pub struct PropertyHandler {
    name: String,
    key: String,
    value: Value,
}

impl Handler for PropertyHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, ctx: &mut WorkContext) -> Result<InvocationResponse, HandlerFault> {
        ctx.set_property(self.key.clone(), self.value.clone());
        Ok(InvocationResponse::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{ExecutionChain, FlowDirection, Phase};

    fn context_for(handler: Arc<dyn Handler>) -> WorkContext {
        let mut phase = Phase::new("Test");
        phase.add_handler(handler).unwrap();
        let chain = ExecutionChain::from_phases(FlowDirection::In, vec![phase]);
        WorkContext::new(Arc::new(chain), Value::Null)
    }

    fn decl_with(name: &str, kind: &str, params: &[(&str, Value)]) -> HandlerDecl {
        let mut decl = HandlerDecl::new(name, kind);
        for (key, value) in params {
            decl.params.insert(key.to_string(), value.clone());
        }
        decl
    }

    #[test]
    fn test_instantiate_log() {
        let handler = instantiate(&HandlerDecl::new("audit", "log")).unwrap();
        let mut ctx = context_for(handler.clone());
        assert_eq!(handler.invoke(&mut ctx).unwrap(), InvocationResponse::Continue);
    }

    #[test]
    fn test_instantiate_fail_uses_params() {
        let decl = decl_with(
            "reject",
            "fail",
            &[
                ("code", Value::String("Client".into())),
                ("reason", Value::String("rejected".into())),
            ],
        );
        let handler = instantiate(&decl).unwrap();
        let mut ctx = context_for(handler.clone());

        let fault = handler.invoke(&mut ctx).unwrap_err();
        assert_eq!(fault, HandlerFault::new("Client", "rejected"));
    }

    #[test]
    fn test_instantiate_fail_defaults() {
        let handler = instantiate(&HandlerDecl::new("boom", "fail")).unwrap();
        let mut ctx = context_for(handler.clone());

        let fault = handler.invoke(&mut ctx).unwrap_err();
        assert_eq!(fault.code, "Server");
        assert_eq!(fault.reason, "boom failed");
    }

    #[test]
    fn test_instantiate_set_property() {
        let decl = decl_with(
            "stamp",
            "set_property",
            &[("key", Value::String("route".into())), ("value", Value::from(7))],
        );
        let handler = instantiate(&decl).unwrap();
        let mut ctx = context_for(handler.clone());

        handler.invoke(&mut ctx).unwrap();
        assert_eq!(ctx.property("route"), Some(&Value::from(7)));
    }

    #[test]
    fn test_instantiate_set_property_requires_key() {
        let result = instantiate(&HandlerDecl::new("stamp", "set_property"));
        assert!(matches!(result, Err(ConfigError::InvalidParameter { param, .. }) if param == "key"));
    }

    #[test]
    fn test_instantiate_rejects_non_string_param() {
        let decl = decl_with("audit", "log", &[("message", Value::from(3))]);
        assert!(matches!(instantiate(&decl), Err(ConfigError::InvalidParameter { .. })));
    }

    #[test]
    fn test_instantiate_abort() {
        let handler = instantiate(&HandlerDecl::new("stop", "abort")).unwrap();
        let mut ctx = context_for(handler.clone());
        assert_eq!(handler.invoke(&mut ctx).unwrap(), InvocationResponse::Abort);
    }

    #[test]
    fn test_suspend_handler_round_trips_pause_time() {
        let handler = SuspendHandler::new("hold");
        let mut ctx = context_for(Arc::new(SuspendHandler::new("hold")));

        assert_eq!(handler.invoke(&mut ctx).unwrap(), InvocationResponse::Suspend);
        let saved = handler.serialize_self_managed(&ctx).expect("pause time recorded");

        ctx.remove_self_managed("hold", SUSPENDED_AT_KEY);
        handler.restore_self_managed(&saved, &mut ctx).unwrap();

        let restored = ctx.self_managed("hold", SUSPENDED_AT_KEY).unwrap();
        assert_eq!(restored.as_bytes(), Some(saved.as_slice()));
    }

    #[test]
    fn test_suspend_handler_cleans_up_on_flow_complete() {
        let handler = SuspendHandler::new("hold");
        let mut ctx = context_for(Arc::new(SuspendHandler::new("hold")));

        handler.invoke(&mut ctx).unwrap();
        handler.flow_complete(&mut ctx);
        assert!(!ctx.contains_self_managed("hold", SUSPENDED_AT_KEY));
        assert!(handler.serialize_self_managed(&ctx).is_none());
    }
}
