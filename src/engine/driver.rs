//! Chain Driver
//!
//! The drive/resume loop and the `flow_complete` unwind.
//!
//! Both entry points walk the context's chain from its saved position:
//!
//! - `Continue`: the handler joins the executed history and the walk advances
//! - `Suspend`: as `Continue`, then the walk stops with the context paused
//! - `Abort`: the handler joins the history and the chain is unwound
//! - fault: the failure is recorded, the chain is unwound and the original
//!   fault is returned
//!
//! Reaching the end of the chain clears the failure slot and runs the same
//! reverse `flow_complete` pass over everything that executed.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::context::{ContextState, FailureRecord, WorkContext};
use crate::error::{EngineError, Result};
use crate::flow::ExecutionChain;
use crate::handler::InvocationResponse;

/// How a drive or resume call ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every handler ran; `flow_complete` has been delivered.
    Completed,
    /// A handler suspended the flow. Checkpoint the context, then resume it.
    Suspended,
    /// A handler aborted the flow; `flow_complete` has been delivered.
    Aborted,
}

/// Runs a freshly created context from the start of its chain.
///
/// Fails with [`EngineError::InvalidState`] unless the context is
/// [`ContextState::Created`], and with [`EngineError::HandlerFault`]
/// carrying the handler's own fault once the chain has been unwound.
pub fn drive(ctx: &mut WorkContext) -> Result<RunOutcome> {
    if ctx.state != ContextState::Created {
        return Err(invalid_state(ctx, "drive"));
    }

    info!(
        "{} Driving {} flow ({} handlers)",
        ctx.log_id(),
        ctx.direction(),
        ctx.chain.handler_count()
    );
    run(ctx)
}

/// Continues a suspended context at the handler after the one that
/// suspended it.
///
/// A context that is not suspended is rejected without any side effect.
pub fn resume(ctx: &mut WorkContext) -> Result<RunOutcome> {
    if ctx.state != ContextState::Suspended {
        return Err(invalid_state(ctx, "resume"));
    }

    info!(
        "{} Resuming {} flow at handler {}",
        ctx.log_id(),
        ctx.direction(),
        ctx.flat_position()
    );
    run(ctx)
}

fn invalid_state(ctx: &WorkContext, operation: &'static str) -> EngineError {
    EngineError::InvalidState {
        message_id: ctx.message_id,
        operation,
        state: ctx.state,
    }
}

fn run(ctx: &mut WorkContext) -> Result<RunOutcome> {
    ctx.state = ContextState::Running;
    let chain = Arc::clone(&ctx.chain);

    loop {
        let pos = chain.normalize(ctx.position);
        ctx.position = pos;

        let handler = match chain.handler_at(pos) {
            Some(handler) => Arc::clone(handler),
            None => break,
        };

        debug!("{} Invoking '{}' at {}", ctx.log_id(), handler.name(), pos);

        match handler.invoke(ctx) {
            Ok(InvocationResponse::Continue) => {
                ctx.executed.push(pos);
                ctx.position = chain.next_position(pos);
            }
            Ok(InvocationResponse::Suspend) => {
                ctx.executed.push(pos);
                ctx.position = chain.next_position(pos);
                ctx.state = ContextState::Suspended;
                info!(
                    "{} Suspended by '{}' after {} of {} handlers",
                    ctx.log_id(),
                    handler.name(),
                    ctx.executed.len(),
                    chain.handler_count()
                );
                return Ok(RunOutcome::Suspended);
            }
            Ok(InvocationResponse::Abort) => {
                ctx.executed.push(pos);
                warn!("{} Aborted by '{}', unwinding", ctx.log_id(), handler.name());
                unwind(ctx, &chain);
                ctx.state = ContextState::Aborted;
                return Ok(RunOutcome::Aborted);
            }
            Err(fault) => {
                error!("{} Handler '{}' failed: {}", ctx.log_id(), handler.name(), fault);
                ctx.failure = Some(FailureRecord {
                    fault: fault.clone(),
                    position: pos,
                    handler: handler.name().to_string(),
                });
                unwind(ctx, &chain);
                ctx.state = ContextState::Faulted;
                return Err(EngineError::HandlerFault(fault));
            }
        }
    }

    ctx.failure = None;
    unwind(ctx, &chain);
    ctx.state = ContextState::Completed;
    info!(
        "{} Completed {} flow ({} handlers)",
        ctx.log_id(),
        ctx.direction(),
        ctx.executed.len()
    );
    Ok(RunOutcome::Completed)
}

/// Delivers `flow_complete` to every executed handler, most recent first.
///
/// A panicking `flow_complete` is logged and the unwind carries on.
fn unwind(ctx: &mut WorkContext, chain: &ExecutionChain) {
    let executed: Vec<_> = ctx.executed.iter().rev().copied().collect();

    for pos in executed {
        let Some(handler) = chain.handler_at(pos) else {
            continue;
        };
        debug!("{} flow_complete '{}'", ctx.log_id(), handler.name());

        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.flow_complete(ctx)));
        if let Err(payload) = result {
            error!(
                "{} flow_complete of '{}' panicked: {}",
                ctx.log_id(),
                handler.name(),
                panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
