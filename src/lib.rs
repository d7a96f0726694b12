//! PhaseFlow - Handler/Phase Pipeline Engine
//!
//! Pushes messages through ordered chains of handlers grouped into named
//! phases. A flow can pause at any handler, be checkpointed to bytes,
//! restored in another process and resumed where it left off. Handlers that
//! keep per-message state take part in checkpointing through a small
//! serialize/restore callback protocol.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`handler`]: The handler contract, faults and built-in handlers
//! - [`flow`]: Phases, placement rules and directional execution chains
//! - [`context`]: Per-message work contexts and self-managed data
//! - [`engine`]: Drive/resume loop, unwind and fault-flow rebinding
//! - [`checkpoint`]: Versioned checkpoint format and checkpoint stores
//! - [`config`]: YAML flow definitions and flow configurations
//!
//! # Example
//!
//! ```rust
//! use phaseflow::config::{parse_flow_definition, FlowConfiguration};
//! use phaseflow::handler::HandlerRegistry;
//! use phaseflow::{Engine, FlowDirection, RunOutcome};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let definition = parse_flow_definition(
//!         r#"
//! name: orders
//! handlers:
//!   - name: audit
//!     kind: log
//!   - name: hold
//!     kind: suspend
//! flows:
//!   in:
//!     - name: Dispatch
//!       handlers: [audit, hold]
//! "#,
//!     )?;
//!     let config = FlowConfiguration::from_definition(&definition, HandlerRegistry::new())?;
//!     let engine = Engine::new(config);
//!
//!     let mut ctx = engine.create_context(FlowDirection::In, serde_json::json!({"order": 7}))?;
//!     assert_eq!(engine.drive(&mut ctx)?, RunOutcome::Suspended);
//!
//!     // Park the message, then pick it up again
//!     let bytes = engine.checkpoint(&ctx)?;
//!     let mut restored = engine.restore(&bytes)?;
//!     assert_eq!(engine.resume(&mut restored)?, RunOutcome::Completed);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod flow;
pub mod handler;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{load_flow_definition, FlowConfiguration};
pub use context::{ContextState, WorkContext};
pub use engine::{Engine, RunOutcome};
pub use error::EngineError;
pub use flow::{ExecutionChain, FlowDirection, Phase, PhaseRule};
pub use handler::{Handler, HandlerFault, InvocationResponse, SelfManagedDataManager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "PhaseFlow";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "PhaseFlow");
    }

    #[test]
    fn test_module_exports_fault() {
        let fault = HandlerFault::new("Client", "bad request");
        assert_eq!(fault.to_string(), "[Client] bad request");
    }

    #[test]
    fn test_module_exports_direction() {
        assert_eq!(FlowDirection::In.fault_counterpart(), FlowDirection::InFault);
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
