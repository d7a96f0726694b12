//! Flow Configuration
//!
//! Everything needed to assemble execution chains before any message runs:
//! the flow definition file format, its validation, and the resulting
//! [`FlowConfiguration`] that engines and checkpoint restores bind to.
//!
//! # Structure
//!
//! - [`model`]: Flow definition file structures (YAML)
//! - [`parser`]: Loading and serializing flow definitions
//! - [`validator`]: Structural checks on a definition
//! - [`flows`]: The built configuration and its programmatic builder

pub mod flows;
pub mod model;
pub mod parser;
pub mod validator;

use thiserror::Error;

use crate::flow::{FlowDirection, PhaseRuleError};

pub use flows::{FlowBuilder, FlowConfiguration};
pub use model::{FlowDefinition, FlowSet, HandlerDecl, HandlerRef, PhaseDecl};
pub use parser::{load_flow_definition, parse_flow_definition};
pub use validator::validate_definition;

/// Errors raised while building a flow configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read flow definition '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse flow definition: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Duplicate handler name: '{0}'")]
    DuplicateHandler(String),

    #[error("Duplicate phase '{phase}' in the {direction} flow")]
    DuplicatePhase {
        direction: FlowDirection,
        phase: String,
    },

    #[error("Phase '{phase}' references unknown handler '{name}'")]
    UnknownHandler { name: String, phase: String },

    #[error("No phase '{phase}' in the {direction} flow")]
    UnknownPhase {
        direction: FlowDirection,
        phase: String,
    },

    #[error("Handler '{handler}' has unknown kind '{kind}'")]
    UnknownKind { handler: String, kind: String },

    #[error("Handler '{handler}': invalid parameter '{param}': {reason}")]
    InvalidParameter {
        handler: String,
        param: String,
        reason: String,
    },

    #[error("Empty or whitespace-only {0} name")]
    EmptyName(String),

    #[error("Handler name '{0}' has leading or trailing whitespace")]
    PaddedName(String),

    #[error(transparent)]
    PhaseRule(#[from] PhaseRuleError),
}
