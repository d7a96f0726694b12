//! Flow Structure
//!
//! Configuration-time building blocks of a pipeline.
//!
//! - [`phase`]: named, ordered handler groups with placement rules
//! - [`chain`]: directional, flattened sequences of phases

pub mod chain;
pub mod phase;

pub use chain::{ChainPosition, ExecutionChain, FlowDirection, PhaseLayout};
pub use phase::{Phase, PhaseRule, PhaseRuleError};
