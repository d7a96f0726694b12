//! Work Contexts
//!
//! Per-message state: payload, chain position, executed history, failure
//! slot, properties and handler-private self-managed data.

pub mod data;
pub mod work;

pub use data::{SelfManagedStore, SelfManagedValue};
pub use work::{ContextState, FailureRecord, WorkContext};
