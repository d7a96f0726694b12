//! Execution Engine
//!
//! Drives work contexts through their execution chains, suspends and
//! resumes them, and unwinds them on faults.
//!
//! # Architecture
//!
//! - [`driver`]: The drive/resume loop and the `flow_complete` unwind
//! - [`runner`]: [`Engine`], binding the driver and checkpoints to a
//!   flow configuration

pub mod driver;
pub mod runner;

pub use driver::{drive, resume, RunOutcome};
pub use runner::Engine;

pub use crate::error::Result;
