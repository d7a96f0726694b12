//! Checkpointing
//!
//! Serialize/restore of suspended work contexts.
//!
//! # Structure
//!
//! - [`codec`]: Versioned JSON checkpoint format and the self-managed data
//!   callback protocol
//! - [`store`]: File and in-memory checkpoint stores keyed by message id

pub mod codec;
pub mod store;

pub use codec::{
    capture, decode, restore, restore_checkpoint, serialize, Checkpoint, EntryEncoding,
    SelfManagedEntry, SerializationDropped, CHECKPOINT_VERSION,
};
pub use store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
