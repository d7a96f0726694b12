//! Checkpoint Stores
//!
//! Small keyed stores for serialized checkpoints, so a host can park a
//! suspended context and pick it up later by message id.
//!
//! The file store writes one `{message_id}.checkpoint.json` per context
//! under `.phaseflow/` by default.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::info;
use uuid::Uuid;

use super::codec::{restore, serialize};
use crate::config::FlowConfiguration;
use crate::context::WorkContext;
use crate::error::{EngineError, Result};

/// Default directory of [`FileCheckpointStore`].
pub const DEFAULT_CHECKPOINT_DIR: &str = ".phaseflow";

/// Keyed storage for checkpoint bytes.
pub trait CheckpointStore: Send + Sync {
    /// Stores checkpoint bytes, replacing any previous ones for the id.
    fn put(&self, message_id: Uuid, bytes: &[u8]) -> Result<()>;

    /// Returns the stored bytes, if any.
    fn get(&self, message_id: Uuid) -> Result<Option<Vec<u8>>>;

    /// Removes a checkpoint. Returns false if there was none.
    fn delete(&self, message_id: Uuid) -> Result<bool>;

    fn contains(&self, message_id: Uuid) -> Result<bool>;

    /// Serializes and stores a context under its message id.
    fn save(&self, ctx: &WorkContext) -> Result<()> {
        let bytes = serialize(ctx)?;
        self.put(ctx.message_id(), &bytes)
    }

    /// Loads and restores a context against `config`.
    fn load(&self, message_id: Uuid, config: &FlowConfiguration) -> Result<WorkContext> {
        let bytes = self
            .get(message_id)?
            .ok_or(EngineError::CheckpointNotFound(message_id))?;
        restore(&bytes, config)
    }
}

/// One JSON file per checkpoint in a directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the checkpoint file path for a message.
    pub fn path_for(&self, message_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", message_id))
    }
}

impl Default for FileCheckpointStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_DIR)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn put(&self, message_id: Uuid, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        // Write beside the target, then rename, so a crash never leaves a
        // truncated checkpoint under the final name
        let path = self.path_for(message_id);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, bytes)?;
        fs::rename(&staging, &path)?;

        info!("Saved checkpoint to {}", path.display());
        Ok(())
    }

    fn get(&self, message_id: Uuid) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(message_id);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&path)?;
        info!("Loaded checkpoint from {}", path.display());
        Ok(Some(bytes))
    }

    fn delete(&self, message_id: Uuid) -> Result<bool> {
        let path = self.path_for(message_id);
        if !path.exists() {
            return Ok(false);
        }

        fs::remove_file(&path)?;
        info!("Deleted checkpoint file: {}", path.display());
        Ok(true)
    }

    fn contains(&self, message_id: Uuid) -> Result<bool> {
        Ok(self.path_for(message_id).exists())
    }
}

/// Process-local checkpoint store.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<HashMap<Uuid, Vec<u8>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<Uuid, Vec<u8>>) -> T) -> Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| EngineError::Storage("checkpoint store lock poisoned".to_string()))?;
        Ok(f(&mut entries))
    }

    pub fn len(&self) -> Result<usize> {
        self.with_entries(|entries| entries.len())
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn put(&self, message_id: Uuid, bytes: &[u8]) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(message_id, bytes.to_vec());
        })
    }

    fn get(&self, message_id: Uuid) -> Result<Option<Vec<u8>>> {
        self.with_entries(|entries| entries.get(&message_id).cloned())
    }

    fn delete(&self, message_id: Uuid) -> Result<bool> {
        self.with_entries(|entries| entries.remove(&message_id).is_some())
    }

    fn contains(&self, message_id: Uuid) -> Result<bool> {
        self.with_entries(|entries| entries.contains_key(&message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{drive, resume, RunOutcome};
    use crate::flow::FlowDirection;
    use crate::testing::{config_of, Behavior, Journal, RecordingHandler};
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn suspending_config(journal: &Journal) -> FlowConfiguration {
        config_of(
            FlowDirection::Out,
            vec![(
                "Main",
                vec![
                    RecordingHandler::shared("H1", journal, Behavior::Suspend),
                    RecordingHandler::shared("H2", journal, Behavior::Continue),
                ],
            )],
        )
    }

    fn suspended(config: &FlowConfiguration) -> WorkContext {
        let chain = Arc::clone(config.chain(FlowDirection::Out).unwrap());
        let mut ctx = WorkContext::new(chain, Value::from("body"));
        drive(&mut ctx).unwrap();
        ctx
    }

    #[test]
    fn test_file_store_save_load_delete() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));
        let journal = Journal::new();
        let config = suspending_config(&journal);
        let ctx = suspended(&config);
        let id = ctx.message_id();

        assert!(!store.contains(id).unwrap());
        store.save(&ctx).unwrap();
        assert!(store.contains(id).unwrap());
        assert!(store.path_for(id).exists());

        let mut loaded = store.load(id, &config).unwrap();
        assert_eq!(loaded.message_id(), id);
        assert_eq!(resume(&mut loaded).unwrap(), RunOutcome::Completed);
        assert_eq!(journal.invoked(), vec!["H1", "H2"]);

        assert!(store.delete(id).unwrap());
        assert!(!store.delete(id).unwrap());
        assert!(matches!(
            store.load(id, &config),
            Err(EngineError::CheckpointNotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn test_file_store_overwrites() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let id = Uuid::new_v4();

        store.put(id, b"first").unwrap();
        store.put(id, b"second").unwrap();
        assert_eq!(store.get(id).unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn test_file_store_leaves_no_staging_files() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let id = Uuid::new_v4();

        store.put(id, b"{}").unwrap();
        store.put(id, b"{\"v\": 2}").unwrap();

        let files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![store.path_for(id).file_name().unwrap().to_owned()]);
        assert_eq!(store.get(id).unwrap(), Some(b"{\"v\": 2}".to_vec()));
    }

    #[test]
    fn test_file_store_default_dir() {
        let store = FileCheckpointStore::default();
        assert_eq!(store.dir(), Path::new(DEFAULT_CHECKPOINT_DIR));
        let id = Uuid::nil();
        assert!(store
            .path_for(id)
            .ends_with("00000000-0000-0000-0000-000000000000.checkpoint.json"));
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryCheckpointStore::new();
        let journal = Journal::new();
        let config = suspending_config(&journal);
        let ctx = suspended(&config);
        let id = ctx.message_id();

        store.save(&ctx).unwrap();
        assert_eq!(store.len().unwrap(), 1);

        let loaded = store.load(id, &config).unwrap();
        assert!(loaded.is_paused());

        assert!(store.delete(id).unwrap());
        assert!(!store.contains(id).unwrap());
        assert!(store.get(id).unwrap().is_none());
    }
}
