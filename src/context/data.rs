//! Self-Managed Data
//!
//! Handler-private state stored on a work context, keyed by the owning
//! handler's name plus an application-chosen key.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// A self-managed value.
///
/// `Bytes` and `Json` can be written into a checkpoint generically;
/// `Opaque` values survive a checkpoint only through the owning handler's
/// [`SelfManagedDataManager`](crate::handler::SelfManagedDataManager).
#[derive(Clone)]
pub enum SelfManagedValue {
    Bytes(Vec<u8>),
    Json(Value),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl SelfManagedValue {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn json(value: Value) -> Self {
        Self::Json(value)
    }

    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque(Arc::new(value))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Downcasts an opaque value.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Opaque(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns true if the value can be checkpointed without the owner's help.
    pub fn is_serializable(&self) -> bool {
        !matches!(self, Self::Opaque(_))
    }
}

impl fmt::Debug for SelfManagedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(data) => f.debug_tuple("Bytes").field(&data.len()).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl PartialEq for SelfManagedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Self-managed entries of one work context, grouped by owner.
///
/// Owners and keys iterate in sorted order so checkpoints are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelfManagedStore {
    entries: BTreeMap<String, BTreeMap<String, SelfManagedValue>>,
}

impl SelfManagedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, returning the one it replaced.
    pub fn set(
        &mut self,
        owner: &str,
        key: &str,
        value: SelfManagedValue,
    ) -> Option<SelfManagedValue> {
        self.entries
            .entry(owner.to_string())
            .or_default()
            .insert(key.to_string(), value)
    }

    pub fn get(&self, owner: &str, key: &str) -> Option<&SelfManagedValue> {
        self.entries.get(owner).and_then(|keys| keys.get(key))
    }

    pub fn contains(&self, owner: &str, key: &str) -> bool {
        self.get(owner, key).is_some()
    }

    /// Removes a value. Owners left without entries are dropped.
    pub fn remove(&mut self, owner: &str, key: &str) -> Option<SelfManagedValue> {
        let keys = self.entries.get_mut(owner)?;
        let removed = keys.remove(key);
        if keys.is_empty() {
            self.entries.remove(owner);
        }
        removed
    }

    /// Owners that currently hold data.
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries of one owner.
    pub fn entries_for<'a>(
        &'a self,
        owner: &str,
    ) -> impl Iterator<Item = (&'a str, &'a SelfManagedValue)> {
        self.entries
            .get(owner)
            .into_iter()
            .flat_map(|keys| keys.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
