//! Handler Registry
//!
//! Explicit name-to-instance map. Chains are assembled from it at
//! configuration time, and the checkpoint codec uses it to rebind handler
//! names to live instances after a restore. There is no global registry:
//! every lookup goes through a registry the caller owns.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use super::builtin;
use super::Handler;
use crate::config::{ConfigError, HandlerDecl};

/// Named collection of shared handler instances.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry of built-in handlers from flow-file declarations.
    pub fn from_declarations(decls: &[HandlerDecl]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for decl in decls {
            registry.register(builtin::instantiate(decl)?)?;
        }
        Ok(registry)
    }

    /// Registers a handler under its own name.
    ///
    /// Registering the same instance twice is a no-op; registering a
    /// different instance under an existing name is an error, since names
    /// are the identity used by checkpoints.
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<(), ConfigError> {
        let name = checked_name(handler.as_ref())?.to_string();

        if let Some(existing) = self.handlers.get(&name) {
            if Arc::ptr_eq(existing, &handler) {
                return Ok(());
            }
            return Err(ConfigError::DuplicateHandler(name));
        }

        debug!("Registered handler '{}'", name);
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Looks up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// Returns true if a handler with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the registered handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Returns the handler's name if it can serve as its identity.
///
/// Names are used verbatim in chain layouts and checkpoints, so padded
/// names are rejected rather than trimmed.
pub(crate) fn checked_name(handler: &dyn Handler) -> Result<&str, ConfigError> {
    let name = handler.name();
    if name.trim().is_empty() {
        return Err(ConfigError::EmptyName("handler".to_string()));
    }
    if name.trim() != name {
        return Err(ConfigError::PaddedName(name.to_string()));
    }
    Ok(name)
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, Journal, RecordingHandler};

    #[test]
    fn test_register_and_lookup() {
        let journal = Journal::new();
        let mut registry = HandlerRegistry::new();
        registry
            .register(RecordingHandler::shared("H1", &journal, Behavior::Continue))
            .unwrap();

        assert!(registry.contains("H1"));
        assert_eq!(registry.get("H1").unwrap().name(), "H1");
        assert!(registry.get("H2").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_same_instance_twice() {
        let journal = Journal::new();
        let handler = RecordingHandler::shared("H1", &journal, Behavior::Continue);
        let mut registry = HandlerRegistry::new();

        registry.register(handler.clone()).unwrap();
        registry.register(handler).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_duplicate_name_rejected() {
        let journal = Journal::new();
        let mut registry = HandlerRegistry::new();
        registry
            .register(RecordingHandler::shared("H1", &journal, Behavior::Continue))
            .unwrap();

        let result = registry.register(RecordingHandler::shared("H1", &journal, Behavior::Suspend));
        assert!(matches!(result, Err(ConfigError::DuplicateHandler(name)) if name == "H1"));
    }

    #[test]
    fn test_register_empty_name_rejected() {
        let journal = Journal::new();
        let mut registry = HandlerRegistry::new();
        let result = registry.register(RecordingHandler::shared("  ", &journal, Behavior::Continue));
        assert!(matches!(result, Err(ConfigError::EmptyName(_))));
    }

    #[test]
    fn test_register_padded_name_rejected() {
        let journal = Journal::new();
        let mut registry = HandlerRegistry::new();
        let result = registry.register(RecordingHandler::shared(" H1", &journal, Behavior::Continue));
        assert!(matches!(result, Err(ConfigError::PaddedName(name)) if name == " H1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_names_sorted() {
        let journal = Journal::new();
        let mut registry = HandlerRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register(RecordingHandler::shared(name, &journal, Behavior::Continue))
                .unwrap();
        }
        assert_eq!(registry.names(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_from_declarations_builds_builtins() {
        let decls = vec![
            HandlerDecl::new("audit", "log"),
            HandlerDecl::new("hold", "suspend"),
        ];
        let registry = HandlerRegistry::from_declarations(&decls).unwrap();
        assert_eq!(registry.names(), vec!["audit", "hold"]);
    }

    #[test]
    fn test_from_declarations_unknown_kind() {
        let decls = vec![HandlerDecl::new("x", "teleport")];
        let result = HandlerRegistry::from_declarations(&decls);
        assert!(matches!(result, Err(ConfigError::UnknownKind { .. })));
    }
}
