//! Phases
//!
//! A phase is a named, ordered group of handlers. Order is fixed at
//! configuration time: plain additions append, and handlers added with a
//! [`PhaseRule`] are placed so every rule in the phase keeps holding,
//! whatever order the handlers were added in.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handler::Handler;

/// Placement constraints for a handler within its phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRule {
    /// Handler must run first in the phase
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub phase_first: bool,

    /// Handler must run last in the phase
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub phase_last: bool,

    /// Handler must run before the named handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,

    /// Handler must run after the named handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl PhaseRule {
    pub fn first() -> Self {
        Self {
            phase_first: true,
            ..Self::default()
        }
    }

    pub fn last() -> Self {
        Self {
            phase_last: true,
            ..Self::default()
        }
    }

    pub fn before(handler: impl Into<String>) -> Self {
        Self {
            before: Some(handler.into()),
            ..Self::default()
        }
    }

    pub fn after(handler: impl Into<String>) -> Self {
        Self {
            after: Some(handler.into()),
            ..Self::default()
        }
    }

    /// Adds an `after` constraint to an existing rule.
    pub fn and_after(mut self, handler: impl Into<String>) -> Self {
        self.after = Some(handler.into());
        self
    }

    /// Returns true if the rule places no constraint.
    pub fn is_unconstrained(&self) -> bool {
        *self == Self::default()
    }
}

/// A handler placement that cannot be honored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseRuleError {
    #[error("Handler '{handler}' cannot be both phase-first and phase-last")]
    FirstAndLast { handler: String },

    #[error("Phase '{phase}' already has a phase-first handler ('{existing}')")]
    FirstAlreadySet { phase: String, existing: String },

    #[error("Phase '{phase}' already has a phase-last handler ('{existing}')")]
    LastAlreadySet { phase: String, existing: String },

    #[error("Handler '{handler}' cannot be placed relative to itself")]
    SelfReference { handler: String },

    #[error("Placement rules for handler '{handler}' in phase '{phase}' cannot be satisfied")]
    Unsatisfiable { phase: String, handler: String },
}

struct PhaseEntry {
    handler: Arc<dyn Handler>,
    rule: PhaseRule,
}

/// A named, ordered list of handlers.
pub struct Phase {
    name: String,
    entries: Vec<PhaseEntry>,
}

impl Phase {
    /// Creates an empty phase. An empty phase is a legal no-op step.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a handler.
    ///
    /// The handler lands after every existing handler, except a phase-last
    /// handler or one that declared it must run after this one.
    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) -> Result<(), PhaseRuleError> {
        self.add_handler_with_rule(handler, PhaseRule::default())
    }

    /// Inserts a handler at the latest position that satisfies `rule` and
    /// the rules of the handlers already in the phase.
    pub fn add_handler_with_rule(
        &mut self,
        handler: Arc<dyn Handler>,
        rule: PhaseRule,
    ) -> Result<(), PhaseRuleError> {
        let index = self.placement(handler.name(), &rule)?;
        self.entries.insert(index, PhaseEntry { handler, rule });
        Ok(())
    }

    /// Computes the insertion index for a new handler.
    fn placement(&self, name: &str, rule: &PhaseRule) -> Result<usize, PhaseRuleError> {
        if rule.phase_first && rule.phase_last {
            return Err(PhaseRuleError::FirstAndLast {
                handler: name.to_string(),
            });
        }
        if rule.before.as_deref() == Some(name) || rule.after.as_deref() == Some(name) {
            return Err(PhaseRuleError::SelfReference {
                handler: name.to_string(),
            });
        }

        let mut lo = 0;
        let mut hi = self.entries.len();

        if let Some(first) = self.entries.iter().find(|e| e.rule.phase_first) {
            if rule.phase_first {
                return Err(PhaseRuleError::FirstAlreadySet {
                    phase: self.name.clone(),
                    existing: first.handler.name().to_string(),
                });
            }
            lo = 1;
        }

        if let Some(last) = self.entries.iter().find(|e| e.rule.phase_last) {
            if rule.phase_last {
                return Err(PhaseRuleError::LastAlreadySet {
                    phase: self.name.clone(),
                    existing: last.handler.name().to_string(),
                });
            }
            hi = self.entries.len() - 1;
        }

        if rule.phase_first {
            hi = 0;
        }
        if rule.phase_last {
            lo = lo.max(hi);
        }

        if let Some(after) = rule.after.as_deref() {
            if let Some(i) = self.entries.iter().rposition(|e| e.handler.name() == after) {
                lo = lo.max(i + 1);
            }
        }
        if let Some(before) = rule.before.as_deref() {
            if let Some(i) = self.entries.iter().position(|e| e.handler.name() == before) {
                hi = hi.min(i);
            }
        }

        // Existing handlers may have constrained themselves against this one
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.rule.before.as_deref() == Some(name) {
                lo = lo.max(i + 1);
            }
            if entry.rule.after.as_deref() == Some(name) {
                hi = hi.min(i);
            }
        }

        if lo > hi {
            return Err(PhaseRuleError::Unsatisfiable {
                phase: self.name.clone(),
                handler: name.to_string(),
            });
        }

        Ok(hi)
    }

    /// Returns the handler at `index`.
    pub fn handler(&self, index: usize) -> Option<&Arc<dyn Handler>> {
        self.entries.get(index).map(|e| &e.handler)
    }

    /// Iterates handlers in execution order.
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.entries.iter().map(|e| &e.handler)
    }

    /// Returns handler names in execution order.
    pub fn handler_names(&self) -> Vec<String> {
        self.handlers().map(|h| h.name().to_string()).collect()
    }

    /// Returns the placement rule a handler was added with.
    pub fn rule_of(&self, handler: &str) -> Option<&PhaseRule> {
        self.entries
            .iter()
            .find(|e| e.handler.name() == handler)
            .map(|e| &e.rule)
    }

    pub fn contains(&self, handler: &str) -> bool {
        self.entries.iter().any(|e| e.handler.name() == handler)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("handlers", &self.handler_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, Journal, RecordingHandler};

    fn handler(name: &str) -> Arc<dyn Handler> {
        RecordingHandler::shared(name, &Journal::new(), Behavior::Continue)
    }

    #[test]
    fn test_empty_phase() {
        let phase = Phase::new(" Dispatch ");
        assert_eq!(phase.name(), "Dispatch");
        assert!(phase.is_empty());
        assert!(phase.handler(0).is_none());
    }

    #[test]
    fn test_add_handler_appends_in_order() {
        let mut phase = Phase::new("Transport");
        phase.add_handler(handler("H1")).unwrap();
        phase.add_handler(handler("H2")).unwrap();
        phase.add_handler(handler("H3")).unwrap();

        assert_eq!(phase.handler_names(), vec!["H1", "H2", "H3"]);
        assert_eq!(phase.len(), 3);
        assert!(phase.contains("H2"));
    }

    #[test]
    fn test_same_handler_twice() {
        let shared = handler("H1");
        let mut phase = Phase::new("Transport");
        phase.add_handler(shared.clone()).unwrap();
        phase.add_handler(shared).unwrap();

        assert_eq!(phase.handler_names(), vec!["H1", "H1"]);
    }

    #[test]
    fn test_before_rule() {
        let mut phase = Phase::new("PhaseA");
        phase.add_handler(handler("H1")).unwrap();
        phase
            .add_handler_with_rule(handler("H2"), PhaseRule::before("H1"))
            .unwrap();

        assert_eq!(phase.handler_names(), vec!["H2", "H1"]);
    }

    #[test]
    fn test_before_rule_added_first() {
        // The rule still holds when the referenced handler arrives later
        let mut phase = Phase::new("PhaseA");
        phase
            .add_handler_with_rule(handler("H2"), PhaseRule::before("H1"))
            .unwrap();
        phase.add_handler(handler("H1")).unwrap();

        assert_eq!(phase.handler_names(), vec!["H2", "H1"]);
    }

    #[test]
    fn test_before_and_after_rules() {
        let mut phase = Phase::new("PhaseA");
        phase.add_handler(handler("H1")).unwrap();
        phase.add_handler(handler("H2")).unwrap();
        phase
            .add_handler_with_rule(handler("H3"), PhaseRule::after("H1"))
            .unwrap();
        phase
            .add_handler_with_rule(handler("H4"), PhaseRule::before("H2").and_after("H1"))
            .unwrap();

        assert_eq!(phase.handler_names(), vec!["H1", "H4", "H2", "H3"]);
    }

    #[test]
    fn test_phase_first_and_last() {
        let mut phase = Phase::new("PhaseA");
        phase.add_handler(handler("mid1")).unwrap();
        phase
            .add_handler_with_rule(handler("tail"), PhaseRule::last())
            .unwrap();
        phase
            .add_handler_with_rule(handler("head"), PhaseRule::first())
            .unwrap();
        phase.add_handler(handler("mid2")).unwrap();

        assert_eq!(phase.handler_names(), vec!["head", "mid1", "mid2", "tail"]);
        assert_eq!(phase.rule_of("tail"), Some(&PhaseRule::last()));
    }

    #[test]
    fn test_second_phase_first_rejected() {
        let mut phase = Phase::new("PhaseA");
        phase
            .add_handler_with_rule(handler("a"), PhaseRule::first())
            .unwrap();
        let result = phase.add_handler_with_rule(handler("b"), PhaseRule::first());

        assert_eq!(
            result,
            Err(PhaseRuleError::FirstAlreadySet {
                phase: "PhaseA".to_string(),
                existing: "a".to_string(),
            })
        );
    }

    #[test]
    fn test_second_phase_last_rejected() {
        let mut phase = Phase::new("PhaseA");
        phase
            .add_handler_with_rule(handler("a"), PhaseRule::last())
            .unwrap();
        let result = phase.add_handler_with_rule(handler("b"), PhaseRule::last());
        assert!(matches!(result, Err(PhaseRuleError::LastAlreadySet { .. })));
    }

    #[test]
    fn test_first_and_last_rejected() {
        let mut phase = Phase::new("PhaseA");
        let rule = PhaseRule {
            phase_first: true,
            phase_last: true,
            ..PhaseRule::default()
        };
        let result = phase.add_handler_with_rule(handler("a"), rule);
        assert!(matches!(result, Err(PhaseRuleError::FirstAndLast { .. })));
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut phase = Phase::new("PhaseA");
        let result = phase.add_handler_with_rule(handler("a"), PhaseRule::before("a"));
        assert!(matches!(result, Err(PhaseRuleError::SelfReference { .. })));
    }

    #[test]
    fn test_conflicting_rules_unsatisfiable() {
        let mut phase = Phase::new("PhaseA");
        phase.add_handler(handler("H1")).unwrap();
        phase.add_handler(handler("H2")).unwrap();

        let result =
            phase.add_handler_with_rule(handler("H3"), PhaseRule::before("H1").and_after("H2"));
        assert!(matches!(result, Err(PhaseRuleError::Unsatisfiable { .. })));
        assert_eq!(phase.len(), 2);
    }

    #[test]
    fn test_phase_first_conflicts_with_existing_before() {
        let mut phase = Phase::new("PhaseA");
        phase
            .add_handler_with_rule(handler("early"), PhaseRule::before("head"))
            .unwrap();
        let result = phase.add_handler_with_rule(handler("head"), PhaseRule::first());
        assert!(matches!(result, Err(PhaseRuleError::Unsatisfiable { .. })));
    }

    #[test]
    fn test_rule_serialization_skips_defaults() {
        let json = serde_json::to_value(PhaseRule::before("H1")).unwrap();
        assert_eq!(json, serde_json::json!({ "before": "H1" }));
        assert!(PhaseRule::default().is_unconstrained());
    }
}
