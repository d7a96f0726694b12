//! Flow Definition Model
//!
//! Serializable description of a flow configuration.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: order-intake
//!
//! handlers:
//!   - name: audit
//!     kind: log
//!   - name: hold
//!     kind: suspend
//!   - name: stamp
//!     kind: set_property
//!     params:
//!       key: route
//!       value: warehouse
//!
//! flows:
//!   in:
//!     - name: Transport
//!       handlers: audit
//!     - name: Dispatch
//!       handlers:
//!         - hold
//!         - name: stamp
//!           phase_first: true
//!   in_fault:
//!     - name: FaultLog
//!       handlers: [audit]
//! ```
//!
//! A phase's `handlers` accepts a single entry or a list, and each entry is
//! either a bare handler name or a mapping with `name` plus placement rules
//! (`phase_first`, `phase_last`, `before`, `after`).

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::flow::{FlowDirection, PhaseRule};

/// Keys allowed in the mapping form of a handler reference.
const HANDLER_REF_KEYS: &[&str] = &["name", "phase_first", "phase_last", "before", "after"];

/// A complete flow definition file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FlowDefinition {
    /// Human-readable name of the configuration
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Built-in handler instances available to the flows
    #[serde(default)]
    pub handlers: Vec<HandlerDecl>,

    /// Phases per flow direction
    #[serde(default)]
    pub flows: FlowSet,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the declaration of a handler.
    pub fn handler(&self, name: &str) -> Option<&HandlerDecl> {
        self.handlers.iter().find(|h| h.name == name)
    }
}

/// A built-in handler instance: its name, kind and parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HandlerDecl {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl HandlerDecl {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            kind: kind.into().trim().to_string(),
            params: Map::new(),
        }
    }

    /// Adds a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Phases of each flow direction.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FlowSet {
    #[serde(default, rename = "in", skip_serializing_if = "Vec::is_empty")]
    pub inflow: Vec<PhaseDecl>,

    #[serde(default, rename = "out", skip_serializing_if = "Vec::is_empty")]
    pub outflow: Vec<PhaseDecl>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_fault: Vec<PhaseDecl>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out_fault: Vec<PhaseDecl>,
}

impl FlowSet {
    pub fn phases(&self, direction: FlowDirection) -> &[PhaseDecl] {
        match direction {
            FlowDirection::In => &self.inflow,
            FlowDirection::Out => &self.outflow,
            FlowDirection::InFault => &self.in_fault,
            FlowDirection::OutFault => &self.out_fault,
        }
    }

    pub fn phases_mut(&mut self, direction: FlowDirection) -> &mut Vec<PhaseDecl> {
        match direction {
            FlowDirection::In => &mut self.inflow,
            FlowDirection::Out => &mut self.outflow,
            FlowDirection::InFault => &mut self.in_fault,
            FlowDirection::OutFault => &mut self.out_fault,
        }
    }

    /// Directions that declare at least one phase, with their phases.
    pub fn iter(&self) -> impl Iterator<Item = (FlowDirection, &[PhaseDecl])> {
        FlowDirection::ALL
            .into_iter()
            .map(move |d| (d, self.phases(d)))
            .filter(|(_, phases)| !phases.is_empty())
    }
}

/// A phase and the handlers placed in it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PhaseDecl {
    pub name: String,

    #[serde(default, deserialize_with = "single_or_vec")]
    pub handlers: Vec<HandlerRef>,
}

impl PhaseDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            handlers: Vec::new(),
        }
    }

    /// Appends a handler reference.
    pub fn with_handler(mut self, handler: HandlerRef) -> Self {
        self.handlers.push(handler);
        self
    }
}

/// A handler placed in a phase, optionally with placement rules.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerRef {
    pub name: String,
    pub rule: PhaseRule,
}

impl HandlerRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            rule: PhaseRule::default(),
        }
    }

    pub fn with_rule(name: impl Into<String>, rule: PhaseRule) -> Self {
        Self {
            name: name.into().trim().to_string(),
            rule,
        }
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(Self::named(s)),
            Value::Object(mut map) => {
                if let Some(unknown) = map.keys().find(|k| !HANDLER_REF_KEYS.contains(&k.as_str())) {
                    return Err(format!("Unknown field '{}' in handler reference", unknown));
                }
                let name = match map.remove("name") {
                    Some(Value::String(s)) => s,
                    _ => return Err("Handler reference needs a string 'name'".to_string()),
                };
                let rule: PhaseRule =
                    serde_json::from_value(Value::Object(map)).map_err(|e| e.to_string())?;
                Ok(Self::with_rule(name, rule))
            }
            _ => Err("Expected a handler name or a mapping with 'name'".to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for HandlerRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val = Value::deserialize(deserializer)?;
        HandlerRef::from_value(val).map_err(de::Error::custom)
    }
}

impl Serialize for HandlerRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Constrained<'a> {
            name: &'a str,
            #[serde(flatten)]
            rule: &'a PhaseRule,
        }

        if self.rule.is_unconstrained() {
            serializer.serialize_str(&self.name)
        } else {
            Constrained {
                name: &self.name,
                rule: &self.rule,
            }
            .serialize(serializer)
        }
    }
}

/// Deserializes either a single handler reference or a list of them.
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<HandlerRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| HandlerRef::from_value(v).map_err(de::Error::custom))
            .collect(),
        single => HandlerRef::from_value(single)
            .map(|r| vec![r])
            .map_err(de::Error::custom),
    }
}
