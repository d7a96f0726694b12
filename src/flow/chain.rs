//! Execution Chains
//!
//! An execution chain is the ordered list of phases a message passes
//! through for one flow direction. Chains are built once per configuration
//! and shared by reference across every work context of that flow.
//!
//! Traversal is exactly one level deep: a chain holds phases, and phases
//! hold only handlers.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::phase::Phase;
use crate::handler::Handler;

/// Direction of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    /// Normal inbound processing
    In,
    /// Normal outbound processing
    Out,
    /// Inbound fault processing
    InFault,
    /// Outbound fault processing
    OutFault,
}

impl FlowDirection {
    /// All directions, in configuration order.
    pub const ALL: [FlowDirection; 4] = [Self::In, Self::Out, Self::InFault, Self::OutFault];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::InFault => "in_fault",
            Self::OutFault => "out_fault",
        }
    }

    /// Returns true for the two fault directions.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::InFault | Self::OutFault)
    }

    /// Returns the fault flow a faulted context of this direction moves to.
    pub fn fault_counterpart(&self) -> FlowDirection {
        match self {
            Self::In | Self::InFault => Self::InFault,
            Self::Out | Self::OutFault => Self::OutFault,
        }
    }
}

impl fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            "in_fault" => Ok(Self::InFault),
            "out_fault" => Ok(Self::OutFault),
            other => Err(format!(
                "Unknown flow direction '{}' (expected in, out, in_fault or out_fault)",
                other
            )),
        }
    }
}

/// A position in an execution chain: phase index plus handler index
/// within that phase.
///
/// The end of the chain is `(phase_count, 0)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainPosition {
    pub phase: usize,
    pub handler: usize,
}

impl ChainPosition {
    pub const START: ChainPosition = ChainPosition {
        phase: 0,
        handler: 0,
    };

    pub fn new(phase: usize, handler: usize) -> Self {
        Self { phase, handler }
    }
}

impl fmt::Display for ChainPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.phase, self.handler)
    }
}

/// Name-only description of one phase, as stored in checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseLayout {
    pub name: String,
    pub handlers: Vec<String>,
}

/// An ordered list of phases for one flow direction.
pub struct ExecutionChain {
    direction: FlowDirection,
    phases: Vec<Phase>,
}

impl ExecutionChain {
    /// Creates an empty chain.
    pub fn new(direction: FlowDirection) -> Self {
        Self {
            direction,
            phases: Vec::new(),
        }
    }

    /// Builds a chain from phases, in order.
    pub fn from_phases(direction: FlowDirection, phases: Vec<Phase>) -> Self {
        Self { direction, phases }
    }

    /// Appends a phase.
    pub fn add_phase(&mut self, phase: Phase) {
        self.phases.push(phase);
    }

    pub fn direction(&self) -> FlowDirection {
        self.direction
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Finds a phase by name.
    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name() == name)
    }

    /// Finds a phase by name for configuration-time changes.
    pub fn phase_mut(&mut self, name: &str) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.name() == name)
    }

    /// Number of phases.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Total number of handler positions across all phases.
    pub fn handler_count(&self) -> usize {
        self.phases.iter().map(Phase::len).sum()
    }

    /// Returns the handler at `pos`, or `None` at the end of the chain.
    pub fn handler_at(&self, pos: ChainPosition) -> Option<&Arc<dyn Handler>> {
        self.phases.get(pos.phase).and_then(|p| p.handler(pos.handler))
    }

    /// Moves `pos` forward past exhausted and empty phases.
    pub fn normalize(&self, mut pos: ChainPosition) -> ChainPosition {
        while pos.phase < self.phases.len() && pos.handler >= self.phases[pos.phase].len() {
            pos.phase += 1;
            pos.handler = 0;
        }
        if pos.phase >= self.phases.len() {
            return self.end();
        }
        pos
    }

    /// First runnable position.
    pub fn start(&self) -> ChainPosition {
        self.normalize(ChainPosition::START)
    }

    /// Position following `pos`.
    pub fn next_position(&self, pos: ChainPosition) -> ChainPosition {
        self.normalize(ChainPosition::new(pos.phase, pos.handler + 1))
    }

    pub fn end(&self) -> ChainPosition {
        ChainPosition::new(self.phases.len(), 0)
    }

    pub fn is_end(&self, pos: ChainPosition) -> bool {
        pos.phase >= self.phases.len()
    }

    /// Returns true if `pos` addresses a handler or is the end position.
    pub fn is_valid(&self, pos: ChainPosition) -> bool {
        pos == self.end() || self.handler_at(pos).is_some()
    }

    /// Index of `pos` in the flattened handler sequence.
    pub fn flat_index(&self, pos: ChainPosition) -> usize {
        if self.is_end(pos) {
            return self.handler_count();
        }
        let before: usize = self.phases[..pos.phase].iter().map(Phase::len).sum();
        before + pos.handler
    }

    /// Iterates every handler with its position, phase by phase.
    pub fn flattened(&self) -> impl Iterator<Item = (ChainPosition, &Arc<dyn Handler>)> {
        self.phases.iter().enumerate().flat_map(|(p, phase)| {
            phase
                .handlers()
                .enumerate()
                .map(move |(h, handler)| (ChainPosition::new(p, h), handler))
        })
    }

    /// Flattened handler names.
    pub fn handler_names(&self) -> Vec<String> {
        self.flattened().map(|(_, h)| h.name().to_string()).collect()
    }

    /// Finds the first handler with the given name.
    pub fn find_handler(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.flattened()
            .map(|(_, h)| h)
            .find(|h| h.name() == name)
    }

    /// Name-only layout of the chain.
    pub fn layout(&self) -> Vec<PhaseLayout> {
        self.phases
            .iter()
            .map(|p| PhaseLayout {
                name: p.name().to_string(),
                handlers: p.handler_names(),
            })
            .collect()
    }
}

impl fmt::Debug for ExecutionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionChain")
            .field("direction", &self.direction)
            .field("phases", &self.phases)
            .finish()
    }
}
