//! Simulation errors

use logiq_netlist::{CompileError, NetlistError, NodeKind};
use thiserror::Error;

/// Errors that can occur while editing or simulating a circuit
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Netlist(#[from] NetlistError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Propagation chain exceeded the configured budget; the step was
    /// abandoned but the graph is untouched
    #[error("Propagation depth exceeded (limit {limit})")]
    PropagationDepthExceeded { limit: usize },

    /// Only INPUT and STATE nodes take a driven value
    #[error("{kind} node does not accept a driven value")]
    NotAnInput { kind: NodeKind },
}

/// Result type for simulation operations
pub type SimulationResult<T> = Result<T, SimulationError>;
