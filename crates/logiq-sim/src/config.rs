//! Simulation configuration

use serde::{Deserialize, Serialize};

/// Configuration for a [`Circuit`](crate::Circuit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Longest producer-to-consumer chain one step may follow before it is
    /// abandoned with `PropagationDepthExceeded`
    pub max_depth: usize,
}

impl SimulationConfig {
    pub const DEFAULT_MAX_DEPTH: usize = 1024;

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }
}
