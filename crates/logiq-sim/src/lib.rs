//! logiq sim - zero-delay logic simulation
//!
//! This crate handles:
//! - Gate truth tables
//! - Step-wise signal propagation over the circuit graph
//! - Per-instance evaluation of compiled compound templates
//! - The [`Circuit`] facade used by the editor

pub mod circuit;
pub mod compound;
pub mod config;
pub mod error;
pub mod gate_eval;
mod propagate;

pub use circuit::Circuit;
pub use compound::InstanceState;
pub use config::SimulationConfig;
pub use error::{SimulationError, SimulationResult};
pub use gate_eval::evaluate_gate;

pub use logiq_netlist::{
    Arity, Bit, CompileError, NetlistError, NodeHandle, NodeKind, Template, TemplateId, Vec2, WireDirection,
};
