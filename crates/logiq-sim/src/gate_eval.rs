//! Gate Primitive Evaluation
//!
//! Truth tables for the primitive gate kinds.
//!
//! # Usage
//!
//! ```
//! use logiq_netlist::{Bit, NodeKind};
//! use logiq_sim::gate_eval::evaluate_gate;
//!
//! let out = evaluate_gate(NodeKind::Xor, &[Bit::High, Bit::Low]);
//! assert_eq!(out, Some(Bit::High));
//! ```

use logiq_netlist::{Bit, NodeKind};

/// Evaluate a primitive gate
///
/// # Arguments
///
/// * `kind` - The node kind to evaluate
/// * `inputs` - Resolved input values, one per input slot
///
/// # Returns
///
/// The gate's output, or `None` for kinds that are not truth-table gates
pub fn evaluate_gate(kind: NodeKind, inputs: &[Bit]) -> Option<Bit> {
    match kind {
        NodeKind::And => Some(Bit::from(inputs.iter().all(|b| b.is_high()))),

        NodeKind::Or => Some(Bit::from(inputs.iter().any(|b| b.is_high()))),

        NodeKind::Xor => {
            let a = inputs.first().is_some_and(|b| b.is_high());
            let b = inputs.get(1).is_some_and(|b| b.is_high());
            Some(Bit::from((a || b) && !(a && b)))
        }

        NodeKind::Input | NodeKind::Output | NodeKind::State | NodeKind::Compound(_) => None,
    }
}
