//! Circuit Nodes
//!
//! A node is one circuit element: a primitive gate, a boundary INPUT or
//! OUTPUT, a STATE latch, or an instance of a compiled compound template.
//!
//! Wiring lives on the nodes themselves. Every output slot owns a fan-out
//! list of destination pins, and every input slot holds at most one
//! back-reference to the pin that drives it. [`Netlist`](crate::Netlist)
//! keeps both sides in step; nothing outside this crate can edit them.

use crate::template::TemplateId;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Stable handle to a node in a [`Netlist`](crate::Netlist).
    ///
    /// A handle is a slot plus a generation. Once the node is deleted the
    /// handle is rejected, even after the slot is reused by a new node.
    pub struct NodeHandle;
}

// ============================================================================
// Signal values
// ============================================================================

/// A resolved logic level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Bit {
    #[default]
    Low,
    High,
}

impl Bit {
    pub fn is_high(self) -> bool {
        self == Bit::High
    }

    pub fn is_low(self) -> bool {
        self == Bit::Low
    }
}

impl From<bool> for Bit {
    fn from(value: bool) -> Self {
        if value {
            Bit::High
        } else {
            Bit::Low
        }
    }
}

impl From<Bit> for bool {
    fn from(bit: Bit) -> Self {
        bit.is_high()
    }
}

impl std::ops::Not for Bit {
    type Output = Bit;

    fn not(self) -> Bit {
        match self {
            Bit::Low => Bit::High,
            Bit::High => Bit::Low,
        }
    }
}

impl fmt::Display for Bit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bit::Low => write!(f, "0"),
            Bit::High => write!(f, "1"),
        }
    }
}

// ============================================================================
// Node kinds
// ============================================================================

/// What a node does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    And,
    Or,
    Xor,
    /// Source node; its signal is set by the editor
    Input,
    /// Sink node; latches whatever drives it
    Output,
    /// One-step latch: transmits the value it held at the start of a step
    /// and captures its driven input when the step completes
    State,
    /// Instance of a registered compound template
    Compound(TemplateId),
}

impl NodeKind {
    /// Primitive kinds available from the editor toolbar
    pub const PRIMITIVES: [NodeKind; 6] = [
        NodeKind::And,
        NodeKind::Or,
        NodeKind::Xor,
        NodeKind::Input,
        NodeKind::Output,
        NodeKind::State,
    ];

    /// Slot counts for non-compound kinds. Compound arity comes from the
    /// template registry.
    pub fn primitive_arity(&self) -> Option<Arity> {
        match self {
            NodeKind::And | NodeKind::Or | NodeKind::Xor => Some(Arity::new(2, 1)),
            NodeKind::Input => Some(Arity::new(0, 1)),
            NodeKind::Output => Some(Arity::new(1, 0)),
            NodeKind::State => Some(Arity::new(1, 1)),
            NodeKind::Compound(_) => None,
        }
    }

    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::And => "AND",
            NodeKind::Or => "OR",
            NodeKind::Xor => "XOR",
            NodeKind::Input => "INPUT",
            NodeKind::Output => "OUTPUT",
            NodeKind::State => "STATE",
            NodeKind::Compound(_) => "IC",
        }
    }

    /// True for kinds that compute a truth-table function
    pub fn is_gate(&self) -> bool {
        matches!(self, NodeKind::And | NodeKind::Or | NodeKind::Xor)
    }

    /// True for kinds that start propagation at the beginning of a step
    pub fn is_source(&self) -> bool {
        matches!(self, NodeKind::Input | NodeKind::State)
    }

    pub fn template(&self) -> Option<TemplateId> {
        match self {
            NodeKind::Compound(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Compound(id) => write!(f, "IC#{}", id.0),
            other => f.write_str(other.label()),
        }
    }
}

/// Number of input and output slots on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Arity {
    pub inputs: u32,
    pub outputs: u32,
}

impl Arity {
    pub const fn new(inputs: u32, outputs: u32) -> Self {
        Self { inputs, outputs }
    }
}

/// Opaque 2D geometry, stored for the editor and never read by the core
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// One slot on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pin {
    pub node: NodeHandle,
    pub slot: u32,
}

impl Pin {
    pub fn new(node: NodeHandle, slot: u32) -> Self {
        Self { node, slot }
    }
}

/// A directed wire from an output slot to an input slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Wire {
    pub source: Pin,
    pub dest: Pin,
}

// ============================================================================
// Node record
// ============================================================================

/// A node stored in a [`Netlist`](crate::Netlist)
#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    /// Per-step input cells; `None` means no driver has fired yet this step
    input_state: Vec<Option<Bit>>,
    /// Output/display value, and the driven value of INPUT and STATE nodes
    signal_state: Bit,
    position: Vec2,
    size: Vec2,
    /// Fan-out per output slot
    pub(crate) outgoing: Vec<Vec<Pin>>,
    /// Driver per input slot
    pub(crate) incoming: Vec<Option<Pin>>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, arity: Arity) -> Self {
        Self {
            kind,
            input_state: vec![None; arity.inputs as usize],
            signal_state: Bit::Low,
            position: Vec2::ZERO,
            size: Vec2::ZERO,
            outgoing: vec![Vec::new(); arity.outputs as usize],
            incoming: vec![None; arity.inputs as usize],
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn arity(&self) -> Arity {
        Arity::new(self.incoming.len() as u32, self.outgoing.len() as u32)
    }

    pub fn input_count(&self) -> u32 {
        self.incoming.len() as u32
    }

    pub fn output_count(&self) -> u32 {
        self.outgoing.len() as u32
    }

    pub fn input_state(&self) -> &[Option<Bit>] {
        &self.input_state
    }

    pub fn input(&self, slot: u32) -> Option<Bit> {
        self.input_state.get(slot as usize).copied().flatten()
    }

    /// Record a value arriving on an input slot. Out-of-range slots are ignored.
    pub fn set_input(&mut self, slot: u32, value: Bit) {
        if let Some(cell) = self.input_state.get_mut(slot as usize) {
            *cell = Some(value);
        }
    }

    /// All input values, or `None` while any slot is still unset
    pub fn ready_inputs(&self) -> Option<Vec<Bit>> {
        self.input_state.iter().copied().collect()
    }

    /// Reset every input cell to unset
    pub fn clear_inputs(&mut self) {
        self.input_state.fill(None);
    }

    pub fn signal(&self) -> Bit {
        self.signal_state
    }

    pub fn set_signal(&mut self, value: Bit) {
        self.signal_state = value;
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn size(&self) -> Vec2 {
        self.size
    }

    pub(crate) fn set_position(&mut self, position: Vec2) {
        self.position = position;
    }

    pub(crate) fn set_size(&mut self, size: Vec2) {
        self.size = size;
    }

    /// Destinations fed by one output slot
    pub fn fanout(&self, slot: u32) -> Option<&[Pin]> {
        self.outgoing.get(slot as usize).map(Vec::as_slice)
    }

    /// Source pin driving one input slot
    pub fn driver(&self, slot: u32) -> Option<Pin> {
        self.incoming.get(slot as usize).copied().flatten()
    }

    /// `(input slot, source pin)` for every driven input
    pub fn drivers(&self) -> impl Iterator<Item = (u32, Pin)> + '_ {
        self.incoming
            .iter()
            .enumerate()
            .filter_map(|(slot, pin)| pin.map(|pin| (slot as u32, pin)))
    }

    /// `(output slot, destination pin)` for every outgoing wire
    pub fn fanouts(&self) -> impl Iterator<Item = (u32, Pin)> + '_ {
        self.outgoing
            .iter()
            .enumerate()
            .flat_map(|(slot, fan)| fan.iter().map(move |pin| (slot as u32, *pin)))
    }

    /// Remove one destination from an output slot's fan-out.
    /// Fan-out order is not preserved.
    pub(crate) fn take_outgoing(&mut self, slot: u32, dest: Pin) -> bool {
        let Some(fan) = self.outgoing.get_mut(slot as usize) else {
            return false;
        };
        match fan.iter().position(|pin| *pin == dest) {
            Some(index) => {
                fan.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Clear an input slot's driver if it matches `source`
    pub(crate) fn take_incoming(&mut self, slot: u32, source: Pin) -> bool {
        match self.incoming.get_mut(slot as usize) {
            Some(cell) if *cell == Some(source) => {
                *cell = None;
                true
            }
            _ => false,
        }
    }
}
