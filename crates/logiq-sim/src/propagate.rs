//! Signal Propagator
//!
//! Zero-delay, depth-first propagation. When a node's output is computed it
//! is written straight into every destination's input cell, and each
//! destination is evaluated before the next wire is followed. A node with
//! any unset input defers; it will be reached again when its last driver
//! fires.
//!
//! Pending deliveries live on an explicit stack, so the depth of a
//! producer-to-consumer chain is a counter checked against the budget and
//! never a native call frame. Only compound nesting recurses, and that is
//! bounded by the template registry.
//!
//! The same algorithm runs over the editable netlist and over the
//! flattened node array of a compound instance. [`PropagationScope`] is the
//! seam between the two.

use crate::compound::InstanceState;
use crate::error::{SimulationError, SimulationResult};
use crate::gate_eval::evaluate_gate;
use logiq_netlist::{Bit, Netlist, NetlistError, Node, NodeHandle, NodeKind, Template, TemplateRegistry};
use slotmap::SecondaryMap;
use std::fmt;
use tracing::trace;

/// A node array the propagator can walk
pub(crate) trait PropagationScope {
    type Id: Copy + fmt::Debug;

    fn kind(&self, id: Self::Id) -> Option<NodeKind>;

    fn input(&self, id: Self::Id, slot: u32) -> Option<Bit>;

    /// All input values, or `None` while any slot is unset
    fn ready_inputs(&self, id: Self::Id) -> Option<Vec<Bit>>;

    fn set_input(&mut self, id: Self::Id, slot: u32, value: Bit);

    fn signal(&self, id: Self::Id) -> Bit;

    fn set_signal(&mut self, id: Self::Id, value: Bit);

    /// Record the value a STATE node captured this step
    fn latch(&mut self, id: Self::Id, value: Bit);

    /// `(destination, input slot)` for every wire leaving an output slot
    fn fanout(&self, id: Self::Id, slot: u32) -> Vec<(Self::Id, u32)>;

    /// Working buffer for a compound node, created on first use
    fn instance_mut(
        &mut self,
        id: Self::Id,
        template: &Template,
        templates: &TemplateRegistry,
    ) -> Option<&mut InstanceState>;
}

/// A value on its way to one input slot
struct Delivery<Id> {
    dest: Id,
    slot: u32,
    value: Bit,
    depth: usize,
}

/// Runs evaluate-and-transmit under a depth budget
pub(crate) struct Propagator<'r> {
    templates: &'r TemplateRegistry,
    max_depth: usize,
}

impl<'r> Propagator<'r> {
    pub(crate) fn new(templates: &'r TemplateRegistry, max_depth: usize) -> Self {
        Self { templates, max_depth }
    }

    /// Start propagation from a node that needs no driver: INPUT and STATE
    /// nodes transmit their current signal, and input-less compound
    /// instances evaluate outright. The source itself sits at `depth`.
    pub(crate) fn fire_source<S: PropagationScope>(&self, scope: &mut S, id: S::Id, depth: usize) -> SimulationResult<()> {
        let outputs = match scope.kind(id) {
            Some(NodeKind::Input | NodeKind::State) => vec![scope.signal(id)],
            Some(NodeKind::Compound(_)) if scope.ready_inputs(id).is_some_and(|inputs| inputs.is_empty()) => {
                self.evaluate(scope, id, depth)?
            }
            _ => return Ok(()),
        };

        let mut pending = Vec::new();
        schedule(scope, &mut pending, id, &outputs, depth + 1);
        self.drain(scope, pending)
    }

    /// Deliver values until nothing is left to evaluate
    fn drain<S: PropagationScope>(&self, scope: &mut S, mut pending: Vec<Delivery<S::Id>>) -> SimulationResult<()> {
        while let Some(Delivery { dest, slot, value, depth }) = pending.pop() {
            scope.set_input(dest, slot, value);
            if depth > self.max_depth {
                return Err(SimulationError::PropagationDepthExceeded { limit: self.max_depth });
            }
            let outputs = self.evaluate(scope, dest, depth)?;
            schedule(scope, &mut pending, dest, &outputs, depth + 1);
        }
        Ok(())
    }

    /// Evaluate one node if all of its inputs have arrived. Returns the
    /// value to transmit on each output slot; empty when nothing fires.
    fn evaluate<S: PropagationScope>(&self, scope: &mut S, id: S::Id, depth: usize) -> SimulationResult<Vec<Bit>> {
        let Some(kind) = scope.kind(id) else {
            return Ok(Vec::new());
        };

        match kind {
            NodeKind::And | NodeKind::Or | NodeKind::Xor => {
                let Some(inputs) = scope.ready_inputs(id) else {
                    trace!(node = ?id, %kind, "deferred");
                    return Ok(Vec::new());
                };
                let Some(value) = evaluate_gate(kind, &inputs) else {
                    return Ok(Vec::new());
                };
                trace!(node = ?id, %kind, %value, depth, "evaluated");
                scope.set_signal(id, value);
                Ok(vec![value])
            }

            NodeKind::Output => {
                if let Some(value) = scope.input(id, 0) {
                    scope.set_signal(id, value);
                }
                Ok(Vec::new())
            }

            // Sources fire during seeding; STATE captures are applied by `settle`
            NodeKind::Input | NodeKind::State => Ok(Vec::new()),

            NodeKind::Compound(template_id) => {
                let Some(inputs) = scope.ready_inputs(id) else {
                    trace!(node = ?id, %kind, "deferred");
                    return Ok(Vec::new());
                };
                let template = self
                    .templates
                    .get(template_id)
                    .ok_or(NetlistError::UnknownTemplate(template_id))?;
                let Some(instance) = scope.instance_mut(id, template, self.templates) else {
                    return Ok(Vec::new());
                };

                let outputs = self.evaluate_instance(instance, template, &inputs, depth)?;
                if let Some(first) = outputs.first() {
                    scope.set_signal(id, *first);
                }
                Ok(outputs)
            }
        }
    }
}

/// Queue a delivery for every wire leaving `from`, ordered so the stack
/// pops them slot by slot and, within a slot, in fan-out order
fn schedule<S: PropagationScope>(
    scope: &S,
    pending: &mut Vec<Delivery<S::Id>>,
    from: S::Id,
    outputs: &[Bit],
    depth: usize,
) {
    let start = pending.len();
    for (slot, value) in outputs.iter().enumerate() {
        for (dest, dest_slot) in scope.fanout(from, slot as u32) {
            pending.push(Delivery {
                dest,
                slot: dest_slot,
                value: *value,
                depth,
            });
        }
    }
    pending[start..].reverse();
}

/// End-of-step bookkeeping for one node: an undriven OUTPUT reads low, and
/// a STATE node latches whatever reached its input
pub(crate) fn settle<S: PropagationScope>(scope: &mut S, id: S::Id) {
    match scope.kind(id) {
        Some(NodeKind::Output) if scope.input(id, 0).is_none() => scope.set_signal(id, Bit::Low),
        Some(NodeKind::State) => {
            if let Some(value) = scope.input(id, 0) {
                scope.latch(id, value);
            }
        }
        _ => {}
    }
}

/// The editable netlist plus the per-instance buffers of its compound nodes
pub(crate) struct NetlistScope<'a> {
    pub(crate) netlist: &'a mut Netlist,
    pub(crate) instances: &'a mut SecondaryMap<NodeHandle, InstanceState>,
}

impl PropagationScope for NetlistScope<'_> {
    type Id = NodeHandle;

    fn kind(&self, id: NodeHandle) -> Option<NodeKind> {
        self.netlist.node(id).map(Node::kind)
    }

    fn input(&self, id: NodeHandle, slot: u32) -> Option<Bit> {
        self.netlist.node(id).and_then(|node| node.input(slot))
    }

    fn ready_inputs(&self, id: NodeHandle) -> Option<Vec<Bit>> {
        self.netlist.node(id).and_then(Node::ready_inputs)
    }

    fn set_input(&mut self, id: NodeHandle, slot: u32, value: Bit) {
        if let Some(node) = self.netlist.node_mut(id) {
            node.set_input(slot, value);
        }
    }

    fn signal(&self, id: NodeHandle) -> Bit {
        self.netlist.node(id).map(Node::signal).unwrap_or_default()
    }

    fn set_signal(&mut self, id: NodeHandle, value: Bit) {
        if let Some(node) = self.netlist.node_mut(id) {
            node.set_signal(value);
        }
    }

    fn latch(&mut self, id: NodeHandle, value: Bit) {
        self.set_signal(id, value);
    }

    fn fanout(&self, id: NodeHandle, slot: u32) -> Vec<(NodeHandle, u32)> {
        self.netlist
            .node(id)
            .and_then(|node| node.fanout(slot))
            .map(|pins| pins.iter().map(|pin| (pin.node, pin.slot)).collect())
            .unwrap_or_default()
    }

    fn instance_mut(
        &mut self,
        id: NodeHandle,
        template: &Template,
        templates: &TemplateRegistry,
    ) -> Option<&mut InstanceState> {
        if !self.netlist.contains(id) {
            return None;
        }
        let current = self.instances.get(id).is_some_and(|state| state.template() == template.id());
        if !current {
            self.instances.insert(id, InstanceState::new(template, templates));
        }
        self.instances.get_mut(id)
    }
}
