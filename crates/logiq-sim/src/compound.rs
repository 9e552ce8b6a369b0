//! Compound-Circuit Runtime
//!
//! Evaluates an instance of a compiled template by running the ordinary
//! propagation algorithm over the template's flattened node array.
//!
//! Templates are shared and immutable, so every instance carries its own
//! [`InstanceState`]: one working cell set per template node, plus a nested
//! buffer for every compound node inside the template. Sibling instances of
//! the same template, and instances nested inside each other, never share
//! mutable state.
//!
//! STATE nodes inside an instance stage what they capture. The captures are
//! committed by [`InstanceState::commit_latches`] once the whole step has
//! succeeded, so an aborted step leaves every held value as it was.

use crate::error::SimulationResult;
use crate::propagate::{settle, PropagationScope, Propagator};
use logiq_netlist::{Bit, NodeKind, Template, TemplateId, TemplateRegistry};
use tracing::trace;

/// Working copy of a template's node states for one instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceState {
    template: TemplateId,
    nodes: Vec<WorkNode>,
}

#[derive(Debug, Clone, PartialEq)]
struct WorkNode {
    input_state: Vec<Option<Bit>>,
    signal: Bit,
    /// STATE capture waiting for the step to complete
    pending: Option<Bit>,
    nested: Option<Box<InstanceState>>,
}

impl InstanceState {
    /// Fresh buffers for `template`, seeded with each node's initial signal
    pub fn new(template: &Template, templates: &TemplateRegistry) -> Self {
        let nodes = template
            .nodes()
            .iter()
            .map(|node| WorkNode {
                input_state: vec![None; node.arity.inputs as usize],
                signal: node.initial_signal,
                pending: None,
                nested: node
                    .kind
                    .template()
                    .and_then(|id| templates.get(id))
                    .map(|inner| Box::new(InstanceState::new(inner, templates))),
            })
            .collect();

        Self {
            template: template.id(),
            nodes,
        }
    }

    pub fn template(&self) -> TemplateId {
        self.template
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Signal of the template node at flattened `index`
    pub fn signal(&self, index: usize) -> Option<Bit> {
        self.nodes.get(index).map(|node| node.signal)
    }

    pub fn input_state(&self, index: usize) -> Option<&[Option<Bit>]> {
        self.nodes.get(index).map(|node| node.input_state.as_slice())
    }

    /// Buffer of a compound node nested at flattened `index`
    pub fn nested(&self, index: usize) -> Option<&InstanceState> {
        self.nodes.get(index).and_then(|node| node.nested.as_deref())
    }

    /// Reset every input cell and drop staged STATE captures, including
    /// nested instances
    pub fn clear_inputs(&mut self) {
        for node in &mut self.nodes {
            node.input_state.fill(None);
            node.pending = None;
            if let Some(nested) = node.nested.as_deref_mut() {
                nested.clear_inputs();
            }
        }
    }

    /// Apply the STATE captures staged during the last step, including
    /// nested instances
    pub fn commit_latches(&mut self) {
        for node in &mut self.nodes {
            if let Some(value) = node.pending.take() {
                node.signal = value;
            }
            if let Some(nested) = node.nested.as_deref_mut() {
                nested.commit_latches();
            }
        }
    }
}

/// One instance's view of its template
struct TemplateScope<'a> {
    template: &'a Template,
    state: &'a mut InstanceState,
}

impl PropagationScope for TemplateScope<'_> {
    type Id = usize;

    fn kind(&self, id: usize) -> Option<NodeKind> {
        self.template.node(id).map(|node| node.kind)
    }

    fn input(&self, id: usize, slot: u32) -> Option<Bit> {
        self.state
            .nodes
            .get(id)
            .and_then(|node| node.input_state.get(slot as usize).copied().flatten())
    }

    fn ready_inputs(&self, id: usize) -> Option<Vec<Bit>> {
        self.state
            .nodes
            .get(id)
            .and_then(|node| node.input_state.iter().copied().collect())
    }

    fn set_input(&mut self, id: usize, slot: u32, value: Bit) {
        if let Some(cell) = self
            .state
            .nodes
            .get_mut(id)
            .and_then(|node| node.input_state.get_mut(slot as usize))
        {
            *cell = Some(value);
        }
    }

    fn signal(&self, id: usize) -> Bit {
        self.state.signal(id).unwrap_or_default()
    }

    fn set_signal(&mut self, id: usize, value: Bit) {
        if let Some(node) = self.state.nodes.get_mut(id) {
            node.signal = value;
        }
    }

    fn latch(&mut self, id: usize, value: Bit) {
        if let Some(node) = self.state.nodes.get_mut(id) {
            node.pending = Some(value);
        }
    }

    fn fanout(&self, id: usize, slot: u32) -> Vec<(usize, u32)> {
        self.template
            .node(id)
            .map(|node| {
                node.fanout(slot)
                    .iter()
                    .map(|pin| (pin.node as usize, pin.slot))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn instance_mut(
        &mut self,
        id: usize,
        template: &Template,
        templates: &TemplateRegistry,
    ) -> Option<&mut InstanceState> {
        let node = self.state.nodes.get_mut(id)?;
        let current = node
            .nested
            .as_ref()
            .is_some_and(|nested| nested.template == template.id());
        if !current {
            node.nested = Some(Box::new(InstanceState::new(template, templates)));
        }
        node.nested.as_deref_mut()
    }
}

impl Propagator<'_> {
    /// Run one instance: drive the boundary inputs with `inputs`, propagate
    /// through the template, and return the boundary outputs in slot order
    pub(crate) fn evaluate_instance(
        &self,
        state: &mut InstanceState,
        template: &Template,
        inputs: &[Bit],
        depth: usize,
    ) -> SimulationResult<Vec<Bit>> {
        state.clear_inputs();
        let mut scope = TemplateScope { template, state };

        for (index, value) in template.boundary_inputs().zip(inputs) {
            scope.set_signal(index, *value);
        }

        // Boundary inputs, interior STATE nodes and input-less compounds
        // start propagation at the instance's own depth
        for index in 0..template.nodes().len() {
            self.fire_source(&mut scope, index, depth)?;
        }

        for index in 0..template.nodes().len() {
            settle(&mut scope, index);
        }

        let outputs: Vec<Bit> = template
            .boundary_outputs()
            .map(|index| scope.signal(index))
            .collect();
        trace!(template = template.id().0, ?outputs, "evaluated instance");
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logiq_netlist::{Arity, TemplateNode, TemplatePin};

    /// in0, in1 -> XOR -> out
    fn xor_template(registry: &mut TemplateRegistry) -> TemplateId {
        let mut in0 = TemplateNode::new(NodeKind::Input, Arity::new(0, 1));
        let mut in1 = TemplateNode::new(NodeKind::Input, Arity::new(0, 1));
        let mut out = TemplateNode::new(NodeKind::Output, Arity::new(1, 0));
        let mut xor = TemplateNode::new(NodeKind::Xor, Arity::new(2, 1));
        in0.outgoing[0].push(TemplatePin::new(3, 0));
        in1.outgoing[0].push(TemplatePin::new(3, 1));
        xor.incoming = vec![Some(TemplatePin::new(0, 0)), Some(TemplatePin::new(1, 0))];
        xor.outgoing[0].push(TemplatePin::new(2, 0));
        out.incoming[0] = Some(TemplatePin::new(3, 0));
        registry
            .register("XOR2", Arity::new(2, 1), vec![in0, in1, out, xor])
            .unwrap()
    }

    #[test]
    fn test_evaluate_instance_truth_table() {
        let mut registry = TemplateRegistry::new();
        let id = xor_template(&mut registry);
        let template = registry.get(id).unwrap();
        let propagator = Propagator::new(&registry, 64);
        let mut state = InstanceState::new(template, &registry);

        for (a, b, expected) in [
            (Bit::Low, Bit::Low, Bit::Low),
            (Bit::High, Bit::Low, Bit::High),
            (Bit::Low, Bit::High, Bit::High),
            (Bit::High, Bit::High, Bit::Low),
        ] {
            let outputs = propagator
                .evaluate_instance(&mut state, template, &[a, b], 0)
                .unwrap();
            assert_eq!(outputs, vec![expected], "XOR({a}, {b})");
        }
    }

    #[test]
    fn test_instances_have_separate_buffers() {
        let mut registry = TemplateRegistry::new();
        let id = xor_template(&mut registry);
        let template = registry.get(id).unwrap();
        let propagator = Propagator::new(&registry, 64);
        let mut first = InstanceState::new(template, &registry);
        let mut second = InstanceState::new(template, &registry);

        propagator
            .evaluate_instance(&mut first, template, &[Bit::High, Bit::Low], 0)
            .unwrap();
        propagator
            .evaluate_instance(&mut second, template, &[Bit::High, Bit::High], 0)
            .unwrap();

        assert_eq!(first.signal(3), Some(Bit::High));
        assert_eq!(second.signal(3), Some(Bit::Low));
    }

    #[test]
    fn test_state_capture_waits_for_commit() {
        // in -> STATE -> out
        let mut registry = TemplateRegistry::new();
        let mut input = TemplateNode::new(NodeKind::Input, Arity::new(0, 1));
        let mut out = TemplateNode::new(NodeKind::Output, Arity::new(1, 0));
        let mut state = TemplateNode::new(NodeKind::State, Arity::new(1, 1));
        input.outgoing[0].push(TemplatePin::new(2, 0));
        state.incoming[0] = Some(TemplatePin::new(0, 0));
        state.outgoing[0].push(TemplatePin::new(1, 0));
        out.incoming[0] = Some(TemplatePin::new(2, 0));
        let id = registry
            .register("DELAY", Arity::new(1, 1), vec![input, out, state])
            .unwrap();
        let template = registry.get(id).unwrap();
        let propagator = Propagator::new(&registry, 64);
        let mut buffer = InstanceState::new(template, &registry);

        let outputs = propagator
            .evaluate_instance(&mut buffer, template, &[Bit::High], 0)
            .unwrap();
        assert_eq!(outputs, vec![Bit::Low]);
        assert_eq!(buffer.signal(2), Some(Bit::Low));

        // A cleared buffer forgets the staged capture
        let mut dropped = buffer.clone();
        dropped.clear_inputs();
        dropped.commit_latches();
        assert_eq!(dropped.signal(2), Some(Bit::Low));

        buffer.commit_latches();
        assert_eq!(buffer.signal(2), Some(Bit::High));
        let outputs = propagator
            .evaluate_instance(&mut buffer, template, &[Bit::Low], 0)
            .unwrap();
        assert_eq!(outputs, vec![Bit::High]);
    }

    #[test]
    fn test_nested_buffers_are_built_recursively() {
        let mut registry = TemplateRegistry::new();
        let inner = xor_template(&mut registry);

        let mut in0 = TemplateNode::new(NodeKind::Input, Arity::new(0, 1));
        let mut in1 = TemplateNode::new(NodeKind::Input, Arity::new(0, 1));
        let mut out = TemplateNode::new(NodeKind::Output, Arity::new(1, 0));
        let mut ic = TemplateNode::new(NodeKind::Compound(inner), Arity::new(2, 1));
        in0.outgoing[0].push(TemplatePin::new(3, 0));
        in1.outgoing[0].push(TemplatePin::new(3, 1));
        ic.incoming = vec![Some(TemplatePin::new(0, 0)), Some(TemplatePin::new(1, 0))];
        ic.outgoing[0].push(TemplatePin::new(2, 0));
        out.incoming[0] = Some(TemplatePin::new(3, 0));
        let outer = registry
            .register("WRAP", Arity::new(2, 1), vec![in0, in1, out, ic])
            .unwrap();

        let template = registry.get(outer).unwrap();
        let mut state = InstanceState::new(template, &registry);
        assert_eq!(state.nested(3).map(InstanceState::template), Some(inner));

        let propagator = Propagator::new(&registry, 64);
        let outputs = propagator
            .evaluate_instance(&mut state, template, &[Bit::Low, Bit::High], 0)
            .unwrap();
        assert_eq!(outputs, vec![Bit::High]);
        assert_eq!(state.nested(3).and_then(|n| n.signal(2)), Some(Bit::High));
    }
}
