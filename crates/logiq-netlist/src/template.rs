//! Compound Templates
//!
//! A template is an immutable, flattened definition of a compound circuit
//! ("IC"). Its nodes are ordered boundary inputs first, then boundary
//! outputs, then interior nodes, and its wires refer to positions in that
//! same array rather than to netlist handles.
//!
//! Templates are owned by a [`TemplateRegistry`] and are never mutated or
//! removed once registered, so instances can always be re-created from them.

use crate::error::{NetlistError, Result};
use crate::node::{Arity, Bit, NodeKind};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

/// Identifier of a registered template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(pub u32);

/// A slot on a template node, addressed by flattened index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplatePin {
    pub node: u32,
    pub slot: u32,
}

impl TemplatePin {
    pub fn new(node: u32, slot: u32) -> Self {
        Self { node, slot }
    }
}

/// One node inside a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateNode {
    pub kind: NodeKind,
    pub arity: Arity,
    /// Signal the node starts with in every new instance (held value for
    /// STATE nodes)
    pub initial_signal: Bit,
    /// Fan-out per output slot
    pub outgoing: Vec<Vec<TemplatePin>>,
    /// Driver per input slot
    pub incoming: Vec<Option<TemplatePin>>,
}

impl TemplateNode {
    /// A node with no wires
    pub fn new(kind: NodeKind, arity: Arity) -> Self {
        Self {
            kind,
            arity,
            initial_signal: Bit::Low,
            outgoing: vec![Vec::new(); arity.outputs as usize],
            incoming: vec![None; arity.inputs as usize],
        }
    }

    pub fn fanout(&self, slot: u32) -> &[TemplatePin] {
        self.outgoing
            .get(slot as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// A compiled compound circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    id: TemplateId,
    name: String,
    arity: Arity,
    nodes: Vec<TemplateNode>,
}

impl Template {
    pub fn id(&self) -> TemplateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn input_count(&self) -> u32 {
        self.arity.inputs
    }

    pub fn output_count(&self) -> u32 {
        self.arity.outputs
    }

    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&TemplateNode> {
        self.nodes.get(index)
    }

    /// Flattened indices of the boundary INPUT nodes; index `i` feeds
    /// instance input slot `i`
    pub fn boundary_inputs(&self) -> Range<usize> {
        0..self.arity.inputs as usize
    }

    /// Flattened indices of the boundary OUTPUT nodes; the `j`-th one
    /// drives instance output slot `j`
    pub fn boundary_outputs(&self) -> Range<usize> {
        let start = self.arity.inputs as usize;
        start..start + self.arity.outputs as usize
    }

    /// Flattened indices of the interior logic nodes
    pub fn interior(&self) -> Range<usize> {
        self.boundary_outputs().end..self.nodes.len()
    }

    fn validate(&self, registry: &TemplateRegistry) -> Result<()> {
        let malformed = |msg: String| Err(NetlistError::MalformedTemplate(msg));

        if self.nodes.len() < self.interior().start {
            return malformed(format!(
                "{} nodes cannot hold {} inputs and {} outputs",
                self.nodes.len(),
                self.arity.inputs,
                self.arity.outputs
            ));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            let expected = if self.boundary_inputs().contains(&index) {
                Some(NodeKind::Input)
            } else if self.boundary_outputs().contains(&index) {
                Some(NodeKind::Output)
            } else {
                None
            };
            match expected {
                Some(kind) if node.kind != kind => {
                    return malformed(format!("node {index} should be {kind} but is {}", node.kind));
                }
                None if matches!(node.kind, NodeKind::Input | NodeKind::Output) => {
                    return malformed(format!("interior node {index} is a boundary {}", node.kind));
                }
                _ => {}
            }

            // Compound nodes may only refer to templates that already exist,
            // which keeps nesting finite
            let arity = match node.kind.primitive_arity() {
                Some(arity) => arity,
                None => registry.arity_of(node.kind)?,
            };
            if node.arity != arity
                || node.incoming.len() != arity.inputs as usize
                || node.outgoing.len() != arity.outputs as usize
            {
                return malformed(format!("node {index} slot counts do not match {}", node.kind));
            }

            for (slot, fan) in node.outgoing.iter().enumerate() {
                for (position, dest) in fan.iter().enumerate() {
                    if fan[..position].contains(dest) {
                        return malformed(format!("wire {index}:{slot} -> {}:{} is listed twice", dest.node, dest.slot));
                    }
                    let back = self
                        .nodes
                        .get(dest.node as usize)
                        .and_then(|n| n.incoming.get(dest.slot as usize))
                        .copied()
                        .flatten();
                    if back != Some(TemplatePin::new(index as u32, slot as u32)) {
                        return malformed(format!("wire {index}:{slot} -> {}:{} is one-sided", dest.node, dest.slot));
                    }
                }
            }
            for (slot, source) in node.incoming.iter().enumerate() {
                let Some(source) = source else { continue };
                let forward = self
                    .nodes
                    .get(source.node as usize)
                    .map(|n| n.fanout(source.slot).contains(&TemplatePin::new(index as u32, slot as u32)))
                    .unwrap_or(false);
                if !forward {
                    return malformed(format!("driver {}:{} -> {index}:{slot} is one-sided", source.node, source.slot));
                }
            }
        }
        Ok(())
    }
}

/// Process-owned store of compiled templates
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: Vec<Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new template under a fresh id
    pub fn register(&mut self, name: impl Into<String>, arity: Arity, nodes: Vec<TemplateNode>) -> Result<TemplateId> {
        let id = TemplateId(self.templates.len() as u32);
        let template = Template {
            id,
            name: name.into(),
            arity,
            nodes,
        };
        template.validate(self)?;

        debug!(
            id = id.0,
            name = %template.name,
            inputs = arity.inputs,
            outputs = arity.outputs,
            nodes = template.nodes.len(),
            "registered template"
        );
        self.templates.push(template);
        Ok(id)
    }

    pub fn get(&self, id: TemplateId) -> Option<&Template> {
        self.templates.get(id.0 as usize)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Slot counts for a compound kind
    pub fn arity_of(&self, kind: NodeKind) -> Result<Arity> {
        match kind {
            NodeKind::Compound(id) => self
                .get(id)
                .map(Template::arity)
                .ok_or(NetlistError::UnknownTemplate(id)),
            other => other
                .primitive_arity()
                .ok_or(NetlistError::MalformedTemplate(format!("{other} has no arity"))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Default name for the next compiled template
    pub fn next_default_name(&self) -> String {
        format!("IC{}", self.templates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// in0, in1 -> AND -> out
    fn and_body() -> Vec<TemplateNode> {
        let mut in0 = TemplateNode::new(NodeKind::Input, Arity::new(0, 1));
        let mut in1 = TemplateNode::new(NodeKind::Input, Arity::new(0, 1));
        let mut out = TemplateNode::new(NodeKind::Output, Arity::new(1, 0));
        let mut and = TemplateNode::new(NodeKind::And, Arity::new(2, 1));

        in0.outgoing[0].push(TemplatePin::new(3, 0));
        in1.outgoing[0].push(TemplatePin::new(3, 1));
        and.incoming = vec![Some(TemplatePin::new(0, 0)), Some(TemplatePin::new(1, 0))];
        and.outgoing[0].push(TemplatePin::new(2, 0));
        out.incoming[0] = Some(TemplatePin::new(3, 0));

        vec![in0, in1, out, and]
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TemplateRegistry::new();
        let id = registry.register("AND2", Arity::new(2, 1), and_body()).unwrap();

        let template = registry.get(id).unwrap();
        assert_eq!(template.name(), "AND2");
        assert_eq!(template.boundary_inputs(), 0..2);
        assert_eq!(template.boundary_outputs(), 2..3);
        assert_eq!(template.interior(), 3..4);
        assert_eq!(registry.find_by_name("AND2").map(Template::id), Some(id));
        assert_eq!(registry.arity_of(NodeKind::Compound(id)), Ok(Arity::new(2, 1)));
        assert_eq!(registry.next_default_name(), "IC1");
    }

    #[test]
    fn test_register_rejects_misplaced_boundary() {
        let mut registry = TemplateRegistry::new();
        let mut body = and_body();
        body.swap(0, 3);

        let result = registry.register("bad", Arity::new(2, 1), body);
        assert!(matches!(result, Err(NetlistError::MalformedTemplate(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_rejects_one_sided_wire() {
        let mut registry = TemplateRegistry::new();
        let mut body = and_body();
        body[2].incoming[0] = None;

        let result = registry.register("bad", Arity::new(2, 1), body);
        assert!(matches!(result, Err(NetlistError::MalformedTemplate(_))));
    }

    #[test]
    fn test_register_rejects_duplicate_fanout() {
        let mut registry = TemplateRegistry::new();
        let mut body = and_body();
        body[3].outgoing[0].push(TemplatePin::new(2, 0));

        let result = registry.register("bad", Arity::new(2, 1), body);
        assert!(matches!(result, Err(NetlistError::MalformedTemplate(msg)) if msg.contains("twice")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_rejects_unknown_nested_template() {
        let mut registry = TemplateRegistry::new();
        let mut body = and_body();
        body.push(TemplateNode::new(NodeKind::Compound(TemplateId(5)), Arity::new(2, 1)));

        let result = registry.register("nested", Arity::new(2, 1), body);
        assert_eq!(result, Err(NetlistError::UnknownTemplate(TemplateId(5))));
    }
}
