//! Node Storage and Connection Manager
//!
//! The [`Netlist`] owns every node of the editable circuit and every wire
//! between them. Nodes are addressed through generational [`NodeHandle`]s.
//!
//! # Wiring invariants
//!
//! - Every outgoing wire recorded on a source has exactly one matching
//!   driver back-reference on its destination, and vice versa.
//! - An input slot has at most one driver.
//!
//! Both are checked after every mutation in debug builds.

use crate::error::{NetlistError, Result};
use crate::node::{Arity, Bit, Node, NodeHandle, NodeKind, Pin, Vec2, Wire};
use crate::template::TemplateRegistry;
use slotmap::SlotMap;
use tracing::debug;

/// The editable circuit graph
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    nodes: SlotMap<NodeHandle, Node>,
}

impl Netlist {
    /// Create an empty netlist
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Node storage
    // ------------------------------------------------------------------------

    /// Create a node. Slot counts come from the kind, or from the registry
    /// for compound kinds. Inputs start unset and the signal starts low.
    pub fn create_node(&mut self, kind: NodeKind, templates: &TemplateRegistry) -> Result<NodeHandle> {
        let arity = match kind.primitive_arity() {
            Some(arity) => arity,
            None => templates.arity_of(kind)?,
        };
        Ok(self.insert_node(kind, arity))
    }

    pub(crate) fn insert_node(&mut self, kind: NodeKind, arity: Arity) -> NodeHandle {
        let handle = self.nodes.insert(Node::new(kind, arity));
        debug!(?handle, %kind, "created node");
        handle
    }

    /// Delete a node and every wire touching it
    pub fn delete_node(&mut self, handle: NodeHandle) -> Result<()> {
        let node = self.node_ref(handle)?;
        let incoming: Vec<(u32, Pin)> = node.drivers().collect();
        let outgoing: Vec<(u32, Pin)> = node.fanouts().collect();

        for (slot, source) in incoming {
            self.unlink(source, Pin::new(handle, slot));
        }
        for (slot, dest) in outgoing {
            self.unlink(Pin::new(handle, slot), dest);
        }

        self.nodes.remove(handle);
        debug!(?handle, "deleted node");
        self.debug_check_invariants();
        Ok(())
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains_key(handle)
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle)
    }

    /// Mutable access to a node's simulation state. Wiring stays private to
    /// the netlist.
    pub fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.nodes.get_mut(handle)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NodeHandle, &mut Node)> {
        self.nodes.iter_mut()
    }

    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.keys()
    }

    pub fn set_position(&mut self, handle: NodeHandle, position: Vec2) -> Result<()> {
        self.node_ref_mut(handle)?.set_position(position);
        Ok(())
    }

    pub fn position(&self, handle: NodeHandle) -> Result<Vec2> {
        Ok(self.node_ref(handle)?.position())
    }

    pub fn set_size(&mut self, handle: NodeHandle, size: Vec2) -> Result<()> {
        self.node_ref_mut(handle)?.set_size(size);
        Ok(())
    }

    pub fn size(&self, handle: NodeHandle) -> Result<Vec2> {
        Ok(self.node_ref(handle)?.size())
    }

    pub fn signal(&self, handle: NodeHandle) -> Result<Bit> {
        Ok(self.node_ref(handle)?.signal())
    }

    // ------------------------------------------------------------------------
    // Connection manager
    // ------------------------------------------------------------------------

    /// Wire `src`'s output slot to `dst`'s input slot
    pub fn connect(&mut self, src: NodeHandle, src_slot: u32, dst: NodeHandle, dst_slot: u32) -> Result<()> {
        let source = self.node_ref(src)?;
        let dest = self.node_ref(dst)?;
        if src == dst {
            return Err(NetlistError::SelfConnection);
        }
        check_slot(src_slot, source.output_count())?;
        check_slot(dst_slot, dest.input_count())?;
        if dest.driver(dst_slot).is_some() {
            return Err(NetlistError::SlotOccupied { slot: dst_slot });
        }

        let source_pin = Pin::new(src, src_slot);
        let dest_pin = Pin::new(dst, dst_slot);
        self.node_ref_mut(src)?.outgoing[src_slot as usize].push(dest_pin);
        self.node_ref_mut(dst)?.incoming[dst_slot as usize] = Some(source_pin);

        debug!(?src, src_slot, ?dst, dst_slot, "connected");
        self.debug_check_invariants();
        Ok(())
    }

    /// Remove exactly one wire
    pub fn disconnect_one(&mut self, src: NodeHandle, src_slot: u32, dst: NodeHandle, dst_slot: u32) -> Result<()> {
        self.node_ref(src)?;
        let dest = self.node_ref(dst)?;
        let source_pin = Pin::new(src, src_slot);
        if dest.driver(dst_slot) != Some(source_pin) {
            return Err(NetlistError::WireNotFound);
        }

        self.unlink(source_pin, Pin::new(dst, dst_slot));
        debug!(?src, src_slot, ?dst, dst_slot, "disconnected");
        self.debug_check_invariants();
        Ok(())
    }

    /// Remove every wire fanned out from one output slot. Returns how many
    /// wires were removed.
    pub fn disconnect_all_outputs(&mut self, src: NodeHandle, src_slot: u32) -> Result<usize> {
        let source = self.node_ref(src)?;
        check_slot(src_slot, source.output_count())?;
        let dests = source.outgoing[src_slot as usize].clone();

        let source_pin = Pin::new(src, src_slot);
        for dest in &dests {
            self.unlink(source_pin, *dest);
        }

        debug!(?src, src_slot, removed = dests.len(), "cleared output");
        self.debug_check_invariants();
        Ok(dests.len())
    }

    /// Destinations fed by one output slot
    pub fn fanout(&self, handle: NodeHandle, slot: u32) -> Result<&[Pin]> {
        let node = self.node_ref(handle)?;
        node.fanout(slot).ok_or(NetlistError::SlotOutOfRange {
            slot,
            count: node.output_count(),
        })
    }

    /// Source driving one input slot
    pub fn driver(&self, handle: NodeHandle, slot: u32) -> Result<Option<Pin>> {
        let node = self.node_ref(handle)?;
        check_slot(slot, node.input_count())?;
        Ok(node.driver(slot))
    }

    /// Every wire in the graph, enumerated from the source side
    pub fn wires(&self) -> impl Iterator<Item = Wire> + '_ {
        self.nodes.iter().flat_map(|(handle, node)| {
            node.fanouts().map(move |(slot, dest)| Wire {
                source: Pin::new(handle, slot),
                dest,
            })
        })
    }

    pub fn wire_count(&self) -> usize {
        self.nodes
            .values()
            .map(|node| node.outgoing.iter().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Number of wire records anywhere in the graph that mention `handle`,
    /// counting both the source-side and destination-side entries
    pub fn wires_referencing(&self, handle: NodeHandle) -> usize {
        self.nodes
            .iter()
            .map(|(owner, node)| {
                let as_dest = node.fanouts().filter(|(_, dest)| dest.node == handle).count();
                let as_source = node.drivers().filter(|(_, src)| src.node == handle).count();
                let own = if owner == handle {
                    node.fanouts().count() + node.drivers().count()
                } else {
                    0
                };
                as_dest + as_source + own
            })
            .sum()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn node_ref(&self, handle: NodeHandle) -> Result<&Node> {
        self.nodes.get(handle).ok_or(NetlistError::InvalidHandle(handle))
    }

    fn node_ref_mut(&mut self, handle: NodeHandle) -> Result<&mut Node> {
        self.nodes.get_mut(handle).ok_or(NetlistError::InvalidHandle(handle))
    }

    /// Remove both sides of one wire
    fn unlink(&mut self, source: Pin, dest: Pin) {
        let removed_out = self
            .nodes
            .get_mut(source.node)
            .is_some_and(|node| node.take_outgoing(source.slot, dest));
        let removed_in = self
            .nodes
            .get_mut(dest.node)
            .is_some_and(|node| node.take_incoming(dest.slot, source));
        debug_assert!(
            removed_out && removed_in,
            "wire {source:?} -> {dest:?} was missing a side (out: {removed_out}, in: {removed_in})"
        );
    }

    #[cfg(debug_assertions)]
    fn debug_check_invariants(&self) {
        for (handle, node) in &self.nodes {
            assert_eq!(
                node.input_state().len(),
                node.incoming.len(),
                "node {handle:?} has more input cells than declared inputs"
            );
            for (slot, dest) in node.fanouts() {
                let back = self.nodes.get(dest.node).and_then(|n| n.driver(dest.slot));
                assert_eq!(
                    back,
                    Some(Pin::new(handle, slot)),
                    "outgoing wire {handle:?}:{slot} -> {dest:?} has no back-reference"
                );
            }
            for (slot, source) in node.drivers() {
                let forward = self
                    .nodes
                    .get(source.node)
                    .and_then(|n| n.fanout(source.slot))
                    .map(|fan| fan.iter().filter(|p| **p == Pin::new(handle, slot)).count());
                assert_eq!(
                    forward,
                    Some(1),
                    "driver {source:?} -> {handle:?}:{slot} has no matching outgoing wire"
                );
            }
        }
    }

    #[cfg(not(debug_assertions))]
    fn debug_check_invariants(&self) {}
}

fn check_slot(slot: u32, count: u32) -> Result<()> {
    if slot < count {
        Ok(())
    } else {
        Err(NetlistError::SlotOutOfRange { slot, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(netlist: &mut Netlist, kind: NodeKind) -> NodeHandle {
        netlist.create_node(kind, &TemplateRegistry::new()).unwrap()
    }

    #[test]
    fn test_create_node_sizes_slots_from_kind() {
        let mut netlist = Netlist::new();
        let and = gate(&mut netlist, NodeKind::And);
        let input = gate(&mut netlist, NodeKind::Input);
        let output = gate(&mut netlist, NodeKind::Output);

        assert_eq!(netlist.node(and).unwrap().arity(), Arity::new(2, 1));
        assert_eq!(netlist.node(input).unwrap().arity(), Arity::new(0, 1));
        assert_eq!(netlist.node(output).unwrap().arity(), Arity::new(1, 0));
        assert_eq!(netlist.len(), 3);
    }

    #[test]
    fn test_create_unknown_compound_fails() {
        let mut netlist = Netlist::new();
        let result = netlist.create_node(NodeKind::Compound(crate::TemplateId(7)), &TemplateRegistry::new());
        assert_eq!(result, Err(NetlistError::UnknownTemplate(crate::TemplateId(7))));
        assert!(netlist.is_empty());
    }

    #[test]
    fn test_connect_records_both_sides() {
        let mut netlist = Netlist::new();
        let a = gate(&mut netlist, NodeKind::Input);
        let and = gate(&mut netlist, NodeKind::And);

        netlist.connect(a, 0, and, 1).unwrap();

        assert_eq!(netlist.fanout(a, 0).unwrap(), &[Pin::new(and, 1)]);
        assert_eq!(netlist.driver(and, 1).unwrap(), Some(Pin::new(a, 0)));
        assert_eq!(netlist.driver(and, 0).unwrap(), None);
        assert_eq!(netlist.wire_count(), 1);
    }

    #[test]
    fn test_connect_occupied_slot_leaves_graph_unchanged() {
        let mut netlist = Netlist::new();
        let a = gate(&mut netlist, NodeKind::Input);
        let b = gate(&mut netlist, NodeKind::Input);
        let or = gate(&mut netlist, NodeKind::Or);
        netlist.connect(a, 0, or, 0).unwrap();

        let before: Vec<Wire> = netlist.wires().collect();
        assert_eq!(netlist.connect(b, 0, or, 0), Err(NetlistError::SlotOccupied { slot: 0 }));
        let after: Vec<Wire> = netlist.wires().collect();

        assert_eq!(before, after);
        assert!(netlist.fanout(b, 0).unwrap().is_empty());
    }

    #[test]
    fn test_connect_rejects_bad_slots_and_self_loops() {
        let mut netlist = Netlist::new();
        let a = gate(&mut netlist, NodeKind::Input);
        let xor = gate(&mut netlist, NodeKind::Xor);

        assert_eq!(
            netlist.connect(a, 1, xor, 0),
            Err(NetlistError::SlotOutOfRange { slot: 1, count: 1 })
        );
        assert_eq!(
            netlist.connect(a, 0, xor, 2),
            Err(NetlistError::SlotOutOfRange { slot: 2, count: 2 })
        );
        assert_eq!(netlist.connect(xor, 0, xor, 0), Err(NetlistError::SelfConnection));
        assert_eq!(netlist.wire_count(), 0);
    }

    #[test]
    fn test_stale_handle_rejected_after_slot_reuse() {
        let mut netlist = Netlist::new();
        let old = gate(&mut netlist, NodeKind::And);
        netlist.delete_node(old).unwrap();
        let new = gate(&mut netlist, NodeKind::And);
        let input = gate(&mut netlist, NodeKind::Input);

        assert_ne!(old, new);
        assert!(!netlist.contains(old));
        assert_eq!(netlist.connect(input, 0, old, 0), Err(NetlistError::InvalidHandle(old)));
        assert_eq!(netlist.delete_node(old), Err(NetlistError::InvalidHandle(old)));
        assert!(netlist.connect(input, 0, new, 0).is_ok());
    }

    #[test]
    fn test_disconnect_one() {
        let mut netlist = Netlist::new();
        let a = gate(&mut netlist, NodeKind::Input);
        let and = gate(&mut netlist, NodeKind::And);
        netlist.connect(a, 0, and, 0).unwrap();
        netlist.connect(a, 0, and, 1).unwrap();

        netlist.disconnect_one(a, 0, and, 0).unwrap();

        assert_eq!(netlist.fanout(a, 0).unwrap(), &[Pin::new(and, 1)]);
        assert_eq!(netlist.driver(and, 0).unwrap(), None);
        assert_eq!(netlist.disconnect_one(a, 0, and, 0), Err(NetlistError::WireNotFound));
    }

    #[test]
    fn test_disconnect_all_outputs_frees_destinations() {
        let mut netlist = Netlist::new();
        let a = gate(&mut netlist, NodeKind::Input);
        let x = gate(&mut netlist, NodeKind::Xor);
        let y = gate(&mut netlist, NodeKind::Or);
        netlist.connect(a, 0, x, 0).unwrap();
        netlist.connect(a, 0, x, 1).unwrap();
        netlist.connect(a, 0, y, 1).unwrap();

        assert_eq!(netlist.disconnect_all_outputs(a, 0).unwrap(), 3);
        assert_eq!(netlist.wire_count(), 0);
        assert_eq!(netlist.driver(y, 1).unwrap(), None);

        // Freed slots accept a new driver
        let b = gate(&mut netlist, NodeKind::Input);
        assert!(netlist.connect(b, 0, x, 0).is_ok());
    }

    #[test]
    fn test_delete_node_removes_every_wire() {
        let mut netlist = Netlist::new();
        let a = gate(&mut netlist, NodeKind::Input);
        let b = gate(&mut netlist, NodeKind::Input);
        let and = gate(&mut netlist, NodeKind::And);
        let out1 = gate(&mut netlist, NodeKind::Output);
        let out2 = gate(&mut netlist, NodeKind::Output);
        netlist.connect(a, 0, and, 0).unwrap();
        netlist.connect(b, 0, and, 1).unwrap();
        netlist.connect(and, 0, out1, 0).unwrap();
        netlist.connect(and, 0, out2, 0).unwrap();
        netlist.connect(a, 0, out2, 0).unwrap_err();

        netlist.delete_node(and).unwrap();

        assert_eq!(netlist.wires_referencing(and), 0);
        assert_eq!(netlist.wire_count(), 0);
        assert!(netlist.fanout(a, 0).unwrap().is_empty());
        assert_eq!(netlist.driver(out2, 0).unwrap(), None);
    }

    #[test]
    fn test_geometry_is_stored_verbatim() {
        let mut netlist = Netlist::new();
        let or = gate(&mut netlist, NodeKind::Or);
        netlist.set_position(or, Vec2::new(12.5, -3.0)).unwrap();
        netlist.set_size(or, Vec2::new(64.0, 32.0)).unwrap();

        assert_eq!(netlist.position(or).unwrap(), Vec2::new(12.5, -3.0));
        assert_eq!(netlist.size(or).unwrap(), Vec2::new(64.0, 32.0));
    }
}
