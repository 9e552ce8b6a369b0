//! Compound-Circuit Compiler
//!
//! Flattens a self-contained selection of nodes into an immutable
//! [`Template`](crate::Template), then replaces the selection with a single
//! instance node of the new compound kind.
//!
//! # Flow
//!
//! ```text
//! selection → partition (inputs / outputs / interior)
//!           → closure check (no wire may leave the selection)
//!           → flatten (inputs, outputs, interior) + remap wires to indices
//!           → register template
//!           → delete selection, place instance
//! ```
//!
//! Every check runs before the netlist is touched, so a failed compile
//! leaves the graph exactly as it was.

use crate::error::NetlistError;
use crate::netlist::Netlist;
use crate::node::{NodeHandle, NodeKind, Pin, Vec2};
use crate::template::{TemplateId, TemplateNode, TemplatePin, TemplateRegistry};
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Which side of a node a wire attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDirection {
    Incoming,
    Outgoing,
}

impl fmt::Display for WireDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireDirection::Incoming => write!(f, "incoming"),
            WireDirection::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// Errors that reject a compile request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Cannot compile an empty selection")]
    EmptySelection,

    #[error("Selection contains an invalid node handle: {0:?}")]
    InvalidHandle(NodeHandle),

    /// A wire crosses the selection boundary
    #[error("{direction} wire on slot {slot} of node {node:?} leaves the selection")]
    DanglingExternalReference {
        node: NodeHandle,
        slot: u32,
        direction: WireDirection,
    },

    /// Nothing to drive or read the compiled circuit through
    #[error("Selection has no INPUT or OUTPUT nodes")]
    NoBoundaryNodes,

    #[error(transparent)]
    Netlist(#[from] NetlistError),
}

/// Outcome of a successful compile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSelection {
    /// The newly registered template
    pub template: TemplateId,
    /// The instance node that replaced the selection
    pub instance: NodeHandle,
    /// Handles of the nodes that were folded into the template, in
    /// flattened order
    pub removed: Vec<NodeHandle>,
}

/// Compile `selection` into a new template named `name` (or `IC<n>`), and
/// replace it with one instance placed at `position`.
///
/// Duplicate handles are ignored; the first occurrence fixes the order.
pub fn compile_selection(
    netlist: &mut Netlist,
    templates: &mut TemplateRegistry,
    selection: &[NodeHandle],
    name: Option<String>,
    position: Vec2,
) -> Result<CompiledSelection, CompileError> {
    let selected: IndexSet<NodeHandle> = selection.iter().copied().collect();
    if selected.is_empty() {
        return Err(CompileError::EmptySelection);
    }

    let order = flatten_order(netlist, &selected)?;
    check_closed(netlist, &selected)?;

    let arity = {
        let inputs = count_kind(netlist, &order, NodeKind::Input);
        let outputs = count_kind(netlist, &order, NodeKind::Output);
        crate::Arity::new(inputs, outputs)
    };
    let body = remap_wires(netlist, &order)?;

    let name = name.unwrap_or_else(|| templates.next_default_name());
    let template = templates.register(name, arity, body)?;

    // Past this point nothing can fail for a validated selection
    let removed: Vec<NodeHandle> = order.keys().copied().collect();
    for &handle in &removed {
        netlist.delete_node(handle)?;
    }
    let instance = netlist.create_node(NodeKind::Compound(template), templates)?;
    netlist.set_position(instance, position)?;

    debug!(
        template = template.0,
        inputs = arity.inputs,
        outputs = arity.outputs,
        folded = removed.len(),
        ?instance,
        "compiled selection"
    );

    Ok(CompiledSelection {
        template,
        instance,
        removed,
    })
}

/// Assign flattened indices: boundary inputs, then boundary outputs, then
/// interior nodes, each bucket in selection order
fn flatten_order(netlist: &Netlist, selected: &IndexSet<NodeHandle>) -> Result<IndexMap<NodeHandle, u32>, CompileError> {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut interior = Vec::new();

    for &handle in selected {
        let node = netlist.node(handle).ok_or(CompileError::InvalidHandle(handle))?;
        match node.kind() {
            NodeKind::Input => inputs.push(handle),
            NodeKind::Output => outputs.push(handle),
            _ => interior.push(handle),
        }
    }

    if inputs.is_empty() && outputs.is_empty() {
        return Err(CompileError::NoBoundaryNodes);
    }

    Ok(inputs
        .into_iter()
        .chain(outputs)
        .chain(interior)
        .enumerate()
        .map(|(index, handle)| (handle, index as u32))
        .collect())
}

/// Reject any wire with exactly one end inside the selection
fn check_closed(netlist: &Netlist, selected: &IndexSet<NodeHandle>) -> Result<(), CompileError> {
    for &handle in selected {
        let Some(node) = netlist.node(handle) else {
            return Err(CompileError::InvalidHandle(handle));
        };
        if let Some((slot, _)) = node.drivers().find(|(_, src)| !selected.contains(&src.node)) {
            return Err(CompileError::DanglingExternalReference {
                node: handle,
                slot,
                direction: WireDirection::Incoming,
            });
        }
        if let Some((slot, _)) = node.fanouts().find(|(_, dest)| !selected.contains(&dest.node)) {
            return Err(CompileError::DanglingExternalReference {
                node: handle,
                slot,
                direction: WireDirection::Outgoing,
            });
        }
    }
    Ok(())
}

fn count_kind(netlist: &Netlist, order: &IndexMap<NodeHandle, u32>, kind: NodeKind) -> u32 {
    order
        .keys()
        .filter(|handle| netlist.node(**handle).is_some_and(|n| n.kind() == kind))
        .count() as u32
}

/// Copy each selected node into a template node, translating handle-based
/// pins into flattened indices
fn remap_wires(netlist: &Netlist, order: &IndexMap<NodeHandle, u32>) -> Result<Vec<TemplateNode>, CompileError> {
    let to_index = |pin: Pin| -> Result<TemplatePin, CompileError> {
        let index = order.get(&pin.node).ok_or(CompileError::DanglingExternalReference {
            node: pin.node,
            slot: pin.slot,
            direction: WireDirection::Outgoing,
        })?;
        Ok(TemplatePin::new(*index, pin.slot))
    };

    let mut body = Vec::with_capacity(order.len());
    for (&handle, &index) in order {
        let node = netlist.node(handle).ok_or(CompileError::InvalidHandle(handle))?;
        let mut flat = TemplateNode::new(node.kind(), node.arity());
        flat.initial_signal = node.signal();

        for (slot, dest) in node.fanouts() {
            flat.outgoing[slot as usize].push(to_index(dest)?);
        }
        for (slot, source) in node.drivers() {
            flat.incoming[slot as usize] = Some(to_index(source)?);
        }

        trace!(index, kind = %node.kind(), "flattened node");
        body.push(flat);
    }
    Ok(body)
}
