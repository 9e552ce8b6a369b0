//! Circuit Facade
//!
//! [`Circuit`] is the handle-based API the editor talks to. It owns the
//! netlist, the template registry, and the per-instance runtime buffers,
//! and runs one propagation step per call to [`Circuit::simulate_step`].
//!
//! # Example
//!
//! ```
//! use logiq_sim::{Bit, Circuit, NodeKind};
//!
//! let mut circuit = Circuit::new();
//! let a = circuit.create_node(NodeKind::Input).unwrap();
//! let b = circuit.create_node(NodeKind::Input).unwrap();
//! let xor = circuit.create_node(NodeKind::Xor).unwrap();
//! let y = circuit.create_node(NodeKind::Output).unwrap();
//! circuit.connect(a, 0, xor, 0).unwrap();
//! circuit.connect(b, 0, xor, 1).unwrap();
//! circuit.connect(xor, 0, y, 0).unwrap();
//!
//! circuit.set_input_signal(a, Bit::High).unwrap();
//! circuit.simulate_step().unwrap();
//! assert_eq!(circuit.read_output_signal(y).unwrap(), Bit::High);
//! ```

use crate::compound::InstanceState;
use crate::config::SimulationConfig;
use crate::error::{SimulationError, SimulationResult};
use crate::propagate::{settle, NetlistScope, Propagator};
use logiq_netlist::{
    compile_selection, Bit, CompileError, Netlist, NetlistError, NodeHandle, NodeKind, Template, TemplateId,
    TemplateRegistry, Vec2,
};
use slotmap::SecondaryMap;
use tracing::{debug, warn};

/// An editable, simulatable logic circuit
#[derive(Debug, Clone, Default)]
pub struct Circuit {
    netlist: Netlist,
    templates: TemplateRegistry,
    /// Runtime buffers for compound instances, keyed by instance handle
    instances: SecondaryMap<NodeHandle, InstanceState>,
    config: SimulationConfig,
    steps: u64,
}

impl Circuit {
    /// Create an empty circuit with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SimulationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn template(&self, id: TemplateId) -> Option<&Template> {
        self.templates.get(id)
    }

    /// Runtime buffer of a compound instance, once it has been simulated
    pub fn instance_state(&self, handle: NodeHandle) -> Option<&InstanceState> {
        self.instances.get(handle)
    }

    /// Number of completed simulation steps
    pub fn steps(&self) -> u64 {
        self.steps
    }

    // ========================================================================
    // Graph editing
    // ========================================================================

    pub fn create_node(&mut self, kind: NodeKind) -> SimulationResult<NodeHandle> {
        Ok(self.netlist.create_node(kind, &self.templates)?)
    }

    pub fn create_node_at(&mut self, kind: NodeKind, position: Vec2) -> SimulationResult<NodeHandle> {
        let handle = self.create_node(kind)?;
        self.netlist.set_position(handle, position)?;
        Ok(handle)
    }

    /// Place a new instance of a registered template
    pub fn instantiate(&mut self, template: TemplateId, position: Vec2) -> SimulationResult<NodeHandle> {
        self.create_node_at(NodeKind::Compound(template), position)
    }

    pub fn delete_node(&mut self, handle: NodeHandle) -> SimulationResult<()> {
        self.netlist.delete_node(handle)?;
        self.instances.remove(handle);
        Ok(())
    }

    pub fn connect(&mut self, src: NodeHandle, src_slot: u32, dst: NodeHandle, dst_slot: u32) -> SimulationResult<()> {
        Ok(self.netlist.connect(src, src_slot, dst, dst_slot)?)
    }

    pub fn disconnect_one(
        &mut self,
        src: NodeHandle,
        src_slot: u32,
        dst: NodeHandle,
        dst_slot: u32,
    ) -> SimulationResult<()> {
        Ok(self.netlist.disconnect_one(src, src_slot, dst, dst_slot)?)
    }

    /// Clear every wire leaving one output slot; returns how many were removed
    pub fn disconnect_all_outputs(&mut self, src: NodeHandle, src_slot: u32) -> SimulationResult<usize> {
        Ok(self.netlist.disconnect_all_outputs(src, src_slot)?)
    }

    pub fn set_position(&mut self, handle: NodeHandle, position: Vec2) -> SimulationResult<()> {
        Ok(self.netlist.set_position(handle, position)?)
    }

    pub fn set_size(&mut self, handle: NodeHandle, size: Vec2) -> SimulationResult<()> {
        Ok(self.netlist.set_size(handle, size)?)
    }

    /// Display label; compound instances show their template's name
    pub fn label(&self, handle: NodeHandle) -> SimulationResult<String> {
        let node = self
            .netlist
            .node(handle)
            .ok_or(NetlistError::InvalidHandle(handle))?;
        let label = match node.kind() {
            NodeKind::Compound(id) => self
                .templates
                .get(id)
                .map(|t| t.name().to_string())
                .ok_or(NetlistError::UnknownTemplate(id))?,
            other => other.label().to_string(),
        };
        Ok(label)
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Set the driven value of an INPUT node, or preset a STATE node
    pub fn set_input_signal(&mut self, handle: NodeHandle, value: Bit) -> SimulationResult<()> {
        let node = self
            .netlist
            .node_mut(handle)
            .ok_or(NetlistError::InvalidHandle(handle))?;
        if !node.kind().is_source() {
            return Err(SimulationError::NotAnInput { kind: node.kind() });
        }
        node.set_signal(value);
        Ok(())
    }

    /// Latched value of a node, as last computed
    pub fn read_output_signal(&self, handle: NodeHandle) -> SimulationResult<Bit> {
        Ok(self.netlist.signal(handle)?)
    }

    // ========================================================================
    // Compound circuits
    // ========================================================================

    /// Fold a self-contained selection into a new template and return the
    /// instance that replaces it
    pub fn compile_selection(&mut self, handles: &[NodeHandle], position: Vec2) -> Result<NodeHandle, CompileError> {
        self.compile(handles, None, position)
    }

    /// [`compile_selection`](Self::compile_selection) with an explicit
    /// template name
    pub fn compile_selection_named(
        &mut self,
        handles: &[NodeHandle],
        name: impl Into<String>,
        position: Vec2,
    ) -> Result<NodeHandle, CompileError> {
        self.compile(handles, Some(name.into()), position)
    }

    fn compile(
        &mut self,
        handles: &[NodeHandle],
        name: Option<String>,
        position: Vec2,
    ) -> Result<NodeHandle, CompileError> {
        let compiled = compile_selection(&mut self.netlist, &mut self.templates, handles, name, position)?;
        for handle in &compiled.removed {
            self.instances.remove(*handle);
        }
        Ok(compiled.instance)
    }

    // ========================================================================
    // Simulation
    // ========================================================================

    /// Run one propagation pass.
    ///
    /// 1. Reset every input cell, including inside compound instances
    /// 2. Fire every source (INPUT, STATE, input-less compound)
    /// 3. Settle: undriven OUTPUTs read low, STATE nodes latch, including
    ///    the staged captures inside compound instances
    ///
    /// If the depth budget is exceeded the step is abandoned before
    /// settling and an error is returned. No STATE node anywhere changes
    /// its held value, and the next step starts clean.
    pub fn simulate_step(&mut self) -> SimulationResult<()> {
        for (_, node) in self.netlist.iter_mut() {
            node.clear_inputs();
        }
        for (_, state) in self.instances.iter_mut() {
            state.clear_inputs();
        }

        let sources: Vec<NodeHandle> = self
            .netlist
            .iter()
            .filter(|(_, node)| {
                node.kind().is_source() || (node.kind().template().is_some() && node.input_count() == 0)
            })
            .map(|(handle, _)| handle)
            .collect();

        let propagator = Propagator::new(&self.templates, self.config.max_depth);
        let mut scope = NetlistScope {
            netlist: &mut self.netlist,
            instances: &mut self.instances,
        };
        for handle in sources {
            if let Err(err) = propagator.fire_source(&mut scope, handle, 0) {
                warn!(step = self.steps + 1, %err, "simulation step aborted");
                return Err(err);
            }
        }

        let handles: Vec<NodeHandle> = scope.netlist.handles().collect();
        for handle in handles {
            settle(&mut scope, handle);
        }
        for (_, state) in self.instances.iter_mut() {
            state.commit_latches();
        }

        self.steps += 1;
        debug!(step = self.steps, nodes = self.netlist.len(), "simulation step complete");
        Ok(())
    }

    /// Run `steps` propagation passes, stopping at the first error
    pub fn run(&mut self, steps: u64) -> SimulationResult<()> {
        for _ in 0..steps {
            self.simulate_step()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_input_signal_requires_source() {
        let mut circuit = Circuit::new();
        let and = circuit.create_node(NodeKind::And).unwrap();
        let state = circuit.create_node(NodeKind::State).unwrap();

        assert_eq!(
            circuit.set_input_signal(and, Bit::High),
            Err(SimulationError::NotAnInput { kind: NodeKind::And })
        );
        circuit.set_input_signal(state, Bit::High).unwrap();
        assert_eq!(circuit.read_output_signal(state).unwrap(), Bit::High);
    }

    #[test]
    fn test_stale_handle_reads_fail() {
        let mut circuit = Circuit::new();
        let out = circuit.create_node(NodeKind::Output).unwrap();
        circuit.delete_node(out).unwrap();

        assert_eq!(
            circuit.read_output_signal(out),
            Err(SimulationError::Netlist(NetlistError::InvalidHandle(out)))
        );
        assert!(circuit.delete_node(out).is_err());
    }

    #[test]
    fn test_labels() {
        let mut circuit = Circuit::new();
        let a = circuit.create_node(NodeKind::Input).unwrap();
        let y = circuit.create_node(NodeKind::Output).unwrap();
        circuit.connect(a, 0, y, 0).unwrap();
        assert_eq!(circuit.label(a).unwrap(), "INPUT");

        let ic = circuit
            .compile_selection_named(&[a, y], "BUF", Vec2::ZERO)
            .unwrap();
        assert_eq!(circuit.label(ic).unwrap(), "BUF");
    }

    #[test]
    fn test_step_counter() {
        let mut circuit = Circuit::new();
        circuit.run(3).unwrap();
        assert_eq!(circuit.steps(), 3);
    }
}
