//! Model graph (C5): owns every node, block, and parameter in flat arenas
//! indexed by stable `usize` ids, and orchestrates the per-iteration
//! lifecycle (`update_constant`/`update_time`/`update_solution`/
//! `post_solve`) across every block.
//!
//! Grounded on `original_source/src/model/Model.{h,cpp}`.

use std::collections::HashMap;

use tracing::debug;

use crate::block::{boundary, coronary, Block, BlockClass};
use crate::dof::DofRegistry;
use crate::error::{SolverError, SolverResult};
use crate::node::Node;
use crate::parameter::ParameterStore;
use crate::sparse::{SparseSystem, TripletBudget};
use crate::state::State;

/// Name convention the original source uses to find the heart block when
/// wiring a `ClosedLoopCoronaryLeftBC`/`RightBC`'s intramyocardial pressure.
const HEART_BLOCK_NAME: &str = "CLH";

/// A full 0D network: nodes, blocks, and parameters, plus the bookkeeping
/// needed to assemble and step the DAE they define.
#[derive(Debug, Default)]
pub struct Model {
    pub dofs: DofRegistry,
    pub parameters: ParameterStore,
    nodes: Vec<Node>,
    node_names: Vec<String>,
    node_index: HashMap<String, usize>,
    blocks: Vec<Block>,
    block_names: Vec<String>,
    block_index: HashMap<String, usize>,
    /// Values cached per `WindkesselBC`/`ClosedLoopRCRBC` capacitance param
    /// while `to_steady` has frozen it at zero, restored by `to_unsteady`.
    capacitance_cache: HashMap<usize, f64>,
    has_windkessel_bc: bool,
    largest_windkessel_time_constant: f64,
    finalized: bool,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> f64 {
        self.parameters.time()
    }

    /// Registers a node, wiring it to the blocks that feed into and out of
    /// it. Must be called before `finalize`.
    pub fn add_node(
        &mut self,
        inlet_blocks: Vec<usize>,
        outlet_blocks: Vec<usize>,
        name: impl Into<String>,
    ) -> usize {
        let id = self.nodes.len();
        let name = name.into();
        let mut node = Node::new(id, name.clone());
        node.inlet_blocks = inlet_blocks;
        node.outlet_blocks = outlet_blocks;
        self.nodes.push(node);
        self.node_index.insert(name.clone(), id);
        self.node_names.push(name);
        id
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_name(&self, id: usize) -> &str {
        &self.node_names[id]
    }

    /// Registers a block under `name`. If the block is a `WindkesselBC` or
    /// `ClosedLoopRCRBC`, its time constant is folded into the model's
    /// running maximum, mirroring the bookkeeping the original source
    /// performs during JSON configuration ingestion (out of scope here).
    pub fn add_block(&mut self, block: Block, name: impl Into<String>) -> usize {
        let id = self.blocks.len();
        let name = name.into();

        if let Block::WindkesselBC(ref b) = block {
            let tc = b.time_constant(&self.parameters);
            self.has_windkessel_bc = true;
            self.largest_windkessel_time_constant = self.largest_windkessel_time_constant.max(tc);
        }

        self.blocks.push(block);
        self.block_index.insert(name.clone(), id);
        self.block_names.push(name);
        id
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.block_index.contains_key(name)
    }

    pub fn block(&self, id: usize) -> &Block {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: usize) -> &mut Block {
        &mut self.blocks[id]
    }

    pub fn block_by_name(&self, name: &str) -> SolverResult<&Block> {
        self.block_index
            .get(name)
            .map(|&id| &self.blocks[id])
            .ok_or_else(|| SolverError::NameUnknown(name.to_string()))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_name(&self, id: usize) -> &str {
        &self.block_names[id]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Sums every block's triplet reservation budget, used to size the
    /// dry-run reservation pass.
    pub fn get_num_triplets(&self) -> TripletBudget {
        let mut sum = TripletBudget::default();
        for block in &self.blocks {
            sum += block.num_triplets();
        }
        sum
    }

    pub fn get_has_windkessel_bc(&self) -> bool {
        self.has_windkessel_bc
    }

    pub fn get_largest_windkessel_time_constant(&self) -> f64 {
        self.largest_windkessel_time_constant
    }

    /// Registers every node's and block's degrees of freedom, wires the
    /// coronary-to-heart cross-block dependency by name, and pins the
    /// cardiac cycle period to a default of 1.0 if no periodic parameter
    /// ever set one. Must be called exactly once before any `update_*`.
    pub fn finalize(&mut self) -> SolverResult<()> {
        debug!("setting up degrees of freedom of nodes");
        for node in &mut self.nodes {
            node.setup_dofs(&mut self.dofs);
        }

        debug!("setting up degrees of freedom of blocks");
        for block in &mut self.blocks {
            block.setup_dofs(&mut self.dofs, &self.nodes);
        }

        debug!("resolving model-dependent parameters");
        self.resolve_coronary_heart_dependency()?;

        if self.parameters.cardiac_cycle_period().is_none() {
            self.parameters.set_cardiac_cycle_period(1.0);
        }

        self.finalized = true;
        Ok(())
    }

    fn resolve_coronary_heart_dependency(&mut self) -> SolverResult<()> {
        let heart_id = match self.block_index.get(HEART_BLOCK_NAME) {
            Some(&id) => id,
            None => return Ok(()),
        };
        let (im_left, var_left, im_right, var_right) = match &self.blocks[heart_id] {
            Block::ClosedLoopHeartPulmonary(heart) => (
                heart.intramyocardial_pressure_param(true),
                heart.ventricle_pressure_var(true),
                heart.intramyocardial_pressure_param(false),
                heart.ventricle_pressure_var(false),
            ),
            _ => {
                return Err(SolverError::TopologyInvalid(format!(
                    "block '{HEART_BLOCK_NAME}' must be a ClosedLoopHeartPulmonary block"
                )))
            }
        };

        for block in &mut self.blocks {
            match block {
                Block::ClosedLoopCoronaryLeftBC(b) => b.resolve_heart_dependency(im_left, var_left),
                Block::ClosedLoopCoronaryRightBC(b) => {
                    b.resolve_heart_dependency(im_right, var_right)
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn update_constant(&self, system: &mut SparseSystem) {
        for block in &self.blocks {
            block.update_constant(system, &self.parameters);
        }
    }

    /// Advances the model clock, re-evaluates every parameter's cached
    /// value, then lets every block write its time-dependent contribution.
    pub fn update_time(&mut self, system: &mut SparseSystem, time: f64) {
        self.parameters.refresh(time);
        for block in &mut self.blocks {
            block.update_time(system, &self.parameters);
        }
    }

    pub fn update_solution(&mut self, system: &mut SparseSystem, y: &[f64], dy: &[f64]) {
        let parameters = &self.parameters;
        for block in &mut self.blocks {
            block.update_solution(system, parameters, y, dy);
        }
    }

    pub fn post_solve(&self, y: &mut [f64]) {
        for block in &self.blocks {
            block.post_solve(y);
        }
    }

    pub fn setup_initial_state_dependent_parameters(&mut self, initial_state: &State) {
        debug!("setting up initial-state-dependent parameters");
        for block in &mut self.blocks {
            block.setup_initial_state_dependent_params(initial_state, &self.parameters);
        }
    }

    /// Collapses every parameter to its cycle mean and marks every block
    /// `steady`. Additionally freezes `WindkesselBC`/`ClosedLoopRCRBC`
    /// capacitances to zero, caching the prior value for `to_unsteady`.
    pub fn to_steady(&mut self) {
        self.parameters.to_steady();

        for block in &mut self.blocks {
            block.common_mut().steady = true;
            let capacitance_param = match block {
                Block::WindkesselBC(b) => Some(b.common.param_ids[boundary::param::C]),
                Block::ClosedLoopRCRBC(b) => Some(b.common.param_ids[coronary::rcr_param::C]),
                _ => None,
            };
            if let Some(param_id) = capacitance_param {
                let value = self.parameters.value(param_id);
                self.capacitance_cache.insert(param_id, value);
                self.parameters.get_mut(param_id).update_constant(0.0);
                self.parameters.set_value(param_id, 0.0);
            }
        }
    }

    /// Restores every parameter's unsteady behavior and the capacitances
    /// frozen by `to_steady`.
    pub fn to_unsteady(&mut self) {
        self.parameters.to_unsteady();
        for (&param_id, &value) in &self.capacitance_cache {
            self.parameters.get_mut(param_id).update_constant(value);
            self.parameters.set_value(param_id, value);
        }
        self.capacitance_cache.clear();
        for block in &mut self.blocks {
            block.common_mut().steady = false;
        }
    }

    /// Checks every block's class for `Vessel`, returning those with a
    /// vessel role (inlet/outlet/both), used by the simulator to locate
    /// the vessel "caps" for cycle-to-cycle convergence.
    pub fn vessel_blocks(&self) -> impl Iterator<Item = (usize, &Block)> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.common().class == BlockClass::Vessel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::boundary::{FlowReferenceBC, WindkesselBC};
    use crate::block::vessel::BloodVessel;

    fn two_node_rc_model() -> Model {
        let mut model = Model::new();
        let q = model.parameters.add_series(vec![0.0, 1.0], vec![1.0, 1.0], true).unwrap();
        let r = model.parameters.add_constant(1.0);
        let c = model.parameters.add_constant(1.0);
        let l = model.parameters.add_constant(0.0);
        let s = model.parameters.add_constant(0.0);

        let n0 = model.add_node(vec![], vec![0], "n0");
        let n1 = model.add_node(vec![0], vec![], "n1");

        let flow = FlowReferenceBC::new(0, "flow0", n0, q);
        model.add_block(Block::FlowReferenceBC(flow), "flow0");
        let vessel = BloodVessel::new(1, "vessel0", n0, n1, vec![r, c, l, s]);
        model.add_block(Block::BloodVessel(vessel), "vessel0");
        model
    }

    #[test]
    fn finalize_registers_dofs_and_defaults_cardiac_period() {
        let mut model = two_node_rc_model();
        model.finalize().unwrap();
        assert!(model.dofs.num_variables() > 0);
        assert_eq!(model.parameters.cardiac_cycle_period(), Some(1.0));
    }

    #[test]
    fn to_steady_then_to_unsteady_restores_windkessel_capacitance() {
        let mut model = Model::new();
        let rp = model.parameters.add_constant(1.0);
        let cap = model.parameters.add_constant(2.0);
        let rd = model.parameters.add_constant(3.0);
        let pd = model.parameters.add_constant(4.0);
        let n0 = model.add_node(vec![], vec![], "n0");
        let wk = WindkesselBC::new(0, "wk0", n0, rp, cap, rd, pd);
        model.add_block(Block::WindkesselBC(wk), "wk0");
        model.finalize().unwrap();

        model.to_steady();
        assert_eq!(model.parameters.value(cap), 0.0);
        model.to_unsteady();
        assert_eq!(model.parameters.value(cap), 2.0);
    }

    #[test]
    fn add_windkessel_block_tracks_largest_time_constant() {
        let mut model = Model::new();
        let rp = model.parameters.add_constant(1.0);
        let cap = model.parameters.add_constant(2.0);
        let rd = model.parameters.add_constant(5.0);
        let pd = model.parameters.add_constant(0.0);
        let n0 = model.add_node(vec![], vec![], "n0");
        let wk = WindkesselBC::new(0, "wk0", n0, rp, cap, rd, pd);
        model.add_block(Block::WindkesselBC(wk), "wk0");

        assert!(model.get_has_windkessel_bc());
        assert_eq!(model.get_largest_windkessel_time_constant(), 10.0);
    }
}
