//! Two-terminal boundary conditions: prescribed flow, prescribed pressure,
//! pure resistance, and the three-element Windkessel (RCR).
//!
//! Grounded on `original_source/src/model/{FlowReferenceBC,
//! PressureReferenceBC,ResistanceBC,WindkesselBC}.{h,cpp}`.

use crate::dof::DofRegistry;
use crate::node::Node;
use crate::parameter::ParameterStore;
use crate::sparse::{SparseSystem, TripletBudget};

use super::{BlockClass, BlockCommon};

fn single_inlet_common(id: usize, name: impl Into<String>, inlet_node: usize, param_ids: Vec<usize>) -> BlockCommon {
    BlockCommon::new(id, name, BlockClass::BoundaryCondition, vec![inlet_node], vec![], param_ids)
}

#[derive(Debug, Clone)]
pub struct FlowReferenceBC {
    pub common: BlockCommon,
}

impl FlowReferenceBC {
    pub fn new(id: usize, name: impl Into<String>, inlet_node: usize, flow_param: usize) -> Self {
        Self {
            common: single_inlet_common(id, name, inlet_node, vec![flow_param]),
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(dofs, nodes, 1, &[]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, _parameters: &ParameterStore) {
        let c = &self.common;
        system.f.set(c.eqn_ids[0], c.var_ids[1], 1.0);
    }

    pub fn update_time(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        system.c[c.eqn_ids[0]] = -parameters.value(c.param_ids[0]);
    }
}

#[derive(Debug, Clone)]
pub struct PressureReferenceBC {
    pub common: BlockCommon,
}

impl PressureReferenceBC {
    pub fn new(id: usize, name: impl Into<String>, inlet_node: usize, pressure_param: usize) -> Self {
        Self {
            common: single_inlet_common(id, name, inlet_node, vec![pressure_param]),
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(dofs, nodes, 1, &[]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, _parameters: &ParameterStore) {
        let c = &self.common;
        system.f.set(c.eqn_ids[0], c.var_ids[0], 1.0);
    }

    pub fn update_time(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        system.c[c.eqn_ids[0]] = -parameters.value(c.param_ids[0]);
    }
}

#[derive(Debug, Clone)]
pub struct ResistanceBC {
    pub common: BlockCommon,
}

impl ResistanceBC {
    pub fn new(id: usize, name: impl Into<String>, inlet_node: usize, resistance: usize, distal_pressure: usize) -> Self {
        Self {
            common: single_inlet_common(id, name, inlet_node, vec![resistance, distal_pressure]),
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(dofs, nodes, 1, &[]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, _parameters: &ParameterStore) {
        let c = &self.common;
        system.f.set(c.eqn_ids[0], c.var_ids[0], 1.0);
    }

    pub fn update_time(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        system.f.set(c.eqn_ids[0], c.var_ids[1], -parameters.value(c.param_ids[0]));
        system.c[c.eqn_ids[0]] = -parameters.value(c.param_ids[1]);
    }
}

/// Three-element (RCR) Windkessel: proximal resistance, capacitance, and
/// distal resistance to a reference pressure.
#[derive(Debug, Clone)]
pub struct WindkesselBC {
    pub common: BlockCommon,
}

pub mod param {
    pub const RP: usize = 0;
    pub const C: usize = 1;
    pub const RD: usize = 2;
    pub const PD: usize = 3;
}

impl WindkesselBC {
    pub fn new(
        id: usize,
        name: impl Into<String>,
        inlet_node: usize,
        proximal_resistance: usize,
        capacitance: usize,
        distal_resistance: usize,
        distal_pressure: usize,
    ) -> Self {
        Self {
            common: single_inlet_common(
                id,
                name,
                inlet_node,
                vec![proximal_resistance, capacitance, distal_resistance, distal_pressure],
            ),
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(dofs, nodes, 2, &["pressure_c"]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, _parameters: &ParameterStore) {
        let c = &self.common;
        system.f.set(c.eqn_ids[0], c.var_ids[0], 1.0);
        system.f.set(c.eqn_ids[0], c.var_ids[2], -1.0);
        system.f.set(c.eqn_ids[1], c.var_ids[2], -1.0);
    }

    pub fn update_time(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        let rp = parameters.value(c.param_ids[param::RP]);
        let cap = parameters.value(c.param_ids[param::C]);
        let rd = parameters.value(c.param_ids[param::RD]);
        let pd = parameters.value(c.param_ids[param::PD]);

        system.e.set(c.eqn_ids[1], c.var_ids[2], -rd * cap);
        system.f.set(c.eqn_ids[0], c.var_ids[1], -rp);
        system.f.set(c.eqn_ids[1], c.var_ids[1], rd);
        system.c[c.eqn_ids[1]] = pd;
    }

    pub fn num_triplets() -> TripletBudget {
        TripletBudget { f: 5, e: 1, d: 0 }
    }

    /// The time constant `Rd * C`, used by `Model::to_steady`'s capacitance
    /// freeze and by the simulator's cardiac-cycle-count heuristic.
    pub fn time_constant(&self, parameters: &ParameterStore) -> f64 {
        let c = &self.common;
        parameters.value(c.param_ids[param::RD]) * parameters.value(c.param_ids[param::C])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::DofRegistry;
    use approx::assert_abs_diff_eq;

    #[test]
    fn windkessel_couples_proximal_and_distal_branches() {
        let mut dofs = DofRegistry::new();
        let mut node = Node::new(0, "inlet");
        node.setup_dofs(&mut dofs);
        let mut params = ParameterStore::new();
        let rp = params.add_constant(1.0);
        let cap = params.add_constant(2.0);
        let rd = params.add_constant(3.0);
        let pd = params.add_constant(4.0);

        let mut bc = WindkesselBC::new(0, "wk0", 0, rp, cap, rd, pd);
        bc.setup_dofs(&mut dofs, std::slice::from_ref(&node));

        assert_abs_diff_eq!(bc.time_constant(&params), 6.0, epsilon = 1e-12);
    }

    #[test]
    fn resistance_bc_contributes_single_row() {
        let mut dofs = DofRegistry::new();
        let mut node = Node::new(0, "inlet");
        node.setup_dofs(&mut dofs);
        let mut params = ParameterStore::new();
        let r = params.add_constant(5.0);
        let pd = params.add_constant(10.0);
        let mut bc = ResistanceBC::new(0, "r0", 0, r, pd);
        bc.setup_dofs(&mut dofs, std::slice::from_ref(&node));
        let mut system = SparseSystem::new(dofs.num_variables());
        bc.update_constant(&mut system, &params);
        bc.update_time(&mut system, &params);
        system.reserve().unwrap();
        bc.update_constant(&mut system, &params);
        bc.update_time(&mut system, &params);
        assert_abs_diff_eq!(system.c[bc.common.eqn_ids[0]], -10.0, epsilon = 1e-12);
    }
}
