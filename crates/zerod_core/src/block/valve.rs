//! Tanh-smoothed diode valve (`BlockType::ValveTanh`).
//!
//! Grounded on `original_source/src/model/ValveTanh.{h,cpp}`. The pressure
//! drop across the valve is written as a hyperbolic-tangent-weighted
//! resistor directly into `C`/`∂C`, matching the source exactly rather than
//! the simplified `R = R_min + (R_max - R_min)*...` prose restatement.

use crate::dof::DofRegistry;
use crate::node::Node;
use crate::parameter::ParameterStore;
use crate::sparse::{SparseSystem, TripletBudget};

use super::{BlockClass, BlockCommon};

pub mod param {
    pub const RMAX: usize = 0;
    pub const RMIN: usize = 1;
    pub const STEEPNESS: usize = 2;
}

#[derive(Debug, Clone)]
pub struct ValveTanh {
    pub common: BlockCommon,
}

impl ValveTanh {
    pub fn new(
        id: usize,
        name: impl Into<String>,
        inlet_node: usize,
        outlet_node: usize,
        param_ids: Vec<usize>,
    ) -> Self {
        Self {
            common: BlockCommon::new(
                id,
                name,
                BlockClass::Valve,
                vec![inlet_node],
                vec![outlet_node],
                param_ids,
            ),
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(dofs, nodes, 3, &["valve_status"]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        let rmin = parameters.value(c.param_ids[param::RMIN]);
        let rmax = parameters.value(c.param_ids[param::RMAX]);

        system.f.set(c.eqn_ids[0], c.var_ids[0], 1.0);
        system.f.set(c.eqn_ids[0], c.var_ids[2], -1.0);
        system.f.set(c.eqn_ids[0], c.var_ids[1], -0.5 * (rmax + rmin));
        system.f.set(c.eqn_ids[1], c.var_ids[1], 1.0);
        system.f.set(c.eqn_ids[1], c.var_ids[3], -1.0);
        system.f.set(c.eqn_ids[2], c.var_ids[4], 1.0);
    }

    pub fn update_solution(&self, system: &mut SparseSystem, parameters: &ParameterStore, y: &[f64]) {
        let c = &self.common;
        let p_in = y[c.var_ids[0]];
        let p_out = y[c.var_ids[2]];
        let q_in = y[c.var_ids[1]];
        let rmin = parameters.value(c.param_ids[param::RMIN]);
        let rmax = parameters.value(c.param_ids[param::RMAX]);
        let steep = parameters.value(c.param_ids[param::STEEPNESS]);

        let fun_tanh = (steep * (p_out - p_in)).tanh();
        let fun_cosh = 0.5 * steep / (steep * (p_in - p_out)).cosh().powi(2);

        system.c[c.eqn_ids[0]] = -0.5 * q_in * (rmax - rmin) * fun_tanh;
        system.c[c.eqn_ids[2]] = -0.5 * (1.0 + fun_tanh);

        system.dc_dy.set(
            c.eqn_ids[0],
            c.var_ids[0],
            0.5 * q_in * (rmax - rmin) * steep * (1.0 - fun_tanh * fun_tanh),
        );
        system
            .dc_dy
            .set(c.eqn_ids[0], c.var_ids[1], -0.5 * (rmax - rmin) * fun_tanh);
        system.dc_dy.set(
            c.eqn_ids[0],
            c.var_ids[2],
            -0.5 * q_in * (rmax - rmin) * steep * (1.0 - fun_tanh * fun_tanh),
        );
        system.dc_dy.set(c.eqn_ids[2], c.var_ids[0], fun_cosh);
        system.dc_dy.set(c.eqn_ids[2], c.var_ids[2], -fun_cosh);
    }

    pub fn num_triplets() -> TripletBudget {
        TripletBudget { f: 5, e: 0, d: 3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn two_node_system() -> (DofRegistry, [Node; 2]) {
        let mut dofs = DofRegistry::new();
        let mut nodes = [Node::new(0, "in"), Node::new(1, "out")];
        nodes[0].setup_dofs(&mut dofs);
        nodes[1].setup_dofs(&mut dofs);
        (dofs, nodes)
    }

    /// `valve_status = 0.5*(1 + tanh(steep*(p_out - p_in)))`: it saturates
    /// toward 1, not 0, when the pressure gradient opposes forward flow
    /// (`p_in < p_out`), matching `R -> R_max` in that same limit. A
    /// reverse-biased (closed-direction) valve therefore reads *high*, not
    /// low — the opposite of the naive "1 = open" reading.
    #[test]
    fn valve_status_approaches_one_when_upstream_below_downstream() {
        let (mut dofs, nodes) = two_node_system();
        let mut params = ParameterStore::new();
        let rmin = params.add_constant(0.01);
        let rmax = params.add_constant(1e5);
        let steep = params.add_constant(50.0);

        let mut valve = ValveTanh::new(0, "valve0", 0, 1, vec![rmax, rmin, steep]);
        valve.setup_dofs(&mut dofs, &nodes);

        let mut system = SparseSystem::new(dofs.num_variables());
        valve.update_constant(&mut system, &params);
        let mut y = vec![0.0; dofs.num_variables()];
        y[valve.common.var_ids[0]] = 9.0;
        y[valve.common.var_ids[2]] = 10.0;
        valve.update_solution(&mut system, &params, &y);
        system.reserve().unwrap();
        valve.update_constant(&mut system, &params);
        valve.update_solution(&mut system, &params, &y);

        let status = -system.c[valve.common.eqn_ids[2]];
        assert_abs_diff_eq!(status, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn valve_status_approaches_zero_when_upstream_above_downstream() {
        let (mut dofs, nodes) = two_node_system();
        let mut params = ParameterStore::new();
        let rmin = params.add_constant(0.01);
        let rmax = params.add_constant(1e5);
        let steep = params.add_constant(50.0);

        let mut valve = ValveTanh::new(0, "valve0", 0, 1, vec![rmax, rmin, steep]);
        valve.setup_dofs(&mut dofs, &nodes);

        let mut system = SparseSystem::new(dofs.num_variables());
        valve.update_constant(&mut system, &params);
        let mut y = vec![0.0; dofs.num_variables()];
        y[valve.common.var_ids[0]] = 10.0;
        y[valve.common.var_ids[2]] = 9.0;
        valve.update_solution(&mut system, &params, &y);
        system.reserve().unwrap();
        valve.update_constant(&mut system, &params);
        valve.update_solution(&mut system, &params, &y);

        let status = -system.c[valve.common.eqn_ids[2]];
        assert!(status < 0.5, "valve_status should collapse toward 0, got {status}");
    }
}
