//! RCL blood vessel with optional stenosis (`BlockType::BloodVessel`).
//!
//! Grounded on `original_source/src/model/BloodVessel.{h,cpp}`.

use crate::dof::DofRegistry;
use crate::node::Node;
use crate::parameter::ParameterStore;
use crate::sparse::{SparseSystem, TripletBudget};

use super::{BlockClass, BlockCommon};

pub mod param {
    pub const RESISTANCE: usize = 0;
    pub const CAPACITANCE: usize = 1;
    pub const INDUCTANCE: usize = 2;
    pub const STENOSIS_COEFFICIENT: usize = 3;
}

#[derive(Debug, Clone)]
pub struct BloodVessel {
    pub common: BlockCommon,
}

impl BloodVessel {
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
                BlockClass::Vessel,
                vec![inlet_node],
                vec![outlet_node],
                param_ids,
            ),
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(dofs, nodes, 2, &[]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        let capacitance = parameters.value(c.param_ids[param::CAPACITANCE]);
        let inductance = parameters.value(c.param_ids[param::INDUCTANCE]);
        let resistance = parameters.value(c.param_ids[param::RESISTANCE]);

        system.e.set(c.eqn_ids[0], c.var_ids[3], -inductance);
        system.e.set(c.eqn_ids[1], c.var_ids[0], -capacitance);
        system.e.set(c.eqn_ids[1], c.var_ids[1], capacitance * resistance);
        system.f.set(c.eqn_ids[0], c.var_ids[0], 1.0);
        system.f.set(c.eqn_ids[0], c.var_ids[1], -resistance);
        system.f.set(c.eqn_ids[0], c.var_ids[2], -1.0);
        system.f.set(c.eqn_ids[1], c.var_ids[1], 1.0);
        system.f.set(c.eqn_ids[1], c.var_ids[3], -1.0);
    }

    pub fn update_solution(
        &self,
        system: &mut SparseSystem,
        parameters: &ParameterStore,
        y: &[f64],
        dy: &[f64],
    ) {
        let c = &self.common;
        let capacitance = parameters.value(c.param_ids[param::CAPACITANCE]);
        let stenosis_coeff = parameters.value(c.param_ids[param::STENOSIS_COEFFICIENT]);
        let q_in = y[c.var_ids[1]];
        let dq_in = dy[c.var_ids[1]];
        let stenosis_resistance = stenosis_coeff * q_in.abs();

        system.c[c.eqn_ids[0]] = stenosis_resistance * -q_in;
        system.c[c.eqn_ids[1]] = stenosis_resistance * 2.0 * capacitance * dq_in;

        let sgn_q_in = q_in.signum_zero();
        system
            .dc_dy
            .set(c.eqn_ids[0], c.var_ids[1], stenosis_coeff * sgn_q_in * -2.0 * q_in);
        system.dc_dy.set(
            c.eqn_ids[1],
            c.var_ids[1],
            stenosis_coeff * sgn_q_in * 2.0 * capacitance * dq_in,
        );
        system
            .dc_dydot
            .set(c.eqn_ids[1], c.var_ids[1], stenosis_resistance * 2.0 * capacitance);
    }

    /// Gradient of both equations with respect to `[R, C, L, S]`, accumulated
    /// at global row `row_offset + eqn_id` for the calling observation.
    pub fn update_gradient(
        &self,
        jacobian: &mut nalgebra::DMatrix<f64>,
        residual: &mut [f64],
        alpha: &[f64],
        y: &[f64],
        dy: &[f64],
        row_offset: usize,
    ) {
        let c = &self.common;
        let y0 = y[c.var_ids[0]];
        let y1 = y[c.var_ids[1]];
        let y2 = y[c.var_ids[2]];
        let y3 = y[c.var_ids[3]];
        let dy0 = dy[c.var_ids[0]];
        let dy1 = dy[c.var_ids[1]];
        let dy3 = dy[c.var_ids[3]];

        let resistance = alpha[c.param_ids[param::RESISTANCE]];
        let capacitance = alpha[c.param_ids[param::CAPACITANCE]];
        let inductance = alpha[c.param_ids[param::INDUCTANCE]];
        let stenosis_coeff = if c.param_ids.len() > 3 {
            alpha[c.param_ids[param::STENOSIS_COEFFICIENT]]
        } else {
            0.0
        };
        let stenosis_resistance = stenosis_coeff * y1.abs();

        let row0 = row_offset + c.eqn_ids[0];
        let row1 = row_offset + c.eqn_ids[1];

        jacobian[(row0, c.param_ids[0])] = -y1;
        jacobian[(row0, c.param_ids[2])] = -dy3;
        if c.param_ids.len() > 3 {
            jacobian[(row0, c.param_ids[3])] = -y1.abs() * y1;
        }

        jacobian[(row1, c.param_ids[0])] = capacitance * dy1;
        jacobian[(row1, c.param_ids[1])] = -dy0 + (resistance + 2.0 * stenosis_resistance) * dy1;
        if c.param_ids.len() > 3 {
            jacobian[(row1, c.param_ids[3])] = 2.0 * capacitance * y1.abs() * dy1;
        }

        residual[row0] = y0 - (resistance + stenosis_resistance) * y1 - y2 - inductance * dy3;
        residual[row1] =
            y1 - y3 - capacitance * dy0 + capacitance * (resistance + 2.0 * stenosis_resistance) * dy1;
    }

    pub fn num_triplets(&self) -> TripletBudget {
        TripletBudget { f: 5, e: 3, d: 2 }
    }
}

trait SignumZero {
    /// `(0 < x) - (x < 0)`, i.e. `signum` that returns `0.0` at zero
    /// instead of `f64::signum`'s `1.0`.
    fn signum_zero(self) -> f64;
}

impl SignumZero for f64 {
    fn signum_zero(self) -> f64 {
        if self > 0.0 {
            1.0
        } else if self < 0.0 {
            -1.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::DofRegistry;
    use approx::assert_abs_diff_eq;

    fn setup() -> (BloodVessel, ParameterStore, [usize; 2]) {
        let mut dofs = DofRegistry::new();
        let mut nodes = [Node::new(0, "in"), Node::new(1, "out")];
        nodes[0].setup_dofs(&mut dofs);
        nodes[1].setup_dofs(&mut dofs);

        let mut params = ParameterStore::new();
        let r = params.add_constant(100.0);
        let cap = params.add_constant(1e-5);
        let l = params.add_constant(1e-3);
        let s = params.add_constant(0.0);

        let mut block = BloodVessel::new(0, "vessel0", 0, 1, vec![r, cap, l, s]);
        block.setup_dofs(&mut dofs, &nodes);
        (block, params, [0, 1])
    }

    #[test]
    fn update_constant_writes_resistor_inductor_capacitor_terms() {
        let (block, params, _) = setup();
        let mut system = SparseSystem::new(4);
        block.update_constant(&mut system, &params);
        system.reserve().unwrap();
        block.update_constant(&mut system, &params);
        assert_abs_diff_eq!(system.f.values()[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn stenosis_resistance_scales_with_flow_squared() {
        let mut dofs = DofRegistry::new();
        let mut nodes = [Node::new(0, "in"), Node::new(1, "out")];
        nodes[0].setup_dofs(&mut dofs);
        nodes[1].setup_dofs(&mut dofs);
        let mut params = ParameterStore::new();
        let r = params.add_constant(10.0);
        let cap = params.add_constant(1e-5);
        let l = params.add_constant(1e-3);
        let s = params.add_constant(2.0);
        let mut block = BloodVessel::new(0, "vessel0", 0, 1, vec![r, cap, l, s]);
        block.setup_dofs(&mut dofs, &nodes);

        let mut system = SparseSystem::new(dofs.num_variables());
        block.update_constant(&mut system, &params);
        block.update_solution(&mut system, &params, &[0.0; 4], &[0.0; 4]);
        system.reserve().unwrap();
        let y = vec![100.0, 5.0, 50.0, 5.0];
        let dy = vec![0.0, 0.0, 0.0, 0.0];
        block.update_constant(&mut system, &params);
        block.update_solution(&mut system, &params, &y, &dy);
        assert_abs_diff_eq!(system.c[block.common.eqn_ids[0]], -2.0 * 5.0 * 5.0, epsilon = 1e-9);
    }
}
