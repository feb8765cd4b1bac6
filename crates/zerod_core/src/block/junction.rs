//! Junction-class blocks: generic mass/pressure-conserving `Junction`, the
//! per-outlet-resistance `BloodVesselJunction`, and the shared-node-pressure
//! `ResistiveJunction`.
//!
//! Grounded on `original_source/src/model/{Junction,BloodVesselJunction,
//! ResistiveJunction}.{h,cpp}`.

use crate::dof::DofRegistry;
use crate::node::Node;
use crate::parameter::ParameterStore;
use crate::sparse::{SparseSystem, TripletBudget};

use super::{BlockClass, BlockCommon};

/// Mass-conserving, pressure-continuous junction with arbitrary inlets and
/// outlets.
#[derive(Debug, Clone)]
pub struct Junction {
    pub common: BlockCommon,
}

impl Junction {
    pub fn new(id: usize, name: impl Into<String>, inlet_nodes: Vec<usize>, outlet_nodes: Vec<usize>) -> Self {
        Self {
            common: BlockCommon::new(id, name, BlockClass::Junction, inlet_nodes, outlet_nodes, vec![]),
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        let n = self.common.num_inlets() + self.common.num_outlets();
        self.common.setup_dofs_(dofs, nodes, n, &[]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, _parameters: &ParameterStore) {
        let c = &self.common;
        let num_inlets = c.num_inlets();
        let num_outlets = c.num_outlets();
        let n = num_inlets + num_outlets;

        // Pressure conservation: P_0 == P_i for every other connected node.
        for i in 0..(n - 1) {
            system.f.set(c.eqn_ids[i], c.var_ids[0], 1.0);
            system.f.set(c.eqn_ids[i], c.var_ids[2 * i + 2], -1.0);
        }

        // Mass conservation: sum(Q_in) - sum(Q_out) == 0.
        let mass_row = c.eqn_ids[n - 1];
        let mut i = 1;
        while i < num_inlets * 2 {
            system.f.set(mass_row, c.var_ids[i], 1.0);
            i += 2;
        }
        let mut i = num_inlets * 2 + 1;
        while i < n * 2 {
            system.f.set(mass_row, c.var_ids[i], -1.0);
            i += 2;
        }
    }

    pub fn num_triplets(&self) -> TripletBudget {
        let n = self.common.num_inlets() + self.common.num_outlets();
        TripletBudget {
            f: (n.saturating_sub(1)) * 2 + n,
            e: 0,
            d: 0,
        }
    }

    /// Pressure/mass conservation residual rows for calibration. Carries no
    /// parameters, so it never touches `jacobian`.
    pub fn update_gradient(&self, residual: &mut [f64], y: &[f64], row_offset: usize) {
        let c = &self.common;
        let num_inlets = c.num_inlets();
        let num_outlets = c.num_outlets();
        let n = num_inlets + num_outlets;

        for i in 0..(n - 1) {
            residual[row_offset + c.eqn_ids[i]] = y[c.var_ids[0]] - y[c.var_ids[2 * i + 2]];
        }

        let mut mass = 0.0;
        let mut i = 1;
        while i < num_inlets * 2 {
            mass += y[c.var_ids[i]];
            i += 2;
        }
        let mut i = num_inlets * 2 + 1;
        while i < n * 2 {
            mass -= y[c.var_ids[i]];
            i += 2;
        }
        residual[row_offset + c.eqn_ids[n - 1]] = mass;
    }
}

pub mod bv_param {
    /// Parameters are laid out flat per outlet: `R[i]`, then
    /// `L[num_outlets+i]`, then `S[2*num_outlets+i]`.
    pub fn resistance(i: usize) -> usize {
        i
    }
    pub fn inductance(i: usize, num_outlets: usize) -> usize {
        num_outlets + i
    }
    pub fn stenosis(i: usize, num_outlets: usize) -> usize {
        2 * num_outlets + i
    }
}

/// Single-inlet junction modelled as one RCL-style blood vessel per outlet.
#[derive(Debug, Clone)]
pub struct BloodVesselJunction {
    pub common: BlockCommon,
    pub num_outlets: usize,
}

impl BloodVesselJunction {
    pub fn new(
        id: usize,
        name: impl Into<String>,
        inlet_node: usize,
        outlet_nodes: Vec<usize>,
        param_ids: Vec<usize>,
    ) -> Self {
        let num_outlets = outlet_nodes.len();
        Self {
            common: BlockCommon::new(
                id,
                name,
                BlockClass::Junction,
                vec![inlet_node],
                outlet_nodes,
                param_ids,
            ),
            num_outlets,
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.num_outlets = self.common.num_outlets();
        self.common
            .setup_dofs_(dofs, nodes, self.num_outlets + 1, &[]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        system.f.set(c.eqn_ids[0], c.var_ids[1], 1.0);

        for i in 0..self.num_outlets {
            let inductance = parameters.value(c.param_ids[bv_param::inductance(i, self.num_outlets)]);
            let resistance = parameters.value(c.param_ids[bv_param::resistance(i)]);
            system.f.set(c.eqn_ids[0], c.var_ids[3 + 2 * i], -1.0);
            system.f.set(c.eqn_ids[i + 1], c.var_ids[3 + 2 * i], -resistance);
            system.f.set(c.eqn_ids[i + 1], c.var_ids[0], 1.0);
            system.f.set(c.eqn_ids[i + 1], c.var_ids[2 + 2 * i], -1.0);
            system.e.set(c.eqn_ids[i + 1], c.var_ids[3 + 2 * i], -inductance);
        }
    }

    pub fn update_solution(
        &self,
        system: &mut SparseSystem,
        parameters: &ParameterStore,
        y: &[f64],
        _dy: &[f64],
    ) {
        let c = &self.common;
        for i in 0..self.num_outlets {
            let stenosis_coeff = parameters.value(c.param_ids[bv_param::stenosis(i, self.num_outlets)]);
            let q_out = y[c.var_ids[3 + 2 * i]];
            let stenosis_resistance = stenosis_coeff * q_out.abs();

            system.c[c.eqn_ids[i + 1]] = -stenosis_resistance * q_out;
            system
                .dc_dy
                .set(c.eqn_ids[i + 1], c.var_ids[3 + 2 * i], -2.0 * stenosis_resistance);
        }
    }

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
        let p_in = y[c.var_ids[0]];
        let q_in = y[c.var_ids[1]];

        let mass_row = row_offset + c.eqn_ids[0];
        residual[mass_row] = q_in;

        for i in 0..self.num_outlets {
            let resistance = alpha[c.param_ids[bv_param::resistance(i)]];
            let inductance = alpha[c.param_ids[bv_param::inductance(i, self.num_outlets)]];
            let stenosis_coeff = if c.param_ids.len() / self.num_outlets > 2 {
                alpha[c.param_ids[bv_param::stenosis(i, self.num_outlets)]]
            } else {
                0.0
            };
            let q_out = y[c.var_ids[3 + 2 * i]];
            let p_out = y[c.var_ids[2 + 2 * i]];
            let dq_out = dy[c.var_ids[3 + 2 * i]];
            let stenosis_resistance = stenosis_coeff * q_out.abs();

            let row = row_offset + c.eqn_ids[i + 1];
            jacobian[(row, c.param_ids[bv_param::resistance(i)])] = -q_out;
            jacobian[(row, c.param_ids[bv_param::inductance(i, self.num_outlets)])] = -dq_out;
            if c.param_ids.len() / self.num_outlets > 2 {
                jacobian[(row, c.param_ids[bv_param::stenosis(i, self.num_outlets)])] =
                    -q_out.abs() * q_out;
            }

            residual[mass_row] -= q_out;
            residual[row] = p_in - p_out - (resistance + stenosis_resistance) * q_out - inductance * dq_out;
        }
    }

    pub fn num_triplets(&self) -> TripletBudget {
        TripletBudget {
            f: 1 + 4 * self.num_outlets,
            e: 3 * self.num_outlets,
            d: 2 * self.num_outlets,
        }
    }
}

/// Junction with a shared internal node pressure and per-leg resistance.
#[derive(Debug, Clone)]
pub struct ResistiveJunction {
    pub common: BlockCommon,
}

impl ResistiveJunction {
    pub fn new(
        id: usize,
        name: impl Into<String>,
        inlet_nodes: Vec<usize>,
        outlet_nodes: Vec<usize>,
        param_ids: Vec<usize>,
    ) -> Self {
        Self {
            common: BlockCommon::new(id, name, BlockClass::Junction, inlet_nodes, outlet_nodes, param_ids),
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        let n = self.common.num_inlets() + self.common.num_outlets();
        self.common.setup_dofs_(dofs, nodes, n + 1, &["pressure_c"]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        let num_inlets = c.num_inlets();
        let num_outlets = c.num_outlets();
        let n = num_inlets + num_outlets;
        let pressure_c = *c.var_ids.last().unwrap();

        for i in 0..num_inlets {
            let r = parameters.value(c.param_ids[i]);
            system.f.set(c.eqn_ids[i], c.var_ids[i * 2], 1.0);
            system.f.set(c.eqn_ids[i], c.var_ids[i * 2 + 1], -r);
            system.f.set(c.eqn_ids[i], pressure_c, -1.0);
        }
        for i in num_inlets..n {
            let r = parameters.value(c.param_ids[i]);
            system.f.set(c.eqn_ids[i], c.var_ids[i * 2], -1.0);
            system.f.set(c.eqn_ids[i], c.var_ids[i * 2 + 1], -r);
            system.f.set(c.eqn_ids[i], pressure_c, 1.0);
        }

        let mass_row = c.eqn_ids[n];
        let mut i = 1;
        while i < num_inlets * 2 {
            system.f.set(mass_row, c.var_ids[i], 1.0);
            i += 2;
        }
        let mut i = num_inlets * 2 + 1;
        while i < n * 2 {
            system.f.set(mass_row, c.var_ids[i], -1.0);
            i += 2;
        }
    }

    pub fn num_triplets(&self) -> TripletBudget {
        let n = self.common.num_inlets() + self.common.num_outlets();
        TripletBudget { f: n * 4, e: 0, d: 0 }
    }
}
