//! Lumped cardiac chamber: a time-varying elastance in series with an
//! inductor, driving volume through an internal capacitor-like DOF `Vc`.
//!
//! Grounded on
//! `original_source/src/model/ChamberElastanceInductor.{h,cpp}`.

use crate::dof::DofRegistry;
use crate::node::Node;
use crate::parameter::ParameterStore;
use crate::sparse::{SparseSystem, TripletBudget};

use super::{BlockClass, BlockCommon};

pub mod param {
    pub const EMAX: usize = 0;
    pub const EMIN: usize = 1;
    pub const VRD: usize = 2;
    pub const VRS: usize = 3;
    pub const T_ACTIVE: usize = 4;
    pub const T_TWITCH: usize = 5;
    pub const IMPEDANCE: usize = 6;
}

#[derive(Debug, Clone)]
pub struct ChamberElastanceInductor {
    pub common: BlockCommon,
}

impl ChamberElastanceInductor {
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
                BlockClass::Chamber,
                vec![inlet_node],
                vec![outlet_node],
                param_ids,
            ),
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(dofs, nodes, 3, &["Vc"]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        let impedance = parameters.value(c.param_ids[param::IMPEDANCE]);

        system.f.set(c.eqn_ids[0], c.var_ids[0], 1.0);

        system.f.set(c.eqn_ids[1], c.var_ids[0], 1.0);
        system.f.set(c.eqn_ids[1], c.var_ids[2], -1.0);
        system.e.set(c.eqn_ids[1], c.var_ids[3], -impedance);

        system.f.set(c.eqn_ids[2], c.var_ids[1], 1.0);
        system.f.set(c.eqn_ids[2], c.var_ids[3], -1.0);
        system.e.set(c.eqn_ids[2], c.var_ids[4], -1.0);
    }

    /// Computes `(elastance, resting_volume)` at the current cardiac phase,
    /// mirroring `get_elastance_values`.
    fn elastance_and_vrest(&self, parameters: &ParameterStore) -> (f64, f64) {
        let c = &self.common;
        let emax = parameters.value(c.param_ids[param::EMAX]);
        let emin = parameters.value(c.param_ids[param::EMIN]);
        let vrd = parameters.value(c.param_ids[param::VRD]);
        let vrs = parameters.value(c.param_ids[param::VRS]);
        let t_active = parameters.value(c.param_ids[param::T_ACTIVE]);
        let t_twitch = parameters.value(c.param_ids[param::T_TWITCH]);

        let t_cardiac = parameters.cardiac_cycle_period().unwrap_or(1.0);
        let t_in_cycle = parameters.time().rem_euclid(t_cardiac);
        let t_contract = if t_in_cycle >= t_active {
            t_in_cycle - t_active
        } else {
            0.0
        };
        let act = if t_contract <= t_twitch {
            -0.5 * (2.0 * std::f64::consts::PI * t_contract / t_twitch).cos() + 0.5
        } else {
            0.0
        };

        let vrest = (1.0 - act) * (vrd - vrs) + vrs;
        let elastance = (emax - emin) * act + emin;
        (elastance, vrest)
    }

    pub fn update_time(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        let (elastance, vrest) = self.elastance_and_vrest(parameters);
        system.f.set(c.eqn_ids[0], c.var_ids[4], -elastance);
        system.c[c.eqn_ids[0]] = elastance * vrest;
    }

    pub fn num_triplets() -> TripletBudget {
        TripletBudget { f: 6, e: 2, d: 0 }
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

    #[test]
    fn elastance_peaks_at_emax_during_activation_midpoint() {
        let (mut dofs, nodes) = two_node_system();
        let mut params = ParameterStore::new();
        params.set_cardiac_cycle_period(1.0);
        let emax = params.add_constant(2.0);
        let emin = params.add_constant(0.1);
        let vrd = params.add_constant(100.0);
        let vrs = params.add_constant(10.0);
        let t_active = params.add_constant(0.0);
        let t_twitch = params.add_constant(0.4);
        let impedance = params.add_constant(0.01);

        let mut chamber = ChamberElastanceInductor::new(
            0,
            "lv",
            0,
            1,
            vec![emax, emin, vrd, vrs, t_active, t_twitch, impedance],
        );
        chamber.setup_dofs(&mut dofs, &nodes);

        params.refresh(0.2);
        let (elastance, _) = chamber.elastance_and_vrest(&params);
        assert_abs_diff_eq!(elastance, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn elastance_falls_back_to_emin_outside_activation_window() {
        let (mut dofs, nodes) = two_node_system();
        let mut params = ParameterStore::new();
        params.set_cardiac_cycle_period(1.0);
        let emax = params.add_constant(2.0);
        let emin = params.add_constant(0.1);
        let vrd = params.add_constant(100.0);
        let vrs = params.add_constant(10.0);
        let t_active = params.add_constant(0.0);
        let t_twitch = params.add_constant(0.4);
        let impedance = params.add_constant(0.01);

        let mut chamber = ChamberElastanceInductor::new(
            0,
            "lv",
            0,
            1,
            vec![emax, emin, vrd, vrs, t_active, t_twitch, impedance],
        );
        chamber.setup_dofs(&mut dofs, &nodes);

        params.refresh(0.8);
        let (elastance, vrest) = chamber.elastance_and_vrest(&params);
        assert_abs_diff_eq!(elastance, 0.1, epsilon = 1e-9);
        assert_abs_diff_eq!(vrest, 100.0, epsilon = 1e-9);
    }
}
