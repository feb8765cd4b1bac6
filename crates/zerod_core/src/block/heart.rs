//! Closed-loop four-chamber heart and pulmonary circulation.
//!
//! Grounded on
//! `original_source/src/model/ClosedLoopHeartPulmonary.{h,cpp}`. The valve
//! indicator (open/closed) is evaluated once per Newton solve from the
//! previous solution estimate and then frozen into `F`/`C` for that
//! linearization, exactly as the source comments explain ("F behaves here
//! like a constant block for the assembly").

use crate::dof::DofRegistry;
use crate::node::Node;
use crate::parameter::ParameterStore;
use crate::sparse::{SparseSystem, TripletBudget};

use super::{BlockClass, BlockCommon};

pub mod param {
    pub const TSA: usize = 0;
    pub const TPWAVE: usize = 1;
    pub const ERV_S: usize = 2;
    pub const ELV_S: usize = 3;
    pub const IML: usize = 4;
    pub const IMR: usize = 5;
    pub const LRA_V: usize = 6;
    pub const RRA_V: usize = 7;
    pub const LRV_A: usize = 8;
    pub const RRV_A: usize = 9;
    pub const LLA_V: usize = 10;
    pub const RLA_V: usize = 11;
    pub const LLV_A: usize = 12;
    pub const RLV_AO: usize = 13;
    pub const VRV_U: usize = 14;
    pub const VLV_U: usize = 15;
    pub const RPD: usize = 16;
    pub const CP: usize = 17;
    pub const CPA: usize = 18;
    pub const KXP_RA: usize = 19;
    pub const KXV_RA: usize = 20;
    pub const KXP_LA: usize = 21;
    pub const KXV_LA: usize = 22;
    pub const EMAX_RA: usize = 23;
    pub const EMAX_LA: usize = 24;
    pub const VASO_RA: usize = 25;
    pub const VASO_LA: usize = 26;
}

/// `var_ids` layout beyond the inlet/outlet pair, in registration order:
/// `V_RA, Q_RA, P_RV, V_RV, Q_RV, P_pul, P_LA, V_LA, Q_LA, P_LV, V_LV, Q_LV`.
mod var {
    pub const V_RA: usize = 4;
    pub const Q_RA: usize = 5;
    pub const P_RV: usize = 6;
    pub const V_RV: usize = 7;
    pub const Q_RV: usize = 8;
    pub const P_PUL: usize = 9;
    pub const P_LA: usize = 10;
    pub const V_LA: usize = 11;
    pub const Q_LA: usize = 12;
    pub const P_LV: usize = 13;
    pub const V_LV: usize = 14;
    pub const Q_LV: usize = 15;
}

const NUM_ELASTANCE_MODES: usize = 25;

/// Elastance Fourier coefficients, reproduced bit-identical from the source
/// ("copied from J. Tran's tuning framework").
const FT_ELASTANCE: [[f64; 2]; NUM_ELASTANCE_MODES] = [
    [0.283748803, 0.000000000],
    [0.031830626, -0.374299825],
    [-0.209472400, -0.018127770],
    [0.020520047, 0.073971113],
    [0.008316883, -0.047249597],
    [-0.041677660, 0.003212163],
    [0.000867323, 0.019441411],
    [-0.001675379, -0.005565534],
    [-0.011252277, 0.003401432],
    [-0.000414677, 0.008376795],
    [0.000253749, -0.000071880],
    [-0.002584966, 0.001566861],
    [0.000584752, 0.003143555],
    [0.000028502, -0.000024787],
    [0.000022961, -0.000007476],
    [0.000018735, -0.000001281],
    [0.000015573, 0.000001781],
    [0.000013133, 0.000003494],
    [0.000011199, 0.000004507],
    [0.000009634, 0.000005117],
    [0.000008343, 0.000005481],
    [0.000007265, 0.000005687],
    [0.000006354, 0.000005789],
    [0.000005575, 0.000005821],
    [0.000004903, 0.000005805],
];

#[derive(Debug, Clone, Copy, Default)]
struct ActivationState {
    aa: f64,
    elv: f64,
    erv: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct PsiState {
    psi_ra: f64,
    psi_la: f64,
    psi_ra_derivative: f64,
    psi_la_derivative: f64,
}

#[derive(Debug, Clone)]
pub struct ClosedLoopHeartPulmonary {
    pub common: BlockCommon,
    activation: ActivationState,
    psi: PsiState,
    /// Open/closed indicator for each of the sixteen `var_ids` slots;
    /// only indices 5, 8, 12, 15 (the four outflow DOFs) ever drop from 1.
    valves: [f64; 16],
}

impl ClosedLoopHeartPulmonary {
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
                BlockClass::ClosedLoop,
                vec![inlet_node],
                vec![outlet_node],
                param_ids,
            ),
            activation: ActivationState::default(),
            psi: PsiState::default(),
            valves: [1.0; 16],
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(
            dofs,
            nodes,
            14,
            &[
                "V_RA", "Q_RA", "P_RV", "V_RV", "Q_RV", "P_pul", "P_LA", "V_LA", "Q_LA", "P_LV",
                "V_LV", "Q_LV",
            ],
        );
    }

    /// The intramyocardial-pressure scaling parameter id (`iml`/`imr`)
    /// read by a `ClosedLoopCoronaryBC` wired against this ventricle.
    pub fn intramyocardial_pressure_param(&self, is_left: bool) -> usize {
        let idx = if is_left { param::IML } else { param::IMR };
        self.common.param_ids[idx]
    }

    /// The global variable id of `P_RV`/`P_LV`, read by a
    /// `ClosedLoopCoronaryBC` wired against this ventricle.
    pub fn ventricle_pressure_var(&self, is_left: bool) -> usize {
        let idx = if is_left { var::P_LV } else { var::P_RV };
        self.common.var_ids[idx]
    }

    pub fn update_constant(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        let v = c.var_ids.as_slice();
        let p = |idx: usize| parameters.value(c.param_ids[idx]);

        system.f.set(c.eqn_ids[0], v[0], 1.0);

        system.e.set(c.eqn_ids[1], v[2], p(param::CPA));
        system.f.set(c.eqn_ids[1], v[3], 1.0);

        system.e.set(c.eqn_ids[2], v[var::V_RA], 1.0);
        system.f.set(c.eqn_ids[2], v[1], -1.0);

        system.e.set(c.eqn_ids[3], v[var::Q_RA], p(param::LRA_V));
        system.f.set(c.eqn_ids[3], v[0], -1.0);
        system.f.set(c.eqn_ids[3], v[var::P_RV], 1.0);

        system.f.set(c.eqn_ids[4], v[var::P_RV], 1.0);

        system.e.set(c.eqn_ids[5], v[var::V_RV], 1.0);

        system.e.set(c.eqn_ids[6], v[var::Q_RV], p(param::LRV_A));
        system.f.set(c.eqn_ids[6], v[var::P_RV], -1.0);
        system.f.set(c.eqn_ids[6], v[var::P_PUL], 1.0);

        system.e.set(c.eqn_ids[7], v[var::P_PUL], p(param::CP));
        system.f.set(c.eqn_ids[7], v[var::P_PUL], 1.0 / p(param::RPD));
        system.f.set(c.eqn_ids[7], v[var::P_LA], -1.0 / p(param::RPD));

        system.f.set(c.eqn_ids[8], v[var::P_LA], 1.0);

        system.e.set(c.eqn_ids[9], v[var::V_LA], 1.0);

        system.e.set(c.eqn_ids[10], v[var::Q_LA], p(param::LLA_V));
        system.f.set(c.eqn_ids[10], v[var::P_LA], -1.0);
        system.f.set(c.eqn_ids[10], v[var::P_LV], 1.0);

        system.f.set(c.eqn_ids[11], v[var::P_LV], 1.0);

        system.e.set(c.eqn_ids[12], v[var::V_LV], 1.0);

        system.f.set(c.eqn_ids[13], v[2], 1.0);
        system.f.set(c.eqn_ids[13], v[var::P_LV], -1.0);
        system.e.set(c.eqn_ids[13], v[var::Q_LV], p(param::LLV_A));
    }

    fn get_activation_and_elastance_functions(&mut self, parameters: &ParameterStore) {
        let c = &self.common;
        let p = |idx: usize| parameters.value(c.param_ids[idx]);

        let t_cardiac = parameters.cardiac_cycle_period().unwrap_or(1.0);
        let tsa = t_cardiac * p(param::TSA);
        let tpwave = t_cardiac / p(param::TPWAVE);
        let t_in_cycle = parameters.time().rem_euclid(t_cardiac);

        let two_pi = 2.0 * std::f64::consts::PI;
        let aa = if t_in_cycle <= tpwave {
            0.5 * (1.0 - (two_pi * (t_in_cycle - tpwave + tsa) / tsa).cos())
        } else if t_in_cycle >= (t_cardiac - tsa) + tpwave && t_in_cycle < t_cardiac {
            0.5 * (1.0 - (two_pi * (t_in_cycle - tpwave - (t_cardiac - tsa)) / tsa).cos())
        } else {
            0.0
        };

        let mut elv_i = 0.0;
        for (i, mode) in FT_ELASTANCE.iter().enumerate() {
            let phase = two_pi * i as f64 * t_in_cycle / t_cardiac;
            elv_i += mode[0] * phase.cos() - mode[1] * phase.sin();
        }

        self.activation = ActivationState {
            aa,
            elv: elv_i * p(param::ELV_S),
            erv: elv_i * p(param::ERV_S),
        };
    }

    pub fn update_time(&mut self, system: &mut SparseSystem, parameters: &ParameterStore) {
        self.get_activation_and_elastance_functions(parameters);
        let c = &self.common;
        let v = c.var_ids.as_slice();
        let p = |idx: usize| parameters.value(c.param_ids[idx]);
        let aa = self.activation.aa;

        system.f.set(c.eqn_ids[0], v[var::V_RA], -aa * p(param::EMAX_RA));

        system.f.set(c.eqn_ids[4], v[var::V_RV], -self.activation.erv);
        system.c[c.eqn_ids[4]] = self.activation.erv * p(param::VRV_U);

        system.f.set(c.eqn_ids[8], v[var::V_LA], -aa * p(param::EMAX_LA));

        system.f.set(c.eqn_ids[11], v[var::V_LV], -self.activation.elv);
        system.c[c.eqn_ids[11]] = self.activation.elv * p(param::VLV_U);
    }

    fn get_psi_ra_la(&mut self, system_y: &[f64], parameters: &ParameterStore) {
        let c = &self.common;
        let p = |idx: usize| parameters.value(c.param_ids[idx]);
        let ra_volume = system_y[c.var_ids[var::V_RA]];
        let la_volume = system_y[c.var_ids[var::V_LA]];

        let kxp_ra = p(param::KXP_RA);
        let kxv_ra = p(param::KXV_RA);
        let kxp_la = p(param::KXP_LA);
        let kxv_la = p(param::KXV_LA);
        let vaso_ra = p(param::VASO_RA);
        let vaso_la = p(param::VASO_LA);

        let exp_ra = ((ra_volume - vaso_ra) * kxv_ra).exp();
        let exp_la = ((la_volume - vaso_la) * kxv_la).exp();

        self.psi = PsiState {
            psi_ra: kxp_ra * (exp_ra - 1.0),
            psi_la: kxp_la * (exp_la - 1.0),
            psi_ra_derivative: kxp_ra * exp_ra * kxv_ra,
            psi_la_derivative: kxp_la * exp_la * kxv_la,
        };
    }

    fn get_valve_positions(&mut self, y: &[f64]) {
        let v = self.common.var_ids.as_slice();
        self.valves = [1.0; 16];

        let pressure_ra = y[v[0]];
        let pressure_rv = y[v[var::P_RV]];
        let outflow_ra = y[v[var::Q_RA]];
        if pressure_ra <= pressure_rv && outflow_ra <= 0.0 {
            self.valves[var::Q_RA] = 0.0;
        }

        let pressure_pulmonary = y[v[var::P_PUL]];
        let outflow_rv = y[v[var::Q_RV]];
        if pressure_rv <= pressure_pulmonary && outflow_rv <= 0.0 {
            self.valves[var::Q_RV] = 0.0;
        }

        let pressure_la = y[v[var::P_LA]];
        let pressure_lv = y[v[var::P_LV]];
        let outflow_la = y[v[var::Q_LA]];
        if pressure_la <= pressure_lv && outflow_la <= 0.0 {
            self.valves[var::Q_LA] = 0.0;
        }

        let pressure_aorta = y[v[2]];
        let outflow_lv = y[v[var::Q_LV]];
        if pressure_lv <= pressure_aorta && outflow_lv <= 0.0 {
            self.valves[var::Q_LV] = 0.0;
        }
    }

    pub fn update_solution(&mut self, system: &mut SparseSystem, parameters: &ParameterStore, y: &[f64]) {
        self.get_psi_ra_la(y, parameters);
        self.get_valve_positions(y);

        let c = &self.common;
        let v = c.var_ids.as_slice();
        let p = |idx: usize| parameters.value(c.param_ids[idx]);
        let aa = self.activation.aa;
        let valves = self.valves;

        system.c[c.eqn_ids[0]] =
            aa * p(param::EMAX_RA) * p(param::VASO_RA) + self.psi.psi_ra * (aa - 1.0);
        system
            .dc_dy
            .set(c.eqn_ids[0], v[var::V_RA], self.psi.psi_ra_derivative * (aa - 1.0));

        system.c[c.eqn_ids[8]] =
            aa * p(param::EMAX_LA) * p(param::VASO_LA) + self.psi.psi_la * (aa - 1.0);
        system
            .dc_dy
            .set(c.eqn_ids[8], v[var::V_LA], self.psi.psi_la_derivative * (aa - 1.0));

        system.f.set(c.eqn_ids[1], v[var::Q_LV], -valves[var::Q_LV]);
        system.f.set(c.eqn_ids[7], v[var::Q_RV], -valves[var::Q_RV]);

        system.f.set(c.eqn_ids[2], v[var::Q_RA], valves[var::Q_RA]);

        system.f.set(c.eqn_ids[5], v[var::Q_RA], -valves[var::Q_RA]);
        system.f.set(c.eqn_ids[5], v[var::Q_RV], valves[var::Q_RV]);

        system.f.set(c.eqn_ids[9], v[var::Q_RV], -valves[var::Q_RV]);
        system.f.set(c.eqn_ids[9], v[var::Q_LA], valves[var::Q_LA]);

        system.f.set(c.eqn_ids[12], v[var::Q_LA], -valves[var::Q_LA]);
        system.f.set(c.eqn_ids[12], v[var::Q_LV], valves[var::Q_LV]);

        system
            .f
            .set(c.eqn_ids[3], v[var::Q_RA], p(param::RRA_V) * valves[var::Q_RA]);
        system
            .f
            .set(c.eqn_ids[6], v[var::Q_RV], p(param::RRV_A) * valves[var::Q_RV]);
        system
            .f
            .set(c.eqn_ids[10], v[var::Q_LA], p(param::RLA_V) * valves[var::Q_LA]);
        system
            .f
            .set(c.eqn_ids[13], v[var::Q_LV], p(param::RLV_AO) * valves[var::Q_LV]);
    }

    /// Zeroes the outflow DOF for any closed valve, matching the original
    /// `post_solve` pass over the (not yet incremented) solution vector.
    pub fn post_solve(&self, y: &mut [f64]) {
        let v = self.common.var_ids.as_slice();
        for (i, &gate) in self.valves.iter().enumerate() {
            if gate < 0.5 {
                y[v[i]] = 0.0;
            }
        }
    }

    pub fn num_triplets() -> TripletBudget {
        TripletBudget { f: 33, e: 10, d: 2 }
    }
}
