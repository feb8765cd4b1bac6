//! Coronary-perfusion boundary conditions and the closed-loop RCR.
//!
//! Grounded on `original_source/src/model/{OpenLoopCoronaryBC,
//! ClosedLoopCoronaryBC,ClosedLoopCoronaryLeftBC,ClosedLoopCoronaryRightBC,
//! ClosedLoopRCRBC}.{h,cpp}`.

use crate::dof::DofRegistry;
use crate::node::Node;
use crate::parameter::ParameterStore;
use crate::sparse::SparseSystem;
use crate::state::State;

use super::{BlockClass, BlockCommon};

pub mod open_param {
    pub const RA: usize = 0;
    pub const RAM: usize = 1;
    pub const RV: usize = 2;
    pub const CA: usize = 3;
    pub const CIM: usize = 4;
    pub const PIM: usize = 5;
    pub const PV: usize = 6;
}

/// Windkessel-like coronary model whose intramyocardial pressure is an
/// external time series rather than a neighboring block's pressure.
#[derive(Debug, Clone)]
pub struct OpenLoopCoronaryBC {
    pub common: BlockCommon,
    /// Pressure proximal to `Cim`/`Vim` at the initial state.
    p_cim_0: f64,
    /// Intramyocardial pressure at the initial state.
    pim_0: f64,
}

impl OpenLoopCoronaryBC {
    pub fn new(id: usize, name: impl Into<String>, inlet_node: usize, outlet_node: usize, param_ids: Vec<usize>) -> Self {
        Self {
            common: BlockCommon::new(
                id,
                name,
                BlockClass::BoundaryCondition,
                vec![inlet_node],
                vec![outlet_node],
                param_ids,
            ),
            p_cim_0: 0.0,
            pim_0: 0.0,
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(dofs, nodes, 2, &["volume_im"]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        let ra = parameters.value(c.param_ids[open_param::RA]);
        let ram = parameters.value(c.param_ids[open_param::RAM]);
        let rv = parameters.value(c.param_ids[open_param::RV]);
        let ca = parameters.value(c.param_ids[open_param::CA]);
        let cim = parameters.value(c.param_ids[open_param::CIM]);

        if c.steady {
            // -P_in + (Ra+Ram+Rv)*Q_in + Pv = 0; V_im = 0
            system.f.set(c.eqn_ids[0], c.var_ids[2], 1.0);
            system.f.set(c.eqn_ids[1], c.var_ids[0], -1.0);
            system.f.set(c.eqn_ids[1], c.var_ids[1], ra + ram + rv);
        } else {
            system.f.set(c.eqn_ids[0], c.var_ids[1], cim * rv);
            system.f.set(c.eqn_ids[0], c.var_ids[2], -1.0);
            system.f.set(c.eqn_ids[1], c.var_ids[0], cim * rv);
            system.f.set(c.eqn_ids[1], c.var_ids[1], -cim * rv * ra);
            system.f.set(c.eqn_ids[1], c.var_ids[2], -(rv + ram));

            system.e.set(c.eqn_ids[0], c.var_ids[0], -ca * cim * rv);
            system.e.set(c.eqn_ids[0], c.var_ids[1], ra * ca * cim * rv);
            system.e.set(c.eqn_ids[0], c.var_ids[2], -cim * rv);
            system.e.set(c.eqn_ids[1], c.var_ids[2], -cim * rv * ram);
        }
    }

    pub fn update_time(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        let ram = parameters.value(c.param_ids[open_param::RAM]);
        let rv = parameters.value(c.param_ids[open_param::RV]);
        let cim = parameters.value(c.param_ids[open_param::CIM]);
        let pim = parameters.value(c.param_ids[open_param::PIM]);
        let pv = parameters.value(c.param_ids[open_param::PV]);

        if c.steady {
            system.c[c.eqn_ids[1]] = pv;
        } else {
            system.c[c.eqn_ids[0]] = cim * (-pim + pv + self.pim_0 - self.p_cim_0);
            system.c[c.eqn_ids[1]] =
                ram * cim * pv - cim * (rv + ram) * (pim + self.p_cim_0 - self.pim_0);
        }
    }

    pub fn setup_initial_state_dependent_params(&mut self, initial_state: &State, parameters: &ParameterStore) {
        let c = &self.common;
        let p_in = initial_state.y[c.var_ids[0]];
        let q_in = initial_state.y[c.var_ids[1]];
        let p_in_dot = initial_state.ydot[c.var_ids[0]];
        let q_in_dot = initial_state.ydot[c.var_ids[1]];
        let ra = parameters.value(c.param_ids[open_param::RA]);
        let ram = parameters.value(c.param_ids[open_param::RAM]);
        let ca = parameters.value(c.param_ids[open_param::CA]);

        // Pressure proximal to Ca and distal to Ra.
        let p_ca = p_in - ra * q_in;
        let p_ca_dot = p_in_dot - ra * q_in_dot;
        // Flow into Ram (inflow minus flow into Ca).
        let q_am = q_in - ca * p_ca_dot;
        // Pressure proximal to Cim/Vim and distal to Ram.
        self.p_cim_0 = p_ca - ram * q_am;
        self.pim_0 = parameters.value(c.param_ids[open_param::PIM]);
    }
}

pub mod closed_param {
    pub const RA: usize = 0;
    pub const RAM: usize = 1;
    pub const RV: usize = 2;
    pub const CA: usize = 3;
    pub const CIM: usize = 4;
}

/// Coronary boundary condition whose intramyocardial pressure is driven by a
/// ventricular pressure in a [`super::heart::ClosedLoopHeartPulmonary`]
/// block rather than a parameter. Shared by the left and right
/// [`super::Block`] variants; which ventricle it reads from is resolved once
/// in `Model::finalize` via [`ClosedLoopCoronaryBC::resolve_heart_dependency`],
/// since that lookup needs to borrow a sibling block and can't go through
/// the uniform per-block `setup_model_dependent_params` hook.
#[derive(Debug, Clone)]
pub struct ClosedLoopCoronaryBC {
    pub common: BlockCommon,
    ventricle_var_id: Option<usize>,
    im_param_id: Option<usize>,
}

impl ClosedLoopCoronaryBC {
    pub fn new(id: usize, name: impl Into<String>, inlet_node: usize, outlet_node: usize, param_ids: Vec<usize>) -> Self {
        Self {
            common: BlockCommon::new(
                id,
                name,
                BlockClass::ClosedLoop,
                vec![inlet_node],
                vec![outlet_node],
                param_ids,
            ),
            ventricle_var_id: None,
            im_param_id: None,
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(dofs, nodes, 3, &["volume_im"]);
    }

    /// Wires this block to the heart block's ventricular pressure variable
    /// and intramyocardial-pressure parameter. Must run before the first
    /// `update_solution`.
    pub fn resolve_heart_dependency(&mut self, im_param_id: usize, ventricle_var_id: usize) {
        self.im_param_id = Some(im_param_id);
        self.ventricle_var_id = Some(ventricle_var_id);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, parameters: &ParameterStore, _is_left: bool) {
        let c = &self.common;
        let ra = parameters.value(c.param_ids[closed_param::RA]);
        let ram = parameters.value(c.param_ids[closed_param::RAM]);
        let rv = parameters.value(c.param_ids[closed_param::RV]);
        let ca = parameters.value(c.param_ids[closed_param::CA]);
        let cim = parameters.value(c.param_ids[closed_param::CIM]);

        system.e.set(c.eqn_ids[0], c.var_ids[0], -ram * ca);
        system.e.set(c.eqn_ids[0], c.var_ids[1], ram * ra * ca);
        system.e.set(c.eqn_ids[1], c.var_ids[0], -ca);
        system.e.set(c.eqn_ids[1], c.var_ids[1], ca * ra);
        system.e.set(c.eqn_ids[1], c.var_ids[4], -1.0);

        system.f.set(c.eqn_ids[0], c.var_ids[0], -1.0);
        system.f.set(c.eqn_ids[0], c.var_ids[1], ra + ram);
        system.f.set(c.eqn_ids[0], c.var_ids[2], 1.0);
        system.f.set(c.eqn_ids[0], c.var_ids[3], rv);
        system.f.set(c.eqn_ids[1], c.var_ids[1], 1.0);
        system.f.set(c.eqn_ids[1], c.var_ids[3], -1.0);
        system.f.set(c.eqn_ids[2], c.var_ids[2], cim);
        system.f.set(c.eqn_ids[2], c.var_ids[3], cim * rv);
        system.f.set(c.eqn_ids[2], c.var_ids[4], -1.0);
    }

    pub fn update_solution(&self, system: &mut SparseSystem, parameters: &ParameterStore, y: &[f64], _is_left: bool) {
        let c = &self.common;
        let cim = parameters.value(c.param_ids[closed_param::CIM]);
        let im = parameters.value(
            self.im_param_id
                .expect("resolve_heart_dependency must run before update_solution"),
        );
        let ventricle_var_id = self
            .ventricle_var_id
            .expect("resolve_heart_dependency must run before update_solution");
        let pim = im * y[ventricle_var_id];
        system.c[c.eqn_ids[2]] = -cim * pim;
    }
}

pub mod rcr_param {
    pub const RP: usize = 0;
    pub const C: usize = 1;
    pub const RD: usize = 2;
}

/// Three-element Windkessel connected to other blocks on both sides.
#[derive(Debug, Clone)]
pub struct ClosedLoopRCRBC {
    pub common: BlockCommon,
}

impl ClosedLoopRCRBC {
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
                BlockClass::BoundaryCondition,
                vec![inlet_node],
                vec![outlet_node],
                param_ids,
            ),
        }
    }

    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        self.common.setup_dofs_(dofs, nodes, 3, &["P_c"]);
    }

    pub fn update_constant(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        let c = &self.common;
        system.f.set(c.eqn_ids[0], c.var_ids[1], -1.0);
        system.f.set(c.eqn_ids[0], c.var_ids[3], 1.0);
        system.f.set(c.eqn_ids[1], c.var_ids[0], 1.0);
        system.f.set(c.eqn_ids[1], c.var_ids[4], -1.0);
        system.f.set(c.eqn_ids[2], c.var_ids[2], -1.0);
        system.f.set(c.eqn_ids[2], c.var_ids[4], 1.0);

        system.e.set(c.eqn_ids[0], c.var_ids[4], parameters.value(c.param_ids[rcr_param::C]));
        system
            .f
            .set(c.eqn_ids[1], c.var_ids[1], -parameters.value(c.param_ids[rcr_param::RP]));
        system
            .f
            .set(c.eqn_ids[2], c.var_ids[3], -parameters.value(c.param_ids[rcr_param::RD]));
    }
}
