//! Block catalog and dispatch (C4).
//!
//! Each block kind is a plain data struct owning its own adjacency,
//! parameter, and DOF bookkeeping (`BlockCommon`). `Block` is a tagged
//! union over all fifteen kinds; every lifecycle hook is a `match` over
//! the variant rather than a `dyn Trait` call, per the flat-arena, no
//! dynamic dispatch design used throughout this crate.

pub mod boundary;
pub mod chamber;
pub mod coronary;
pub mod heart;
pub mod junction;
pub mod valve;
pub mod vessel;

use crate::dof::DofRegistry;
use crate::error::{SolverError, SolverResult};
use crate::node::Node;
use crate::parameter::ParameterStore;
use crate::sparse::{SparseSystem, TripletBudget};
use crate::state::State;

/// Coarse category a block belongs to, carried for diagnostics and for
/// `Model::to_steady`'s capacitance-freezing special case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    Vessel,
    Junction,
    BoundaryCondition,
    ClosedLoop,
    External,
    Valve,
    Chamber,
}

/// Where a vessel-class block sits relative to the rest of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VesselType {
    Inlet,
    Outlet,
    Both,
    #[default]
    Neither,
}

/// Fields every block variant carries: identity, node adjacency, the
/// parameter ids it was constructed with, and the global variable/equation
/// indices assigned during `setup_dofs`.
#[derive(Debug, Clone)]
pub struct BlockCommon {
    pub id: usize,
    pub name: String,
    pub class: BlockClass,
    pub vessel_type: VesselType,
    pub inlet_nodes: Vec<usize>,
    pub outlet_nodes: Vec<usize>,
    pub param_ids: Vec<usize>,
    pub var_ids: Vec<usize>,
    pub eqn_ids: Vec<usize>,
    pub steady: bool,
}

impl BlockCommon {
    pub fn new(
        id: usize,
        name: impl Into<String>,
        class: BlockClass,
        inlet_nodes: Vec<usize>,
        outlet_nodes: Vec<usize>,
        param_ids: Vec<usize>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            class,
            vessel_type: VesselType::Neither,
            inlet_nodes,
            outlet_nodes,
            param_ids,
            var_ids: Vec::new(),
            eqn_ids: Vec::new(),
            steady: false,
        }
    }

    /// Registers `[p_in, q_in]` for every inlet node, then `[p_out, q_out]`
    /// for every outlet node, then one fresh internal variable per name in
    /// `internal_var_names`, then `num_equations` equation rows. Mirrors
    /// `Block::setup_dofs_`.
    pub fn setup_dofs_(
        &mut self,
        dofs: &mut DofRegistry,
        nodes: &[Node],
        num_equations: usize,
        internal_var_names: &[&str],
    ) {
        self.var_ids.clear();
        for &n in &self.inlet_nodes {
            self.var_ids.push(nodes[n].pressure_dof());
            self.var_ids.push(nodes[n].flow_dof());
        }
        for &n in &self.outlet_nodes {
            self.var_ids.push(nodes[n].pressure_dof());
            self.var_ids.push(nodes[n].flow_dof());
        }
        for name in internal_var_names {
            self.var_ids
                .push(dofs.register_variable(format!("{name}:{}", self.name)));
        }

        self.eqn_ids.clear();
        for i in 0..num_equations {
            self.eqn_ids
                .push(dofs.register_equation(format!("{}:eq{i}", self.name)));
        }
    }

    pub fn num_inlets(&self) -> usize {
        self.inlet_nodes.len()
    }

    pub fn num_outlets(&self) -> usize {
        self.outlet_nodes.len()
    }
}

/// One of the fifteen block kinds the original catalog supports, in
/// `BlockType` enum order.
#[derive(Debug, Clone)]
pub enum Block {
    BloodVessel(vessel::BloodVessel),
    Junction(junction::Junction),
    BloodVesselJunction(junction::BloodVesselJunction),
    ResistiveJunction(junction::ResistiveJunction),
    FlowReferenceBC(boundary::FlowReferenceBC),
    PressureReferenceBC(boundary::PressureReferenceBC),
    ResistanceBC(boundary::ResistanceBC),
    WindkesselBC(boundary::WindkesselBC),
    OpenLoopCoronaryBC(coronary::OpenLoopCoronaryBC),
    ClosedLoopCoronaryLeftBC(coronary::ClosedLoopCoronaryBC),
    ClosedLoopCoronaryRightBC(coronary::ClosedLoopCoronaryBC),
    ClosedLoopRCRBC(coronary::ClosedLoopRCRBC),
    ClosedLoopHeartPulmonary(heart::ClosedLoopHeartPulmonary),
    ValveTanh(valve::ValveTanh),
    ChamberElastanceInductor(chamber::ChamberElastanceInductor),
}

impl Block {
    pub fn common(&self) -> &BlockCommon {
        match self {
            Block::BloodVessel(b) => &b.common,
            Block::Junction(b) => &b.common,
            Block::BloodVesselJunction(b) => &b.common,
            Block::ResistiveJunction(b) => &b.common,
            Block::FlowReferenceBC(b) => &b.common,
            Block::PressureReferenceBC(b) => &b.common,
            Block::ResistanceBC(b) => &b.common,
            Block::WindkesselBC(b) => &b.common,
            Block::OpenLoopCoronaryBC(b) => &b.common,
            Block::ClosedLoopCoronaryLeftBC(b) => &b.common,
            Block::ClosedLoopCoronaryRightBC(b) => &b.common,
            Block::ClosedLoopRCRBC(b) => &b.common,
            Block::ClosedLoopHeartPulmonary(b) => &b.common,
            Block::ValveTanh(b) => &b.common,
            Block::ChamberElastanceInductor(b) => &b.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut BlockCommon {
        match self {
            Block::BloodVessel(b) => &mut b.common,
            Block::Junction(b) => &mut b.common,
            Block::BloodVesselJunction(b) => &mut b.common,
            Block::ResistiveJunction(b) => &mut b.common,
            Block::FlowReferenceBC(b) => &mut b.common,
            Block::PressureReferenceBC(b) => &mut b.common,
            Block::ResistanceBC(b) => &mut b.common,
            Block::WindkesselBC(b) => &mut b.common,
            Block::OpenLoopCoronaryBC(b) => &mut b.common,
            Block::ClosedLoopCoronaryLeftBC(b) => &mut b.common,
            Block::ClosedLoopCoronaryRightBC(b) => &mut b.common,
            Block::ClosedLoopRCRBC(b) => &mut b.common,
            Block::ClosedLoopHeartPulmonary(b) => &mut b.common,
            Block::ValveTanh(b) => &mut b.common,
            Block::ChamberElastanceInductor(b) => &mut b.common,
        }
    }

    pub fn name(&self) -> &str {
        &self.common().name
    }

    /// Registers this block's variables and equations. Mirrors the
    /// `virtual void setup_dofs` override of each C++ subclass.
    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry, nodes: &[Node]) {
        match self {
            Block::BloodVessel(b) => b.setup_dofs(dofs, nodes),
            Block::Junction(b) => b.setup_dofs(dofs, nodes),
            Block::BloodVesselJunction(b) => b.setup_dofs(dofs, nodes),
            Block::ResistiveJunction(b) => b.setup_dofs(dofs, nodes),
            Block::FlowReferenceBC(b) => b.setup_dofs(dofs, nodes),
            Block::PressureReferenceBC(b) => b.setup_dofs(dofs, nodes),
            Block::ResistanceBC(b) => b.setup_dofs(dofs, nodes),
            Block::WindkesselBC(b) => b.setup_dofs(dofs, nodes),
            Block::OpenLoopCoronaryBC(b) => b.setup_dofs(dofs, nodes),
            Block::ClosedLoopCoronaryLeftBC(b) => b.setup_dofs(dofs, nodes),
            Block::ClosedLoopCoronaryRightBC(b) => b.setup_dofs(dofs, nodes),
            Block::ClosedLoopRCRBC(b) => b.setup_dofs(dofs, nodes),
            Block::ClosedLoopHeartPulmonary(b) => b.setup_dofs(dofs, nodes),
            Block::ValveTanh(b) => b.setup_dofs(dofs, nodes),
            Block::ChamberElastanceInductor(b) => b.setup_dofs(dofs, nodes),
        }
    }

    /// Parameters that can be derived once topology is known but before any
    /// state exists. In the original source this is where
    /// `ClosedLoopCoronaryLeftBC`/`RightBC` resolve the heart block's
    /// intramyocardial-pressure parameter and ventricle-pressure variable
    /// by name; because that requires borrowing a *different* block, the
    /// wiring is done once in `Model::finalize` instead of through this
    /// per-block hook (see `coronary::resolve_heart_dependency`). No block
    /// needs a self-contained model-dependent setup step, so this is a
    /// no-op kept for parity with the original lifecycle.
    pub fn setup_model_dependent_params(&mut self) {}

    /// Parameters that depend on the initial state. Only
    /// `OpenLoopCoronaryBC` overrides this.
    pub fn setup_initial_state_dependent_params(
        &mut self,
        initial_state: &State,
        parameters: &ParameterStore,
    ) {
        if let Block::OpenLoopCoronaryBC(b) = self {
            b.setup_initial_state_dependent_params(initial_state, parameters);
        }
    }

    pub fn update_constant(&self, system: &mut SparseSystem, parameters: &ParameterStore) {
        match self {
            Block::BloodVessel(b) => b.update_constant(system, parameters),
            Block::Junction(b) => b.update_constant(system, parameters),
            Block::BloodVesselJunction(b) => b.update_constant(system, parameters),
            Block::ResistiveJunction(b) => b.update_constant(system, parameters),
            Block::FlowReferenceBC(b) => b.update_constant(system, parameters),
            Block::PressureReferenceBC(b) => b.update_constant(system, parameters),
            Block::ResistanceBC(b) => b.update_constant(system, parameters),
            Block::WindkesselBC(b) => b.update_constant(system, parameters),
            Block::OpenLoopCoronaryBC(b) => b.update_constant(system, parameters),
            Block::ClosedLoopCoronaryLeftBC(b) => b.update_constant(system, parameters, true),
            Block::ClosedLoopCoronaryRightBC(b) => b.update_constant(system, parameters, false),
            Block::ClosedLoopRCRBC(b) => b.update_constant(system, parameters),
            Block::ClosedLoopHeartPulmonary(b) => b.update_constant(system, parameters),
            Block::ValveTanh(b) => b.update_constant(system, parameters),
            Block::ChamberElastanceInductor(b) => b.update_constant(system, parameters),
        }
    }

    pub fn update_time(&mut self, system: &mut SparseSystem, parameters: &ParameterStore) {
        match self {
            Block::WindkesselBC(b) => b.update_time(system, parameters),
            Block::OpenLoopCoronaryBC(b) => b.update_time(system, parameters),
            Block::ClosedLoopHeartPulmonary(b) => b.update_time(system, parameters),
            Block::ChamberElastanceInductor(b) => b.update_time(system, parameters),
            Block::FlowReferenceBC(b) => b.update_time(system, parameters),
            Block::PressureReferenceBC(b) => b.update_time(system, parameters),
            Block::ResistanceBC(b) => b.update_time(system, parameters),
            _ => {}
        }
    }

    pub fn update_solution(
        &mut self,
        system: &mut SparseSystem,
        parameters: &ParameterStore,
        y: &[f64],
        dy: &[f64],
    ) {
        match self {
            Block::BloodVessel(b) => b.update_solution(system, parameters, y, dy),
            Block::BloodVesselJunction(b) => b.update_solution(system, parameters, y, dy),
            Block::ResistiveJunction(b) => b.update_solution(system, parameters, y),
            Block::OpenLoopCoronaryBC(b) => b.update_solution(system, parameters, y),
            Block::ClosedLoopCoronaryLeftBC(b) => b.update_solution(system, parameters, y, true),
            Block::ClosedLoopCoronaryRightBC(b) => b.update_solution(system, parameters, y, false),
            Block::ClosedLoopHeartPulmonary(b) => b.update_solution(system, parameters, y),
            Block::ValveTanh(b) => b.update_solution(system, parameters, y),
            _ => {}
        }
    }

    /// Post-solve fixups applied to the freshly-updated solution vector.
    /// Only `ClosedLoopHeartPulmonary` overrides this (zeroing flows
    /// across closed valves).
    pub fn post_solve(&self, y: &mut [f64]) {
        if let Block::ClosedLoopHeartPulmonary(b) = self {
            b.post_solve(y);
        }
    }

    /// Accumulates this block's contribution to the calibration gradient.
    /// `BloodVessel` and `BloodVesselJunction` write both residual and
    /// Jacobian columns; `Junction` is parameter-free and only contributes
    /// conservation residual rows. Every other block reports
    /// `SolverError::UnsupportedGradient`.
    pub fn update_gradient(
        &self,
        jacobian: &mut nalgebra::DMatrix<f64>,
        residual: &mut [f64],
        alpha: &[f64],
        y: &[f64],
        dy: &[f64],
        row_offset: usize,
    ) -> SolverResult<()> {
        match self {
            Block::BloodVessel(b) => {
                b.update_gradient(jacobian, residual, alpha, y, dy, row_offset);
                Ok(())
            }
            Block::BloodVesselJunction(b) => {
                b.update_gradient(jacobian, residual, alpha, y, dy, row_offset);
                Ok(())
            }
            Block::Junction(b) => {
                b.update_gradient(residual, y, row_offset);
                Ok(())
            }
            other => Err(SolverError::UnsupportedGradient(other.name().to_string())),
        }
    }

    pub fn num_triplets(&self) -> TripletBudget {
        match self {
            Block::BloodVessel(_) => TripletBudget { f: 5, e: 3, d: 2 },
            Block::Junction(b) => b.num_triplets(),
            Block::BloodVesselJunction(b) => b.num_triplets(),
            Block::ResistiveJunction(b) => b.num_triplets(),
            Block::FlowReferenceBC(_) => TripletBudget { f: 2, e: 0, d: 0 },
            Block::PressureReferenceBC(_) => TripletBudget { f: 2, e: 0, d: 0 },
            Block::ResistanceBC(_) => TripletBudget { f: 3, e: 0, d: 0 },
            Block::WindkesselBC(_) => TripletBudget { f: 5, e: 1, d: 0 },
            Block::OpenLoopCoronaryBC(_) => TripletBudget { f: 5, e: 4, d: 0 },
            Block::ClosedLoopCoronaryLeftBC(_) | Block::ClosedLoopCoronaryRightBC(_) => {
                TripletBudget { f: 9, e: 5, d: 0 }
            }
            Block::ClosedLoopRCRBC(_) => TripletBudget { f: 8, e: 1, d: 0 },
            Block::ClosedLoopHeartPulmonary(_) => TripletBudget { f: 33, e: 10, d: 2 },
            Block::ValveTanh(_) => TripletBudget { f: 5, e: 0, d: 3 },
            Block::ChamberElastanceInductor(_) => TripletBudget { f: 6, e: 2, d: 0 },
        }
    }
}
