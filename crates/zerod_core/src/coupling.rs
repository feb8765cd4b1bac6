//! External coupling facade (C9).
//!
//! Grounded on `original_source/src/helpers/CouplingInterface.{h,cpp}`: the
//! original exposes a process-wide map of integer handles to solver
//! instances behind a C ABI so an external 3D solver can drive a 0D network
//! step by step. The `extern "C"` boundary and its JSON ingestion are out
//! of scope (§9's design note); this module keeps the semantic contract —
//! a handle-indexed registry, one [`ProblemHandle`] per coupled problem —
//! as a plain Rust struct rather than a file-scope static.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{SolverError, SolverResult};
use crate::model::Model;
use crate::simulator::{SimulationParameters, Simulator};
use crate::state::State;

/// How often `run_simulation` scans the running state for NaN, mirroring
/// the original's fixed check interval.
const NAN_SCAN_INTERVAL: usize = 100;

/// Returned by `initialize`: everything an external host needs to size its
/// own buffers and address blocks/variables by name.
#[derive(Debug, Clone)]
pub struct InitializeInfo {
    pub system_size: usize,
    pub points_per_cycle: usize,
    pub num_cycles: usize,
    pub block_names: Vec<String>,
    pub variable_names: Vec<String>,
}

/// `[n_in, (q_in, p_in)..., n_out, (q_out, p_out)...]` using global DOF
/// indices, matching `get_block_node_indices`'s documented layout.
#[derive(Debug, Clone)]
pub struct NodeLayout {
    pub num_inlets: usize,
    pub inlet_dofs: Vec<(usize, usize)>,
    pub num_outlets: usize,
    pub outlet_dofs: Vec<(usize, usize)>,
}

/// Result of `run_simulation`: the retained time history plus the
/// out-of-band NaN signal (§7's one exception to "errors are values").
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub times: Vec<f64>,
    pub states: Vec<State>,
    pub error_code: u8,
}

struct ProblemHandle {
    simulator: Simulator,
    state: State,
    t: f64,
}

/// Owns every coupled problem by handle, replacing the original's
/// process-wide static registry with an explicit, caller-owned map (§9).
#[derive(Default)]
pub struct CouplingRegistry {
    problems: HashMap<u32, ProblemHandle>,
    next_handle: u32,
}

impl CouplingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, handle: u32) -> SolverResult<&ProblemHandle> {
        self.problems
            .get(&handle)
            .ok_or_else(|| SolverError::ConfigInvalid(format!("unknown coupling handle {handle}")))
    }

    fn get_mut(&mut self, handle: u32) -> SolverResult<&mut ProblemHandle> {
        self.problems
            .get_mut(&handle)
            .ok_or_else(|| SolverError::ConfigInvalid(format!("unknown coupling handle {handle}")))
    }

    /// Builds a model, runs the steady prefix if requested, and constructs
    /// an integrator behind a fresh handle.
    pub fn initialize(
        &mut self,
        model: Model,
        initial_state: State,
        params: SimulationParameters,
    ) -> SolverResult<(u32, InitializeInfo)> {
        let system_size = model.dofs.num_variables();
        let points_per_cycle = params.points_per_cycle;
        let num_cycles = params.num_cycles;
        let block_names = (0..model.num_blocks())
            .map(|id| model.block_name(id).to_string())
            .collect();
        let variable_names = model.dofs.variable_names().to_vec();

        let simulator = Simulator::new(model, initial_state, params)?;
        let state = simulator.initial_state().clone();

        let handle = self.next_handle;
        self.next_handle += 1;
        self.problems.insert(handle, ProblemHandle { simulator, state, t: 0.0 });

        Ok((
            handle,
            InitializeInfo {
                system_size,
                points_per_cycle,
                num_cycles,
                block_names,
                variable_names,
            },
        ))
    }

    pub fn set_external_step_size(
        &mut self,
        handle: u32,
        external_step_size: f64,
        num_time_points: usize,
    ) -> SolverResult<()> {
        self.get_mut(handle)?
            .simulator
            .set_external_step_size(external_step_size, num_time_points)
    }

    /// Advances exactly one step, returning the new `y`.
    pub fn increment_time(&mut self, handle: u32, t: f64) -> SolverResult<Vec<f64>> {
        let problem = self.get_mut(handle)?;
        let dt = problem.simulator.time_step_size();
        let next = problem.simulator.step_once(&problem.state, t)?;
        problem.state = next;
        problem.t = t + dt;
        Ok(problem.state.y.clone())
    }

    /// Advances the configured number of steps from `t0`, scanning for NaN
    /// every [`NAN_SCAN_INTERVAL`] steps. On detection, stops immediately
    /// and returns `error_code = 1` with whatever history was collected so
    /// far (the NaN index/step is logged, matching the original's external
    /// logging of the failure location).
    pub fn run_simulation(&mut self, handle: u32, t0: f64) -> SolverResult<RunOutcome> {
        let problem = self.get_mut(handle)?;
        let total_steps = problem.simulator.total_steps();
        let dt = problem.simulator.time_step_size();

        let mut t = t0;
        let mut times = vec![t];
        let mut states = vec![problem.state.clone()];
        let mut error_code = 0u8;

        for step in 0..total_steps {
            let next = problem.simulator.step_once(&problem.state, t)?;
            problem.state = next;
            t += dt;
            times.push(t);
            states.push(problem.state.clone());

            if (step + 1) % NAN_SCAN_INTERVAL == 0 {
                if let Some(index) = states.last().unwrap().y.iter().position(|v| v.is_nan()) {
                    warn!(step, index, "NaN detected during coupled run");
                    error_code = 1;
                    break;
                }
            }
        }

        problem.t = t;
        Ok(RunOutcome { times, states, error_code })
    }

    /// For flow-bc/pressure-bc blocks, `params` is `[N, t_1..t_N, v_1..v_N]`
    /// and replaces the block's single time series. For every other block,
    /// `params` must match the block's parameter arity and is applied
    /// component-wise as new constants.
    pub fn update_block_params(
        &mut self,
        handle: u32,
        block_name: &str,
        params: &[f64],
    ) -> SolverResult<()> {
        use crate::block::Block;

        let problem = self.get_mut(handle)?;
        let model = problem.simulator.model_mut();
        let block = model.block_by_name(block_name)?;
        let is_series_bc = matches!(
            block,
            Block::FlowReferenceBC(_) | Block::PressureReferenceBC(_)
        );
        let all_param_ids = block.common().param_ids.clone();

        if is_series_bc {
            let param_id = all_param_ids[0];
            let n = *params.first().ok_or_else(|| {
                SolverError::ArityMismatch { block: block_name.to_string(), expected: 1, got: 0 }
            })? as usize;
            let expected_len = 1 + 2 * n;
            if params.len() != expected_len {
                return Err(SolverError::ArityMismatch {
                    block: block_name.to_string(),
                    expected: expected_len,
                    got: params.len(),
                });
            }
            let times = params[1..1 + n].to_vec();
            let values = params[1 + n..1 + 2 * n].to_vec();
            model.parameters.get_mut(param_id).update_series(times, values)?;
            let t = model.time();
            let refreshed = model.parameters.evaluate_at(param_id, t);
            model.parameters.set_value(param_id, refreshed);
        } else {
            if params.len() != all_param_ids.len() {
                return Err(SolverError::ArityMismatch {
                    block: block_name.to_string(),
                    expected: all_param_ids.len(),
                    got: params.len(),
                });
            }
            for (&id, &value) in all_param_ids.iter().zip(params.iter()) {
                model.parameters.get_mut(id).update_constant(value);
                model.parameters.set_value(id, value);
            }
        }
        Ok(())
    }

    /// Current parameter values for `block_name`, in arity order.
    pub fn read_block_params(&self, handle: u32, block_name: &str) -> SolverResult<Vec<f64>> {
        let problem = self.get(handle)?;
        let model = problem.simulator.model();
        let block = model.block_by_name(block_name)?;
        Ok(block
            .common()
            .param_ids
            .iter()
            .map(|&id| model.parameters.value(id))
            .collect())
    }

    pub fn get_block_node_indices(&self, handle: u32, block_name: &str) -> SolverResult<NodeLayout> {
        let problem = self.get(handle)?;
        let model = problem.simulator.model();
        let block = model.block_by_name(block_name)?;
        let c = block.common();

        let inlet_dofs = c
            .inlet_nodes
            .iter()
            .map(|&n| {
                let node = model.node(n);
                (node.flow_dof(), node.pressure_dof())
            })
            .collect::<Vec<_>>();
        let outlet_dofs = c
            .outlet_nodes
            .iter()
            .map(|&n| {
                let node = model.node(n);
                (node.flow_dof(), node.pressure_dof())
            })
            .collect::<Vec<_>>();

        Ok(NodeLayout {
            num_inlets: inlet_dofs.len(),
            inlet_dofs,
            num_outlets: outlet_dofs.len(),
            outlet_dofs,
        })
    }

    pub fn get_y(&self, handle: u32) -> SolverResult<Vec<f64>> {
        Ok(self.get(handle)?.state.y.clone())
    }

    pub fn get_ydot(&self, handle: u32) -> SolverResult<Vec<f64>> {
        Ok(self.get(handle)?.state.ydot.clone())
    }

    pub fn set_state(&mut self, handle: u32, y: Vec<f64>, ydot: Vec<f64>) -> SolverResult<()> {
        let problem = self.get_mut(handle)?;
        if y.len() != problem.state.len() || ydot.len() != problem.state.len() {
            return Err(SolverError::ConfigInvalid(
                "set_state vector length does not match system size".into(),
            ));
        }
        problem.state = State { y, ydot };
        Ok(())
    }
}
