//! Generalized-alpha implicit time integrator (C6).
//!
//! Grounded on `original_source/src/algebra/Integrator.{h,cpp}`. Drives a
//! [`crate::model::Model`] through one Newton-corrected predictor step per
//! call to [`GeneralizedAlpha::step`], reusing a single [`SparseSystem`]
//! across every step.

use tracing::{debug, trace, warn};

use crate::error::{SolverError, SolverResult};
use crate::model::Model;
use crate::sparse::SparseSystem;
use crate::state::State;

/// Coefficients of the generalized-alpha scheme, derived once from the
/// spectral radius at infinity `rho_infinity`.
#[derive(Debug, Clone, Copy)]
pub struct GeneralizedAlphaCoefficients {
    pub alpha_m: f64,
    pub alpha_f: f64,
    pub gamma: f64,
    pub ydot_init_coeff: f64,
    pub y_coeff: f64,
    pub y_coeff_jacobian: f64,
}

impl GeneralizedAlphaCoefficients {
    pub fn new(rho_infinity: f64, time_step_size: f64) -> Self {
        let alpha_m = 0.5 * (3.0 - rho_infinity) / (1.0 + rho_infinity);
        let alpha_f = 1.0 / (1.0 + rho_infinity);
        let gamma = 0.5 + alpha_m - alpha_f;
        Self {
            alpha_m,
            alpha_f,
            gamma,
            ydot_init_coeff: 1.0 - 1.0 / gamma,
            y_coeff: gamma * time_step_size,
            y_coeff_jacobian: alpha_f * gamma * time_step_size,
        }
    }
}

/// Implicit second-order generalized-alpha predictor/Newton-corrector
/// integrator, owning the [`SparseSystem`] it solves each Newton step.
pub struct GeneralizedAlpha {
    pub system: SparseSystem,
    rho_infinity: f64,
    time_step_size: f64,
    coeffs: GeneralizedAlphaCoefficients,
    atol: f64,
    max_nonlinear_iterations: usize,
    n_iter: usize,
    n_nonlin_iter: usize,
}

impl GeneralizedAlpha {
    pub fn new(
        system: SparseSystem,
        rho_infinity: f64,
        time_step_size: f64,
        atol: f64,
        max_nonlinear_iterations: usize,
    ) -> Self {
        Self {
            system,
            rho_infinity,
            time_step_size,
            coeffs: GeneralizedAlphaCoefficients::new(rho_infinity, time_step_size),
            atol,
            max_nonlinear_iterations,
            n_iter: 0,
            n_nonlin_iter: 0,
        }
    }

    pub fn coefficients(&self) -> GeneralizedAlphaCoefficients {
        self.coeffs
    }

    pub fn time_step_size(&self) -> f64 {
        self.time_step_size
    }

    /// Recomputes the scheme's coefficients for a new step size, keeping
    /// `rho_infinity` fixed. Used when the simulator's external step size
    /// changes (C9 `set_external_step_size`).
    pub fn set_time_step_size(&mut self, time_step_size: f64) {
        self.time_step_size = time_step_size;
        self.coeffs = GeneralizedAlphaCoefficients::new(self.rho_infinity, time_step_size);
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn n_nonlin_iter(&self) -> usize {
        self.n_nonlin_iter
    }

    pub fn average_nonlinear_iterations(&self) -> f64 {
        if self.n_iter == 0 {
            0.0
        } else {
            self.n_nonlin_iter as f64 / self.n_iter as f64
        }
    }

    /// Advances `model`/`state` from `t` to `t + time_step_size`, returning
    /// the new state. Implements the predictor/Newton-corrector procedure
    /// of spec §4.6 exactly, including its ordering guarantees (§5): time
    /// update before any solution update, and solution update before
    /// residual, jacobian, solve, post-solve, and the state increment.
    pub fn step(&mut self, model: &mut Model, state: &State, t: f64) -> SolverResult<State> {
        let n = state.len();
        let mut y = state.y.clone();
        let mut ydot = vec![0.0; n];
        for i in 0..n {
            ydot[i] = self.coeffs.ydot_init_coeff * state.ydot[i];
        }

        let t_mid = t + self.coeffs.alpha_f * self.time_step_size;
        model.update_time(&mut self.system, t_mid);

        let mut converged = false;
        let mut final_residual_norm = f64::INFINITY;
        for iteration in 0..self.max_nonlinear_iterations {
            let mut y_af = vec![0.0; n];
            let mut ydot_am = vec![0.0; n];
            for i in 0..n {
                y_af[i] = state.y[i] + self.coeffs.alpha_f * (y[i] - state.y[i]);
                ydot_am[i] = state.ydot[i] + self.coeffs.alpha_m * (ydot[i] - state.ydot[i]);
            }

            model.update_solution(&mut self.system, &y_af, &ydot_am);
            self.system.update_residual(&y_af, &ydot_am);

            let residual_norm = self
                .system
                .residual
                .iter()
                .fold(0.0_f64, |acc, &r| acc.max(r.abs()));
            final_residual_norm = residual_norm;
            trace!(iteration, residual_norm, "newton iteration");

            if residual_norm < self.atol {
                converged = true;
                self.n_nonlin_iter += iteration + 1;
                break;
            }

            if iteration + 1 == self.max_nonlinear_iterations {
                self.n_nonlin_iter += iteration + 1;
                warn!(residual_norm, "newton iteration failed to converge");
                break;
            }

            self.system
                .update_jacobian(self.coeffs.alpha_m, self.coeffs.y_coeff_jacobian);
            self.system.solve()?;

            model.post_solve(&mut y);

            for i in 0..n {
                ydot[i] += self.system.dydot[i];
                y[i] += self.coeffs.y_coeff * self.system.dydot[i];
            }
        }

        self.n_iter += 1;

        if !converged {
            return Err(SolverError::NonlinearDivergence {
                max_iter: self.max_nonlinear_iterations,
                residual_norm: final_residual_norm,
            });
        }

        debug!(t, residual_norm = final_residual_norm, "step converged");
        Ok(State { y, ydot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coefficients_satisfy_backward_euler_limit_at_rho_one() {
        // rho_infinity = 1 degenerates to backward Euler: alpha_m = alpha_f = 1.
        let coeffs = GeneralizedAlphaCoefficients::new(1.0, 0.1);
        assert!((coeffs.alpha_m - 1.0).abs() < 1e-12);
        assert!((coeffs.alpha_f - 1.0).abs() < 1e-12);
        assert!((coeffs.gamma - 0.5).abs() < 1e-12);
    }

    #[test]
    fn coefficient_identity_holds_for_any_rho() {
        for rho in [0.0, 0.2, 0.5, 0.8, 1.0] {
            let c = GeneralizedAlphaCoefficients::new(rho, 1.0);
            let lhs = c.alpha_m + c.gamma;
            let rhs = 0.5 + 2.0 * c.alpha_m - c.alpha_f;
            assert!((lhs - rhs).abs() < 1e-10, "rho={rho}: {lhs} != {rhs}");
        }
    }

    #[test]
    fn step_on_pure_algebraic_model_converges_in_one_iteration() -> anyhow::Result<()> {
        use crate::block::boundary::{FlowReferenceBC, ResistanceBC};
        use crate::block::Block;
        use crate::model::Model;

        let mut model = Model::new();
        let q = model.parameters.add_constant(5.0);
        let r = model.parameters.add_constant(2.0);
        let pd = model.parameters.add_constant(0.0);

        let n0 = model.add_node(vec![], vec![0], "n0");
        model.add_block(Block::FlowReferenceBC(FlowReferenceBC::new(0, "flow0", n0, q)), "flow0");
        model.add_block(
            Block::ResistanceBC(ResistanceBC::new(1, "res0", n0, r, pd)),
            "res0",
        );
        model.finalize()?;

        let n = model.dofs.num_variables();
        let mut system = SparseSystem::new(n);
        model.update_constant(&mut system);
        model.update_time(&mut system, 0.0);
        model.update_solution(&mut system, &vec![1.0; n], &vec![1.0; n]);
        system.reserve()?;

        let mut integrator = GeneralizedAlpha::new(system, 0.1, 0.1, 1e-8, 30);
        let state = State::zero(n);
        let next = integrator.step(&mut model, &state, 0.0)?;

        assert_eq!(integrator.n_nonlin_iter(), 1);
        let p_dof = model.node(n0).pressure_dof();
        let q_dof = model.node(n0).flow_dof();
        assert!((next.y[p_dof] - 10.0).abs() < 1e-8);
        assert!((next.y[q_dof] - 5.0).abs() < 1e-8);
        Ok(())
    }
}
