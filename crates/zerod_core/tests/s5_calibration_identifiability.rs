//! End-to-end scenario S5: Levenberg-Marquardt recovers a single vessel's
//! true `(R, C, L, S)` from 100 synthetic observations after perturbing the
//! starting parameters by +30%.

use zerod_core::block::vessel::BloodVessel;
use zerod_core::block::Block;
use zerod_core::calibrate::{calibrate, CalibrationSettings, Observation};
use zerod_core::model::Model;

#[test]
fn calibration_recovers_truth_from_perturbed_start() -> anyhow::Result<()> {
    let truth = [1.2, 0.5, 0.1, 2.0];

    let mut model = Model::new();
    let rp = model.parameters.add_constant(truth[0]);
    let cp = model.parameters.add_constant(truth[1]);
    let lp = model.parameters.add_constant(truth[2]);
    let sp = model.parameters.add_constant(truth[3]);
    let n0 = model.add_node(vec![], vec![0], "n0");
    let n1 = model.add_node(vec![0], vec![], "n1");
    model.add_block(
        Block::BloodVessel(BloodVessel::new(0, "vessel0", n0, n1, vec![rp, cp, lp, sp])),
        "vessel0",
    );
    model.finalize()?;

    let mut observations = Vec::with_capacity(100);
    for i in 0..100 {
        let t = i as f64 * 0.01;
        let q_in = 5.0 + (t * std::f64::consts::TAU).sin();
        let dq_in = (t * std::f64::consts::TAU).cos() * std::f64::consts::TAU;

        let n = model.dofs.num_variables();
        let mut y = vec![0.0; n];
        let mut ydot = vec![0.0; n];

        let p_in_dof = model.node(n0).pressure_dof();
        let q_in_dof = model.node(n0).flow_dof();
        let p_out_dof = model.node(n1).pressure_dof();
        let q_out_dof = model.node(n1).flow_dof();

        y[q_in_dof] = q_in;
        y[q_out_dof] = q_in;
        y[p_out_dof] = 0.0;
        let stenosis_r = truth[3] * q_in.abs();
        y[p_in_dof] = (truth[0] + stenosis_r) * q_in;
        ydot[q_in_dof] = dq_in;

        observations.push(Observation { y, ydot });
    }

    let alpha0: Vec<f64> = truth.iter().map(|v| v * 1.3).collect();
    let settings = CalibrationSettings {
        lambda_0: 1.0,
        tol_grad: 1e-8,
        tol_inc: 1e-10,
        max_iter: 100,
    };
    let outcome = calibrate(&model, &alpha0, &observations, settings)?;

    for (fitted, expected) in outcome.alpha.iter().zip(truth.iter()) {
        let rel_err = (fitted - expected).abs() / expected.abs();
        assert!(rel_err < 1e-2, "fitted={fitted} expected={expected} rel_err={rel_err}");
    }
    Ok(())
}
