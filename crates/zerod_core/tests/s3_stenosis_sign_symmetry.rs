//! End-to-end scenario S3: a stenotic blood vessel's pressure drop is an odd
//! function of the driving flow, `Δp(+q) = -Δp(-q)`, because the stenosis
//! term `S|q|q` in the vessel's first row is itself odd in `q`.

use zerod_core::block::boundary::{FlowReferenceBC, PressureReferenceBC};
use zerod_core::block::vessel::BloodVessel;
use zerod_core::block::Block;
use zerod_core::model::Model;
use zerod_core::simulator::{SimulationParameters, Simulator};
use zerod_core::state::State;

/// Flow BC -> stenotic vessel (R=1, C=0, L=0, S=10) -> Pressure BC (p=0).
/// With no capacitance or inductance the system is purely algebraic, so
/// `p_in - p_out` is read directly off the converged steady state.
fn pressure_drop_for_flow(q_value: f64) -> anyhow::Result<f64> {
    let mut model = Model::new();
    let q = model.parameters.add_constant(q_value);
    let r = model.parameters.add_constant(1.0);
    let c = model.parameters.add_constant(0.0);
    let l = model.parameters.add_constant(0.0);
    let s = model.parameters.add_constant(10.0);
    let p_out = model.parameters.add_constant(0.0);

    let n0 = model.add_node(vec![], vec![0, 1], "n0");
    let n1 = model.add_node(vec![1], vec![2], "n1");

    model.add_block(Block::FlowReferenceBC(FlowReferenceBC::new(0, "flow0", n0, q)), "flow0");
    model.add_block(
        Block::BloodVessel(BloodVessel::new(1, "vessel0", n0, n1, vec![r, c, l, s])),
        "vessel0",
    );
    model.add_block(Block::PressureReferenceBC(PressureReferenceBC::new(2, "pout", n1, p_out)), "pout");
    model.finalize()?;

    let n = model.dofs.num_variables();
    let params = SimulationParameters {
        points_per_cycle: 2,
        num_cycles: 1,
        steady_initial: false,
        atol: 1e-12,
        max_nliter: 50,
        ..SimulationParameters::default()
    };
    let mut sim = Simulator::new(model, State::zero(n), params)?;
    let outcome = sim.run(0.0)?;

    let p_in_dof = sim.model().node(0).pressure_dof();
    let p_out_dof = sim.model().node(1).pressure_dof();
    let last = outcome.states.last().unwrap();
    Ok(last.y[p_in_dof] - last.y[p_out_dof])
}

#[test]
fn stenosis_pressure_drop_is_odd_in_driving_flow() -> anyhow::Result<()> {
    let dp_pos = pressure_drop_for_flow(5.0)?;
    let dp_neg = pressure_drop_for_flow(-5.0)?;

    assert!((dp_pos - (-dp_neg)).abs() < 1e-10, "dp_pos={dp_pos} dp_neg={dp_neg}");
    // Sanity: a stenotic vessel resists forward flow, so a positive drive
    // flow produces a positive pressure drop (R*q + S*q^2, both positive).
    assert!(dp_pos > 0.0);
    Ok(())
}
