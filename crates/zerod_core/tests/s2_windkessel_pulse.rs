//! End-to-end scenario S2: a periodic Flow BC pulse into a Windkessel
//! boundary condition settles to the expected cycle-averaged pressure
//! `R_p * <q> + R_d * <q>`.

use zerod_core::block::boundary::{FlowReferenceBC, WindkesselBC};
use zerod_core::block::Block;
use zerod_core::model::Model;
use zerod_core::simulator::{SimulationParameters, Simulator};
use zerod_core::state::State;

#[test]
fn windkessel_pulse_settles_to_expected_mean_pressure() -> anyhow::Result<()> {
    let mut model = Model::new();
    let q = model
        .parameters
        .add_series(vec![0.0, 0.5, 1.0], vec![0.0, 1.0, 0.0], true)?;
    let rp = model.parameters.add_constant(1.0);
    let cap = model.parameters.add_constant(1.0);
    let rd = model.parameters.add_constant(9.0);
    let pd = model.parameters.add_constant(0.0);

    let n0 = model.add_node(vec![], vec![0], "n0");
    model.add_block(Block::FlowReferenceBC(FlowReferenceBC::new(0, "flow0", n0, q)), "flow0");
    model.add_block(Block::WindkesselBC(WindkesselBC::new(1, "wk0", n0, rp, cap, rd, pd)), "wk0");
    model.finalize()?;

    let n = model.dofs.num_variables();
    let params = SimulationParameters {
        points_per_cycle: 201,
        num_cycles: 3,
        steady_initial: false,
        output_all_cycles: true,
        output_last_cycle_only: true,
        ..SimulationParameters::default()
    };
    let mut sim = Simulator::new(model, State::zero(n), params)?;
    let outcome = sim.run(0.0)?;

    let p_dof = sim.model().node(0).pressure_dof();
    let mean_pressure: f64 =
        outcome.states.iter().map(|s| s.y[p_dof]).sum::<f64>() / outcome.states.len() as f64;

    assert!((mean_pressure - 2.5).abs() < 1e-3, "mean_pressure={mean_pressure}");
    Ok(())
}
