//! End-to-end scenario S6: an external-solver coupling handshake. A
//! constant-flow Flow BC is re-pushed into the coupling facade window by
//! window (as an external 3D solver would), and `run_simulation` is called
//! once per window. The windowed inlet pressure must track the model's own
//! analytic charging curve (a first-order RC step response) to within 5%
//! at every window.

use zerod_core::block::boundary::{FlowReferenceBC, WindkesselBC};
use zerod_core::block::Block;
use zerod_core::coupling::CouplingRegistry;
use zerod_core::model::Model;
use zerod_core::simulator::SimulationParameters;
use zerod_core::state::State;

#[test]
fn coupling_handshake_tracks_windkessel_charging_curve() -> anyhow::Result<()> {
    let rp_v = 1.0;
    let cap_v = 1.0;
    let rd_v = 9.0;
    let pd_v = 0.0;
    let q_v = 5.0;

    let mut model = Model::new();
    let q = model.parameters.add_series(vec![0.0, 1.0], vec![q_v, q_v], false)?;
    let rp = model.parameters.add_constant(rp_v);
    let cap = model.parameters.add_constant(cap_v);
    let rd = model.parameters.add_constant(rd_v);
    let pd = model.parameters.add_constant(pd_v);

    let n0 = model.add_node(vec![], vec![0], "n0");
    model.add_block(Block::FlowReferenceBC(FlowReferenceBC::new(0, "flow0", n0, q)), "flow0");
    model.add_block(Block::WindkesselBC(WindkesselBC::new(1, "wk0", n0, rp, cap, rd, pd)), "wk0");
    model.finalize()?;

    let n = model.dofs.num_variables();
    let dt_ext = 5e-3;
    let params = SimulationParameters {
        points_per_cycle: 2,
        num_cycles: 1,
        steady_initial: false,
        coupled: true,
        external_step_size: Some(dt_ext),
        ..SimulationParameters::default()
    };

    let mut registry = CouplingRegistry::new();
    let (handle, info) = registry.initialize(model, State::zero(n), params)?;
    let p_dof = info
        .variable_names
        .iter()
        .position(|name| name == "pressure:n0")
        .expect("inlet pressure DOF must be registered");

    let tau = rd_v * cap_v;
    let p_ss = rp_v * q_v + rd_v * q_v + pd_v;
    let p0 = rp_v * q_v; // pressure_c(0) = 0, so p_in(0) = Rp*q

    let mut t = 0.0;
    for _ in 0..400 {
        registry.update_block_params(handle, "flow0", &[2.0, 0.0, dt_ext, q_v, q_v])?;
        let outcome = registry.run_simulation(handle, t)?;
        assert_eq!(outcome.error_code, 0);
        t += dt_ext;

        let p_in = outcome.states.last().unwrap().y[p_dof];
        let analytic = p_ss - (p_ss - p0) * (-t / tau).exp();
        let rel_err = (p_in - analytic).abs() / analytic.abs().max(1e-9);
        assert!(rel_err < 0.05, "t={t}: p_in={p_in} analytic={analytic} rel_err={rel_err}");
    }

    let final_p = registry.get_y(handle)?[p_dof];
    assert!((final_p - p_ss).abs() / p_ss < 1e-2, "final_p={final_p} p_ss={p_ss}");
    Ok(())
}
