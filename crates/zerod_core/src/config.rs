//! Normalized in-memory configuration surface (ambient).
//!
//! No JSON (or any other textual) parsing lives here — that adapter is out
//! of scope, per the core spec's own framing of configuration as "consumed,
//! not specified in detail here". These are the plain `serde` structs a
//! caller (or, internally, the calibrator/coupling facade) constructs after
//! normalizing a configuration document's six block-bearing sections plus
//! its simulation parameters, initial condition, and calibration targets.
//! Field names mirror the document's JSON keys one-to-one so a future
//! parsing adapter has an obvious target shape.

use serde::{Deserialize, Serialize};

pub use crate::simulator::SimulationParameters;

/// One parameter attached to a block: either a constant or a periodic
/// time series, matching [`crate::parameter::Parameter`]'s two forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub value: Option<f64>,
    pub times: Option<Vec<f64>>,
    pub values: Option<Vec<f64>>,
    pub is_periodic: bool,
}

/// One block entry from any of the document's `vessels`,
/// `boundary_conditions`, `junctions`, `valves`, `chambers`,
/// `closed_loop_blocks`, or `external_solver_coupling_blocks` sections.
/// `block_type` carries the `BlockType` tag (e.g. `"BloodVessel"`,
/// `"WindkesselBC"`) the caller uses to pick which `block::Block`
/// constructor to call; this crate does not dispatch on it itself, since
/// doing so would require the JSON adapter this module deliberately omits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSpec {
    pub name: String,
    pub block_type: String,
    pub inlet_nodes: Vec<String>,
    pub outlet_nodes: Vec<String>,
    pub parameters: Vec<ParameterSpec>,
}

/// The full normalized document: every section of the JSON configuration
/// (§6) as a plain, already-parsed value. `initial_condition`/
/// `initial_condition_d` map DOF name to value, matching the source's
/// sparse (name-keyed, not vector-indexed) initial-condition format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub simulation_parameters: SimulationParameters,
    pub blocks: Vec<BlockSpec>,
    pub initial_condition: Vec<(String, f64)>,
    pub initial_condition_d: Vec<(String, f64)>,
    pub calibration_parameters: Option<CalibrationSpec>,
}

/// The `calibration_parameters` section: per-parameter bounds the original
/// optimizer enforces by clamping, alongside the Marquardt settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSpec {
    pub tolerance_gradient: f64,
    pub tolerance_increment: f64,
    pub maximum_iterations: usize,
    pub calibrate_stenosis_coefficient: bool,
    pub set_capacitance_to_zero: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_spec_clones_every_section() {
        let spec = ModelSpec {
            simulation_parameters: SimulationParameters::default(),
            blocks: vec![BlockSpec {
                name: "vessel0".into(),
                block_type: "BloodVessel".into(),
                inlet_nodes: vec!["n0".into()],
                outlet_nodes: vec!["n1".into()],
                parameters: vec![ParameterSpec {
                    name: "R_poiseuille".into(),
                    value: Some(1.0),
                    times: None,
                    values: None,
                    is_periodic: false,
                }],
            }],
            initial_condition: vec![("n0:pressure".into(), 0.0)],
            initial_condition_d: vec![],
            calibration_parameters: None,
        };

        let cloned = spec.clone();
        assert_eq!(cloned.blocks.len(), 1);
        assert_eq!(cloned.blocks[0].parameters[0].name, "R_poiseuille");
    }
}
