use crate::error::{SolverError, SolverResult};

/// A single parameter: either a constant scalar or a periodic (or
/// externally-driven non-periodic) piecewise-linear time series.
#[derive(Debug, Clone)]
pub struct Parameter {
    id: usize,
    is_constant: bool,
    is_periodic: bool,
    value: f64,
    times: Vec<f64>,
    values: Vec<f64>,
    cycle_period: f64,
    steady_converted: bool,
    /// Saved series, restored by `to_unsteady`.
    saved_times: Vec<f64>,
    saved_values: Vec<f64>,
    saved_cycle_period: f64,
}

impl Parameter {
    pub fn constant(id: usize, value: f64) -> Self {
        Self {
            id,
            is_constant: true,
            is_periodic: true,
            value,
            times: Vec::new(),
            values: Vec::new(),
            cycle_period: 0.0,
            steady_converted: false,
            saved_times: Vec::new(),
            saved_values: Vec::new(),
            saved_cycle_period: 0.0,
        }
    }

    pub fn series(
        id: usize,
        times: Vec<f64>,
        values: Vec<f64>,
        periodic: bool,
    ) -> SolverResult<Self> {
        if times.len() != values.len() {
            return Err(SolverError::ConfigInvalid(format!(
                "parameter {id}: times and values must have equal length ({} vs {})",
                times.len(),
                values.len()
            )));
        }
        if times.len() < 2 {
            return Err(SolverError::ConfigInvalid(format!(
                "parameter {id}: a time series needs at least two points"
            )));
        }
        if !times.windows(2).all(|w| w[1] > w[0]) {
            return Err(SolverError::ConfigInvalid(format!(
                "parameter {id}: times must be strictly increasing"
            )));
        }
        let cycle_period = times[times.len() - 1] - times[0];
        Ok(Self {
            id,
            is_constant: false,
            is_periodic: periodic,
            value: 0.0,
            times,
            values,
            cycle_period,
            steady_converted: false,
            saved_times: Vec::new(),
            saved_values: Vec::new(),
            saved_cycle_period: 0.0,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_constant(&self) -> bool {
        self.is_constant
    }

    pub fn is_periodic(&self) -> bool {
        self.is_periodic
    }

    pub fn cycle_period(&self) -> f64 {
        self.cycle_period
    }

    /// Replaces a constant value in place (`update_block_params` applies
    /// parameter changes this way after construction).
    pub fn update_constant(&mut self, value: f64) {
        self.is_constant = true;
        self.value = value;
    }

    /// Replaces a time series in place.
    pub fn update_series(&mut self, times: Vec<f64>, values: Vec<f64>) -> SolverResult<()> {
        if times.len() != values.len() {
            return Err(SolverError::ConfigInvalid(
                "updated series times/values length mismatch".into(),
            ));
        }
        if values.len() == 1 {
            self.value = values[0];
            self.is_constant = true;
            return Ok(());
        }
        self.cycle_period = times[times.len() - 1] - times[0];
        self.times = times;
        self.values = values;
        self.is_constant = false;
        Ok(())
    }

    /// Evaluates the parameter at time `t`.
    pub fn get(&self, t: f64) -> f64 {
        if self.is_constant {
            return self.value;
        }

        let rtime = if self.is_periodic {
            let r = t % self.cycle_period;
            if r < 0.0 {
                r + self.cycle_period
            } else {
                r
            }
        } else {
            t
        };

        // Emulates std::lower_bound: first index k with times[k] >= rtime.
        let k = self.times.partition_point(|&x| x < rtime);

        if k < self.times.len() && self.times[k] == rtime {
            return self.values[k];
        }

        let (m, k) = if k == self.times.len() {
            // Above the last knot: extrapolate using the last two knots.
            (self.times.len() - 2, self.times.len() - 1)
        } else if k == 0 {
            // Below the first knot: extrapolate using the first two knots.
            (1, 0)
        } else {
            (k - 1, k)
        };

        self.values[m]
            + ((self.values[k] - self.values[m]) / (self.times[k] - self.times[m]))
                * (rtime - self.times[m])
    }

    /// Collapses a series parameter to the arithmetic mean of its values.
    pub fn to_steady(&mut self) {
        if self.is_constant {
            return;
        }
        let mean = self.values.iter().sum::<f64>() / self.values.len() as f64;
        self.saved_times = std::mem::take(&mut self.times);
        self.saved_values = std::mem::take(&mut self.values);
        self.saved_cycle_period = self.cycle_period;
        self.value = mean;
        self.is_constant = true;
        self.steady_converted = true;
    }

    /// Restores a parameter collapsed by `to_steady`.
    pub fn to_unsteady(&mut self) {
        if !self.steady_converted {
            return;
        }
        self.times = std::mem::take(&mut self.saved_times);
        self.values = std::mem::take(&mut self.saved_values);
        self.cycle_period = self.saved_cycle_period;
        self.is_constant = false;
        self.steady_converted = false;
    }
}

/// Holds every parameter in registration order plus a parallel vector of
/// currently-evaluated values (the "parameter_values" cache read by blocks
/// between `update_time` calls).
#[derive(Debug, Default)]
pub struct ParameterStore {
    parameters: Vec<Parameter>,
    values: Vec<f64>,
    cardiac_cycle_period: Option<f64>,
    current_time: f64,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_constant(&mut self, value: f64) -> usize {
        let id = self.parameters.len();
        self.parameters.push(Parameter::constant(id, value));
        self.values.push(value);
        id
    }

    pub fn add_series(
        &mut self,
        times: Vec<f64>,
        values: Vec<f64>,
        periodic: bool,
    ) -> SolverResult<usize> {
        let id = self.parameters.len();
        let param = Parameter::series(id, times, values, periodic)?;
        if periodic {
            if let Some(pinned) = self.cardiac_cycle_period {
                if (param.cycle_period() - pinned).abs() > 1e-12 {
                    return Err(SolverError::ConfigInvalid(format!(
                        "parameter {id}: cycle period {} conflicts with pinned cardiac cycle period {}",
                        param.cycle_period(),
                        pinned
                    )));
                }
            } else {
                self.cardiac_cycle_period = Some(param.cycle_period());
            }
        }
        let initial = param.get(0.0);
        self.parameters.push(param);
        self.values.push(initial);
        Ok(id)
    }

    pub fn evaluate_at(&self, id: usize, t: f64) -> f64 {
        self.parameters[id].get(t)
    }

    pub fn get(&self, id: usize) -> &Parameter {
        &self.parameters[id]
    }

    pub fn get_mut(&mut self, id: usize) -> &mut Parameter {
        &mut self.parameters[id]
    }

    pub fn value(&self, id: usize) -> f64 {
        self.values[id]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn set_value(&mut self, id: usize, value: f64) {
        self.values[id] = value;
    }

    /// Re-evaluates every parameter's cached value at time `t`.
    pub fn refresh(&mut self, t: f64) {
        self.current_time = t;
        for (id, param) in self.parameters.iter().enumerate() {
            self.values[id] = param.get(t);
        }
    }

    /// The time of the last `refresh` call. Blocks whose time dependence
    /// is not expressible as a parameter (the cardiac-phase blocks) read
    /// this directly, mirroring the original source's `model->time`.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn cardiac_cycle_period(&self) -> Option<f64> {
        self.cardiac_cycle_period
    }

    pub fn set_cardiac_cycle_period(&mut self, period: f64) {
        self.cardiac_cycle_period = Some(period);
    }

    pub fn to_steady(&mut self) {
        for param in &mut self.parameters {
            param.to_steady();
        }
    }

    pub fn to_unsteady(&mut self) {
        for param in &mut self.parameters {
            param.to_unsteady();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn constant_parameter_returns_fixed_value() {
        let p = Parameter::constant(0, 42.0);
        assert_eq!(p.get(0.0), 42.0);
        assert_eq!(p.get(1000.0), 42.0);
    }

    #[test]
    fn series_parameter_interpolates_linearly() -> anyhow::Result<()> {
        let p = Parameter::series(0, vec![0.0, 1.0, 2.0], vec![0.0, 10.0, 0.0], false)?;
        assert_abs_diff_eq!(p.get(0.5), 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.get(1.5), 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.get(1.0), 10.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn periodic_parameter_wraps_evaluation() -> anyhow::Result<()> {
        let p = Parameter::series(0, vec![0.0, 0.5, 1.0], vec![0.0, 1.0, 0.0], true)?;
        for k in 0..5 {
            let t = 0.25 + k as f64 * 1.0;
            assert_abs_diff_eq!(p.get(t), p.get(0.25), epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn non_periodic_extrapolates_past_last_knot() -> anyhow::Result<()> {
        let p = Parameter::series(0, vec![0.0, 1.0], vec![0.0, 2.0], false)?;
        assert_abs_diff_eq!(p.get(2.0), 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.get(-1.0), -2.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn to_steady_then_to_unsteady_restores_series_bitwise() -> anyhow::Result<()> {
        let times = vec![0.0, 1.0, 2.0];
        let values = vec![1.0, 3.0, 5.0];
        let mut p = Parameter::series(0, times.clone(), values.clone(), false)?;
        p.to_steady();
        assert!(p.is_constant());
        assert_abs_diff_eq!(p.get(0.0), 3.0, epsilon = 1e-12);
        p.to_unsteady();
        assert!(!p.is_constant());
        assert_eq!(p.times, times);
        assert_eq!(p.values, values);
        Ok(())
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = Parameter::series(0, vec![0.0, 1.0], vec![0.0], false).unwrap_err();
        assert!(matches!(err, SolverError::ConfigInvalid(_)));
    }

    #[test]
    fn non_monotonic_times_are_rejected() {
        let err = Parameter::series(0, vec![0.0, 1.0, 0.5], vec![0.0, 1.0, 2.0], false).unwrap_err();
        assert!(matches!(err, SolverError::ConfigInvalid(_)));
    }

    #[test]
    fn conflicting_cardiac_cycle_period_is_rejected() {
        let mut store = ParameterStore::new();
        store
            .add_series(vec![0.0, 1.0], vec![0.0, 1.0], true)
            .unwrap();
        let err = store
            .add_series(vec![0.0, 2.0], vec![0.0, 1.0], true)
            .unwrap_err();
        assert!(matches!(err, SolverError::ConfigInvalid(_)));
    }
}
