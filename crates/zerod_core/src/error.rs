use thiserror::Error;

/// Error taxonomy for the 0D hemodynamic solver, covering every fatal
/// condition the model graph, sparse system, integrator, calibrator, and
/// coupling facade can report.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("invalid topology: {0}")]
    TopologyInvalid(String),

    #[error("sparse system is singular")]
    NumericSingular,

    #[error("Newton iteration failed to converge within {max_iter} iterations (residual norm {residual_norm:e})")]
    NonlinearDivergence { max_iter: usize, residual_norm: f64 },

    #[error("block does not support gradient evaluation: {0}")]
    UnsupportedGradient(String),

    #[error("NaN detected in state vector at step {step}, index {index}")]
    NaNDetected { step: usize, index: usize },

    #[error("parameter vector arity mismatch for block '{block}': expected {expected}, got {got}")]
    ArityMismatch {
        block: String,
        expected: usize,
        got: usize,
    },

    #[error("name not found: {0}")]
    NameUnknown(String),
}

pub type SolverResult<T> = Result<T, SolverError>;
