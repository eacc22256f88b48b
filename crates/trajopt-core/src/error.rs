use thiserror::Error;

/// Top-level error type for trajopt.
#[derive(Debug, Error)]
pub enum TrajoptError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Objective error: {0}")]
    Objective(#[from] ObjectiveError),

    #[error("Solve error: {0}")]
    Solve(#[from] SolveError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Expected {expected} entries for {field}, got {got}")]
    WrongLength {
        field: String,
        expected: usize,
        got: usize,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Dynamics model construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Model dimensions must be positive: n={n}, m={m}")]
    ZeroDimension { n: usize, m: usize },

    #[error("Dynamics output has {got} entries, expected state dimension {expected}")]
    OutputDimension { expected: usize, got: usize },

    #[error("Jacobian {name} has shape {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    JacobianShape {
        name: &'static str,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },
}

/// Objective and constraint construction errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObjectiveError {
    #[error("Control cost R must be positive definite")]
    ControlCostNotPositiveDefinite,

    #[error("{0} must be symmetric positive semidefinite")]
    NotPositiveSemidefinite(&'static str),

    #[error("{name} has shape {rows}x{cols}, expected {expected}x{expected}")]
    MatrixShape {
        name: &'static str,
        rows: usize,
        cols: usize,
        expected: usize,
    },

    #[error("{name} has length {got}, expected {expected}")]
    VectorLength {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Final time must be non-negative, got {0}")]
    NegativeFinalTime(f64),

    #[error("Constant cost must be non-negative, got {0}")]
    NegativeConstantCost(f64),

    #[error("Empty box for {name} at index {index}: max {max} <= min {min}")]
    EmptyBox {
        name: &'static str,
        index: usize,
        min: f64,
        max: f64,
    },

    #[error("Bound {name} contains NaN at index {index}")]
    NanBound { name: &'static str, index: usize },

    #[error("Constraint function {name} returned {got} values, declared {expected}")]
    ConstraintDimension {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Objective and constraint set disagree on dimensions: {0}")]
    DimensionMismatch(String),
}

/// Errors raised by the solve entry points before or during the first rollout.
///
/// Non-convergence is never an error; it is reported through the solve status.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("Control sequence is empty")]
    EmptyHorizon,

    #[error("Horizon mismatch: {controls} controls at dt={dt} span {span}, final time is {tf}")]
    HorizonMismatch {
        controls: usize,
        dt: f64,
        span: f64,
        tf: f64,
    },

    #[error("Invalid time step: {0} (must be > 0)")]
    InvalidTimeStep(f64),

    #[error("{what} dimension mismatch at index {index}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("State trajectory guess has {got} states, expected {expected}")]
    StateCount { expected: usize, got: usize },

    #[error("Initial guess contains non-finite values at knot point {0}")]
    NonFiniteGuess(usize),

    #[error("Rollout diverged at knot point {stage}")]
    Diverged { stage: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trajopt_error_from_config_error() {
        let err = ConfigError::invalid("mu_al_update", "must be > 1");
        let top: TrajoptError = err.into();
        assert!(matches!(top, TrajoptError::Config(_)));
        assert!(top.to_string().contains("mu_al_update"));
    }

    #[test]
    fn trajopt_error_from_model_error() {
        let err = ModelError::OutputDimension {
            expected: 2,
            got: 3,
        };
        let top: TrajoptError = err.into();
        assert!(matches!(top, TrajoptError::Model(_)));
        assert!(top.to_string().contains("expected state dimension 2"));
    }

    #[test]
    fn trajopt_error_from_objective_error() {
        let top: TrajoptError = ObjectiveError::NegativeFinalTime(-1.0).into();
        assert!(matches!(top, TrajoptError::Objective(_)));
        assert!(top.to_string().contains("-1"));
    }

    #[test]
    fn trajopt_error_from_solve_error() {
        let top: TrajoptError = SolveError::Diverged { stage: 7 }.into();
        assert!(matches!(top, TrajoptError::Solve(_)));
    }

    #[test]
    fn config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::Io(_)));
    }

    #[test]
    fn objective_error_display_messages() {
        assert_eq!(
            ObjectiveError::ControlCostNotPositiveDefinite.to_string(),
            "Control cost R must be positive definite"
        );
        assert_eq!(
            ObjectiveError::EmptyBox {
                name: "u",
                index: 0,
                min: 1.0,
                max: 1.0
            }
            .to_string(),
            "Empty box for u at index 0: max 1 <= min 1"
        );
        assert_eq!(
            ObjectiveError::NegativeConstantCost(-0.5).to_string(),
            "Constant cost must be non-negative, got -0.5"
        );
    }

    #[test]
    fn solve_error_display_messages() {
        assert_eq!(
            SolveError::Diverged { stage: 3 }.to_string(),
            "Rollout diverged at knot point 3"
        );
        assert_eq!(
            SolveError::StateCount {
                expected: 51,
                got: 50
            }
            .to_string(),
            "State trajectory guess has 50 states, expected 51"
        );
    }
}
