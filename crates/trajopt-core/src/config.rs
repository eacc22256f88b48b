use std::path::Path;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::constraints::{Bound, ConstraintSet};
use crate::error::{ConfigError, ObjectiveError};
use crate::objective::{ConstrainedObjective, FinalTime, Objective, QuadraticCost};

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_iterations() -> usize {
    300
}
const fn default_iterations_outerloop() -> usize {
    50
}
const fn default_iterations_linesearch() -> usize {
    20
}
const fn default_eps() -> f64 {
    1e-4
}
const fn default_eps_constraint() -> f64 {
    1e-3
}
const fn default_cost_tolerance() -> f64 {
    1e-4
}
const fn default_cost_tolerance_intermediate() -> f64 {
    1e-3
}
const fn default_gradient_tolerance() -> f64 {
    1e-5
}
const fn default_mu_al_update() -> f64 {
    10.0
}
const fn default_penalty_initial() -> f64 {
    1.0
}
const fn default_penalty_max() -> f64 {
    1e8
}
const fn default_dual_max() -> f64 {
    1e8
}
const fn default_constraint_decrease_ratio() -> f64 {
    0.25
}
const fn default_infeasible_regularization() -> f64 {
    1.0
}
const fn default_c1() -> f64 {
    1e-8
}
const fn default_c2() -> f64 {
    10.0
}
const fn default_bp_reg_increase_factor() -> f64 {
    1.6
}
const fn default_bp_reg_min() -> f64 {
    1e-6
}
const fn default_bp_reg_max() -> f64 {
    1e8
}
const fn default_max_value() -> f64 {
    1e8
}
const fn default_true() -> bool {
    true
}
const fn default_lower() -> Bound {
    Bound::Scalar(f64::NEG_INFINITY)
}
const fn default_upper() -> Bound {
    Bound::Scalar(f64::INFINITY)
}

// ---------------------------------------------------------------------------
// SolverConfig
// ---------------------------------------------------------------------------

/// Solver options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum iLQR iterations per inner solve.
    #[serde(default = "default_iterations")]
    pub iterations: usize,

    /// Maximum Augmented-Lagrangian outer iterations.
    #[serde(default = "default_iterations_outerloop")]
    pub iterations_outerloop: usize,

    /// Maximum step halvings in the forward-pass line search.
    #[serde(default = "default_iterations_linesearch")]
    pub iterations_linesearch: usize,

    /// Outer-loop success threshold on the last inner cost change.
    #[serde(default = "default_eps")]
    pub eps: f64,

    /// Maximum constraint violation accepted as converged.
    #[serde(default = "default_eps_constraint")]
    pub eps_constraint: f64,

    /// Inner cost-change tolerance once constraints are satisfied.
    #[serde(default = "default_cost_tolerance")]
    pub cost_tolerance: f64,

    /// Inner cost-change tolerance while constraints are still violated.
    #[serde(default = "default_cost_tolerance_intermediate")]
    pub cost_tolerance_intermediate: f64,

    /// Inner convergence threshold on the normalized feedforward term.
    #[serde(default = "default_gradient_tolerance")]
    pub gradient_tolerance: f64,

    /// Penalty scaling factor applied when violation does not shrink enough.
    #[serde(default = "default_mu_al_update")]
    pub mu_al_update: f64,

    /// Initial penalty weight for every constraint.
    #[serde(default = "default_penalty_initial")]
    pub penalty_initial: f64,

    /// Upper bound on penalty weights.
    #[serde(default = "default_penalty_max")]
    pub penalty_max: f64,

    /// Upper bound on multiplier magnitude.
    #[serde(default = "default_dual_max")]
    pub dual_max: f64,

    /// Penalties grow unless `c_max <= ratio * previous c_max`.
    #[serde(default = "default_constraint_decrease_ratio")]
    pub constraint_decrease_ratio: f64,

    /// Quadratic weight on infeasible-start slack controls.
    #[serde(default = "default_infeasible_regularization")]
    pub infeasible_regularization: f64,

    /// Lower bound of the accepted actual/expected cost-reduction ratio.
    #[serde(default = "default_c1")]
    pub c1: f64,

    /// Upper bound of the accepted actual/expected cost-reduction ratio.
    #[serde(default = "default_c2")]
    pub c2: f64,

    /// Backward-pass regularization at the start of each inner solve.
    #[serde(default)]
    pub bp_reg_initial: f64,

    /// Regularization growth factor.
    #[serde(default = "default_bp_reg_increase_factor")]
    pub bp_reg_increase_factor: f64,

    /// Smallest nonzero regularization.
    #[serde(default = "default_bp_reg_min")]
    pub bp_reg_min: f64,

    /// Regularization above which the inner solve gives up.
    #[serde(default = "default_bp_reg_max")]
    pub bp_reg_max: f64,

    /// States larger than this in magnitude count as divergence.
    #[serde(default = "default_max_value")]
    pub max_state_value: f64,

    /// Controls larger than this in magnitude count as divergence.
    #[serde(default = "default_max_value")]
    pub max_control_value: f64,

    /// Log every outer iteration at info level.
    #[serde(default)]
    pub verbose: bool,

    /// Keep every outer-iteration snapshot; otherwise only the latest.
    #[serde(default = "default_true")]
    pub cache: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            iterations_outerloop: default_iterations_outerloop(),
            iterations_linesearch: default_iterations_linesearch(),
            eps: default_eps(),
            eps_constraint: default_eps_constraint(),
            cost_tolerance: default_cost_tolerance(),
            cost_tolerance_intermediate: default_cost_tolerance_intermediate(),
            gradient_tolerance: default_gradient_tolerance(),
            mu_al_update: default_mu_al_update(),
            penalty_initial: default_penalty_initial(),
            penalty_max: default_penalty_max(),
            dual_max: default_dual_max(),
            constraint_decrease_ratio: default_constraint_decrease_ratio(),
            infeasible_regularization: default_infeasible_regularization(),
            c1: default_c1(),
            c2: default_c2(),
            bp_reg_initial: 0.0,
            bp_reg_increase_factor: default_bp_reg_increase_factor(),
            bp_reg_min: default_bp_reg_min(),
            bp_reg_max: default_bp_reg_max(),
            max_state_value: default_max_value(),
            max_control_value: default_max_value(),
            verbose: false,
            cache: true,
        }
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} (must be finite and > 0)")))
    }
}

impl SolverConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, count) in [
            ("iterations", self.iterations),
            ("iterations_outerloop", self.iterations_outerloop),
            ("iterations_linesearch", self.iterations_linesearch),
        ] {
            if count == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1"));
            }
        }
        for (field, value) in [
            ("eps", self.eps),
            ("eps_constraint", self.eps_constraint),
            ("cost_tolerance", self.cost_tolerance),
            ("cost_tolerance_intermediate", self.cost_tolerance_intermediate),
            ("gradient_tolerance", self.gradient_tolerance),
            ("penalty_initial", self.penalty_initial),
            ("penalty_max", self.penalty_max),
            ("dual_max", self.dual_max),
            ("infeasible_regularization", self.infeasible_regularization),
            ("bp_reg_min", self.bp_reg_min),
            ("bp_reg_max", self.bp_reg_max),
            ("max_state_value", self.max_state_value),
            ("max_control_value", self.max_control_value),
        ] {
            positive(field, value)?;
        }
        if self.mu_al_update <= 1.0 {
            return Err(ConfigError::invalid("mu_al_update", "must be > 1"));
        }
        if self.bp_reg_increase_factor <= 1.0 {
            return Err(ConfigError::invalid("bp_reg_increase_factor", "must be > 1"));
        }
        if self.penalty_max < self.penalty_initial {
            return Err(ConfigError::invalid("penalty_max", "must be >= penalty_initial"));
        }
        if !(self.constraint_decrease_ratio > 0.0 && self.constraint_decrease_ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "constraint_decrease_ratio",
                "must lie in (0, 1]",
            ));
        }
        if self.c1 < 0.0 || self.c2 <= self.c1 {
            return Err(ConfigError::invalid("c2", "line search needs 0 <= c1 < c2"));
        }
        if self.bp_reg_initial < 0.0 || self.bp_reg_initial > self.bp_reg_max {
            return Err(ConfigError::invalid(
                "bp_reg_initial",
                "must lie in [0, bp_reg_max]",
            ));
        }
        Ok(())
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// ProblemConfig
// ---------------------------------------------------------------------------

/// A trajectory-optimization problem described in TOML.
///
/// ```toml
/// Q = 1e-3
/// R = 1e-2
/// Qf = 100.0
/// tf = 5.0
/// dt = 0.1
/// x0 = [0.0, 0.0]
/// xf = [3.141592653589793, 0.0]
/// u_min = -3.0
/// u_max = 3.0
/// use_terminal_constraint = true
///
/// [solver]
/// iterations_outerloop = 30
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemConfig {
    /// Stage state weight, scalar or diagonal.
    #[serde(rename = "Q")]
    pub q: Bound,

    /// Control weight, scalar or diagonal.
    #[serde(rename = "R")]
    pub r: Bound,

    /// Terminal state weight, scalar or diagonal.
    #[serde(rename = "Qf")]
    pub qf: Bound,

    /// Constant cost per unit time.
    #[serde(default)]
    pub c: f64,

    /// Final time in seconds, or `"min"`.
    pub tf: FinalTime,

    /// Sample interval in seconds.
    pub dt: f64,

    pub x0: Vec<f64>,
    pub xf: Vec<f64>,

    /// Number of control inputs.
    #[serde(default = "default_control_dim")]
    pub control_dim: usize,

    #[serde(default = "default_lower")]
    pub u_min: Bound,
    #[serde(default = "default_upper")]
    pub u_max: Bound,
    #[serde(default = "default_lower")]
    pub x_min: Bound,
    #[serde(default = "default_upper")]
    pub x_max: Bound,

    /// Enforce `x_N = xf` as an equality constraint.
    #[serde(default)]
    pub use_terminal_constraint: bool,

    #[serde(default)]
    pub solver: SolverConfig,
}

const fn default_control_dim() -> usize {
    1
}

fn diagonal(bound: &Bound, name: &'static str, dim: usize) -> Result<DMatrix<f64>, ObjectiveError> {
    Ok(DMatrix::from_diagonal(&bound.broadcast(name, dim)?))
}

impl ProblemConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("dt", self.dt)?;
        if self.xf.len() != self.x0.len() {
            return Err(ConfigError::WrongLength {
                field: "xf".into(),
                expected: self.x0.len(),
                got: self.xf.len(),
            });
        }
        if self.control_dim == 0 {
            return Err(ConfigError::invalid("control_dim", "must be at least 1"));
        }
        if matches!(self.tf, FinalTime::Minimum) {
            return Err(ConfigError::invalid(
                "tf",
                "minimum-time problems need an explicit horizon; use the library API",
            ));
        }
        self.solver.validate()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn state_dim(&self) -> usize {
        self.x0.len()
    }

    /// Number of control intervals implied by `tf / dt`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn horizon(&self) -> usize {
        (self.tf.seconds() / self.dt).round() as usize
    }

    pub fn cost(&self) -> Result<QuadraticCost, ObjectiveError> {
        let n = self.state_dim();
        let m = self.control_dim;
        QuadraticCost::new(
            diagonal(&self.q, "Q", n)?,
            diagonal(&self.r, "R", m)?,
            diagonal(&self.qf, "Qf", n)?,
            self.c,
            self.tf,
            DVector::from_column_slice(&self.x0),
            DVector::from_column_slice(&self.xf),
        )
    }

    /// Whether any bound or the terminal goal constrains the problem.
    pub fn is_constrained(&self) -> bool {
        let finite = |b: &Bound| match b {
            Bound::Scalar(s) => s.is_finite(),
            Bound::Vector(v) => v.iter().any(|s| s.is_finite()),
        };
        self.use_terminal_constraint
            || [&self.u_min, &self.u_max, &self.x_min, &self.x_max]
                .into_iter()
                .any(finite)
    }

    pub fn constraints(&self) -> Result<ConstraintSet, ObjectiveError> {
        ConstraintSet::builder(self.state_dim(), self.control_dim)
            .control_bounds(self.u_min.clone(), self.u_max.clone())
            .state_bounds(self.x_min.clone(), self.x_max.clone())
            .terminal_goal(self.use_terminal_constraint)
            .build()
    }

    /// Build the objective; constrained only when some constraint is active.
    pub fn objective(&self) -> Result<Objective, ObjectiveError> {
        let cost = self.cost()?;
        if self.is_constrained() {
            Ok(ConstrainedObjective::new(cost, self.constraints()?)?.into())
        } else {
            Ok(cost.into())
        }
    }
}
