//! Quadratic trajectory cost and the constrained/unconstrained objective.
//!
//! Stage cost (scaled by the sample interval `dt`):
//!
//! ```text
//! ℓ(x, u) = dt · ( ½ (x − xf)ᵀ Q (x − xf) + ½ uᵀ R u + c )
//! ```
//!
//! Terminal cost: `ℓ_N(x) = ½ (x − xf)ᵀ Qf (x − xf)`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::constraints::ConstraintSet;
use crate::error::ObjectiveError;

/// Tolerance used for symmetry and semidefiniteness checks.
const PSD_TOLERANCE: f64 = 1e-10;

// ---------------------------------------------------------------------------
// FinalTime
// ---------------------------------------------------------------------------

/// Final time of the trajectory.
///
/// `Minimum` stores `tf = 0`; the time cost itself is supplied externally and
/// the horizon length is taken from the initial control sequence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FinalTimeRepr", into = "FinalTimeRepr")]
pub enum FinalTime {
    Fixed(f64),
    Minimum,
}

impl FinalTime {
    /// Final time in seconds (`0.0` for minimum time).
    pub const fn seconds(self) -> f64 {
        match self {
            Self::Fixed(tf) => tf,
            Self::Minimum => 0.0,
        }
    }
}

impl From<f64> for FinalTime {
    fn from(tf: f64) -> Self {
        Self::Fixed(tf)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum FinalTimeRepr {
    Seconds(f64),
    Keyword(String),
}

impl TryFrom<FinalTimeRepr> for FinalTime {
    type Error = String;

    fn try_from(repr: FinalTimeRepr) -> Result<Self, Self::Error> {
        match repr {
            FinalTimeRepr::Seconds(tf) => Ok(Self::Fixed(tf)),
            FinalTimeRepr::Keyword(k) if k == "min" || k == "minimum" => Ok(Self::Minimum),
            FinalTimeRepr::Keyword(k) => Err(format!("unknown final time `{k}`, expected a number or \"min\"")),
        }
    }
}

impl From<FinalTime> for FinalTimeRepr {
    fn from(tf: FinalTime) -> Self {
        match tf {
            FinalTime::Fixed(tf) => Self::Seconds(tf),
            FinalTime::Minimum => Self::Keyword("min".into()),
        }
    }
}

// ---------------------------------------------------------------------------
// QuadraticCost
// ---------------------------------------------------------------------------

/// Second-order expansion of a stage cost about `(x, u)`.
#[derive(Clone, Debug)]
pub struct StageExpansion {
    pub lx: DVector<f64>,
    pub lu: DVector<f64>,
    pub lxx: DMatrix<f64>,
    pub luu: DMatrix<f64>,
}

/// Quadratic tracking cost towards the goal state `xf`.
#[derive(Clone, Debug, PartialEq)]
pub struct QuadraticCost {
    q: DMatrix<f64>,
    r: DMatrix<f64>,
    qf: DMatrix<f64>,
    c: f64,
    tf: FinalTime,
    x0: DVector<f64>,
    xf: DVector<f64>,
}

fn check_square(name: &'static str, mat: &DMatrix<f64>, dim: usize) -> Result<(), ObjectiveError> {
    if mat.nrows() == dim && mat.ncols() == dim {
        Ok(())
    } else {
        Err(ObjectiveError::MatrixShape {
            name,
            rows: mat.nrows(),
            cols: mat.ncols(),
            expected: dim,
        })
    }
}

fn is_symmetric(mat: &DMatrix<f64>) -> bool {
    let scale = mat.amax().max(1.0);
    (mat - mat.transpose()).amax() <= PSD_TOLERANCE * scale
}

fn check_psd(name: &'static str, mat: &DMatrix<f64>) -> Result<(), ObjectiveError> {
    if !is_symmetric(mat) {
        return Err(ObjectiveError::NotPositiveSemidefinite(name));
    }
    let scale = mat.amax().max(1.0);
    if mat.symmetric_eigenvalues().min() < -PSD_TOLERANCE * scale {
        return Err(ObjectiveError::NotPositiveSemidefinite(name));
    }
    Ok(())
}

impl QuadraticCost {
    /// Build and validate a quadratic cost.
    ///
    /// `Q` and `Qf` must be symmetric positive semidefinite, `R` symmetric
    /// positive definite, `c ≥ 0` and `tf ≥ 0`.
    pub fn new(
        q: DMatrix<f64>,
        r: DMatrix<f64>,
        qf: DMatrix<f64>,
        c: f64,
        tf: impl Into<FinalTime>,
        x0: DVector<f64>,
        xf: DVector<f64>,
    ) -> Result<Self, ObjectiveError> {
        let tf = tf.into();
        let n = x0.len();
        let m = r.nrows();
        if xf.len() != n {
            return Err(ObjectiveError::VectorLength {
                name: "xf",
                expected: n,
                got: xf.len(),
            });
        }
        check_square("Q", &q, n)?;
        check_square("Qf", &qf, n)?;
        check_square("R", &r, m)?;
        check_psd("Q", &q)?;
        check_psd("Qf", &qf)?;
        if m == 0 || !is_symmetric(&r) || r.clone().cholesky().is_none() {
            return Err(ObjectiveError::ControlCostNotPositiveDefinite);
        }
        if tf.seconds() < 0.0 || tf.seconds().is_nan() {
            return Err(ObjectiveError::NegativeFinalTime(tf.seconds()));
        }
        if c < 0.0 || c.is_nan() {
            return Err(ObjectiveError::NegativeConstantCost(c));
        }
        Ok(Self {
            q,
            r,
            qf,
            c,
            tf,
            x0,
            xf,
        })
    }

    pub fn state_dim(&self) -> usize {
        self.x0.len()
    }

    pub fn control_dim(&self) -> usize {
        self.r.nrows()
    }

    pub const fn q(&self) -> &DMatrix<f64> {
        &self.q
    }

    pub const fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub const fn qf(&self) -> &DMatrix<f64> {
        &self.qf
    }

    pub const fn c(&self) -> f64 {
        self.c
    }

    pub const fn final_time(&self) -> FinalTime {
        self.tf
    }

    /// Final time in seconds; `0.0` signals minimum time.
    pub const fn tf(&self) -> f64 {
        self.tf.seconds()
    }

    pub const fn x0(&self) -> &DVector<f64> {
        &self.x0
    }

    pub const fn xf(&self) -> &DVector<f64> {
        &self.xf
    }

    /// Stage cost `ℓ(x, u)`.
    pub fn stage_cost(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64) -> f64 {
        let dx = x - &self.xf;
        dt * (0.5 * dx.dot(&(&self.q * &dx)) + 0.5 * u.dot(&(&self.r * u)) + self.c)
    }

    /// Terminal cost `ℓ_N(x)`.
    pub fn terminal_cost(&self, x: &DVector<f64>) -> f64 {
        let dx = x - &self.xf;
        0.5 * dx.dot(&(&self.qf * &dx))
    }

    /// Total cost of a trajectory with `states.len() == controls.len() + 1`.
    pub fn trajectory_cost(&self, states: &[DVector<f64>], controls: &[DVector<f64>], dt: f64) -> f64 {
        let stage: f64 = states
            .iter()
            .zip(controls)
            .map(|(x, u)| self.stage_cost(x, u, dt))
            .sum();
        stage + states.last().map_or(0.0, |x| self.terminal_cost(x))
    }

    /// Gradient and Hessian of the stage cost.
    pub fn stage_expansion(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64) -> StageExpansion {
        StageExpansion {
            lx: (&self.q * (x - &self.xf)) * dt,
            lu: (&self.r * u) * dt,
            lxx: &self.q * dt,
            luu: &self.r * dt,
        }
    }

    /// Gradient and Hessian of the terminal cost.
    pub fn terminal_expansion(&self, x: &DVector<f64>) -> (DVector<f64>, DMatrix<f64>) {
        (&self.qf * (x - &self.xf), self.qf.clone())
    }

    /// Cost with `extra` additional control channels weighted by `weight`.
    ///
    /// `R` becomes `blockdiag(R, weight·I)`.
    #[must_use]
    pub fn with_extra_controls(&self, extra: usize, weight: f64) -> Self {
        let m = self.control_dim();
        let mut r = DMatrix::zeros(m + extra, m + extra);
        r.view_mut((0, 0), (m, m)).copy_from(&self.r);
        for i in 0..extra {
            r[(m + i, m + i)] = weight;
        }
        Self { r, ..self.clone() }
    }
}

// ---------------------------------------------------------------------------
// Objective
// ---------------------------------------------------------------------------

/// Quadratic cost together with a constraint set.
#[derive(Debug)]
pub struct ConstrainedObjective {
    cost: QuadraticCost,
    constraints: ConstraintSet,
}

impl ConstrainedObjective {
    pub fn new(cost: QuadraticCost, constraints: ConstraintSet) -> Result<Self, ObjectiveError> {
        if cost.state_dim() != constraints.state_dim() || cost.control_dim() != constraints.control_dim() {
            return Err(ObjectiveError::DimensionMismatch(format!(
                "cost is n={}, m={} but constraints are n={}, m={}",
                cost.state_dim(),
                cost.control_dim(),
                constraints.state_dim(),
                constraints.control_dim()
            )));
        }
        Ok(Self { cost, constraints })
    }

    pub const fn cost(&self) -> &QuadraticCost {
        &self.cost
    }

    pub const fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }
}

/// The objective handed to the solver.
#[derive(Debug)]
pub enum Objective {
    Unconstrained(QuadraticCost),
    Constrained(ConstrainedObjective),
}

impl Objective {
    pub const fn cost(&self) -> &QuadraticCost {
        match self {
            Self::Unconstrained(cost) => cost,
            Self::Constrained(obj) => &obj.cost,
        }
    }

    pub const fn constraints(&self) -> Option<&ConstraintSet> {
        match self {
            Self::Unconstrained(_) => None,
            Self::Constrained(obj) => Some(&obj.constraints),
        }
    }

    pub const fn is_constrained(&self) -> bool {
        matches!(self, Self::Constrained(_))
    }
}

impl From<QuadraticCost> for Objective {
    fn from(cost: QuadraticCost) -> Self {
        Self::Unconstrained(cost)
    }
}

impl From<ConstrainedObjective> for Objective {
    fn from(obj: ConstrainedObjective) -> Self {
        Self::Constrained(obj)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
