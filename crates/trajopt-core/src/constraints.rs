//! Stage and terminal constraint sets.
//!
//! Every constraint is written in the form `c(x, u) ≤ 0` (inequality) or
//! `c(x, u) = 0` (equality). Rows are laid out with inequalities first, so a
//! row index `i` is an inequality iff `i < pI`:
//!
//! ```text
//! stage:    [ u - u_max | u_min - u | x - x_max | x_min - x | cI(x,u) | cE(x,u) ]
//! terminal: [ x - x_max | x_min - x | cI_N(x) | cE_N(x) | x - xf (goal) ]
//! ```
//!
//! Infinite bound entries produce no row. Row counts are fixed by
//! [`ConstraintSetBuilder::build`] and never change afterwards.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dynamics::FD_STEP;
use crate::error::ObjectiveError;

type InPlaceFn = Box<dyn Fn(&mut DVector<f64>, &DVector<f64>, &DVector<f64>) + Send + Sync>;
type AllocatingFn = Box<dyn Fn(&DVector<f64>, &DVector<f64>) -> DVector<f64> + Send + Sync>;
type JacobianFn =
    Box<dyn Fn(&DVector<f64>, &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) + Send + Sync>;

// ---------------------------------------------------------------------------
// Bound
// ---------------------------------------------------------------------------

/// A box bound given either as a scalar (broadcast) or per-component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Bound {
    /// Expand to a vector of length `dim`.
    pub fn broadcast(&self, name: &'static str, dim: usize) -> Result<DVector<f64>, ObjectiveError> {
        let v = match self {
            Self::Scalar(s) => DVector::from_element(dim, *s),
            Self::Vector(v) if v.len() == dim => DVector::from_column_slice(v),
            Self::Vector(v) => {
                return Err(ObjectiveError::VectorLength {
                    name,
                    expected: dim,
                    got: v.len(),
                });
            }
        };
        if let Some(index) = v.iter().position(|b| b.is_nan()) {
            return Err(ObjectiveError::NanBound { name, index });
        }
        Ok(v)
    }
}

impl From<f64> for Bound {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<f64>> for Bound {
    fn from(value: Vec<f64>) -> Self {
        Self::Vector(value)
    }
}

impl From<&[f64]> for Bound {
    fn from(value: &[f64]) -> Self {
        Self::Vector(value.to_vec())
    }
}

impl From<DVector<f64>> for Bound {
    fn from(value: DVector<f64>) -> Self {
        Self::Vector(value.as_slice().to_vec())
    }
}

// ---------------------------------------------------------------------------
// Custom constraint functions
// ---------------------------------------------------------------------------

enum Eval {
    InPlace(usize, InPlaceFn),
    Allocating(AllocatingFn),
}

/// A user-supplied stage constraint `c(x, u)`.
pub struct StageFn {
    eval: Eval,
    jacobian: Option<JacobianFn>,
}

impl StageFn {
    /// Constraint that writes `dim` values into a pre-allocated buffer.
    pub fn in_place<F>(dim: usize, f: F) -> Self
    where
        F: Fn(&mut DVector<f64>, &DVector<f64>, &DVector<f64>) + Send + Sync + 'static,
    {
        Self {
            eval: Eval::InPlace(dim, Box::new(f)),
            jacobian: None,
        }
    }

    /// Constraint returning a freshly allocated vector.
    ///
    /// The output length is probed once when the constraint set is built and
    /// the function is wrapped into the in-place form. The wrapper allocates
    /// on every call.
    pub fn allocating<F>(f: F) -> Self
    where
        F: Fn(&DVector<f64>, &DVector<f64>) -> DVector<f64> + Send + Sync + 'static,
    {
        Self {
            eval: Eval::Allocating(Box::new(f)),
            jacobian: None,
        }
    }

    /// Analytic Jacobians `(∂c/∂x, ∂c/∂u)`; finite differences otherwise.
    #[must_use]
    pub fn with_jacobian<J>(mut self, jac: J) -> Self
    where
        J: Fn(&DVector<f64>, &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) + Send + Sync + 'static,
    {
        self.jacobian = Some(Box::new(jac));
        self
    }

    fn resolve(self, name: &'static str, n: usize, m: usize) -> Result<ResolvedFn, ObjectiveError> {
        let (dim, eval): (usize, InPlaceFn) = match self.eval {
            Eval::InPlace(dim, f) => (dim, f),
            Eval::Allocating(f) => {
                let dim = f(&DVector::zeros(n), &DVector::zeros(m)).len();
                warn!(
                    constraint = name,
                    dim, "allocating constraint function wrapped into in-place form"
                );
                (
                    dim,
                    Box::new(
                        move |out: &mut DVector<f64>, x: &DVector<f64>, u: &DVector<f64>| {
                            out.copy_from(&f(x, u));
                        },
                    ),
                )
            }
        };
        if let Some(jac) = &self.jacobian {
            let (cx, cu) = jac(&DVector::zeros(n), &DVector::zeros(m));
            if cx.shape() != (dim, n) || cu.shape() != (dim, m) {
                return Err(ObjectiveError::ConstraintDimension {
                    name,
                    expected: dim,
                    got: cx.nrows(),
                });
            }
        }
        Ok(ResolvedFn {
            dim,
            eval,
            jacobian: self.jacobian,
        })
    }
}

impl std::fmt::Debug for StageFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let form = match self.eval {
            Eval::InPlace(dim, _) => format!("in-place({dim})"),
            Eval::Allocating(_) => "allocating".to_string(),
        };
        f.debug_struct("StageFn")
            .field("form", &form)
            .field("analytic_jacobian", &self.jacobian.is_some())
            .finish()
    }
}

/// A user-supplied terminal constraint `c_N(x)`.
///
/// Terminal custom constraints take the final state only.
#[derive(Debug)]
pub struct TerminalFn(StageFn);

impl TerminalFn {
    /// Terminal constraint writing `dim` values in place.
    pub fn in_place<F>(dim: usize, f: F) -> Self
    where
        F: Fn(&mut DVector<f64>, &DVector<f64>) + Send + Sync + 'static,
    {
        Self(StageFn::in_place(dim, move |out, x, _u| f(out, x)))
    }

    /// Terminal constraint returning a freshly allocated vector.
    pub fn allocating<F>(f: F) -> Self
    where
        F: Fn(&DVector<f64>) -> DVector<f64> + Send + Sync + 'static,
    {
        Self(StageFn::allocating(move |x, _u| f(x)))
    }

    /// Analytic Jacobian `∂c/∂x`.
    #[must_use]
    pub fn with_jacobian<J>(self, jac: J) -> Self
    where
        J: Fn(&DVector<f64>) -> DMatrix<f64> + Send + Sync + 'static,
    {
        Self(self.0.with_jacobian(move |x, _u| {
            let cx = jac(x);
            let rows = cx.nrows();
            (cx, DMatrix::zeros(rows, 0))
        }))
    }
}

/// A custom constraint after its dimension has been fixed.
struct ResolvedFn {
    dim: usize,
    eval: InPlaceFn,
    jacobian: Option<JacobianFn>,
}

impl ResolvedFn {
    fn evaluate(&self, out: &mut DVector<f64>, x: &DVector<f64>, u: &DVector<f64>) {
        (self.eval)(out, x, u);
    }

    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        if let Some(jac) = &self.jacobian {
            return jac(x, u);
        }
        let mut cx = DMatrix::zeros(self.dim, x.len());
        let mut cu = DMatrix::zeros(self.dim, u.len());
        let mut plus = DVector::zeros(self.dim);
        let mut minus = DVector::zeros(self.dim);

        let mut xp = x.clone();
        for j in 0..x.len() {
            let h = FD_STEP * x[j].abs().max(1.0);
            xp[j] = x[j] + h;
            self.evaluate(&mut plus, &xp, u);
            xp[j] = x[j] - h;
            self.evaluate(&mut minus, &xp, u);
            xp[j] = x[j];
            cx.set_column(j, &((&plus - &minus) / (2.0 * h)));
        }
        let mut up = u.clone();
        for j in 0..u.len() {
            let h = FD_STEP * u[j].abs().max(1.0);
            up[j] = u[j] + h;
            self.evaluate(&mut plus, x, &up);
            up[j] = u[j] - h;
            self.evaluate(&mut minus, x, &up);
            up[j] = u[j];
            cu.set_column(j, &((&plus - &minus) / (2.0 * h)));
        }
        (cx, cu)
    }
}

// ---------------------------------------------------------------------------
// ConstraintCounts
// ---------------------------------------------------------------------------

/// Row counts of a constraint set, fixed at construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConstraintCounts {
    /// Total stage constraints (`p`).
    pub stage: usize,
    /// Stage inequalities (`pI`).
    pub stage_inequality: usize,
    /// Total terminal constraints (`p_N`).
    pub terminal: usize,
    /// Terminal inequalities (`pI_N`).
    pub terminal_inequality: usize,
}

// ---------------------------------------------------------------------------
// ConstraintSet
// ---------------------------------------------------------------------------

/// Box bounds plus custom stage and terminal constraints.
pub struct ConstraintSet {
    n: usize,
    m: usize,
    u_min: DVector<f64>,
    u_max: DVector<f64>,
    x_min: DVector<f64>,
    x_max: DVector<f64>,
    u_max_rows: Vec<usize>,
    u_min_rows: Vec<usize>,
    x_max_rows: Vec<usize>,
    x_min_rows: Vec<usize>,
    inequality: Option<ResolvedFn>,
    equality: Option<ResolvedFn>,
    terminal_inequality: Option<ResolvedFn>,
    terminal_equality: Option<ResolvedFn>,
    terminal_goal: bool,
    counts: ConstraintCounts,
}

impl std::fmt::Debug for ConstraintSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintSet")
            .field("n", &self.n)
            .field("m", &self.m)
            .field("u_min", &self.u_min.as_slice())
            .field("u_max", &self.u_max.as_slice())
            .field("x_min", &self.x_min.as_slice())
            .field("x_max", &self.x_max.as_slice())
            .field("terminal_goal", &self.terminal_goal)
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

fn finite_rows(bound: &DVector<f64>) -> Vec<usize> {
    bound
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_finite())
        .map(|(i, _)| i)
        .collect()
}

fn check_box(name: &'static str, min: &DVector<f64>, max: &DVector<f64>) -> Result<(), ObjectiveError> {
    for (index, (lo, hi)) in min.iter().zip(max.iter()).enumerate() {
        if hi <= lo {
            return Err(ObjectiveError::EmptyBox {
                name,
                index,
                min: *lo,
                max: *hi,
            });
        }
    }
    Ok(())
}

impl ConstraintSet {
    /// Start building a constraint set for state dimension `n`, control `m`.
    pub fn builder(n: usize, m: usize) -> ConstraintSetBuilder {
        ConstraintSetBuilder::new(n, m)
    }

    pub const fn state_dim(&self) -> usize {
        self.n
    }

    pub const fn control_dim(&self) -> usize {
        self.m
    }

    pub const fn counts(&self) -> ConstraintCounts {
        self.counts
    }

    pub const fn has_terminal_goal(&self) -> bool {
        self.terminal_goal
    }

    /// `(u_min, u_max)`; infinite entries are unconstrained.
    pub const fn control_bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.u_min, &self.u_max)
    }

    /// `(x_min, x_max)`; infinite entries are unconstrained.
    pub const fn state_bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.x_min, &self.x_max)
    }

    /// Whether stage row `row` is an inequality.
    pub const fn is_stage_inequality(&self, row: usize) -> bool {
        row < self.counts.stage_inequality
    }

    /// Whether terminal row `row` is an inequality.
    pub const fn is_terminal_inequality(&self, row: usize) -> bool {
        row < self.counts.terminal_inequality
    }

    fn box_rows(&self) -> usize {
        self.u_max_rows.len() + self.u_min_rows.len() + self.x_max_rows.len() + self.x_min_rows.len()
    }

    /// Evaluate the stage constraints into `out` (length `p`).
    pub fn evaluate_stage(&self, out: &mut DVector<f64>, x: &DVector<f64>, u: &DVector<f64>) {
        let mut row = 0;
        for &i in &self.u_max_rows {
            out[row] = u[i] - self.u_max[i];
            row += 1;
        }
        for &i in &self.u_min_rows {
            out[row] = self.u_min[i] - u[i];
            row += 1;
        }
        row = self.evaluate_state_bounds(out, x, row);
        for custom in [&self.inequality, &self.equality].into_iter().flatten() {
            let mut values = DVector::zeros(custom.dim);
            custom.evaluate(&mut values, x, u);
            out.rows_mut(row, custom.dim).copy_from(&values);
            row += custom.dim;
        }
        debug_assert_eq!(row, self.counts.stage);
    }

    fn evaluate_state_bounds(&self, out: &mut DVector<f64>, x: &DVector<f64>, mut row: usize) -> usize {
        for &i in &self.x_max_rows {
            out[row] = x[i] - self.x_max[i];
            row += 1;
        }
        for &i in &self.x_min_rows {
            out[row] = self.x_min[i] - x[i];
            row += 1;
        }
        row
    }

    /// Stage constraint Jacobians into `cx` (`p × n`) and `cu` (`p × m`).
    pub fn stage_jacobians(
        &self,
        cx: &mut DMatrix<f64>,
        cu: &mut DMatrix<f64>,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) {
        cx.fill(0.0);
        cu.fill(0.0);
        let mut row = 0;
        for &i in &self.u_max_rows {
            cu[(row, i)] = 1.0;
            row += 1;
        }
        for &i in &self.u_min_rows {
            cu[(row, i)] = -1.0;
            row += 1;
        }
        row = self.state_bound_jacobian(cx, row);
        for custom in [&self.inequality, &self.equality].into_iter().flatten() {
            let (jx, ju) = custom.jacobians(x, u);
            cx.view_mut((row, 0), (custom.dim, self.n)).copy_from(&jx);
            cu.view_mut((row, 0), (custom.dim, self.m)).copy_from(&ju);
            row += custom.dim;
        }
    }

    fn state_bound_jacobian(&self, cx: &mut DMatrix<f64>, mut row: usize) -> usize {
        for &i in &self.x_max_rows {
            cx[(row, i)] = 1.0;
            row += 1;
        }
        for &i in &self.x_min_rows {
            cx[(row, i)] = -1.0;
            row += 1;
        }
        row
    }

    /// Evaluate the terminal constraints into `out` (length `p_N`).
    pub fn evaluate_terminal(&self, out: &mut DVector<f64>, x: &DVector<f64>, xf: &DVector<f64>) {
        let mut row = self.evaluate_state_bounds(out, x, 0);
        let no_control = DVector::zeros(0);
        for custom in [&self.terminal_inequality, &self.terminal_equality]
            .into_iter()
            .flatten()
        {
            let mut values = DVector::zeros(custom.dim);
            custom.evaluate(&mut values, x, &no_control);
            out.rows_mut(row, custom.dim).copy_from(&values);
            row += custom.dim;
        }
        if self.terminal_goal {
            out.rows_mut(row, self.n).copy_from(&(x - xf));
            row += self.n;
        }
        debug_assert_eq!(row, self.counts.terminal);
    }

    /// Terminal constraint Jacobian into `cx` (`p_N × n`).
    pub fn terminal_jacobian(&self, cx: &mut DMatrix<f64>, x: &DVector<f64>) {
        cx.fill(0.0);
        let mut row = self.state_bound_jacobian(cx, 0);
        let no_control = DVector::zeros(0);
        for custom in [&self.terminal_inequality, &self.terminal_equality]
            .into_iter()
            .flatten()
        {
            let (jx, _) = custom.jacobians(x, &no_control);
            cx.view_mut((row, 0), (custom.dim, self.n)).copy_from(&jx);
            row += custom.dim;
        }
        if self.terminal_goal {
            cx.view_mut((row, 0), (self.n, self.n))
                .copy_from(&DMatrix::identity(self.n, self.n));
        }
    }

    /// Largest violation of a single state/control pair against the box bounds.
    pub fn box_violation(&self, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        let over = |v: &DVector<f64>, lo: &DVector<f64>, hi: &DVector<f64>| {
            v.iter()
                .zip(lo.iter().zip(hi.iter()))
                .map(|(vi, (l, h))| (vi - h).max(l - vi).max(0.0))
                .fold(0.0, f64::max)
        };
        over(u, &self.u_min, &self.u_max).max(over(x, &self.x_min, &self.x_max))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`ConstraintSet`]. Bounds default to `±∞`.
#[derive(Debug)]
pub struct ConstraintSetBuilder {
    n: usize,
    m: usize,
    u_min: Bound,
    u_max: Bound,
    x_min: Bound,
    x_max: Bound,
    inequality: Option<StageFn>,
    equality: Option<StageFn>,
    terminal_inequality: Option<TerminalFn>,
    terminal_equality: Option<TerminalFn>,
    terminal_goal: bool,
}

impl ConstraintSetBuilder {
    fn new(n: usize, m: usize) -> Self {
        Self {
            n,
            m,
            u_min: Bound::Scalar(f64::NEG_INFINITY),
            u_max: Bound::Scalar(f64::INFINITY),
            x_min: Bound::Scalar(f64::NEG_INFINITY),
            x_max: Bound::Scalar(f64::INFINITY),
            inequality: None,
            equality: None,
            terminal_inequality: None,
            terminal_equality: None,
            terminal_goal: false,
        }
    }

    #[must_use]
    pub fn control_bounds(mut self, min: impl Into<Bound>, max: impl Into<Bound>) -> Self {
        self.u_min = min.into();
        self.u_max = max.into();
        self
    }

    #[must_use]
    pub fn state_bounds(mut self, min: impl Into<Bound>, max: impl Into<Bound>) -> Self {
        self.x_min = min.into();
        self.x_max = max.into();
        self
    }

    /// Custom stage inequality `cI(x, u) ≤ 0`.
    #[must_use]
    pub fn inequality(mut self, f: StageFn) -> Self {
        self.inequality = Some(f);
        self
    }

    /// Custom stage equality `cE(x, u) = 0`.
    #[must_use]
    pub fn equality(mut self, f: StageFn) -> Self {
        self.equality = Some(f);
        self
    }

    /// Custom terminal inequality `cI_N(x) ≤ 0`.
    #[must_use]
    pub fn terminal_inequality(mut self, f: TerminalFn) -> Self {
        self.terminal_inequality = Some(f);
        self
    }

    /// Custom terminal equality `cE_N(x) = 0`.
    #[must_use]
    pub fn terminal_equality(mut self, f: TerminalFn) -> Self {
        self.terminal_equality = Some(f);
        self
    }

    /// Require the final state to reach the goal `xf`.
    #[must_use]
    pub const fn terminal_goal(mut self, enabled: bool) -> Self {
        self.terminal_goal = enabled;
        self
    }

    /// Validate bounds, probe custom functions and fix the row counts.
    pub fn build(self) -> Result<ConstraintSet, ObjectiveError> {
        let (n, m) = (self.n, self.m);
        let u_min = self.u_min.broadcast("u_min", m)?;
        let u_max = self.u_max.broadcast("u_max", m)?;
        let x_min = self.x_min.broadcast("x_min", n)?;
        let x_max = self.x_max.broadcast("x_max", n)?;
        check_box("u", &u_min, &u_max)?;
        check_box("x", &x_min, &x_max)?;

        let inequality = self.inequality.map(|f| f.resolve("cI", n, m)).transpose()?;
        let equality = self.equality.map(|f| f.resolve("cE", n, m)).transpose()?;
        let terminal_inequality = self
            .terminal_inequality
            .map(|f| f.0.resolve("cI_N", n, 0))
            .transpose()?;
        let terminal_equality = self
            .terminal_equality
            .map(|f| f.0.resolve("cE_N", n, 0))
            .transpose()?;

        let mut set = ConstraintSet {
            n,
            m,
            u_max_rows: finite_rows(&u_max),
            u_min_rows: finite_rows(&u_min),
            x_max_rows: finite_rows(&x_max),
            x_min_rows: finite_rows(&x_min),
            u_min,
            u_max,
            x_min,
            x_max,
            inequality,
            equality,
            terminal_inequality,
            terminal_equality,
            terminal_goal: self.terminal_goal,
            counts: ConstraintCounts::default(),
        };

        let dim = |f: &Option<ResolvedFn>| f.as_ref().map_or(0, |f| f.dim);
        let state_rows = set.x_max_rows.len() + set.x_min_rows.len();
        let stage_inequality = set.box_rows() + dim(&set.inequality);
        let terminal_inequality = state_rows + dim(&set.terminal_inequality);
        set.counts = ConstraintCounts {
            stage: stage_inequality + dim(&set.equality),
            stage_inequality,
            terminal: terminal_inequality
                + dim(&set.terminal_equality)
                + if set.terminal_goal { n } else { 0 },
            terminal_inequality,
        };
        Ok(set)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scalar_bounds_broadcast() {
        let set = ConstraintSet::builder(2, 1)
            .control_bounds(-3.0, 3.0)
            .state_bounds(-10.0, 10.0)
            .build()
            .unwrap();
        let (x_min, x_max) = set.state_bounds();
        assert_eq!(x_min.as_slice(), &[-10.0, -10.0]);
        assert_eq!(x_max.as_slice(), &[10.0, 10.0]);
        assert_eq!(set.counts().stage, 6);
        assert_eq!(set.counts().stage_inequality, 6);
        assert_eq!(set.counts().terminal, 4);
    }

    #[test]
    fn infinite_bounds_generate_no_rows() {
        let set = ConstraintSet::builder(2, 2)
            .control_bounds(vec![-1.0, f64::NEG_INFINITY], vec![1.0, f64::INFINITY])
            .build()
            .unwrap();
        assert_eq!(set.counts().stage, 2);
        assert_eq!(set.counts().terminal, 0);
    }

    #[test]
    fn empty_box_rejected() {
        let err = ConstraintSet::builder(1, 1)
            .control_bounds(2.0, 2.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ObjectiveError::EmptyBox { name: "u", index: 0, .. }));

        let err = ConstraintSet::builder(2, 1)
            .state_bounds(vec![0.0, 1.0], vec![1.0, 0.5])
            .build()
            .unwrap_err();
        assert!(matches!(err, ObjectiveError::EmptyBox { name: "x", index: 1, .. }));
    }

    #[test]
    fn mismatched_bound_length_rejected() {
        let err = ConstraintSet::builder(2, 1)
            .state_bounds(vec![-1.0, -1.0, -1.0], 1.0)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ObjectiveError::VectorLength {
                name: "x_min",
                expected: 2,
                got: 3
            }
        );
    }

    #[test]
    fn nan_bound_rejected() {
        let err = ConstraintSet::builder(1, 1)
            .control_bounds(f64::NAN, 1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ObjectiveError::NanBound { name: "u_min", .. }));
    }

    #[test]
    fn stage_layout_puts_inequalities_first() {
        let set = ConstraintSet::builder(2, 1)
            .control_bounds(-3.0, 3.0)
            .inequality(StageFn::in_place(1, |out, x, _u| out[0] = x[0] * x[0] - 4.0))
            .equality(StageFn::in_place(1, |out, x, u| out[0] = x[1] + u[0]))
            .build()
            .unwrap();
        let counts = set.counts();
        assert_eq!(counts.stage, 4);
        assert_eq!(counts.stage_inequality, 3);
        assert!(set.is_stage_inequality(2));
        assert!(!set.is_stage_inequality(3));

        let x = DVector::from_vec(vec![1.0, 2.0]);
        let u = DVector::from_vec(vec![0.5]);
        let mut c = DVector::zeros(counts.stage);
        set.evaluate_stage(&mut c, &x, &u);
        assert_eq!(c.as_slice(), &[0.5 - 3.0, -3.0 - 0.5, 1.0 - 4.0, 2.5]);
    }

    #[test]
    fn stage_jacobians_match_layout() {
        let set = ConstraintSet::builder(2, 1)
            .control_bounds(-3.0, 3.0)
            .state_bounds(vec![f64::NEG_INFINITY, -1.0], f64::INFINITY)
            .inequality(StageFn::in_place(1, |out, x, u| out[0] = x[0] * u[0]))
            .build()
            .unwrap();
        let p = set.counts().stage;
        let mut cx = DMatrix::zeros(p, 2);
        let mut cu = DMatrix::zeros(p, 1);
        let x = DVector::from_vec(vec![2.0, 0.0]);
        let u = DVector::from_vec(vec![-1.5]);
        set.stage_jacobians(&mut cx, &mut cu, &x, &u);

        assert_relative_eq!(cu[(0, 0)], 1.0);
        assert_relative_eq!(cu[(1, 0)], -1.0);
        assert_relative_eq!(cx[(2, 1)], -1.0);
        assert_relative_eq!(cx[(3, 0)], -1.5, epsilon = 1e-6);
        assert_relative_eq!(cu[(3, 0)], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn allocating_constraint_probed_at_build() {
        let set = ConstraintSet::builder(2, 1)
            .equality(StageFn::allocating(|x, u| DVector::from_vec(vec![x[0] - u[0], x[1]])))
            .build()
            .unwrap();
        assert_eq!(set.counts().stage, 2);
        assert_eq!(set.counts().stage_inequality, 0);
    }

    #[test]
    fn analytic_jacobian_shape_checked() {
        let err = ConstraintSet::builder(2, 1)
            .inequality(
                StageFn::in_place(1, |out, x, _u| out[0] = x[0])
                    .with_jacobian(|_x, _u| (DMatrix::zeros(2, 2), DMatrix::zeros(2, 1))),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ObjectiveError::ConstraintDimension { name: "cI", .. }));
    }

    #[test]
    fn terminal_goal_and_custom_rows() {
        let set = ConstraintSet::builder(2, 1)
            .state_bounds(-10.0, 10.0)
            .terminal_inequality(TerminalFn::in_place(1, |out, x| out[0] = x[1] - 0.1))
            .terminal_goal(true)
            .build()
            .unwrap();
        let counts = set.counts();
        assert_eq!(counts.terminal, 4 + 1 + 2);
        assert_eq!(counts.terminal_inequality, 5);

        let x = DVector::from_vec(vec![3.0, 0.0]);
        let xf = DVector::from_vec(vec![std::f64::consts::PI, 0.0]);
        let mut c = DVector::zeros(counts.terminal);
        set.evaluate_terminal(&mut c, &x, &xf);
        assert_relative_eq!(c[4], -0.1);
        assert_relative_eq!(c[5], 3.0 - std::f64::consts::PI);

        let mut cx = DMatrix::zeros(counts.terminal, 2);
        set.terminal_jacobian(&mut cx, &x);
        assert_relative_eq!(cx[(4, 1)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(cx[(5, 0)], 1.0);
        assert_relative_eq!(cx[(6, 1)], 1.0);
    }

    #[test]
    fn box_violation_reports_worst_entry() {
        let set = ConstraintSet::builder(1, 1)
            .control_bounds(-1.0, 1.0)
            .state_bounds(0.0, 2.0)
            .build()
            .unwrap();
        let x = DVector::from_element(1, -0.25);
        let u = DVector::from_element(1, 1.1);
        assert_relative_eq!(set.box_violation(&x, &u), 0.25);
    }

    #[test]
    fn bound_deserializes_from_scalar_or_list() {
        #[derive(Deserialize)]
        struct Wrapper {
            a: Bound,
            b: Bound,
        }
        let w: Wrapper = toml::from_str("a = 3.0\nb = [1.0, -inf]").unwrap();
        assert_eq!(w.a, Bound::Scalar(3.0));
        assert_eq!(w.b, Bound::Vector(vec![1.0, f64::NEG_INFINITY]));
    }
}
