//! The problem as the solver sees it.
//!
//! A [`Problem`] bundles the dynamics, the (possibly slack-augmented) cost
//! and the constraint set behind one interface. With `slack = n` the control
//! vector is `[u; w]`, the dynamics become `x' = f(x, u) + w` and `n`
//! equality rows `w = 0` are appended to every stage constraint block.

use std::borrow::Cow;

use nalgebra::{DMatrix, DVector};

use trajopt_core::constraints::ConstraintSet;
use trajopt_core::dynamics::Dynamics;
use trajopt_core::objective::{Objective, QuadraticCost, StageExpansion};

pub(crate) struct Problem<'a> {
    model: &'a dyn Dynamics,
    cost: QuadraticCost,
    constraints: Option<&'a ConstraintSet>,
    slack: usize,
    dt: f64,
    stage_rows: usize,
    stage_inequality: usize,
    terminal_rows: usize,
    terminal_inequality: usize,
}

impl<'a> Problem<'a> {
    pub fn new(model: &'a dyn Dynamics, objective: &'a Objective, dt: f64) -> Self {
        let constraints = objective.constraints();
        let counts = constraints.map(ConstraintSet::counts).unwrap_or_default();
        Self {
            model,
            cost: objective.cost().clone(),
            constraints,
            slack: 0,
            dt,
            stage_rows: counts.stage,
            stage_inequality: counts.stage_inequality,
            terminal_rows: counts.terminal,
            terminal_inequality: counts.terminal_inequality,
        }
    }

    /// The same problem with `n` slack controls weighted by `weight`.
    pub fn with_slack(model: &'a dyn Dynamics, objective: &'a Objective, dt: f64, weight: f64) -> Self {
        let mut problem = Self::new(model, objective, dt);
        let n = problem.state_dim();
        problem.cost = problem.cost.with_extra_controls(n, weight);
        problem.slack = n;
        problem.stage_rows += n;
        problem
    }

    pub fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    /// Control dimension including slack.
    pub fn control_dim(&self) -> usize {
        self.model.control_dim() + self.slack
    }

    /// Control dimension of the underlying model.
    pub fn model_control_dim(&self) -> usize {
        self.model.control_dim()
    }

    pub const fn slack_dim(&self) -> usize {
        self.slack
    }

    pub const fn cost(&self) -> &QuadraticCost {
        &self.cost
    }

    pub const fn stage_rows(&self) -> usize {
        self.stage_rows
    }

    pub const fn terminal_rows(&self) -> usize {
        self.terminal_rows
    }

    pub const fn is_constrained(&self) -> bool {
        self.stage_rows + self.terminal_rows > 0
    }

    pub const fn is_stage_inequality(&self, row: usize) -> bool {
        row < self.stage_inequality
    }

    pub const fn is_terminal_inequality(&self, row: usize) -> bool {
        row < self.terminal_inequality
    }

    /// The model part of a (possibly augmented) control.
    pub fn model_control<'u>(&self, u: &'u DVector<f64>) -> Cow<'u, DVector<f64>> {
        if self.slack == 0 {
            Cow::Borrowed(u)
        } else {
            Cow::Owned(u.rows(0, self.model_control_dim()).into_owned())
        }
    }

    // ------------------------------------------------------------------
    // Dynamics
    // ------------------------------------------------------------------

    pub fn step_into(&self, out: &mut DVector<f64>, x: &DVector<f64>, u: &DVector<f64>) {
        self.model.step_into(out, x, &self.model_control(u), self.dt);
        if self.slack > 0 {
            *out += u.rows(self.model_control_dim(), self.slack);
        }
    }

    /// `(A, B)`; with slack `B̄ = [B I]`.
    pub fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let (a, b) = self.model.jacobians(x, &self.model_control(u), self.dt);
        if self.slack == 0 {
            return (a, b);
        }
        let n = self.state_dim();
        let m = self.model_control_dim();
        let mut b_aug = DMatrix::zeros(n, m + self.slack);
        b_aug.columns_mut(0, m).copy_from(&b);
        b_aug.columns_mut(m, self.slack).fill_with_identity();
        (a, b_aug)
    }

    // ------------------------------------------------------------------
    // Cost
    // ------------------------------------------------------------------

    pub fn stage_cost(&self, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        self.cost.stage_cost(x, u, self.dt)
    }

    pub fn terminal_cost(&self, x: &DVector<f64>) -> f64 {
        self.cost.terminal_cost(x)
    }

    pub fn stage_expansion(&self, x: &DVector<f64>, u: &DVector<f64>) -> StageExpansion {
        self.cost.stage_expansion(x, u, self.dt)
    }

    pub fn terminal_expansion(&self, x: &DVector<f64>) -> (DVector<f64>, DMatrix<f64>) {
        self.cost.terminal_expansion(x)
    }

    // ------------------------------------------------------------------
    // Constraints
    // ------------------------------------------------------------------

    fn base_stage_rows(&self) -> usize {
        self.stage_rows - self.slack
    }

    pub fn stage_constraints(&self, out: &mut DVector<f64>, x: &DVector<f64>, u: &DVector<f64>) {
        let Some(set) = self.constraints else {
            if self.slack > 0 {
                out.copy_from(&u.rows(self.model_control_dim(), self.slack));
            }
            return;
        };
        if self.slack == 0 {
            set.evaluate_stage(out, x, u);
            return;
        }
        let p = self.base_stage_rows();
        let mut base = DVector::zeros(p);
        set.evaluate_stage(&mut base, x, &self.model_control(u));
        out.rows_mut(0, p).copy_from(&base);
        out.rows_mut(p, self.slack)
            .copy_from(&u.rows(self.model_control_dim(), self.slack));
    }

    pub fn stage_constraint_jacobians(
        &self,
        cx: &mut DMatrix<f64>,
        cu: &mut DMatrix<f64>,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) {
        if self.slack == 0 {
            if let Some(set) = self.constraints {
                set.stage_jacobians(cx, cu, x, u);
            }
            return;
        }
        cx.fill(0.0);
        cu.fill(0.0);
        let p = self.base_stage_rows();
        let m = self.model_control_dim();
        if let Some(set) = self.constraints {
            let mut base_cx = DMatrix::zeros(p, self.state_dim());
            let mut base_cu = DMatrix::zeros(p, m);
            set.stage_jacobians(&mut base_cx, &mut base_cu, x, &self.model_control(u));
            cx.rows_mut(0, p).copy_from(&base_cx);
            cu.view_mut((0, 0), (p, m)).copy_from(&base_cu);
        }
        cu.view_mut((p, m), (self.slack, self.slack))
            .fill_with_identity();
    }

    pub fn terminal_constraints(&self, out: &mut DVector<f64>, x: &DVector<f64>) {
        if let Some(set) = self.constraints {
            set.evaluate_terminal(out, x, self.cost.xf());
        }
    }

    pub fn terminal_constraint_jacobian(&self, cx: &mut DMatrix<f64>, x: &DVector<f64>) {
        if let Some(set) = self.constraints {
            set.terminal_jacobian(cx, x);
        }
    }
}
