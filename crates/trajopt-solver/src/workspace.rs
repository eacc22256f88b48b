//! Per-solve mutable state: trajectories, constraint values, multipliers,
//! penalties, linearizations and gains.

use nalgebra::{DMatrix, DVector};

use crate::problem::Problem;

// ---------------------------------------------------------------------------
// Duals
// ---------------------------------------------------------------------------

/// Lagrange multipliers `λ` and penalty weights `μ` for every constraint row.
#[derive(Clone, Debug, PartialEq)]
pub struct Duals {
    pub lambda: Vec<DVector<f64>>,
    pub mu: Vec<DVector<f64>>,
    pub lambda_terminal: DVector<f64>,
    pub mu_terminal: DVector<f64>,
}

impl Duals {
    /// Zero multipliers and uniform penalties.
    pub fn new(horizon: usize, stage_rows: usize, terminal_rows: usize, penalty: f64) -> Self {
        Self {
            lambda: vec![DVector::zeros(stage_rows); horizon],
            mu: vec![DVector::from_element(stage_rows, penalty); horizon],
            lambda_terminal: DVector::zeros(terminal_rows),
            mu_terminal: DVector::from_element(terminal_rows, penalty),
        }
    }

    pub fn horizon(&self) -> usize {
        self.lambda.len()
    }

    /// Whether these duals fit a problem with the given shape.
    pub fn matches(&self, horizon: usize, stage_rows: usize, terminal_rows: usize) -> bool {
        self.horizon() == horizon
            && self.lambda.iter().all(|l| l.len() == stage_rows)
            && self.lambda_terminal.len() == terminal_rows
    }

    /// Keep the first `rows` stage rows, dropping trailing ones.
    pub(crate) fn truncate_stage_rows(&self, rows: usize) -> Self {
        Self {
            lambda: self.lambda.iter().map(|l| l.rows(0, rows).into_owned()).collect(),
            mu: self.mu.iter().map(|m| m.rows(0, rows).into_owned()).collect(),
            lambda_terminal: self.lambda_terminal.clone(),
            mu_terminal: self.mu_terminal.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Iterate
// ---------------------------------------------------------------------------

/// A trajectory together with the constraint values evaluated along it.
#[derive(Clone, Debug)]
pub(crate) struct Iterate {
    pub states: Vec<DVector<f64>>,
    pub controls: Vec<DVector<f64>>,
    pub c: Vec<DVector<f64>>,
    pub c_terminal: DVector<f64>,
    /// Diagonal of `Iμ`: the penalty where a row is active, zero otherwise.
    pub active: Vec<DVector<f64>>,
    pub active_terminal: DVector<f64>,
    /// Augmented-Lagrangian cost.
    pub cost: f64,
}

fn active_penalty(c: f64, lambda: f64, mu: f64, inequality: bool) -> f64 {
    if inequality && c <= 0.0 && lambda <= 0.0 {
        0.0
    } else {
        mu
    }
}

impl Iterate {
    pub fn new(problem: &Problem, states: Vec<DVector<f64>>, controls: Vec<DVector<f64>>) -> Self {
        let horizon = controls.len();
        Self {
            states,
            controls,
            c: vec![DVector::zeros(problem.stage_rows()); horizon],
            c_terminal: DVector::zeros(problem.terminal_rows()),
            active: vec![DVector::zeros(problem.stage_rows()); horizon],
            active_terminal: DVector::zeros(problem.terminal_rows()),
            cost: f64::INFINITY,
        }
    }

    pub fn final_state(&self) -> &DVector<f64> {
        &self.states[self.states.len() - 1]
    }

    /// Evaluate constraints, refresh the active set and return the
    /// augmented-Lagrangian cost (also stored in `self.cost`).
    pub fn evaluate(&mut self, problem: &Problem, duals: &Duals) -> f64 {
        let mut cost = 0.0;
        for k in 0..self.controls.len() {
            let (x, u) = (&self.states[k], &self.controls[k]);
            cost += problem.stage_cost(x, u);
            if problem.stage_rows() == 0 {
                continue;
            }
            problem.stage_constraints(&mut self.c[k], x, u);
            let (c, lambda, mu) = (&self.c[k], &duals.lambda[k], &duals.mu[k]);
            for i in 0..c.len() {
                self.active[k][i] = active_penalty(c[i], lambda[i], mu[i], problem.is_stage_inequality(i));
            }
            cost += lambda.dot(c) + 0.5 * c.dot(&self.active[k].component_mul(c));
        }

        let x_n = &self.states[self.states.len() - 1];
        cost += problem.terminal_cost(x_n);
        if problem.terminal_rows() > 0 {
            problem.terminal_constraints(&mut self.c_terminal, x_n);
            let (c, lambda, mu) = (&self.c_terminal, &duals.lambda_terminal, &duals.mu_terminal);
            for i in 0..c.len() {
                self.active_terminal[i] =
                    active_penalty(c[i], lambda[i], mu[i], problem.is_terminal_inequality(i));
            }
            cost += lambda.dot(c) + 0.5 * c.dot(&self.active_terminal.component_mul(c));
        }

        self.cost = cost;
        cost
    }

    /// Objective cost without multiplier and penalty terms.
    pub fn plain_cost(&self, problem: &Problem) -> f64 {
        let stage: f64 = self
            .states
            .iter()
            .zip(&self.controls)
            .map(|(x, u)| problem.stage_cost(x, u))
            .sum();
        stage + problem.terminal_cost(self.final_state())
    }
}

// ---------------------------------------------------------------------------
// Linearization and gains
// ---------------------------------------------------------------------------

/// Dynamics and constraint Jacobians along the nominal trajectory.
#[derive(Clone, Debug)]
pub(crate) struct Linearization {
    pub a: Vec<DMatrix<f64>>,
    pub b: Vec<DMatrix<f64>>,
    pub cx: Vec<DMatrix<f64>>,
    pub cu: Vec<DMatrix<f64>>,
    pub cx_terminal: DMatrix<f64>,
}

impl Linearization {
    fn new(problem: &Problem, horizon: usize) -> Self {
        let (n, m) = (problem.state_dim(), problem.control_dim());
        let p = problem.stage_rows();
        Self {
            a: vec![DMatrix::zeros(n, n); horizon],
            b: vec![DMatrix::zeros(n, m); horizon],
            cx: vec![DMatrix::zeros(p, n); horizon],
            cu: vec![DMatrix::zeros(p, m); horizon],
            cx_terminal: DMatrix::zeros(problem.terminal_rows(), n),
        }
    }

    pub fn update(&mut self, problem: &Problem, iterate: &Iterate) {
        for k in 0..iterate.controls.len() {
            let (x, u) = (&iterate.states[k], &iterate.controls[k]);
            let (a, b) = problem.jacobians(x, u);
            self.a[k] = a;
            self.b[k] = b;
            if problem.stage_rows() > 0 {
                problem.stage_constraint_jacobians(&mut self.cx[k], &mut self.cu[k], x, u);
            }
        }
        if problem.terminal_rows() > 0 {
            problem.terminal_constraint_jacobian(&mut self.cx_terminal, iterate.final_state());
        }
    }
}

/// Feedback gains `K`, feedforward terms `d` and the expected-change terms.
#[derive(Clone, Debug)]
pub(crate) struct Gains {
    pub k: Vec<DMatrix<f64>>,
    pub d: Vec<DVector<f64>>,
    /// `(Σ dᵀQu, Σ ½ dᵀQuu d)`.
    pub dv: [f64; 2],
}

impl Gains {
    fn new(n: usize, m: usize, horizon: usize) -> Self {
        Self {
            k: vec![DMatrix::zeros(m, n); horizon],
            d: vec![DVector::zeros(m); horizon],
            dv: [0.0; 2],
        }
    }

    /// Expected cost reduction for step size `alpha`.
    pub fn expected_reduction(&self, alpha: f64) -> f64 {
        -alpha * (self.dv[0] + alpha * self.dv[1])
    }

    /// `max_k max_i |d_ki| / (|u_ki| + 1)`.
    pub fn feedforward_gradient(&self, controls: &[DVector<f64>]) -> f64 {
        self.d
            .iter()
            .zip(controls)
            .flat_map(|(d, u)| d.iter().zip(u.iter()).map(|(di, ui)| di.abs() / (ui.abs() + 1.0)))
            .fold(0.0, f64::max)
    }
}

// ---------------------------------------------------------------------------
// ConstrainedResults
// ---------------------------------------------------------------------------

/// Everything one solve mutates. Owned by the solve call stack.
pub(crate) struct ConstrainedResults {
    pub nominal: Iterate,
    pub trial: Iterate,
    pub duals: Duals,
    pub lin: Linearization,
    pub gains: Gains,
}

impl ConstrainedResults {
    /// Workspace around a trajectory that is already consistent with the dynamics.
    pub fn new(
        problem: &Problem,
        states: Vec<DVector<f64>>,
        controls: Vec<DVector<f64>>,
        duals: Duals,
    ) -> Self {
        let horizon = controls.len();
        let mut nominal = Iterate::new(problem, states, controls);
        nominal.evaluate(problem, &duals);
        let trial = nominal.clone();
        Self {
            nominal,
            trial,
            duals,
            lin: Linearization::new(problem, horizon),
            gains: Gains::new(problem.state_dim(), problem.control_dim(), horizon),
        }
    }

    pub fn horizon(&self) -> usize {
        self.nominal.controls.len()
    }

    /// Re-evaluate the nominal cost and active set after a dual update.
    pub fn refresh(&mut self, problem: &Problem) {
        self.nominal.evaluate(problem, &self.duals);
    }

    pub fn linearize(&mut self, problem: &Problem) {
        self.lin.update(problem, &self.nominal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn inactive_inequality_has_zero_penalty() {
        assert_relative_eq!(active_penalty(-1.0, 0.0, 5.0, true), 0.0);
        assert_relative_eq!(active_penalty(0.0, 0.0, 5.0, true), 0.0);
        assert_relative_eq!(active_penalty(0.1, 0.0, 5.0, true), 5.0);
        assert_relative_eq!(active_penalty(-1.0, 0.2, 5.0, true), 5.0);
        assert_relative_eq!(active_penalty(-1.0, 0.0, 5.0, false), 5.0);
    }

    #[test]
    fn duals_shape_checks() {
        let duals = Duals::new(4, 3, 2, 1.0);
        assert!(duals.matches(4, 3, 2));
        assert!(!duals.matches(5, 3, 2));
        assert!(!duals.matches(4, 2, 2));

        let trimmed = duals.truncate_stage_rows(1);
        assert!(trimmed.matches(4, 1, 2));
        assert_relative_eq!(trimmed.mu[0][0], 1.0);
    }

    #[test]
    fn expected_reduction_and_gradient() {
        let mut gains = Gains::new(2, 1, 2);
        gains.dv = [-2.0, 1.0];
        assert_relative_eq!(gains.expected_reduction(1.0), 1.0);
        assert_relative_eq!(gains.expected_reduction(0.5), 0.75);

        gains.d[0][0] = 0.5;
        gains.d[1][0] = -3.0;
        let controls = vec![DVector::from_element(1, 0.0), DVector::from_element(1, 2.0)];
        assert_relative_eq!(gains.feedforward_gradient(&controls), 1.0);
    }
}
