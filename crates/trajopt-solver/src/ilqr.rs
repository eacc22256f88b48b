//! The iLQR inner loop.

use tracing::debug;

use trajopt_core::config::SolverConfig;

use crate::backward::backward_pass;
use crate::forward::{LineSearch, line_search};
use crate::problem::Problem;
use crate::workspace::ConstrainedResults;

/// Why an inner solve stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InnerStatus {
    /// Cost change of an accepted step fell below the tolerance.
    CostConverged,
    /// Normalized feedforward term fell below `gradient_tolerance`.
    GradientConverged,
    /// `iterations` exhausted.
    MaxIterations,
    /// Regularization exceeded `bp_reg_max`.
    RegularizationLimit,
}

impl InnerStatus {
    pub const fn is_converged(self) -> bool {
        matches!(self, Self::CostConverged | Self::GradientConverged)
    }
}

/// Summary of one inner solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct InnerReport {
    pub status: InnerStatus,
    pub iterations: usize,
    /// Cost change of the last accepted step (`∞` if none was accepted).
    pub dj: f64,
    pub regularization: f64,
}

/// Absolute or relative cost-change test.
pub(crate) fn cost_converged(dj: f64, cost: f64, tolerance: f64) -> bool {
    dj.abs() < tolerance || dj.abs() < tolerance * cost.abs()
}

/// Scalar backward-pass regularization `ρ`.
#[derive(Clone, Copy, Debug)]
struct Regularization {
    rho: f64,
    factor: f64,
    min: f64,
    max: f64,
}

impl Regularization {
    const fn new(config: &SolverConfig) -> Self {
        Self {
            rho: config.bp_reg_initial,
            factor: config.bp_reg_increase_factor,
            min: config.bp_reg_min,
            max: config.bp_reg_max,
        }
    }

    /// Grow `ρ`; `false` once it exceeds the limit.
    fn increase(&mut self) -> bool {
        self.rho = (self.rho * self.factor).max(self.min);
        self.rho <= self.max
    }

    fn decrease(&mut self) {
        self.rho /= self.factor;
        if self.rho < self.min {
            self.rho = 0.0;
        }
    }
}

/// Run iLQR on the penalized objective until the inner convergence test
/// passes or the budget runs out. The nominal trajectory in `ws` is the
/// best one found either way.
pub(crate) fn solve_inner(
    problem: &Problem,
    ws: &mut ConstrainedResults,
    config: &SolverConfig,
    tolerance: f64,
) -> InnerReport {
    let mut reg = Regularization::new(config);
    let mut dj = f64::INFINITY;
    let report = |status, iterations, dj, reg: &Regularization| InnerReport {
        status,
        iterations,
        dj,
        regularization: reg.rho,
    };

    ws.linearize(problem);
    for iteration in 1..=config.iterations {
        while let Err(failure) = backward_pass(problem, &ws.nominal, &ws.duals, &ws.lin, reg.rho, &mut ws.gains) {
            debug!(stage = failure.stage, rho = reg.rho, "Quu not positive definite, increasing regularization");
            if !reg.increase() {
                return report(InnerStatus::RegularizationLimit, iteration, dj, &reg);
            }
        }

        let gradient = ws.gains.feedforward_gradient(&ws.nominal.controls);
        if gradient < config.gradient_tolerance {
            debug!(iteration, gradient, cost = ws.nominal.cost, "feedforward gradient converged");
            return report(InnerStatus::GradientConverged, iteration, dj, &reg);
        }

        match line_search(problem, ws, config) {
            LineSearch::Accepted { alpha, dj: step, z } => {
                dj = step;
                reg.decrease();
                debug!(iteration, cost = ws.nominal.cost, dj, z, alpha, rho = reg.rho, "accepted step");
                if cost_converged(dj, ws.nominal.cost, tolerance) {
                    return report(InnerStatus::CostConverged, iteration, dj, &reg);
                }
                ws.linearize(problem);
            }
            LineSearch::Failed => {
                debug!(iteration, rho = reg.rho, "line search failed, increasing regularization");
                if !reg.increase() {
                    return report(InnerStatus::RegularizationLimit, iteration, dj, &reg);
                }
            }
        }
    }
    report(InnerStatus::MaxIterations, config.iterations, dj, &reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use trajopt_core::objective::Objective;
    use trajopt_test_utils::models::{double_integrator, pendulum};
    use trajopt_test_utils::problems::{double_integrator_objective, pendulum_cost};

    use crate::rollout::simulate;
    use crate::workspace::Duals;

    #[test]
    fn regularization_schedule() {
        let config = SolverConfig {
            bp_reg_min: 1e-6,
            bp_reg_max: 2e-3,
            bp_reg_increase_factor: 10.0,
            ..SolverConfig::default()
        };
        let mut reg = Regularization::new(&config);
        assert_relative_eq!(reg.rho, 0.0);
        assert!(reg.increase());
        assert_relative_eq!(reg.rho, 1e-6);
        assert!(reg.increase());
        assert!(reg.increase());
        assert!(reg.increase());
        assert_relative_eq!(reg.rho, 1e-3, max_relative = 1e-12);
        assert!(!reg.increase());

        reg.rho = 1e-5;
        reg.decrease();
        assert_relative_eq!(reg.rho, 1e-6, max_relative = 1e-12);
        reg.decrease();
        assert_relative_eq!(reg.rho, 0.0);
    }

    #[test]
    fn cost_convergence_is_absolute_or_relative() {
        assert!(cost_converged(1e-5, 1.0, 1e-4));
        assert!(cost_converged(1e-3, 100.0, 1e-4));
        assert!(!cost_converged(1e-3, 1.0, 1e-4));
    }

    #[test]
    fn linear_quadratic_converges_after_one_step() {
        let model = double_integrator();
        let objective = double_integrator_objective(false);
        let problem = Problem::new(&model, &objective, 0.1);
        let controls = vec![DVector::zeros(1); 20];
        let states = simulate(&problem, objective.cost().x0(), &controls, 1e8).unwrap();
        let mut ws = ConstrainedResults::new(&problem, states, controls, Duals::new(20, 0, 0, 1.0));
        let config = SolverConfig::default();

        let report = solve_inner(&problem, &mut ws, &config, config.cost_tolerance);
        assert_eq!(report.status, InnerStatus::GradientConverged);
        assert_eq!(report.iterations, 2);
        assert!(report.dj > 0.0);
    }

    #[test]
    fn pendulum_cost_decreases() {
        let model = pendulum();
        let objective: Objective = pendulum_cost(5.0).into();
        let problem = Problem::new(&model, &objective, 0.1);
        let controls = vec![DVector::zeros(1); 50];
        let states = simulate(&problem, objective.cost().x0(), &controls, 1e8).unwrap();
        let mut ws = ConstrainedResults::new(&problem, states, controls, Duals::new(50, 0, 0, 1.0));
        let initial = ws.nominal.cost;
        let config = SolverConfig::default();

        let report = solve_inner(&problem, &mut ws, &config, config.cost_tolerance);
        assert_ne!(report.status, InnerStatus::RegularizationLimit);
        assert!(ws.nominal.cost < 0.5 * initial);
        let goal = objective.cost().xf();
        assert!((ws.nominal.final_state() - goal).amax() < 0.5);
    }
}
