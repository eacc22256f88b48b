//! Augmented-Lagrangian outer loop.
//!
//! Each outer iteration minimizes
//!
//! ```text
//! J + Σ_k ( λ_kᵀ c_k + ½ c_kᵀ Iμ_k c_k ) + λ_Nᵀ c_N + ½ c_Nᵀ Iμ_N c_N
//! ```
//!
//! with the iLQR inner loop, then updates the multipliers
//! `λ ← clamp(λ + μ c)` and, when the violation did not shrink enough,
//! the penalties `μ ← min(μ · mu_al_update, penalty_max)`.

use tracing::{debug, info};

use trajopt_core::config::SolverConfig;

use crate::ilqr::{InnerStatus, cost_converged, solve_inner};
use crate::problem::Problem;
use crate::results::{IterationKind, IterationSnapshot, ResultsLog, SolveStatus};
use crate::workspace::{ConstrainedResults, Duals, Iterate};

/// Summary of one outer-loop run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct OuterReport {
    pub status: SolveStatus,
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    pub c_max: f64,
}

fn row_violation(c: f64, lambda: f64, inequality: bool) -> f64 {
    if !inequality || lambda > 0.0 {
        c.abs()
    } else {
        c.max(0.0)
    }
}

/// Worst violation over every stage and terminal row.
///
/// Equalities count `|c|`; inequalities count `max(c, 0)`, or `|c|` while
/// their multiplier is positive.
pub(crate) fn max_violation(problem: &Problem, iterate: &Iterate, duals: &Duals) -> f64 {
    let mut worst: f64 = 0.0;
    for (c, lambda) in iterate.c.iter().zip(&duals.lambda) {
        for i in 0..c.len() {
            worst = worst.max(row_violation(c[i], lambda[i], problem.is_stage_inequality(i)));
        }
    }
    let (c, lambda) = (&iterate.c_terminal, &duals.lambda_terminal);
    for i in 0..c.len() {
        worst = worst.max(row_violation(c[i], lambda[i], problem.is_terminal_inequality(i)));
    }
    worst
}

/// `λ ← λ + μ c`, inequalities clamped to `[0, dual_max]`, equalities to `±dual_max`.
pub(crate) fn update_multipliers(problem: &Problem, iterate: &Iterate, duals: &mut Duals, dual_max: f64) {
    let clamp = |lambda: f64, inequality: bool| {
        if inequality {
            lambda.clamp(0.0, dual_max)
        } else {
            lambda.clamp(-dual_max, dual_max)
        }
    };
    for k in 0..iterate.c.len() {
        let (c, mu) = (&iterate.c[k], &duals.mu[k]);
        let lambda = &mut duals.lambda[k];
        for i in 0..c.len() {
            lambda[i] = clamp(lambda[i] + mu[i] * c[i], problem.is_stage_inequality(i));
        }
    }
    let (c, mu) = (&iterate.c_terminal, &duals.mu_terminal);
    let lambda = &mut duals.lambda_terminal;
    for i in 0..c.len() {
        lambda[i] = clamp(lambda[i] + mu[i] * c[i], problem.is_terminal_inequality(i));
    }
}

/// `μ ← min(μ · factor, penalty_max)` for every row.
pub(crate) fn update_penalties(duals: &mut Duals, factor: f64, penalty_max: f64) {
    for mu in duals.mu.iter_mut().chain(std::iter::once(&mut duals.mu_terminal)) {
        mu.apply(|m| *m = (*m * factor).min(penalty_max));
    }
}

fn snapshot(
    problem: &Problem,
    ws: &ConstrainedResults,
    kind: IterationKind,
    c_max: f64,
    inner_iterations: usize,
    inner_status: InnerStatus,
) -> IterationSnapshot {
    IterationSnapshot {
        kind,
        states: ws.nominal.states.clone(),
        controls: ws
            .nominal
            .controls
            .iter()
            .map(|u| problem.model_control(u).into_owned())
            .collect(),
        constraints: ws.nominal.c.clone(),
        terminal_constraints: ws.nominal.c_terminal.clone(),
        cost: ws.nominal.cost,
        c_max,
        inner_iterations,
        inner_status,
    }
}

/// Single inner solve for a problem without constraint rows.
pub(crate) fn solve_unconstrained(
    problem: &Problem,
    ws: &mut ConstrainedResults,
    config: &SolverConfig,
    log: &mut ResultsLog,
) -> OuterReport {
    let inner = solve_inner(problem, ws, config, config.cost_tolerance);
    log.push(snapshot(problem, ws, IterationKind::Unconstrained, 0.0, inner.iterations, inner.status));
    let status = if inner.status.is_converged() {
        SolveStatus::Converged
    } else {
        SolveStatus::InnerNotConverged(inner.status)
    };
    OuterReport {
        status,
        outer_iterations: 1,
        inner_iterations: inner.iterations,
        c_max: 0.0,
    }
}

/// Run the outer loop on `ws` until the constraints and cost settle or the
/// outer budget runs out. Snapshots are tagged with `kind`.
pub(crate) fn solve_constrained(
    problem: &Problem,
    ws: &mut ConstrainedResults,
    config: &SolverConfig,
    kind: IterationKind,
    log: &mut ResultsLog,
) -> OuterReport {
    let mut c_max_prev = max_violation(problem, &ws.nominal, &ws.duals);
    let mut inner_iterations = 0;

    for outer in 1..=config.iterations_outerloop {
        let tolerance = if c_max_prev < config.eps_constraint {
            config.cost_tolerance
        } else {
            config.cost_tolerance_intermediate
        };
        let inner = solve_inner(problem, ws, config, tolerance);
        inner_iterations += inner.iterations;

        let c_max = max_violation(problem, &ws.nominal, &ws.duals);
        log.push(snapshot(problem, ws, kind, c_max, inner.iterations, inner.status));
        if config.verbose {
            info!(
                ?kind, outer, cost = ws.nominal.cost, c_max, inner = inner.iterations,
                status = ?inner.status, rho = inner.regularization, "outer iteration"
            );
        } else {
            debug!(
                ?kind, outer, cost = ws.nominal.cost, c_max, inner = inner.iterations,
                status = ?inner.status, rho = inner.regularization, "outer iteration"
            );
        }

        let settled = inner.status == InnerStatus::GradientConverged
            || cost_converged(inner.dj, ws.nominal.cost, config.eps);
        if c_max < config.eps_constraint && settled {
            return OuterReport {
                status: SolveStatus::Converged,
                outer_iterations: outer,
                inner_iterations,
                c_max,
            };
        }

        update_multipliers(problem, &ws.nominal, &mut ws.duals, config.dual_max);
        if c_max > config.constraint_decrease_ratio * c_max_prev {
            update_penalties(&mut ws.duals, config.mu_al_update, config.penalty_max);
        }
        c_max_prev = c_max;
        ws.refresh(problem);
    }

    OuterReport {
        status: SolveStatus::MaxOuterIterations,
        outer_iterations: config.iterations_outerloop,
        inner_iterations,
        c_max: c_max_prev,
    }
}
