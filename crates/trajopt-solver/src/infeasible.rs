//! Infeasible-start front end.
//!
//! A state guess `X̂` that no control sequence can reproduce is made
//! dynamically feasible by augmenting every control with `n` slack inputs,
//! `x' = f(x, u) + w`. The augmented problem is solved first so the outer
//! loop drives `w` towards zero; its controls are then projected back onto
//! the model and used to warm-start the unaugmented problem.

use nalgebra::DVector;
use tracing::{debug, warn};

use trajopt_core::config::SolverConfig;
use trajopt_core::error::SolveError;

use crate::augmented_lagrangian::{OuterReport, solve_constrained};
use crate::problem::Problem;
use crate::results::{InfeasibleStage, IterationKind, ResultsLog};
use crate::rollout::{is_diverged, simulate};
use crate::workspace::{ConstrainedResults, Duals};

/// `w[k] = X̂[k+1] − f(X̂[k], U[k])`, the slack that makes the guess exact.
pub(crate) fn initial_slack(
    problem: &Problem,
    states: &[DVector<f64>],
    controls: &[DVector<f64>],
) -> Vec<DVector<f64>> {
    let mut next = DVector::zeros(problem.state_dim());
    controls
        .iter()
        .enumerate()
        .map(|(k, u)| {
            problem.step_into(&mut next, &states[k], u);
            &states[k + 1] - &next
        })
        .collect()
}

/// Stack `[u; w]` per stage.
pub(crate) fn augment(controls: &[DVector<f64>], slack: &[DVector<f64>]) -> Vec<DVector<f64>> {
    controls
        .iter()
        .zip(slack)
        .map(|(u, w)| {
            let mut out = DVector::zeros(u.len() + w.len());
            out.rows_mut(0, u.len()).copy_from(u);
            out.rows_mut(u.len(), w.len()).copy_from(w);
            out
        })
        .collect()
}

/// Solve the slack-augmented problem from the guess. Snapshots are tagged
/// [`IterationKind::Infeasible`].
pub(crate) fn solve_slack(
    plain: &Problem,
    augmented: &Problem,
    states: &[DVector<f64>],
    controls: &[DVector<f64>],
    config: &SolverConfig,
    log: &mut ResultsLog,
) -> Result<(ConstrainedResults, OuterReport), SolveError> {
    let slack = initial_slack(plain, states, controls);
    let controls = augment(controls, &slack);
    let states = simulate(augmented, plain.cost().x0(), &controls, config.max_state_value)?;
    let duals = Duals::new(
        controls.len(),
        augmented.stage_rows(),
        augmented.terminal_rows(),
        config.penalty_initial,
    );
    let mut ws = ConstrainedResults::new(augmented, states, controls, duals);
    let report = solve_constrained(augmented, &mut ws, config, IterationKind::Infeasible, log);
    Ok((ws, report))
}

/// Summary of the augmented solve, with slack split off the controls and the
/// projected warm start `(states, controls)` from [`project`].
pub(crate) fn summarize(
    augmented: &Problem,
    ws: &ConstrainedResults,
    report: &OuterReport,
    (states, controls): (Vec<DVector<f64>>, Vec<DVector<f64>>),
) -> InfeasibleStage {
    let m = augmented.model_control_dim();
    let slack: Vec<DVector<f64>> = ws
        .nominal
        .controls
        .iter()
        .map(|u| u.rows(m, augmented.slack_dim()).into_owned())
        .collect();
    let max_slack = slack.iter().map(|w| w.amax()).fold(0.0, f64::max);
    InfeasibleStage {
        states,
        controls,
        augmented_states: ws.nominal.states.clone(),
        open_loop_controls: open_loop_controls(augmented, ws),
        slack,
        max_slack,
        cost: ws.nominal.plain_cost(augmented),
        c_max: report.c_max,
        status: report.status,
        outer_iterations: report.outer_iterations,
        inner_iterations: report.inner_iterations,
    }
}

fn open_loop_controls(augmented: &Problem, ws: &ConstrainedResults) -> Vec<DVector<f64>> {
    ws.nominal
        .controls
        .iter()
        .map(|u| augmented.model_control(u).into_owned())
        .collect()
}

/// Drop the slack and roll the model controls out from `x0` under the last
/// feedback gains: `u[k] = U[k] + K_u[k] (x'[k] − X[k])`.
///
/// Falls back to the open-loop controls if the closed-loop rollout diverges.
pub(crate) fn project(
    plain: &Problem,
    augmented: &Problem,
    ws: &ConstrainedResults,
    config: &SolverConfig,
) -> Result<(Vec<DVector<f64>>, Vec<DVector<f64>>), SolveError> {
    let m = plain.control_dim();
    let n = plain.state_dim();
    let horizon = ws.horizon();

    let mut states = Vec::with_capacity(horizon + 1);
    let mut controls = Vec::with_capacity(horizon);
    states.push(plain.cost().x0().clone());
    let mut closed_loop = true;
    for k in 0..horizon {
        let dx = &states[k] - &ws.nominal.states[k];
        let feedback = ws.gains.k[k].rows(0, m) * dx;
        let u = augmented.model_control(&ws.nominal.controls[k]).into_owned() + feedback;
        let mut next = DVector::zeros(n);
        plain.step_into(&mut next, &states[k], &u);
        if is_diverged(&u, config.max_control_value) || is_diverged(&next, config.max_state_value) {
            closed_loop = false;
            break;
        }
        controls.push(u);
        states.push(next);
    }
    if closed_loop {
        return Ok((states, controls));
    }

    debug!("closed-loop projection diverged, falling back to open-loop controls");
    let controls = open_loop_controls(augmented, ws);
    let states = simulate(plain, plain.cost().x0(), &controls, config.max_state_value)?;
    Ok((states, controls))
}

/// Warn when the augmented solve left slack above `eps_constraint`.
pub(crate) fn check_slack(stage: &InfeasibleStage, eps_constraint: f64) {
    if stage.max_slack > eps_constraint {
        warn!(
            max_slack = stage.max_slack,
            eps_constraint, "slack not driven to zero, continuing from the projected trajectory"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use trajopt_core::trajectory::linear_interpolation;
    use trajopt_test_utils::models::double_integrator;
    use trajopt_test_utils::problems::double_integrator_objective;

    #[test]
    fn initial_slack_reproduces_the_guess() {
        let model = double_integrator();
        let objective = double_integrator_objective(true);
        let plain = Problem::new(&model, &objective, 0.1);
        let augmented = Problem::with_slack(&model, &objective, 0.1, 1.0);
        let guess = linear_interpolation(objective.cost().x0(), objective.cost().xf(), 21);
        let controls = vec![DVector::zeros(1); 20];

        let slack = initial_slack(&plain, &guess, &controls);
        let augmented_controls = augment(&controls, &slack);
        assert_eq!(augmented_controls[0].len(), 3);
        let states = simulate(&augmented, &guess[0], &augmented_controls, 1e8).unwrap();
        for (x, g) in states.iter().zip(&guess) {
            assert_relative_eq!(x, g, epsilon = 1e-12);
        }
    }

    #[test]
    fn consistent_guess_needs_no_slack() {
        let model = double_integrator();
        let objective = double_integrator_objective(false);
        let plain = Problem::new(&model, &objective, 0.1);
        let controls = vec![DVector::from_element(1, 0.3); 20];
        let states = simulate(&plain, objective.cost().x0(), &controls, 1e8).unwrap();
        let slack = initial_slack(&plain, &states, &controls);
        assert!(slack.iter().all(|w| w.amax() < 1e-12));
    }

    #[test]
    fn slack_solve_drives_slack_down_and_projects() {
        let model = double_integrator();
        let objective = double_integrator_objective(true);
        let plain = Problem::new(&model, &objective, 0.1);
        let augmented = Problem::with_slack(&model, &objective, 0.1, 1.0);
        let guess = linear_interpolation(objective.cost().x0(), objective.cost().xf(), 21);
        let controls = vec![DVector::zeros(1); 20];
        let config = SolverConfig::default();
        let mut log = ResultsLog::new(config.iterations_outerloop, true);

        let (ws, report) = solve_slack(&plain, &augmented, &guess, &controls, &config, &mut log).unwrap();
        assert!(log.iter().all(|s| s.kind == IterationKind::Infeasible));
        let projection = project(&plain, &augmented, &ws, &config).unwrap();
        let stage = summarize(&augmented, &ws, &report, projection);
        assert_eq!(stage.controls.len(), 20);
        assert_eq!(stage.controls[0].len(), 1);
        assert_eq!(stage.open_loop_controls[0].len(), 1);
        assert_eq!(stage.slack[0].len(), 2);
        assert_eq!(stage.augmented_states.len(), 21);
        assert!(stage.max_slack < 1e-2);

        let replay = simulate(&plain, objective.cost().x0(), &stage.controls, 1e8).unwrap();
        for (x, r) in stage.states.iter().zip(&replay) {
            assert_relative_eq!(x, r, epsilon = 1e-12);
        }
    }
}
