//! End-to-end swing-up of the damped pendulum from a straight-line guess.

use approx::assert_relative_eq;
use nalgebra::DVector;
use trajopt_core::dynamics::Model;
use trajopt_core::objective::Objective;
use trajopt_core::trajectory::Trajectory;
use trajopt_solver::{IterationKind, SolveResults, Solver, rollout};
use trajopt_test_utils::problems::DT;
use trajopt_test_utils::{pendulum, pendulum_objective, swing_up_guess};

const TF: f64 = 5.0;
const HORIZON: usize = 50;

fn solve_from_guess(tf: f64, dt: f64, horizon: usize) -> (Objective, SolveResults) {
    let model = pendulum();
    let objective = pendulum_objective(tf);
    let (states, controls) = swing_up_guess(&objective, horizon);
    let solver = Solver::with_defaults(dt).unwrap();
    let results = solver
        .solve_infeasible(&model, &objective, &states, &controls)
        .unwrap();
    (objective, results)
}

/// Open-loop rollout of `controls` from the objective's `x0`.
fn replay(model: &Model, objective: &Objective, controls: &[DVector<f64>], dt: f64) -> Trajectory {
    let run = rollout(model, objective, objective.cost().x0(), controls, dt).unwrap();
    Trajectory::new(run.states, controls.to_vec(), dt).unwrap()
}

fn max_control_deviation(a: &Trajectory, b: &Trajectory) -> f64 {
    a.controls
        .iter()
        .zip(&b.controls)
        .map(|(x, y)| (x - y).amax())
        .fold(0.0, f64::max)
}

#[test]
fn converges_to_the_upright_state() {
    let (objective, results) = solve_from_guess(TF, DT, HORIZON);
    let eps = Solver::with_defaults(DT).unwrap().config().eps_constraint;

    assert!(results.converged(), "status: {:?}", results.status);
    assert!(results.c_max < eps);
    assert!((results.final_state() - objective.cost().xf()).amax() < eps);

    let trajectory = results.trajectory();
    assert_eq!(trajectory.horizon(), HORIZON);
    assert_eq!(trajectory.states.len(), HORIZON + 1);
    assert_relative_eq!(trajectory.times()[HORIZON], TF, epsilon = 1e-12);
}

#[test]
fn boxes_hold_along_the_trajectory() {
    let (objective, results) = solve_from_guess(TF, DT, HORIZON);
    let eps = Solver::with_defaults(DT).unwrap().config().eps_constraint;
    let constraints = objective.constraints().unwrap();
    assert!(constraints.has_terminal_goal());

    for (k, (x, u)) in results.states.iter().zip(&results.controls).enumerate() {
        let violation = constraints.box_violation(x, u);
        assert!(violation <= eps, "stage {k} violates its bounds by {violation}");
    }
    assert!(constraints.box_violation(results.final_state(), &DVector::zeros(1)) <= eps);
}

#[test]
fn history_is_tagged_by_phase() {
    let (_, results) = solve_from_guess(TF, DT, HORIZON);
    let kinds = results.iteration_kinds();
    let stage = results.infeasible_stage.as_ref().unwrap();

    assert_eq!(kinds.len(), results.outer_iterations);
    assert_eq!(kinds[0], IterationKind::Infeasible);
    assert_eq!(kinds[kinds.len() - 1], IterationKind::Constrained);
    let switch = kinds.iter().position(|k| *k == IterationKind::Constrained).unwrap();
    assert_eq!(switch, stage.outer_iterations);
    assert!(kinds[switch..].iter().all(|k| *k == IterationKind::Constrained));
    assert!(results.history[0].controls[0].len() == 1);
}

#[test]
fn infeasible_stage_is_a_good_warm_start() {
    let (objective, results) = solve_from_guess(TF, DT, HORIZON);
    let stage = results.infeasible_stage.as_ref().unwrap();
    let eps = Solver::with_defaults(DT).unwrap().config().eps_constraint;
    assert!(stage.max_slack < eps);

    let model = pendulum();
    let warm_start = replay(&model, &objective, &stage.controls, DT);
    let optimized = replay(&model, &objective, &results.controls, DT);
    assert!(max_control_deviation(&warm_start, &optimized) < 0.1);
    assert!(warm_start.max_state_deviation(&optimized) < 0.2);
    assert!(optimized.max_state_deviation(&results.trajectory()) < 1e-9);

    let feasible = rollout(&model, &objective, objective.cost().x0(), &results.controls, DT).unwrap();
    assert!(feasible.max_violation < eps);
}

#[test]
fn warm_start_controls_reproduce_the_stage_states() {
    let (objective, results) = solve_from_guess(TF, DT, HORIZON);
    let stage = results.infeasible_stage.as_ref().unwrap();
    let warm_start = replay(&pendulum(), &objective, &stage.controls, DT);
    let stage_trajectory = Trajectory::new(stage.states.clone(), stage.controls.clone(), DT).unwrap();

    assert!(warm_start.max_state_deviation(&stage_trajectory) < 1e-12);
    assert_eq!(stage.augmented_states.len(), HORIZON + 1);
    assert_eq!(stage.open_loop_controls.len(), HORIZON);
}

#[test]
fn long_horizon_warm_start_stays_consistent() {
    const LONG_TF: f64 = 4.0;
    const FINE_DT: f64 = 0.02;
    const LONG_HORIZON: usize = 200;

    let (objective, results) = solve_from_guess(LONG_TF, FINE_DT, LONG_HORIZON);
    assert!(results.converged(), "status: {:?}", results.status);
    let stage = results.infeasible_stage.as_ref().unwrap();

    let model = pendulum();
    let warm_start = replay(&model, &objective, &stage.controls, FINE_DT);
    let optimized = replay(&model, &objective, &results.controls, FINE_DT);
    assert_eq!(warm_start.horizon(), LONG_HORIZON);
    assert!(max_control_deviation(&warm_start, &optimized) < 0.1);
    assert!(warm_start.max_state_deviation(&optimized) < 0.1);
}

#[test]
fn resolve_from_converged_swing_up_is_idempotent() {
    let solver = Solver::with_defaults(DT).unwrap();
    let model = pendulum();
    let objective = pendulum_objective(TF);
    let first = solver
        .solve(&model, &objective, &vec![DVector::zeros(1); HORIZON])
        .unwrap();
    assert!(first.converged(), "status: {:?}", first.status);

    let second = solver.resolve(&model, &objective, &first).unwrap();
    assert!(second.converged());
    assert!((second.cost - first.cost).abs() < solver.config().cost_tolerance);
    assert!(second.trajectory().max_state_deviation(&first.trajectory()) < 1e-2);
}
