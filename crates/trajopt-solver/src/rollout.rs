//! Forward simulation of a control sequence.

use nalgebra::DVector;

use trajopt_core::dynamics::Dynamics;
use trajopt_core::error::SolveError;
use trajopt_core::objective::Objective;

use crate::augmented_lagrangian::max_violation;
use crate::problem::Problem;
use crate::workspace::{Duals, Iterate};

/// Default divergence threshold on state magnitude.
pub const DEFAULT_MAX_STATE_VALUE: f64 = 1e8;

/// States, cost and worst constraint violation of one rollout.
#[derive(Clone, Debug, PartialEq)]
pub struct Rollout {
    pub states: Vec<DVector<f64>>,
    /// Objective cost without multiplier or penalty terms.
    pub cost: f64,
    /// Worst violation over stage and terminal constraints (zero if unconstrained).
    pub max_violation: f64,
}

pub(crate) fn is_diverged(v: &DVector<f64>, limit: f64) -> bool {
    v.iter().any(|s| !s.is_finite() || s.abs() > limit)
}

/// `X[0] = x0`, `X[k+1] = step(X[k], U[k])`.
pub(crate) fn simulate(
    problem: &Problem,
    x0: &DVector<f64>,
    controls: &[DVector<f64>],
    max_state_value: f64,
) -> Result<Vec<DVector<f64>>, SolveError> {
    let n = problem.state_dim();
    let mut states = Vec::with_capacity(controls.len() + 1);
    states.push(x0.clone());
    for (k, u) in controls.iter().enumerate() {
        let mut next = DVector::zeros(n);
        problem.step_into(&mut next, &states[k], u);
        if is_diverged(&next, max_state_value) {
            return Err(SolveError::Diverged { stage: k + 1 });
        }
        states.push(next);
    }
    Ok(states)
}

/// Roll `controls` out from `x0` and evaluate the objective along the result.
///
/// Rollouts are deterministic: identical inputs give bit-identical states.
pub fn rollout<D: Dynamics>(
    model: &D,
    objective: &Objective,
    x0: &DVector<f64>,
    controls: &[DVector<f64>],
    dt: f64,
) -> Result<Rollout, SolveError> {
    let problem = Problem::new(model, objective, dt);
    crate::solver::check_controls(&problem, controls)?;
    if x0.len() != problem.state_dim() {
        return Err(SolveError::DimensionMismatch {
            what: "initial state",
            index: 0,
            expected: problem.state_dim(),
            got: x0.len(),
        });
    }
    let states = simulate(&problem, x0, controls, DEFAULT_MAX_STATE_VALUE)?;
    let duals = Duals::new(controls.len(), problem.stage_rows(), problem.terminal_rows(), 0.0);
    let mut iterate = Iterate::new(&problem, states, controls.to_vec());
    iterate.evaluate(&problem, &duals);
    Ok(Rollout {
        cost: iterate.plain_cost(&problem),
        max_violation: max_violation(&problem, &iterate, &duals),
        states: iterate.states,
    })
}
