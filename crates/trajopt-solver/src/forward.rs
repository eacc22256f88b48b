//! Forward pass with backtracking line search.

use trajopt_core::config::SolverConfig;

use crate::problem::Problem;
use crate::rollout::is_diverged;
use crate::workspace::{ConstrainedResults, Gains, Iterate};

/// Outcome of a line search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum LineSearch {
    Accepted {
        alpha: f64,
        /// Actual cost reduction `J_prev − J`.
        dj: f64,
        /// Ratio of actual to expected reduction.
        z: f64,
    },
    Failed,
}

/// Roll out `u = U + α d + K (x' − X)` into `trial`. Returns `false` on divergence.
fn rollout_candidate(
    problem: &Problem,
    nominal: &Iterate,
    gains: &Gains,
    alpha: f64,
    trial: &mut Iterate,
    config: &SolverConfig,
) -> bool {
    trial.states[0].copy_from(&nominal.states[0]);
    for k in 0..nominal.controls.len() {
        let dx = &trial.states[k] - &nominal.states[k];
        let u = &nominal.controls[k] + &gains.d[k] * alpha + &gains.k[k] * dx;
        if is_diverged(&u, config.max_control_value) {
            return false;
        }
        trial.controls[k] = u;

        let (head, tail) = trial.states.split_at_mut(k + 1);
        problem.step_into(&mut tail[0], &head[k], &trial.controls[k]);
        if is_diverged(&tail[0], config.max_state_value) {
            return false;
        }
    }
    true
}

/// Try `α = 1, ½, ¼, …` and swap the first acceptable candidate into the nominal.
///
/// A candidate is accepted when `c1 ≤ z ≤ c2`, where `z` is the actual cost
/// reduction over the expected reduction `−(α ΔV₁ + α² ΔV₂)`. When the
/// expected reduction is not positive, any decrease is accepted.
pub(crate) fn line_search(problem: &Problem, ws: &mut ConstrainedResults, config: &SolverConfig) -> LineSearch {
    let j_prev = ws.nominal.cost;
    let mut alpha = 1.0;
    for _ in 0..config.iterations_linesearch {
        if rollout_candidate(problem, &ws.nominal, &ws.gains, alpha, &mut ws.trial, config) {
            let cost = ws.trial.evaluate(problem, &ws.duals);
            let dj = j_prev - cost;
            let expected = ws.gains.expected_reduction(alpha);
            let (accept, z) = if expected > 0.0 {
                let z = dj / expected;
                (z >= config.c1 && z <= config.c2, z)
            } else {
                (dj > 0.0, f64::NAN)
            };
            if cost.is_finite() && accept {
                std::mem::swap(&mut ws.nominal, &mut ws.trial);
                return LineSearch::Accepted { alpha, dj, z };
            }
        }
        alpha *= 0.5;
    }
    LineSearch::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use trajopt_test_utils::models::double_integrator;
    use trajopt_test_utils::problems::double_integrator_objective;

    use crate::backward::backward_pass;
    use crate::rollout::simulate;
    use crate::workspace::Duals;

    #[test]
    fn full_step_is_exact_for_linear_quadratic() {
        let model = double_integrator();
        let objective = double_integrator_objective(false);
        let problem = Problem::new(&model, &objective, 0.1);
        let controls = vec![DVector::zeros(1); 20];
        let states = simulate(&problem, objective.cost().x0(), &controls, 1e8).unwrap();
        let mut ws = ConstrainedResults::new(&problem, states, controls, Duals::new(20, 0, 0, 1.0));
        ws.linearize(&problem);
        backward_pass(&problem, &ws.nominal, &ws.duals, &ws.lin, 0.0, &mut ws.gains).unwrap();
        let expected = ws.gains.expected_reduction(1.0);

        let outcome = line_search(&problem, &mut ws, &SolverConfig::default());
        let LineSearch::Accepted { alpha, dj, z } = outcome else {
            panic!("line search failed: {outcome:?}");
        };
        assert_relative_eq!(alpha, 1.0);
        assert_relative_eq!(dj, expected, max_relative = 1e-6);
        assert_relative_eq!(z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn zero_step_cannot_be_accepted() {
        let model = double_integrator();
        let objective = double_integrator_objective(false);
        let problem = Problem::new(&model, &objective, 0.1);
        let controls = vec![DVector::zeros(1); 20];
        let states = simulate(&problem, objective.cost().x0(), &controls, 1e8).unwrap();
        let mut ws = ConstrainedResults::new(&problem, states, controls, Duals::new(20, 0, 0, 1.0));
        let before = ws.nominal.cost;
        // Gains left at zero: the candidate equals the nominal, no decrease.
        assert_eq!(line_search(&problem, &mut ws, &SolverConfig::default()), LineSearch::Failed);
        assert_relative_eq!(ws.nominal.cost, before);
    }

    #[test]
    fn divergent_candidate_is_rejected() {
        let model = double_integrator();
        let objective = double_integrator_objective(false);
        let problem = Problem::new(&model, &objective, 0.1);
        let controls = vec![DVector::zeros(1); 20];
        let states = simulate(&problem, objective.cost().x0(), &controls, 1e8).unwrap();
        let mut ws = ConstrainedResults::new(&problem, states, controls, Duals::new(20, 0, 0, 1.0));
        ws.gains.d[0][0] = 1e300;
        let config = SolverConfig {
            iterations_linesearch: 3,
            ..SolverConfig::default()
        };
        assert_eq!(line_search(&problem, &mut ws, &config), LineSearch::Failed);
    }
}
