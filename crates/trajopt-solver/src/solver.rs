//! Solve entry points.

use nalgebra::DVector;
use tracing::warn;

use trajopt_core::config::SolverConfig;
use trajopt_core::dynamics::Dynamics;
use trajopt_core::error::{SolveError, TrajoptError};
use trajopt_core::objective::Objective;

use crate::augmented_lagrangian::{OuterReport, solve_constrained, solve_unconstrained};
use crate::infeasible;
use crate::problem::Problem;
use crate::results::{InfeasibleStage, IterationKind, ResultsLog, SolveResults, SolveStatus};
use crate::rollout::simulate;
use crate::workspace::{ConstrainedResults, Duals};

/// Relative slack allowed between `N · dt` and the final time.
const HORIZON_TOLERANCE: f64 = 1e-6;

/// Control sequence must be non-empty, correctly sized and finite.
pub(crate) fn check_controls(problem: &Problem, controls: &[DVector<f64>]) -> Result<(), SolveError> {
    if controls.is_empty() {
        return Err(SolveError::EmptyHorizon);
    }
    let m = problem.control_dim();
    for (k, u) in controls.iter().enumerate() {
        if u.len() != m {
            return Err(SolveError::DimensionMismatch {
                what: "control",
                index: k,
                expected: m,
                got: u.len(),
            });
        }
        if u.iter().any(|v| !v.is_finite()) {
            return Err(SolveError::NonFiniteGuess(k));
        }
    }
    Ok(())
}

fn check_states(problem: &Problem, states: &[DVector<f64>], horizon: usize) -> Result<(), SolveError> {
    if states.len() != horizon + 1 {
        return Err(SolveError::StateCount {
            expected: horizon + 1,
            got: states.len(),
        });
    }
    let n = problem.state_dim();
    for (k, x) in states.iter().enumerate() {
        if x.len() != n {
            return Err(SolveError::DimensionMismatch {
                what: "state",
                index: k,
                expected: n,
                got: x.len(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(SolveError::NonFiniteGuess(k));
        }
    }
    Ok(())
}

fn check_model(model: &dyn Dynamics, objective: &Objective) -> Result<(), SolveError> {
    let cost = objective.cost();
    if cost.state_dim() != model.state_dim() {
        return Err(SolveError::DimensionMismatch {
            what: "objective state",
            index: 0,
            expected: model.state_dim(),
            got: cost.state_dim(),
        });
    }
    if cost.control_dim() != model.control_dim() {
        return Err(SolveError::DimensionMismatch {
            what: "objective control",
            index: 0,
            expected: model.control_dim(),
            got: cost.control_dim(),
        });
    }
    Ok(())
}

/// iLQR / Augmented-Lagrangian trajectory optimizer.
///
/// Holds only the configuration and the time step; every solve owns its own
/// workspace, so one solver can be reused across problems.
#[derive(Clone, Debug)]
pub struct Solver {
    config: SolverConfig,
    dt: f64,
}

impl Solver {
    /// Create a solver after validating `config` and `dt`.
    pub fn new(config: SolverConfig, dt: f64) -> Result<Self, TrajoptError> {
        config.validate()?;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SolveError::InvalidTimeStep(dt).into());
        }
        Ok(Self { config, dt })
    }

    /// Create a solver with default configuration.
    pub fn with_defaults(dt: f64) -> Result<Self, TrajoptError> {
        Self::new(SolverConfig::default(), dt)
    }

    pub const fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub const fn dt(&self) -> f64 {
        self.dt
    }

    /// Optimize from an initial control sequence.
    ///
    /// The initial trajectory is the rollout of `controls` from the
    /// objective's `x0`; divergence of that rollout is an error, failure to
    /// converge afterwards is reported through [`SolveResults::status`].
    pub fn solve<D: Dynamics>(
        &self,
        model: &D,
        objective: &Objective,
        controls: &[DVector<f64>],
    ) -> Result<SolveResults, SolveError> {
        self.solve_from(model, objective, controls, None)
    }

    /// Warm-start from a previous result, reusing its controls, multipliers
    /// and penalties when they fit the problem.
    pub fn resolve<D: Dynamics>(
        &self,
        model: &D,
        objective: &Objective,
        previous: &SolveResults,
    ) -> Result<SolveResults, SolveError> {
        self.solve_from(model, objective, &previous.controls, Some(previous.duals.clone()))
    }

    /// Optimize from a state trajectory guess that need not be dynamically
    /// consistent with `controls`.
    ///
    /// The slack-augmented problem is solved first (snapshots tagged
    /// [`IterationKind::Infeasible`]), then the unaugmented problem is solved
    /// from its projection. Iteration counts in the result cover both
    /// phases; the first phase, including the projected warm start, is
    /// summarized in [`SolveResults::infeasible_stage`].
    pub fn solve_infeasible<D: Dynamics>(
        &self,
        model: &D,
        objective: &Objective,
        states: &[DVector<f64>],
        controls: &[DVector<f64>],
    ) -> Result<SolveResults, SolveError> {
        let plain = Problem::new(model, objective, self.dt);
        self.check_problem(model, objective, &plain, controls)?;
        check_states(&plain, states, controls.len())?;

        let augmented = Problem::with_slack(model, objective, self.dt, self.config.infeasible_regularization);
        let mut log = ResultsLog::new(2 * self.config.iterations_outerloop, self.config.cache);
        let (slack_ws, slack_report) =
            infeasible::solve_slack(&plain, &augmented, states, controls, &self.config, &mut log)?;
        let projection = infeasible::project(&plain, &augmented, &slack_ws, &self.config)?;
        let stage = infeasible::summarize(&augmented, &slack_ws, &slack_report, projection);
        infeasible::check_slack(&stage, self.config.eps_constraint);

        let duals = slack_ws.duals.truncate_stage_rows(plain.stage_rows());
        let mut ws = ConstrainedResults::new(&plain, stage.states.clone(), stage.controls.clone(), duals);
        let mut report = self.run(&plain, &mut ws, &mut log);
        report.outer_iterations += slack_report.outer_iterations;
        report.inner_iterations += slack_report.inner_iterations;
        Ok(self.finish(&plain, ws, report, log, Some(stage)))
    }

    fn solve_from(
        &self,
        model: &dyn Dynamics,
        objective: &Objective,
        controls: &[DVector<f64>],
        duals: Option<Duals>,
    ) -> Result<SolveResults, SolveError> {
        let problem = Problem::new(model, objective, self.dt);
        self.check_problem(model, objective, &problem, controls)?;

        let horizon = controls.len();
        let states = simulate(&problem, problem.cost().x0(), controls, self.config.max_state_value)?;
        let duals = duals
            .filter(|d| d.matches(horizon, problem.stage_rows(), problem.terminal_rows()))
            .unwrap_or_else(|| {
                Duals::new(
                    horizon,
                    problem.stage_rows(),
                    problem.terminal_rows(),
                    self.config.penalty_initial,
                )
            });
        let mut ws = ConstrainedResults::new(&problem, states, controls.to_vec(), duals);
        let mut log = ResultsLog::new(self.config.iterations_outerloop, self.config.cache);
        let report = self.run(&problem, &mut ws, &mut log);
        Ok(self.finish(&problem, ws, report, log, None))
    }

    fn check_problem(
        &self,
        model: &dyn Dynamics,
        objective: &Objective,
        problem: &Problem,
        controls: &[DVector<f64>],
    ) -> Result<(), SolveError> {
        check_model(model, objective)?;
        check_controls(problem, controls)?;
        let tf = objective.cost().tf();
        if tf > 0.0 {
            let span = controls.len() as f64 * self.dt;
            if (span - tf).abs() > HORIZON_TOLERANCE * tf.max(1.0) {
                return Err(SolveError::HorizonMismatch {
                    controls: controls.len(),
                    dt: self.dt,
                    span,
                    tf,
                });
            }
        }
        Ok(())
    }

    fn run(&self, problem: &Problem, ws: &mut ConstrainedResults, log: &mut ResultsLog) -> OuterReport {
        let report = if problem.is_constrained() {
            solve_constrained(problem, ws, &self.config, IterationKind::Constrained, log)
        } else {
            solve_unconstrained(problem, ws, &self.config, log)
        };
        if report.status != SolveStatus::Converged {
            warn!(
                status = ?report.status,
                c_max = report.c_max,
                outer = report.outer_iterations,
                "solve did not converge"
            );
        }
        report
    }

    fn finish(
        &self,
        problem: &Problem,
        ws: ConstrainedResults,
        report: OuterReport,
        history: ResultsLog,
        infeasible_stage: Option<InfeasibleStage>,
    ) -> SolveResults {
        let cost = ws.nominal.plain_cost(problem);
        SolveResults {
            states: ws.nominal.states,
            controls: ws.nominal.controls,
            dt: self.dt,
            cost,
            c_max: report.c_max,
            status: report.status,
            outer_iterations: report.outer_iterations,
            inner_iterations: report.inner_iterations,
            history,
            duals: ws.duals,
            infeasible_stage,
        }
    }
}
