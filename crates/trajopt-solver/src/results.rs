//! What a solve returns: final trajectory, status, and the outer-iteration log.

use nalgebra::DVector;

use trajopt_core::trajectory::Trajectory;

use crate::ilqr::InnerStatus;
use crate::workspace::Duals;

/// Which phase produced an outer-iteration snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IterationKind {
    Unconstrained = 0,
    Infeasible = 1,
    Constrained = 2,
}

impl IterationKind {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// State of the solve after one outer iteration.
#[derive(Clone, Debug)]
pub struct IterationSnapshot {
    pub kind: IterationKind,
    pub states: Vec<DVector<f64>>,
    /// Model controls; slack inputs are visible as the trailing rows of `constraints`.
    pub controls: Vec<DVector<f64>>,
    /// Stage constraint values `C`.
    pub constraints: Vec<DVector<f64>>,
    pub terminal_constraints: DVector<f64>,
    /// Augmented-Lagrangian cost.
    pub cost: f64,
    pub c_max: f64,
    pub inner_iterations: usize,
    pub inner_status: InnerStatus,
}

// ---------------------------------------------------------------------------
// ResultsLog
// ---------------------------------------------------------------------------

/// Append-only, bounded log of outer-iteration snapshots.
///
/// With caching disabled only the most recent snapshot is kept.
#[derive(Clone, Debug)]
pub struct ResultsLog {
    entries: Vec<IterationSnapshot>,
    capacity: usize,
    cache: bool,
}

impl ResultsLog {
    pub fn new(capacity: usize, cache: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(if cache { capacity } else { 1 }),
            capacity,
            cache,
        }
    }

    pub(crate) fn push(&mut self, snapshot: IterationSnapshot) {
        if !self.cache {
            self.entries.clear();
        } else if self.entries.len() == self.capacity {
            self.entries.remove(0);
        }
        self.entries.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&IterationSnapshot> {
        self.entries.get(index)
    }

    pub fn last(&self) -> Option<&IterationSnapshot> {
        self.entries.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IterationSnapshot> {
        self.entries.iter()
    }

    pub fn kinds(&self) -> Vec<IterationKind> {
        self.entries.iter().map(|s| s.kind).collect()
    }
}

impl std::ops::Index<usize> for ResultsLog {
    type Output = IterationSnapshot;

    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl<'a> IntoIterator for &'a ResultsLog {
    type Item = &'a IterationSnapshot;
    type IntoIter = std::slice::Iter<'a, IterationSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// SolveResults
// ---------------------------------------------------------------------------

/// Overall outcome of a solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    /// Constraints within `eps_constraint` and the cost settled.
    Converged,
    /// Unconstrained solve stopped without meeting its tolerance.
    InnerNotConverged(InnerStatus),
    /// `iterations_outerloop` exhausted.
    MaxOuterIterations,
}

/// Summary of the slack-augmented first phase of an infeasible-start solve.
///
/// `states` and `controls` are the closed-loop projection onto the model that
/// warm-starts the second phase, so rolling `controls` out from `x0`
/// reproduces `states`. The augmented solution itself is kept in
/// `augmented_states` and `open_loop_controls`.
#[derive(Clone, Debug)]
pub struct InfeasibleStage {
    pub states: Vec<DVector<f64>>,
    pub controls: Vec<DVector<f64>>,
    /// Trajectory of the slack-augmented dynamics.
    pub augmented_states: Vec<DVector<f64>>,
    /// Model controls of the augmented solution with the slack inputs dropped.
    pub open_loop_controls: Vec<DVector<f64>>,
    pub slack: Vec<DVector<f64>>,
    /// Largest slack magnitude.
    pub max_slack: f64,
    pub cost: f64,
    pub c_max: f64,
    pub status: SolveStatus,
    pub outer_iterations: usize,
    pub inner_iterations: usize,
}

/// Result of [`Solver::solve`](crate::Solver::solve) and friends.
///
/// Non-convergence is reported through [`status`](Self::status); the
/// trajectory is always the best one found.
#[derive(Clone, Debug)]
pub struct SolveResults {
    pub states: Vec<DVector<f64>>,
    pub controls: Vec<DVector<f64>>,
    pub dt: f64,
    /// Objective cost without multiplier or penalty terms.
    pub cost: f64,
    pub c_max: f64,
    pub status: SolveStatus,
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    pub history: ResultsLog,
    /// Final multipliers and penalties, reused by [`Solver::resolve`](crate::Solver::resolve).
    pub duals: Duals,
    pub infeasible_stage: Option<InfeasibleStage>,
}

impl SolveResults {
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }

    /// Phase tag of every logged outer iteration, in order.
    pub fn iteration_kinds(&self) -> Vec<IterationKind> {
        self.history.kinds()
    }

    pub fn final_state(&self) -> &DVector<f64> {
        &self.states[self.states.len() - 1]
    }

    pub fn trajectory(&self) -> Trajectory {
        Trajectory {
            states: self.states.clone(),
            controls: self.controls.clone(),
            dt: self.dt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(kind: IterationKind, c_max: f64) -> IterationSnapshot {
        IterationSnapshot {
            kind,
            states: vec![DVector::zeros(1); 2],
            controls: vec![DVector::zeros(1)],
            constraints: vec![DVector::zeros(0)],
            terminal_constraints: DVector::zeros(0),
            cost: 1.0,
            c_max,
            inner_iterations: 3,
            inner_status: InnerStatus::CostConverged,
        }
    }

    #[test]
    fn iteration_kind_codes() {
        assert_eq!(IterationKind::Unconstrained.code(), 0);
        assert_eq!(IterationKind::Infeasible.code(), 1);
        assert_eq!(IterationKind::Constrained.code(), 2);
    }

    #[test]
    fn log_appends_in_order_and_respects_capacity() {
        let mut log = ResultsLog::new(2, true);
        log.push(snapshot(IterationKind::Infeasible, 3.0));
        log.push(snapshot(IterationKind::Infeasible, 2.0));
        assert_eq!(log.len(), 2);
        log.push(snapshot(IterationKind::Constrained, 1.0));
        assert_eq!(log.len(), 2);
        assert_eq!(log.kinds(), vec![IterationKind::Infeasible, IterationKind::Constrained]);
        assert!((log[1].c_max - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn log_without_cache_keeps_latest() {
        let mut log = ResultsLog::new(10, false);
        for i in 0..4 {
            log.push(snapshot(IterationKind::Constrained, f64::from(i)));
        }
        assert_eq!(log.len(), 1);
        assert!((log.last().unwrap().c_max - 3.0).abs() < f64::EPSILON);
    }
}
