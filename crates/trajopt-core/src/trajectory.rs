//! Sampled state/control trajectories.

use nalgebra::DVector;

use crate::error::SolveError;

/// States `X[0..=N]` and controls `U[0..N]` on a uniform grid of spacing `dt`.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    pub states: Vec<DVector<f64>>,
    pub controls: Vec<DVector<f64>>,
    pub dt: f64,
}

impl Trajectory {
    /// Pair states and controls, checking `states.len() == controls.len() + 1`.
    pub fn new(states: Vec<DVector<f64>>, controls: Vec<DVector<f64>>, dt: f64) -> Result<Self, SolveError> {
        if controls.is_empty() {
            return Err(SolveError::EmptyHorizon);
        }
        if states.len() != controls.len() + 1 {
            return Err(SolveError::StateCount {
                expected: controls.len() + 1,
                got: states.len(),
            });
        }
        if dt <= 0.0 || !dt.is_finite() {
            return Err(SolveError::InvalidTimeStep(dt));
        }
        Ok(Self { states, controls, dt })
    }

    /// Number of control intervals `N`.
    pub fn horizon(&self) -> usize {
        self.controls.len()
    }

    /// Time spanned, `N · dt`.
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.horizon() as f64 * self.dt
    }

    pub fn final_state(&self) -> &DVector<f64> {
        &self.states[self.states.len() - 1]
    }

    /// Sample times `0, dt, …, N·dt`.
    #[allow(clippy::cast_precision_loss)]
    pub fn times(&self) -> Vec<f64> {
        (0..self.states.len()).map(|k| k as f64 * self.dt).collect()
    }

    /// Largest per-entry difference to another trajectory of the same shape.
    pub fn max_state_deviation(&self, other: &Self) -> f64 {
        self.states
            .iter()
            .zip(&other.states)
            .map(|(a, b)| (a - b).amax())
            .fold(0.0, f64::max)
    }
}

/// `knots` states linearly interpolated from `x0` to `xf` (inclusive).
///
/// The usual infeasible-start guess for a straight-line path.
pub fn linear_interpolation(x0: &DVector<f64>, xf: &DVector<f64>, knots: usize) -> Vec<DVector<f64>> {
    match knots {
        0 => Vec::new(),
        1 => vec![x0.clone()],
        _ => {
            let last = (knots - 1) as f64;
            (0..knots)
                .map(|k| x0 + (xf - x0) * (k as f64 / last))
                .collect()
        }
    }
}
