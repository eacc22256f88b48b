//! Problem description types for trajopt.
//!
//! Everything the solver consumes but does not own lives here: the
//! [`Dynamics`](dynamics::Dynamics) contract and its [`Model`](dynamics::Model)
//! adapter, the quadratic cost and constraint set that make up an
//! [`Objective`](objective::Objective), solver and problem configuration,
//! the error taxonomy, and a parametric pendulum reference model.
//!
//! ```text
//! Model ──┐
//!         ├──► Solver::solve(model, objective, U0) ──► SolveResults
//! Objective (QuadraticCost + ConstraintSet) ──┘
//! ```

pub mod config;
pub mod constraints;
pub mod dynamics;
pub mod error;
pub mod models;
pub mod objective;
pub mod trajectory;

pub mod prelude {
    pub use crate::config::{ProblemConfig, SolverConfig};
    pub use crate::constraints::{Bound, ConstraintCounts, ConstraintSet, StageFn, TerminalFn};
    pub use crate::dynamics::{Dynamics, Integrator, Model};
    pub use crate::error::{ConfigError, ModelError, ObjectiveError, SolveError, TrajoptError};
    pub use crate::models::PendulumParams;
    pub use crate::objective::{ConstrainedObjective, FinalTime, Objective, QuadraticCost};
    pub use crate::trajectory::{Trajectory, linear_interpolation};
}
