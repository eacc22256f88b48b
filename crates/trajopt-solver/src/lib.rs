//! Constrained trajectory optimization for trajopt.
//!
//! Three nested layers:
//!
//! - **iLQR** ([`InnerStatus`]): regularized Riccati backward pass and a
//!   backtracking forward rollout on the penalized objective.
//! - **Augmented Lagrangian**: outer loop updating multipliers `λ` and
//!   penalties `μ` until the constraints are met.
//! - **Infeasible start** ([`Solver::solve_infeasible`]): slack controls make
//!   an arbitrary state guess dynamically feasible, then the unaugmented problem
//!   is re-solved from the projected result.
//!
//! # Example
//!
//! ```no_run
//! use nalgebra::DVector;
//! use trajopt_core::prelude::*;
//! use trajopt_solver::Solver;
//!
//! # fn run(model: Model, objective: Objective) -> Result<(), TrajoptError> {
//! let solver = Solver::with_defaults(0.1)?;
//! let controls = vec![DVector::zeros(1); 50];
//! let results = solver.solve(&model, &objective, &controls)?;
//! println!("converged: {}, cost: {}", results.converged(), results.cost);
//! # Ok(())
//! # }
//! ```

mod augmented_lagrangian;
mod backward;
mod forward;
mod ilqr;
mod infeasible;
mod problem;
pub mod results;
pub mod rollout;
pub mod solver;
mod workspace;

pub use ilqr::InnerStatus;
pub use results::{InfeasibleStage, IterationKind, IterationSnapshot, ResultsLog, SolveResults, SolveStatus};
pub use rollout::{Rollout, rollout};
pub use solver::Solver;
pub use workspace::Duals;
