//! Shared test fixtures for trajopt crates.
//!
//! Reference dynamics models, ready-made objectives and deterministic RNG
//! setup.

pub mod models;
pub mod problems;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use models::{double_integrator, pendulum};
pub use problems::{double_integrator_objective, pendulum_objective, swing_up_guess};
pub use rng::{deterministic_controls, seeded_rng};
