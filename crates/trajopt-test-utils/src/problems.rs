//! Ready-made objectives for the reference models.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

use trajopt_core::constraints::ConstraintSet;
use trajopt_core::objective::{ConstrainedObjective, Objective, QuadraticCost};
use trajopt_core::trajectory::linear_interpolation;

/// Time step every fixture is built for.
pub const DT: f64 = 0.1;

/// Move the double integrator from rest at 0 to rest at 1 in 2 s.
pub fn double_integrator_cost() -> QuadraticCost {
    QuadraticCost::new(
        DMatrix::identity(2, 2),
        DMatrix::identity(1, 1) * 0.1,
        DMatrix::identity(2, 2) * 100.0,
        0.0,
        2.0,
        DVector::zeros(2),
        DVector::from_vec(vec![1.0, 0.0]),
    )
    .expect("double integrator cost is well formed")
}

/// [`double_integrator_cost`], optionally with `|u| ≤ 2` and a terminal goal.
pub fn double_integrator_objective(constrained: bool) -> Objective {
    let cost = double_integrator_cost();
    if !constrained {
        return cost.into();
    }
    let set = ConstraintSet::builder(2, 1)
        .control_bounds(-2.0, 2.0)
        .terminal_goal(true)
        .build()
        .expect("double integrator constraints are well formed");
    ConstrainedObjective::new(cost, set)
        .expect("double integrator objective is well formed")
        .into()
}

/// Pendulum swing-up from hanging to upright over `tf` seconds.
pub fn pendulum_cost(tf: f64) -> QuadraticCost {
    QuadraticCost::new(
        DMatrix::identity(2, 2) * 1e-3,
        DMatrix::identity(1, 1) * 1e-2,
        DMatrix::identity(2, 2) * 100.0,
        0.0,
        tf,
        DVector::zeros(2),
        DVector::from_vec(vec![PI, 0.0]),
    )
    .expect("pendulum cost is well formed")
}

/// Swing-up with `u ∈ [-3, 3]`, `x ∈ [-10, 10]²` and a terminal goal.
pub fn pendulum_objective(tf: f64) -> Objective {
    let set = ConstraintSet::builder(2, 1)
        .control_bounds(-3.0, 3.0)
        .state_bounds(-10.0, 10.0)
        .terminal_goal(true)
        .build()
        .expect("pendulum constraints are well formed");
    ConstrainedObjective::new(pendulum_cost(tf), set)
        .expect("pendulum objective is well formed")
        .into()
}

/// Straight-line state guess from `x0` to `xf` with zero controls.
pub fn swing_up_guess(objective: &Objective, horizon: usize) -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
    let cost = objective.cost();
    let states = linear_interpolation(cost.x0(), cost.xf(), horizon + 1);
    let controls = vec![DVector::zeros(cost.control_dim()); horizon];
    (states, controls)
}
