//! Reference dynamics models with analytic Jacobians.

use nalgebra::DMatrix;

use trajopt_core::dynamics::Model;
use trajopt_core::models::PendulumParams;

/// Discrete double integrator `x = [p, v]`, `u = [a]`, exact zero-order hold.
///
/// Linear, so iLQR on a quadratic cost converges in one step.
pub fn double_integrator() -> Model {
    Model::discrete_in_place(2, 1, |out, x, u, dt| {
        out[0] = x[0] + dt * x[1] + 0.5 * dt * dt * u[0];
        out[1] = x[1] + dt * u[0];
    })
    .and_then(|model| {
        model.with_jacobians(|_x, _u, dt| {
            let a = DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
            let b = DMatrix::from_row_slice(2, 1, &[0.5 * dt * dt, dt]);
            (a, b)
        })
    })
    .expect("double integrator fixture is well formed")
}

/// Damped pendulum with default [`PendulumParams`], RK4 and analytic
/// Jacobians.
pub fn pendulum() -> Model {
    PendulumParams::default()
        .model()
        .expect("pendulum fixture is well formed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;
    use trajopt_core::dynamics::Dynamics;

    #[test]
    fn double_integrator_integrates_constant_acceleration() {
        let model = double_integrator();
        let mut x = DVector::zeros(2);
        let u = DVector::from_element(1, 2.0);
        for _ in 0..10 {
            x = model.step(&x, &u, 0.1);
        }
        // p = ½ a t², v = a t at t = 1.
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn pendulum_falls_from_horizontal() {
        let model = pendulum();
        let x = DVector::from_vec(vec![std::f64::consts::FRAC_PI_2, 0.0]);
        let next = model.step(&x, &DVector::zeros(1), 0.05);
        assert!(next[1] < 0.0);
    }
}
