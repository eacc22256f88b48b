//! Parametric reference models.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::dynamics::{Integrator, Model};
use crate::error::{ConfigError, ModelError};

/// Physical parameters of a damped pendulum, `x = [θ, θ̇]`, `u = [τ]`.
///
/// `θ = 0` hangs straight down. Deserializes from a TOML table with every
/// field optional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendulumParams {
    pub mass: f64,
    pub damping: f64,
    /// Pivot to center of mass.
    pub lc: f64,
    pub inertia: f64,
    pub gravity: f64,
}

impl Default for PendulumParams {
    fn default() -> Self {
        Self {
            mass: 1.0,
            damping: 0.1,
            lc: 0.5,
            inertia: 0.25,
            gravity: 9.81,
        }
    }
}

impl PendulumParams {
    /// Inertia must be positive; the others finite and non-negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.inertia > 0.0 && self.inertia.is_finite()) {
            return Err(ConfigError::invalid(
                "pendulum.inertia",
                format!("{} (must be finite and > 0)", self.inertia),
            ));
        }
        for (field, value) in [
            ("pendulum.mass", self.mass),
            ("pendulum.damping", self.damping),
            ("pendulum.lc", self.lc),
            ("pendulum.gravity", self.gravity),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::invalid(field, format!("{value} (must be finite and >= 0)")));
            }
        }
        Ok(())
    }

    /// Gravity torque coefficient `m g l_c`.
    fn torque(&self) -> f64 {
        self.mass * self.gravity * self.lc
    }

    /// `ẋ = [θ̇, (τ − m g l_c sin θ − b θ̇) / J]`.
    pub fn field(&self, out: &mut DVector<f64>, x: &DVector<f64>, u: &DVector<f64>) {
        out[0] = x[1];
        out[1] = (u[0] - self.torque() * x[0].sin() - self.damping * x[1]) / self.inertia;
    }

    /// Jacobians of [`field`](Self::field) with respect to `x` and `u`.
    pub fn field_jacobians(&self, x: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let a = DMatrix::from_row_slice(
            2,
            2,
            &[0.0, 1.0, -self.torque() * x[0].cos() / self.inertia, -self.damping / self.inertia],
        );
        let b = DMatrix::from_row_slice(2, 1, &[0.0, 1.0 / self.inertia]);
        (a, b)
    }

    /// Pendulum integrated with `integrator` and analytic field Jacobians.
    pub fn model_with(self, integrator: Integrator) -> Result<Model, ModelError> {
        Model::continuous_in_place(2, 1, integrator, move |out, x, u| self.field(out, x, u))?
            .with_jacobians(move |x, _u, _dt| self.field_jacobians(x))
    }

    /// RK4 pendulum.
    pub fn model(self) -> Result<Model, ModelError> {
        self.model_with(Integrator::Rk4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::Dynamics;
    use approx::assert_relative_eq;

    #[test]
    fn rests_at_the_bottom() {
        let model = PendulumParams::default().model().unwrap();
        let next = model.step(&DVector::zeros(2), &DVector::zeros(1), 0.1);
        assert!(next.amax() < 1e-15);
    }

    #[test]
    fn heavier_bob_falls_faster() {
        let x = DVector::from_vec(vec![std::f64::consts::FRAC_PI_2, 0.0]);
        let u = DVector::zeros(1);
        let light = PendulumParams::default().model().unwrap().step(&x, &u, 0.05);
        let heavy = PendulumParams {
            mass: 2.0,
            ..PendulumParams::default()
        }
        .model()
        .unwrap()
        .step(&x, &u, 0.05);
        assert!(light[1] < 0.0);
        assert!(heavy[1] < light[1]);
    }

    #[test]
    fn analytic_jacobians_match_finite_differences() {
        let params = PendulumParams {
            damping: 0.3,
            ..PendulumParams::default()
        };
        let analytic = params.model().unwrap();
        let numeric =
            Model::continuous_in_place(2, 1, Integrator::Rk4, move |out, x, u| params.field(out, x, u)).unwrap();
        let x = DVector::from_vec(vec![0.7, -1.2]);
        let u = DVector::from_element(1, 0.4);

        let (a, b) = analytic.jacobians(&x, &u, 0.05);
        let (a_fd, b_fd) = numeric.jacobians(&x, &u, 0.05);
        assert_relative_eq!(a, a_fd, epsilon = 1e-6);
        assert_relative_eq!(b, b_fd, epsilon = 1e-6);
    }

    #[test]
    fn toml_overrides_single_fields() {
        let params: PendulumParams = toml::from_str("mass = 2.0\ngravity = 1.62").unwrap();
        assert_relative_eq!(params.mass, 2.0);
        assert_relative_eq!(params.gravity, 1.62);
        assert_relative_eq!(params.inertia, PendulumParams::default().inertia);
    }

    #[test]
    fn zero_inertia_rejected() {
        let params = PendulumParams {
            inertia: 0.0,
            ..PendulumParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "pendulum.inertia"
        ));
        assert!(PendulumParams::default().validate().is_ok());
    }
}
