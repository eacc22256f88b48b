//! Dynamics adapter: the forward-step contract consumed by the solver.
//!
//! A [`Dynamics`] implementation maps `(x, u, dt)` to the next state and
//! supplies the Jacobians `A = ∂x'/∂x`, `B = ∂x'/∂u`. The [`Model`] adapter
//! accepts user callables in several shapes and normalizes them once, at
//! construction, into a single in-place step:
//!
//! ```text
//! discrete in-place    f(out, x, u, dt)      ──┐
//! discrete allocating  f(x, u, dt) -> x'     ──┤
//! continuous in-place  f(out, x, u)          ──┼──► Model::step_into(out, x, u, dt)
//! continuous allocating f(x, u) -> ẋ         ──┘    (continuous forms via Integrator)
//! ```
//!
//! Allocating forms are probed with a zero state/control to check the output
//! length; a mismatch is a [`ModelError`]. Jacobians default to central finite
//! differences of the step and may be replaced by analytic callbacks.

use nalgebra::{DMatrix, DVector};

use crate::error::ModelError;

/// Relative perturbation for central finite differences.
pub const FD_STEP: f64 = 1e-6;

/// Time step used when probing allocating callables for their output length.
const PROBE_DT: f64 = 1e-2;

type DiscreteStepFn = Box<dyn Fn(&mut DVector<f64>, &DVector<f64>, &DVector<f64>, f64) + Send + Sync>;
type VectorFieldFn = Box<dyn Fn(&mut DVector<f64>, &DVector<f64>, &DVector<f64>) + Send + Sync>;
type DiscreteJacobianFn =
    Box<dyn Fn(&DVector<f64>, &DVector<f64>, f64) -> (DMatrix<f64>, DMatrix<f64>) + Send + Sync>;
type FieldJacobianFn =
    Box<dyn Fn(&DVector<f64>, &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) + Send + Sync>;

// ---------------------------------------------------------------------------
// Dynamics trait
// ---------------------------------------------------------------------------

/// Discrete-time dynamics `x' = f(x, u, dt)` with Jacobians.
///
/// Implementations must be deterministic: the solver relies on identical
/// inputs producing bit-identical outputs.
pub trait Dynamics {
    /// State dimension `n`.
    fn state_dim(&self) -> usize;

    /// Control dimension `m`.
    fn control_dim(&self) -> usize;

    /// Write the next state into `out` (length `n`).
    fn step_into(&self, out: &mut DVector<f64>, x: &DVector<f64>, u: &DVector<f64>, dt: f64);

    /// Allocating convenience wrapper around [`Dynamics::step_into`].
    fn step(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64) -> DVector<f64> {
        let mut out = DVector::zeros(self.state_dim());
        self.step_into(&mut out, x, u, dt);
        out
    }

    /// Jacobians `(A, B)` of the step with respect to state and control.
    fn jacobians(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        finite_difference_jacobians(self, x, u, dt)
    }
}

/// Central finite-difference Jacobians of `model.step`.
pub fn finite_difference_jacobians<D: Dynamics + ?Sized>(
    model: &D,
    x: &DVector<f64>,
    u: &DVector<f64>,
    dt: f64,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let n = model.state_dim();
    let m = model.control_dim();
    let mut a = DMatrix::zeros(n, n);
    let mut b = DMatrix::zeros(n, m);
    let mut plus = DVector::zeros(n);
    let mut minus = DVector::zeros(n);

    let mut xp = x.clone();
    for j in 0..n {
        let h = FD_STEP * x[j].abs().max(1.0);
        xp[j] = x[j] + h;
        model.step_into(&mut plus, &xp, u, dt);
        xp[j] = x[j] - h;
        model.step_into(&mut minus, &xp, u, dt);
        xp[j] = x[j];
        a.set_column(j, &((&plus - &minus) / (2.0 * h)));
    }

    let mut up = u.clone();
    for j in 0..m {
        let h = FD_STEP * u[j].abs().max(1.0);
        up[j] = u[j] + h;
        model.step_into(&mut plus, x, &up, dt);
        up[j] = u[j] - h;
        model.step_into(&mut minus, x, &up, dt);
        up[j] = u[j];
        b.set_column(j, &((&plus - &minus) / (2.0 * h)));
    }

    (a, b)
}

// ---------------------------------------------------------------------------
// Integrator
// ---------------------------------------------------------------------------

const EULER_A: &[&[f64]] = &[&[]];
const EULER_B: &[f64] = &[1.0];
const MIDPOINT_A: &[&[f64]] = &[&[], &[0.5]];
const MIDPOINT_B: &[f64] = &[0.0, 1.0];
const RK3_A: &[&[f64]] = &[&[], &[0.5], &[-1.0, 2.0]];
const RK3_B: &[f64] = &[1.0 / 6.0, 2.0 / 3.0, 1.0 / 6.0];
const RK4_A: &[&[f64]] = &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]];
const RK4_B: &[f64] = &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0];

/// Explicit Runge-Kutta scheme used to discretize a continuous vector field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Integrator {
    /// Forward Euler (first order).
    Euler,
    /// Explicit midpoint (second order).
    Midpoint,
    /// Kutta's third-order method.
    Rk3,
    /// Classic fourth-order Runge-Kutta.
    #[default]
    Rk4,
}

impl Integrator {
    /// Butcher tableau `(a, b)`; `a[i]` holds the coefficients of stage `i`
    /// on the previous stages.
    const fn tableau(self) -> (&'static [&'static [f64]], &'static [f64]) {
        match self {
            Self::Euler => (EULER_A, EULER_B),
            Self::Midpoint => (MIDPOINT_A, MIDPOINT_B),
            Self::Rk3 => (RK3_A, RK3_B),
            Self::Rk4 => (RK4_A, RK4_B),
        }
    }

    /// Number of vector-field evaluations per step.
    pub const fn stages(self) -> usize {
        self.tableau().1.len()
    }

    /// Stage input `x + dt Σ_j a_ij k_j`.
    fn stage_state(
        x: &DVector<f64>,
        coeffs: &[f64],
        slopes: &[DVector<f64>],
        dt: f64,
    ) -> DVector<f64> {
        let mut xi = x.clone();
        for (aij, kj) in coeffs.iter().zip(slopes) {
            if *aij != 0.0 {
                xi.axpy(dt * aij, kj, 1.0);
            }
        }
        xi
    }

    fn integrate(
        self,
        field: &VectorFieldFn,
        out: &mut DVector<f64>,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) {
        let (a, b) = self.tableau();
        let mut slopes: Vec<DVector<f64>> = Vec::with_capacity(self.stages());
        for coeffs in a {
            let xi = Self::stage_state(x, coeffs, &slopes, dt);
            let mut k = DVector::zeros(x.len());
            field(&mut k, &xi, u);
            slopes.push(k);
        }
        out.copy_from(x);
        for (bi, ki) in b.iter().zip(&slopes) {
            if *bi != 0.0 {
                out.axpy(dt * bi, ki, 1.0);
            }
        }
    }

    /// Chain the vector-field Jacobians through the Runge-Kutta stages.
    fn integrate_jacobians(
        self,
        field: &VectorFieldFn,
        field_jacobians: &FieldJacobianFn,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let n = x.len();
        let m = u.len();
        let (a, b) = self.tableau();
        let mut slopes: Vec<DVector<f64>> = Vec::with_capacity(self.stages());
        let mut dk_dx: Vec<DMatrix<f64>> = Vec::with_capacity(self.stages());
        let mut dk_du: Vec<DMatrix<f64>> = Vec::with_capacity(self.stages());

        for coeffs in a {
            let xi = Self::stage_state(x, coeffs, &slopes, dt);
            let mut dxi_dx = DMatrix::identity(n, n);
            let mut dxi_du = DMatrix::zeros(n, m);
            for (j, aij) in coeffs.iter().enumerate() {
                if *aij != 0.0 {
                    dxi_dx += &dk_dx[j] * (dt * aij);
                    dxi_du += &dk_du[j] * (dt * aij);
                }
            }
            let (fx, fu) = field_jacobians(&xi, u);
            dk_dx.push(&fx * dxi_dx);
            dk_du.push(&fx * dxi_du + fu);

            let mut k = DVector::zeros(n);
            field(&mut k, &xi, u);
            slopes.push(k);
        }

        let mut jac_a = DMatrix::identity(n, n);
        let mut jac_b = DMatrix::zeros(n, m);
        for (i, bi) in b.iter().enumerate() {
            if *bi != 0.0 {
                jac_a += &dk_dx[i] * (dt * bi);
                jac_b += &dk_du[i] * (dt * bi);
            }
        }
        (jac_a, jac_b)
    }
}

// ---------------------------------------------------------------------------
// Model adapter
// ---------------------------------------------------------------------------

enum Transition {
    Discrete(DiscreteStepFn),
    Continuous {
        field: VectorFieldFn,
        integrator: Integrator,
    },
}

enum Derivatives {
    FiniteDifference,
    Discrete(DiscreteJacobianFn),
    Field(FieldJacobianFn),
}

/// Dynamics model built from user callables.
///
/// The callable form is fixed at construction; every solver call goes
/// through the same in-place step.
pub struct Model {
    n: usize,
    m: usize,
    transition: Transition,
    derivatives: Derivatives,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.transition {
            Transition::Discrete(_) => "discrete".to_string(),
            Transition::Continuous { integrator, .. } => format!("continuous/{integrator:?}"),
        };
        let derivatives = match self.derivatives {
            Derivatives::FiniteDifference => "finite-difference",
            Derivatives::Discrete(_) | Derivatives::Field(_) => "analytic",
        };
        f.debug_struct("Model")
            .field("n", &self.n)
            .field("m", &self.m)
            .field("kind", &kind)
            .field("derivatives", &derivatives)
            .finish()
    }
}

impl Model {
    const fn check_dims(n: usize, m: usize) -> Result<(), ModelError> {
        if n == 0 || m == 0 {
            return Err(ModelError::ZeroDimension { n, m });
        }
        Ok(())
    }

    fn probe_len(n: usize, got: usize) -> Result<(), ModelError> {
        if got == n {
            Ok(())
        } else {
            Err(ModelError::OutputDimension { expected: n, got })
        }
    }

    /// Discrete dynamics that write the next state into a buffer.
    pub fn discrete_in_place<F>(n: usize, m: usize, f: F) -> Result<Self, ModelError>
    where
        F: Fn(&mut DVector<f64>, &DVector<f64>, &DVector<f64>, f64) + Send + Sync + 'static,
    {
        Self::check_dims(n, m)?;
        Ok(Self {
            n,
            m,
            transition: Transition::Discrete(Box::new(f)),
            derivatives: Derivatives::FiniteDifference,
        })
    }

    /// Discrete dynamics that return a freshly allocated next state.
    ///
    /// Probed once to verify the output length, then wrapped in place.
    pub fn discrete<F>(n: usize, m: usize, f: F) -> Result<Self, ModelError>
    where
        F: Fn(&DVector<f64>, &DVector<f64>, f64) -> DVector<f64> + Send + Sync + 'static,
    {
        Self::check_dims(n, m)?;
        let probe = f(&DVector::zeros(n), &DVector::zeros(m), PROBE_DT);
        Self::probe_len(n, probe.len())?;
        Self::discrete_in_place(n, m, move |out, x, u, dt| out.copy_from(&f(x, u, dt)))
    }

    /// Continuous vector field `ẋ = f(x, u)` written into a buffer.
    pub fn continuous_in_place<F>(
        n: usize,
        m: usize,
        integrator: Integrator,
        f: F,
    ) -> Result<Self, ModelError>
    where
        F: Fn(&mut DVector<f64>, &DVector<f64>, &DVector<f64>) + Send + Sync + 'static,
    {
        Self::check_dims(n, m)?;
        Ok(Self {
            n,
            m,
            transition: Transition::Continuous {
                field: Box::new(f),
                integrator,
            },
            derivatives: Derivatives::FiniteDifference,
        })
    }

    /// Continuous vector field returning a freshly allocated `ẋ`.
    pub fn continuous<F>(n: usize, m: usize, integrator: Integrator, f: F) -> Result<Self, ModelError>
    where
        F: Fn(&DVector<f64>, &DVector<f64>) -> DVector<f64> + Send + Sync + 'static,
    {
        Self::check_dims(n, m)?;
        let probe = f(&DVector::zeros(n), &DVector::zeros(m));
        Self::probe_len(n, probe.len())?;
        Self::continuous_in_place(n, m, integrator, move |out, x, u| out.copy_from(&f(x, u)))
    }

    /// Attach analytic Jacobians.
    ///
    /// For discrete models `jac` returns `(∂x'/∂x, ∂x'/∂u)`. For continuous
    /// models it must return the vector-field Jacobians `(∂ẋ/∂x, ∂ẋ/∂u)`, and
    /// the `dt` argument is ignored; they are chained through the integrator.
    pub fn with_jacobians<J>(mut self, jac: J) -> Result<Self, ModelError>
    where
        J: Fn(&DVector<f64>, &DVector<f64>, f64) -> (DMatrix<f64>, DMatrix<f64>)
            + Send
            + Sync
            + 'static,
    {
        let (a, b) = jac(&DVector::zeros(self.n), &DVector::zeros(self.m), PROBE_DT);
        check_shape("A", &a, self.n, self.n)?;
        check_shape("B", &b, self.n, self.m)?;
        self.derivatives = match self.transition {
            Transition::Discrete(_) => Derivatives::Discrete(Box::new(jac)),
            Transition::Continuous { .. } => Derivatives::Field(Box::new(
                move |x: &DVector<f64>, u: &DVector<f64>| jac(x, u, 0.0),
            )),
        };
        Ok(self)
    }

    /// Whether Jacobians come from finite differences.
    pub const fn uses_finite_differences(&self) -> bool {
        matches!(self.derivatives, Derivatives::FiniteDifference)
    }
}

fn check_shape(
    name: &'static str,
    mat: &DMatrix<f64>,
    rows: usize,
    cols: usize,
) -> Result<(), ModelError> {
    if mat.nrows() == rows && mat.ncols() == cols {
        Ok(())
    } else {
        Err(ModelError::JacobianShape {
            name,
            rows: mat.nrows(),
            cols: mat.ncols(),
            expected_rows: rows,
            expected_cols: cols,
        })
    }
}

impl Dynamics for Model {
    fn state_dim(&self) -> usize {
        self.n
    }

    fn control_dim(&self) -> usize {
        self.m
    }

    fn step_into(&self, out: &mut DVector<f64>, x: &DVector<f64>, u: &DVector<f64>, dt: f64) {
        match &self.transition {
            Transition::Discrete(f) => f(out, x, u, dt),
            Transition::Continuous { field, integrator } => {
                integrator.integrate(field, out, x, u, dt);
            }
        }
    }

    fn jacobians(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        match (&self.derivatives, &self.transition) {
            (Derivatives::Discrete(jac), _) => jac(x, u, dt),
            (Derivatives::Field(jac), Transition::Continuous { field, integrator }) => {
                integrator.integrate_jacobians(field, jac, x, u, dt)
            }
            _ => finite_difference_jacobians(self, x, u, dt),
        }
    }
}

impl<D: Dynamics + ?Sized> Dynamics for &D {
    fn state_dim(&self) -> usize {
        (**self).state_dim()
    }

    fn control_dim(&self) -> usize {
        (**self).control_dim()
    }

    fn step_into(&self, out: &mut DVector<f64>, x: &DVector<f64>, u: &DVector<f64>, dt: f64) {
        (**self).step_into(out, x, u, dt);
    }

    fn jacobians(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        (**self).jacobians(x, u, dt)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn damped_pendulum(out: &mut DVector<f64>, x: &DVector<f64>, u: &DVector<f64>) {
        out[0] = x[1];
        out[1] = u[0] - 9.81 * x[0].sin() - 0.1 * x[1];
    }

    fn damped_pendulum_jacobians(
        x: &DVector<f64>,
        _u: &DVector<f64>,
        _dt: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let fx = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -9.81 * x[0].cos(), -0.1]);
        let fu = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        (fx, fu)
    }

    #[test]
    fn rk4_matches_exponential_decay() {
        let model = Model::continuous(1, 1, Integrator::Rk4, |x, _u| -x).unwrap();
        let x = DVector::from_element(1, 1.0);
        let u = DVector::zeros(1);
        let next = model.step(&x, &u, 0.1);
        assert_relative_eq!(next[0], (-0.1_f64).exp(), epsilon = 1e-7);
    }

    #[test]
    fn integrator_order_improves_accuracy() {
        let exact = (-0.2_f64).exp();
        let x = DVector::from_element(1, 1.0);
        let u = DVector::zeros(1);
        let mut errors = Vec::new();
        for integrator in [Integrator::Euler, Integrator::Midpoint, Integrator::Rk3, Integrator::Rk4] {
            let model = Model::continuous(1, 1, integrator, |x, _u| -x).unwrap();
            errors.push((model.step(&x, &u, 0.2)[0] - exact).abs());
        }
        for pair in errors.windows(2) {
            assert!(pair[1] < pair[0], "errors not decreasing: {errors:?}");
        }
    }

    #[test]
    fn in_place_and_allocating_forms_agree() {
        let in_place =
            Model::continuous_in_place(2, 1, Integrator::Rk4, damped_pendulum).unwrap();
        let allocating = Model::continuous(2, 1, Integrator::Rk4, |x, u| {
            let mut out = DVector::zeros(2);
            damped_pendulum(&mut out, x, u);
            out
        })
        .unwrap();
        let x = DVector::from_vec(vec![0.3, -0.2]);
        let u = DVector::from_vec(vec![1.5]);
        assert_eq!(in_place.step(&x, &u, 0.05), allocating.step(&x, &u, 0.05));
    }

    #[test]
    fn allocating_probe_rejects_wrong_length() {
        let err = Model::discrete(2, 1, |_x, _u, _dt| DVector::zeros(3)).unwrap_err();
        assert_eq!(
            err,
            ModelError::OutputDimension {
                expected: 2,
                got: 3
            }
        );
    }

    #[test]
    fn zero_dimension_rejected() {
        let err = Model::discrete_in_place(0, 1, |_o, _x, _u, _dt| {}).unwrap_err();
        assert!(matches!(err, ModelError::ZeroDimension { n: 0, m: 1 }));
    }

    #[test]
    fn jacobian_shape_checked() {
        let model = Model::discrete_in_place(2, 1, |out, x, _u, _dt| out.copy_from(x)).unwrap();
        let err = model
            .with_jacobians(|_x, _u, _dt| (DMatrix::identity(2, 2), DMatrix::zeros(2, 2)))
            .unwrap_err();
        assert!(matches!(err, ModelError::JacobianShape { name: "B", .. }));
    }

    #[test]
    fn analytic_jacobians_match_finite_differences() {
        let fd = Model::continuous_in_place(2, 1, Integrator::Rk4, damped_pendulum).unwrap();
        let analytic = Model::continuous_in_place(2, 1, Integrator::Rk4, damped_pendulum)
            .unwrap()
            .with_jacobians(damped_pendulum_jacobians)
            .unwrap();
        assert!(fd.uses_finite_differences());
        assert!(!analytic.uses_finite_differences());

        let x = DVector::from_vec(vec![0.7, 0.4]);
        let u = DVector::from_vec(vec![-0.5]);
        let (a_fd, b_fd) = fd.jacobians(&x, &u, 0.1);
        let (a_an, b_an) = analytic.jacobians(&x, &u, 0.1);
        assert_relative_eq!(a_fd, a_an, epsilon = 1e-6);
        assert_relative_eq!(b_fd, b_an, epsilon = 1e-6);
    }

    #[test]
    fn linear_discrete_jacobians_are_exact() {
        let model = Model::discrete_in_place(2, 1, |out, x, u, dt| {
            out[0] = x[0] + dt * x[1];
            out[1] = x[1] + dt * u[0];
        })
        .unwrap();
        let (a, b) = model.jacobians(&DVector::from_vec(vec![3.0, -1.0]), &DVector::zeros(1), 0.1);
        assert_relative_eq!(a, DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]), epsilon = 1e-8);
        assert_relative_eq!(b, DMatrix::from_row_slice(2, 1, &[0.0, 0.1]), epsilon = 1e-8);
    }
}
