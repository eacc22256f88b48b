//! Regularized Riccati backward pass.
//!
//! Expands the augmented-Lagrangian cost to second order about the nominal
//! trajectory and propagates the value function from the terminal stage:
//!
//! ```text
//! Qx  = ℓx + Cxᵀ(λ + Iμ c) + Aᵀ s        Qxx = ℓxx + Cxᵀ Iμ Cx + Aᵀ S A
//! Qu  = ℓu + Cuᵀ(λ + Iμ c) + Bᵀ s        Quu = ℓuu + Cuᵀ Iμ Cu + Bᵀ S B
//! Qux = Cuᵀ Iμ Cx + Bᵀ S A
//! ```
//!
//! The gains use `S + ρI` in place of `S` (state-space regularization), the
//! value-function update uses the unregularized terms.

use nalgebra::{DMatrix, DVector};

use crate::problem::Problem;
use crate::workspace::{Duals, Gains, Iterate, Linearization};

/// `Quu` was not positive definite at `stage` for the current `ρ`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct IndefiniteHessian {
    pub stage: usize,
}

fn penalty_terms(
    cx: &DMatrix<f64>,
    c: &DVector<f64>,
    lambda: &DVector<f64>,
    active: &DVector<f64>,
) -> (DVector<f64>, DMatrix<f64>) {
    let weighted = lambda + active.component_mul(c);
    let cx_t = cx.transpose();
    let scaled = DMatrix::from_diagonal(active) * cx;
    (&cx_t * weighted, cx_t * scaled)
}

/// Fill `gains` for the nominal trajectory with regularization `rho`.
pub(crate) fn backward_pass(
    problem: &Problem,
    nominal: &Iterate,
    duals: &Duals,
    lin: &Linearization,
    rho: f64,
    gains: &mut Gains,
) -> Result<(), IndefiniteHessian> {
    let n = problem.state_dim();
    let horizon = nominal.controls.len();

    let (mut s, mut s_mat) = problem.terminal_expansion(nominal.final_state());
    if problem.terminal_rows() > 0 {
        let (g, h) = penalty_terms(
            &lin.cx_terminal,
            &nominal.c_terminal,
            &duals.lambda_terminal,
            &nominal.active_terminal,
        );
        s += g;
        s_mat += h;
    }

    let mut dv = [0.0; 2];
    for k in (0..horizon).rev() {
        let expansion = problem.stage_expansion(&nominal.states[k], &nominal.controls[k]);
        let (mut lx, mut lu, mut lxx, mut luu) =
            (expansion.lx, expansion.lu, expansion.lxx, expansion.luu);
        let mut lux = DMatrix::zeros(problem.control_dim(), n);

        if problem.stage_rows() > 0 {
            let weighted = &duals.lambda[k] + nominal.active[k].component_mul(&nominal.c[k]);
            let i_mu = DMatrix::from_diagonal(&nominal.active[k]);
            let cx_t = lin.cx[k].transpose();
            let cu_t = lin.cu[k].transpose();
            lx += &cx_t * &weighted;
            lu += &cu_t * &weighted;
            lxx += &cx_t * &i_mu * &lin.cx[k];
            luu += &cu_t * &i_mu * &lin.cu[k];
            lux += &cu_t * &i_mu * &lin.cx[k];
        }

        let (a, b) = (&lin.a[k], &lin.b[k]);
        let a_t = a.transpose();
        let b_t = b.transpose();

        let qx = lx + &a_t * &s;
        let qu = lu + &b_t * &s;
        let qxx = lxx + &a_t * &s_mat * a;
        let quu = &luu + &b_t * &s_mat * b;
        let qux = &lux + &b_t * &s_mat * a;

        let s_reg = &s_mat + DMatrix::identity(n, n) * rho;
        let quu_reg = luu + &b_t * &s_reg * b;
        let qux_reg = lux + &b_t * &s_reg * a;

        let Some(chol) = quu_reg.cholesky() else {
            return Err(IndefiniteHessian { stage: k });
        };
        let k_gain = -chol.solve(&qux_reg);
        let d = -chol.solve(&qu);

        let k_t = k_gain.transpose();
        s = qx + &k_t * &quu * &d + &k_t * &qu + qux.transpose() * &d;
        let s_new = qxx + &k_t * &quu * &k_gain + &k_t * &qux + qux.transpose() * &k_gain;
        s_mat = (&s_new + s_new.transpose()) * 0.5;

        dv[0] += d.dot(&qu);
        dv[1] += 0.5 * d.dot(&(&quu * &d));
        gains.k[k] = k_gain;
        gains.d[k] = d;
    }
    gains.dv = dv;
    Ok(())
}
