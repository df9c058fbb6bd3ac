//! Average Information REML (AI-REML) for variance component estimation.
//!
//! Estimates theta = [theta_1, ..., theta_k, theta_e] for
//!   V = sum_i theta_i * G_i + theta_e * I
//! by iterating
//!   theta_new = theta_old + AI^{-1} * score
//!
//! where AI is the Average Information matrix and score is the REML score
//! vector. V is dense and factored with Cholesky at every iteration.

use genvar_linalg::decomposition::CholeskyDecomp;
use genvar_linalg::DenseMatrix;
use tracing::{debug, info, warn};

use super::{validate_inputs, RemlConfig, RemlFit, VarianceEstimator};
use crate::error::{GenvarError, Result};

/// In-process AI-REML estimator.
#[derive(Debug, Clone, Default)]
pub struct AiReml {
    pub config: RemlConfig,
}

impl AiReml {
    pub fn new(config: RemlConfig) -> Self {
        Self { config }
    }
}

impl VarianceEstimator for AiReml {
    fn estimate(
        &self,
        y: &[f64],
        x: Option<&DenseMatrix>,
        kernels: &[DenseMatrix],
        initial_theta: Option<&[f64]>,
    ) -> Result<RemlFit> {
        fit_ai_reml(y, x, kernels, initial_theta, &self.config)
    }
}

/// V^{-1}, P and the pieces of X'V^{-1}X needed for one iteration or the
/// final summary.
struct Projection {
    v_chol: CholeskyDecomp,
    vinv: DenseMatrix,
    p: DenseMatrix,
    /// Cholesky of X'V^{-1}X and V^{-1}X, absent without fixed effects.
    fixed: Option<(CholeskyDecomp, DenseMatrix)>,
}

/// V = sum_i theta_i G_i + theta_e I.
fn build_v(theta: &[f64], kernels: &[DenseMatrix], n: usize) -> DenseMatrix {
    let mut v = DenseMatrix::zeros(n, n);
    for (g, &t) in kernels.iter().zip(theta) {
        v.add_scaled(g, t);
    }
    if let Some(&res) = theta.last() {
        v.add_diag(res);
    }
    v
}

fn project(
    theta: &[f64],
    kernels: &[DenseMatrix],
    x: Option<&DenseMatrix>,
    n: usize,
) -> Result<Projection> {
    let v = build_v(theta, kernels, n);
    let v_chol =
        CholeskyDecomp::new(&v).map_err(|e| GenvarError::numerical("Cholesky of V", e))?;
    let vinv = v_chol.inverse();

    let Some(x) = x.filter(|x| x.ncols() > 0) else {
        return Ok(Projection {
            v_chol,
            p: vinv.clone(),
            vinv,
            fixed: None,
        });
    };

    // P = V^{-1} - V^{-1}X (X'V^{-1}X)^{-1} X'V^{-1}
    let vinv_x = vinv.mat_mul(x);
    let xtvx = x.transpose().mat_mul(&vinv_x);
    let xtvx_chol = CholeskyDecomp::new(&xtvx)
        .map_err(|e| GenvarError::numerical("Cholesky of X'V^-1X", e))?;
    let correction = vinv_x.mat_mul(&xtvx_chol.solve_matrix(&vinv_x.transpose()));
    let mut p = vinv.clone();
    p.add_scaled(&correction, -1.0);

    Ok(Projection {
        v_chol,
        vinv,
        p,
        fixed: Some((xtvx_chol, vinv_x)),
    })
}

/// AI[i,j] = 0.5 u_i' P u_j with u_i = G_i Py, and u = Py for the
/// residual component. Returns AI and the u vectors.
fn average_information(
    proj: &Projection,
    kernels: &[DenseMatrix],
    py: &[f64],
) -> (DenseMatrix, Vec<Vec<f64>>) {
    let mut us: Vec<Vec<f64>> = kernels.iter().map(|g| g.mat_vec(py)).collect();
    us.push(py.to_vec());
    let pus: Vec<Vec<f64>> = us.iter().map(|u| proj.p.mat_vec(u)).collect();

    let n_comp = us.len();
    let mut ai = DenseMatrix::zeros(n_comp, n_comp);
    for i in 0..n_comp {
        for j in i..n_comp {
            let v = 0.5 * DenseMatrix::dot(&us[i], &pus[j]);
            ai.set(i, j, v);
            ai.set(j, i, v);
        }
    }
    (ai, us)
}

/// Starting values: sd(y) / (k + 1) for every component.
pub(crate) fn default_theta(y: &[f64], n_components: usize) -> Vec<f64> {
    let n = y.len() as f64;
    let mean = y.iter().sum::<f64>() / n;
    let var = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    vec![var.sqrt() / n_components as f64; n_components]
}

/// Fit variance components with AI-REML.
///
/// `kernels` holds the k random-effect kernels; the residual identity is
/// added as the last component. Returns the current estimate with
/// `converged = false` if `max_iter` is reached.
pub fn fit_ai_reml(
    y: &[f64],
    x: Option<&DenseMatrix>,
    kernels: &[DenseMatrix],
    initial_theta: Option<&[f64]>,
    config: &RemlConfig,
) -> Result<RemlFit> {
    validate_inputs(y, x, kernels, initial_theta, config)?;
    let n = y.len();
    let k = kernels.len();
    let n_comp = k + 1;
    let p_fixed = x.map_or(0, |x| x.ncols());

    let mut theta: Vec<f64> = match initial_theta {
        Some(t) => t.to_vec(),
        None => default_theta(y, n_comp),
    };
    for t in theta.iter_mut() {
        *t = t.max(config.floor);
    }

    info!(
        "Starting AI-REML with n={}, p={}, {} kernel(s), theta0={:?}",
        n, p_fixed, k, theta
    );

    let mut delta = f64::INFINITY;
    let mut iterations = 0;

    while iterations < config.max_iter && delta > config.tol {
        iterations += 1;
        let proj = project(&theta, kernels, x, n)?;
        let py = proj.p.mat_vec(y);
        let (ai, us) = average_information(&proj, kernels, &py);

        let mut score = Vec::with_capacity(n_comp);
        for (g, u) in kernels.iter().zip(&us) {
            score.push(-0.5 * (g.sum_product(&proj.p) - DenseMatrix::dot(u, &py)));
        }
        score.push(-0.5 * (proj.p.trace() - DenseMatrix::dot(&py, &py)));

        let ai_chol = CholeskyDecomp::new(&ai)
            .map_err(|e| GenvarError::numerical("Cholesky of the AI matrix", e))?;
        let step = ai_chol.solve(&score);

        delta = 0.0;
        for (t, s) in theta.iter_mut().zip(&step) {
            let updated = (*t + s).max(config.floor);
            delta = f64::max(delta, (updated - *t).abs());
            *t = updated;
        }

        debug!(
            "AI-REML iter {}: theta={:?}, delta={:.3e}",
            iterations, theta, delta
        );
    }

    let converged = delta <= config.tol;
    if converged {
        info!(
            "AI-REML converged after {} iterations: theta={:?}",
            iterations, theta
        );
    } else {
        warn!(
            "AI-REML did not converge after {} iterations (delta={:.3e}, tol={:.1e})",
            iterations, delta, config.tol
        );
    }

    finalize(y, x, kernels, theta, iterations, delta, converged)
}

#[allow(clippy::too_many_arguments)]
fn finalize(
    y: &[f64],
    x: Option<&DenseMatrix>,
    kernels: &[DenseMatrix],
    theta: Vec<f64>,
    iterations: usize,
    final_delta: f64,
    converged: bool,
) -> Result<RemlFit> {
    let n = y.len();
    let proj = project(&theta, kernels, x, n)?;
    let py = proj.p.mat_vec(y);
    let vy = proj.vinv.mat_vec(y);
    let y_vinv_y = DenseMatrix::dot(y, &vy);
    let y_p_y = DenseMatrix::dot(y, &py);

    // Sampling covariance of theta from the AI matrix at the reported theta.
    let (ai, _) = average_information(&proj, kernels, &py);
    let theta_cov = CholeskyDecomp::new(&ai)
        .map_err(|e| GenvarError::numerical("Cholesky of the final AI matrix", e))?
        .inverse();

    let log_det_v = proj.v_chol.log_det();
    let (log_det_xtvx, fixed_effects, fixed_effect_cov) = match &proj.fixed {
        Some((xtvx_chol, vinv_x)) => {
            let b = xtvx_chol.solve(&vinv_x.tmat_vec(y));
            (xtvx_chol.log_det(), b, xtvx_chol.inverse())
        }
        None => (0.0, Vec::new(), DenseMatrix::zeros(0, 0)),
    };
    let log_likelihood = -0.5 * (log_det_v + log_det_xtvx + y_p_y);

    let trace_pg = kernels.iter().map(|g| g.sum_product(&proj.p)).collect();
    let trace_vg = kernels.iter().map(|g| g.sum_product(&proj.vinv)).collect();

    Ok(RemlFit::assemble(
        y,
        x,
        kernels,
        super::RemlEstimates {
            theta,
            theta_cov,
            log_likelihood,
            fixed_effects,
            fixed_effect_cov,
            py,
            vy: Some(vy),
            y_vinv_y: Some(y_vinv_y),
            trace_pg,
            trace_vg,
            iterations,
            final_delta,
            converged,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_way() -> (Vec<f64>, DenseMatrix, DenseMatrix) {
        let y = vec![5.0, 8.0, 6.0, 2.0, 3.0, 1.0, 2.0, 4.0, 5.0];
        let groups = [0usize, 0, 0, 1, 1, 1, 2, 2, 2];
        let k = DenseMatrix::from_fn(9, 9, |i, j| (groups[i] == groups[j]) as u8 as f64);
        let x = DenseMatrix::from_fn(9, 1, |_, _| 1.0);
        (y, x, k)
    }

    #[test]
    fn test_default_theta() {
        let theta = default_theta(&[5.0, 8.0, 6.0, 2.0, 3.0, 1.0, 2.0, 4.0, 5.0], 2);
        assert_eq!(theta.len(), 2);
        assert!((theta[0] - 5.0f64.sqrt() / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_build_v_adds_residual_identity() {
        let g = DenseMatrix::from_row_major(2, 2, &[1.0, 0.5, 0.5, 1.0]);
        let v = build_v(&[2.0, 3.0], &[g], 2);
        assert!((v.get(0, 0) - 5.0).abs() < 1e-12);
        assert!((v.get(0, 1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_one_way_anova_with_intercept() {
        let (y, x, k) = one_way();
        let config = RemlConfig {
            tol: 1e-8,
            ..Default::default()
        };
        let fit = fit_ai_reml(&y, Some(&x), &[k], None, &config).unwrap();
        assert!(fit.converged);
        assert!((fit.theta[0] - 112.0 / 27.0).abs() < 1e-6, "{:?}", fit.theta);
        assert!((fit.theta[1] - 17.0 / 9.0).abs() < 1e-6, "{:?}", fit.theta);
        assert!((fit.fixed_effects[0] - 4.0).abs() < 1e-6);
        assert!(fit.log_likelihood.is_finite());
    }

    #[test]
    fn test_no_fixed_effects() {
        let (y, _, k) = one_way();
        let config = RemlConfig {
            tol: 1e-8,
            ..Default::default()
        };
        let fit = fit_ai_reml(&y, None, &[k], None, &config).unwrap();
        assert!(fit.converged);
        assert!((fit.theta[0] - 167.0 / 9.0).abs() < 1e-6, "{:?}", fit.theta);
        assert!((fit.theta[1] - 17.0 / 9.0).abs() < 1e-6);
        assert!(fit.fixed_effects.is_empty());
    }

    #[test]
    fn test_max_iter_reports_non_convergence() {
        let (y, x, k) = one_way();
        let config = RemlConfig {
            max_iter: 2,
            tol: 1e-12,
            ..Default::default()
        };
        let fit = fit_ai_reml(&y, Some(&x), &[k], None, &config).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 2);
        assert!(fit.final_delta > config.tol);
    }

    #[test]
    fn test_non_pd_kernel_fails() {
        let (y, x, _) = one_way();
        let bad = DenseMatrix::from_fn(9, 9, |i, j| if i == j { -10.0 } else { 0.0 });
        let err = fit_ai_reml(&y, Some(&x), &[bad], Some(&[1.0, 1.0]), &RemlConfig::default());
        assert!(matches!(err, Err(GenvarError::NumericalFailure { .. })));
    }

    #[test]
    fn test_theta_cov_matches_returned_theta() {
        let (y, x, k) = one_way();
        let config = RemlConfig {
            max_iter: 1,
            ..Default::default()
        };
        let start = [1.0, 1.0];
        let fit = fit_ai_reml(&y, Some(&x), &[k.clone()], Some(&start[..]), &config).unwrap();
        let kernels = [k];

        let ai_inv_at = |theta: &[f64]| {
            let proj = project(theta, &kernels, Some(&x), 9).unwrap();
            let py = proj.p.mat_vec(&y);
            let (ai, _) = average_information(&proj, &kernels, &py);
            CholeskyDecomp::new(&ai).unwrap().inverse()
        };
        let at_final = ai_inv_at(&fit.theta);
        let at_start = ai_inv_at(&start);

        let mut max_diff_start: f64 = 0.0;
        for i in 0..2 {
            for j in 0..2 {
                assert!((fit.theta_cov.get(i, j) - at_final.get(i, j)).abs() < 1e-10);
                max_diff_start =
                    max_diff_start.max((fit.theta_cov.get(i, j) - at_start.get(i, j)).abs());
            }
        }
        assert!(max_diff_start > 1e-6);
    }
}
