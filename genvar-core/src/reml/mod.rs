//! Variance component estimation (REML).
//!
//! [`VarianceEstimator`] is the seam between the in-process AI-REML solver
//! ([`AiReml`]) and an out-of-process executable ([`ExternalReml`]). Both
//! produce the same [`RemlFit`].

pub mod ai_reml;
pub mod external;

use genvar_linalg::DenseMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{check_len, GenvarError, Result};

pub use ai_reml::{fit_ai_reml, AiReml};
pub use external::ExternalReml;

/// Configuration for REML iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemlConfig {
    /// Maximum outer iterations.
    pub max_iter: usize,
    /// Convergence tolerance on max |theta_new - theta|.
    pub tol: f64,
    /// Lower bound applied to every variance component after an update.
    pub floor: f64,
}

impl Default for RemlConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-5,
            floor: 1e-9,
        }
    }
}

/// Anything that can estimate variance components for
/// `V = sum_i theta_i G_i + theta_e I`.
pub trait VarianceEstimator: Send + Sync {
    fn estimate(
        &self,
        y: &[f64],
        x: Option<&DenseMatrix>,
        kernels: &[DenseMatrix],
        initial_theta: Option<&[f64]>,
    ) -> Result<RemlFit>;
}

/// Estimate variance components in-process with AI-REML.
pub fn estimate_variance_components(
    y: &[f64],
    x: Option<&DenseMatrix>,
    kernels: &[DenseMatrix],
    initial_theta: Option<&[f64]>,
    config: &RemlConfig,
) -> Result<RemlFit> {
    fit_ai_reml(y, x, kernels, initial_theta, config)
}

/// Estimates an estimator reports; everything else on [`RemlFit`] is
/// derived from these and the inputs.
#[derive(Debug, Clone)]
pub(crate) struct RemlEstimates {
    pub theta: Vec<f64>,
    pub theta_cov: DenseMatrix,
    pub log_likelihood: f64,
    pub fixed_effects: Vec<f64>,
    pub fixed_effect_cov: DenseMatrix,
    pub py: Vec<f64>,
    pub vy: Option<Vec<f64>>,
    pub y_vinv_y: Option<f64>,
    pub trace_pg: Vec<f64>,
    pub trace_vg: Vec<f64>,
    pub iterations: usize,
    pub final_delta: f64,
    pub converged: bool,
}

/// Result of a REML fit.
#[derive(Debug, Clone)]
pub struct RemlFit {
    /// Variance components, residual last.
    pub theta: Vec<f64>,
    /// Asymptotic covariance of theta: the inverse AI matrix evaluated at
    /// the returned `theta`.
    pub theta_cov: DenseMatrix,
    /// REML log-likelihood at the final theta.
    pub log_likelihood: f64,
    pub fixed_effects: Vec<f64>,
    pub fixed_effect_cov: DenseMatrix,
    /// BLUPs u_i = theta_i G_i Py, one vector per kernel.
    pub random_effects: Vec<Vec<f64>>,
    /// X b.
    pub fitted: Vec<f64>,
    /// X b + sum_i u_i.
    pub predicted: Vec<f64>,
    /// y - predicted.
    pub residuals: Vec<f64>,
    pub py: Vec<f64>,
    /// V^{-1} y (not reported by every estimator).
    pub vy: Option<Vec<f64>>,
    /// y' V^{-1} y (not reported by every estimator).
    pub y_vinv_y: Option<f64>,
    /// trace(P G_i) per kernel.
    pub trace_pg: Vec<f64>,
    /// trace(V^{-1} G_i) per kernel.
    pub trace_vg: Vec<f64>,
    pub iterations: usize,
    pub final_delta: f64,
    pub converged: bool,
}

impl RemlFit {
    pub(crate) fn assemble(
        y: &[f64],
        x: Option<&DenseMatrix>,
        kernels: &[DenseMatrix],
        est: RemlEstimates,
    ) -> Self {
        let n = y.len();
        let random_effects: Vec<Vec<f64>> = kernels
            .iter()
            .zip(&est.theta)
            .map(|(g, &t)| g.mat_vec(&est.py).into_iter().map(|v| t * v).collect())
            .collect();
        let fitted = match x.filter(|x| x.ncols() > 0) {
            Some(x) => x.mat_vec(&est.fixed_effects),
            None => vec![0.0; n],
        };
        let mut predicted = fitted.clone();
        for u in &random_effects {
            for (p, v) in predicted.iter_mut().zip(u) {
                *p += v;
            }
        }
        let residuals = y.iter().zip(&predicted).map(|(a, b)| a - b).collect();

        Self {
            theta: est.theta,
            theta_cov: est.theta_cov,
            log_likelihood: est.log_likelihood,
            fixed_effects: est.fixed_effects,
            fixed_effect_cov: est.fixed_effect_cov,
            random_effects,
            fitted,
            predicted,
            residuals,
            py: est.py,
            vy: est.vy,
            y_vinv_y: est.y_vinv_y,
            trace_pg: est.trace_pg,
            trace_vg: est.trace_vg,
            iterations: est.iterations,
            final_delta: est.final_delta,
            converged: est.converged,
        }
    }

    /// BLUP for individuals outside the training set.
    ///
    /// `cross_kernels[i]` is G_i restricted to (new rows, training columns);
    /// `x_new` holds the fixed-effect design of the new individuals.
    pub fn predict(
        &self,
        cross_kernels: &[DenseMatrix],
        x_new: Option<&DenseMatrix>,
    ) -> Result<Vec<f64>> {
        check_len("cross kernels", self.random_effects.len(), cross_kernels.len())?;
        let n_train = self.py.len();
        let n_new = cross_kernels
            .first()
            .map(|g| g.nrows())
            .or(x_new.map(|x| x.nrows()))
            .unwrap_or(0);

        let mut pred = match x_new.filter(|x| x.ncols() > 0) {
            Some(x) => {
                check_len("new design columns", self.fixed_effects.len(), x.ncols())?;
                check_len("new design rows", n_new, x.nrows())?;
                x.mat_vec(&self.fixed_effects)
            }
            None => {
                if !self.fixed_effects.is_empty() {
                    return Err(GenvarError::shape(
                        "new design columns",
                        self.fixed_effects.len(),
                        0,
                    ));
                }
                vec![0.0; n_new]
            }
        };

        for (g, &t) in cross_kernels.iter().zip(&self.theta) {
            check_len("cross kernel rows", n_new, g.nrows())?;
            check_len("cross kernel columns", n_train, g.ncols())?;
            for (p, v) in pred.iter_mut().zip(g.mat_vec(&self.py)) {
                *p += t * v;
            }
        }
        Ok(pred)
    }
}

/// Shape and configuration checks shared by every estimator.
pub(crate) fn validate_inputs(
    y: &[f64],
    x: Option<&DenseMatrix>,
    kernels: &[DenseMatrix],
    initial_theta: Option<&[f64]>,
    config: &RemlConfig,
) -> Result<()> {
    let n = y.len();
    if n == 0 {
        return Err(GenvarError::shape("phenotype length", 1, 0));
    }
    if let Some(x) = x {
        check_len("design rows", n, x.nrows())?;
        if x.ncols() >= n {
            return Err(GenvarError::shape("design columns (< n)", n - 1, x.ncols()));
        }
    }
    for g in kernels {
        check_len("kernel rows", n, g.nrows())?;
        check_len("kernel columns", n, g.ncols())?;
    }
    if let Some(t) = initial_theta {
        check_len("initial theta", kernels.len() + 1, t.len())?;
        if t.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(GenvarError::InvalidConfig(
                "initial theta must be finite and non-negative".into(),
            ));
        }
    }
    if config.max_iter == 0 {
        return Err(GenvarError::InvalidConfig("max_iter must be at least 1".into()));
    }
    if config.tol.is_nan() || config.tol <= 0.0 || config.floor.is_nan() || config.floor <= 0.0 {
        return Err(GenvarError::InvalidConfig(
            "tol and floor must be positive".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_shapes() {
        let y = vec![1.0, 2.0, 3.0];
        let g = DenseMatrix::identity(2);
        let err = validate_inputs(&y, None, &[g], None, &RemlConfig::default());
        assert!(matches!(err, Err(GenvarError::InputShape { .. })));

        let g = DenseMatrix::identity(3);
        let err = validate_inputs(&y, None, &[g], Some(&[1.0]), &RemlConfig::default());
        assert!(matches!(err, Err(GenvarError::InputShape { .. })));
    }

    #[test]
    fn test_predict_with_training_cross_kernel_matches_fit() {
        let y = vec![5.0, 8.0, 6.0, 2.0, 3.0, 1.0, 2.0, 4.0, 5.0];
        let groups = [0usize, 0, 0, 1, 1, 1, 2, 2, 2];
        let k = DenseMatrix::from_fn(9, 9, |i, j| (groups[i] == groups[j]) as u8 as f64);
        let x = DenseMatrix::from_fn(9, 1, |_, _| 1.0);
        let fit = estimate_variance_components(&y, Some(&x), &[k.clone()], None, &RemlConfig::default())
            .unwrap();

        let pred = fit.predict(&[k], Some(&x)).unwrap();
        for (a, b) in pred.iter().zip(&fit.predicted) {
            assert!((a - b).abs() < 1e-10);
        }
        for (r, (yi, p)) in fit.residuals.iter().zip(y.iter().zip(&fit.predicted)) {
            assert!((r - (yi - p)).abs() < 1e-12);
        }
    }
}
