//! Marker-effect solvers.
//!
//! Ridge-penalized per-marker effects by block Gauss-Seidel. The dense,
//! QR-block and streamed variants share the sweep engine in
//! [`gauss_seidel`]; they differ only in where marker columns come from.

pub mod gauss_seidel;
pub mod qr;
pub mod source;
pub mod streamed;
pub mod weights;

use genvar_linalg::DenseMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{GenvarError, Result};
use gauss_seidel::run_sweeps;
use source::column_product;

pub use gauss_seidel::{update_block, Block, SweepState};
pub use qr::solve_marker_effects_qr;
pub use source::{ColumnPass, ColumnSource, StreamedColumns};
pub use streamed::solve_marker_effects_streamed;

/// Ridge penalty, shared or per marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lambda {
    Scalar(f64),
    PerMarker(Vec<f64>),
}

/// Configuration for the marker-effect solvers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerSolverConfig {
    pub lambda: Lambda,
    /// Rescale lambda per marker from a correlation test against the
    /// initial residual.
    pub adaptive_weights: bool,
    /// Floor on 1 - p when adaptive weights are on.
    pub min_weight: f64,
    /// Maximum number of sweeps.
    pub max_iter: usize,
    /// Convergence tolerance on sum (s_new - s_old)^2 / sqrt(m).
    pub tol: f64,
}

impl Default for MarkerSolverConfig {
    fn default() -> Self {
        Self {
            lambda: Lambda::Scalar(1.0),
            adaptive_weights: false,
            min_weight: 0.01,
            max_iter: 500,
            tol: 1e-7,
        }
    }
}

impl MarkerSolverConfig {
    pub fn with_lambda(lambda: f64) -> Self {
        Self {
            lambda: Lambda::Scalar(lambda),
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(GenvarError::InvalidConfig("max_iter must be at least 1".into()));
        }
        if self.tol.is_nan() || self.tol < 0.0 {
            return Err(GenvarError::InvalidConfig("tol must be non-negative".into()));
        }
        if self.adaptive_weights && !(self.min_weight > 0.0 && self.min_weight <= 1.0) {
            return Err(GenvarError::InvalidConfig(
                "min_weight must lie in (0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Result of a marker-effect solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerFit {
    /// One effect per solved marker.
    pub effects: Vec<f64>,
    /// IDs of the solved markers (streamed solves only).
    pub marker_ids: Vec<String>,
    /// OLS estimate of b, empty without a design.
    pub fixed_effects: Vec<f64>,
    /// W s.
    pub fitted_genetic_value: Vec<f64>,
    /// W s + X b.
    pub predicted: Vec<f64>,
    /// Incrementally maintained y - X b - W s.
    pub residual: Vec<f64>,
    pub sweeps: usize,
    pub final_delta: f64,
    pub converged: bool,
    /// Requested marker IDs not found in the genotype store.
    pub markers_dropped: usize,
    /// Effective penalty per marker (after adaptive weighting).
    pub lambda: Vec<f64>,
}

/// Solve for marker effects with `w` held in memory (n x m).
///
/// `sets` partitions marker indices into blocks updated together; `None`
/// updates one marker at a time.
pub fn solve_marker_effects(
    y: &[f64],
    x: Option<&DenseMatrix>,
    w: &DenseMatrix,
    sets: Option<&[Vec<usize>]>,
    config: &MarkerSolverConfig,
) -> Result<MarkerFit> {
    finish(w, y, x, sets, config, Vec::new(), 0)
}

/// Run the engine over `source` and assemble a [`MarkerFit`].
pub(crate) fn finish<S: ColumnSource>(
    source: &S,
    y: &[f64],
    x: Option<&DenseMatrix>,
    sets: Option<&[Vec<usize>]>,
    config: &MarkerSolverConfig,
    marker_ids: Vec<String>,
    markers_dropped: usize,
) -> Result<MarkerFit> {
    let outcome = run_sweeps(source, y, x, sets, config)?;
    let fitted_genetic_value = column_product(source, &outcome.state.s)?;
    let predicted = match x.filter(|x| x.ncols() > 0) {
        Some(x) => x
            .mat_vec(&outcome.fixed_effects)
            .into_iter()
            .zip(&fitted_genetic_value)
            .map(|(a, g)| a + g)
            .collect(),
        None => fitted_genetic_value.clone(),
    };

    Ok(MarkerFit {
        effects: outcome.state.s,
        marker_ids,
        fixed_effects: outcome.fixed_effects,
        fitted_genetic_value,
        predicted,
        residual: outcome.state.e,
        sweeps: outcome.sweeps,
        final_delta: outcome.final_delta,
        converged: outcome.converged,
        markers_dropped,
        lambda: outcome.lambda,
    })
}
