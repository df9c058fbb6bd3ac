//! MarkerModel: fitted marker effects, used to score new individuals.

use serde::{Deserialize, Serialize};

use crate::marker::{Lambda, MarkerFit};

/// Marker effects persisted to `.gvm` files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerModel {
    /// Magic bytes for validation.
    pub magic: [u8; 4],
    /// Version number for forward compatibility.
    pub version: u32,
    /// Marker IDs, one per effect.
    pub marker_ids: Vec<String>,
    pub effects: Vec<f64>,
    /// Fixed effects from the training fit (intercept first when present).
    pub fixed_effects: Vec<f64>,
    /// Penalty the model was fitted with.
    pub lambda: Lambda,
    pub n_train: usize,
    pub sweeps: usize,
    pub converged: bool,
}

impl MarkerModel {
    /// Magic bytes: "GVMM" (GenVar Marker Model).
    pub const MAGIC: [u8; 4] = [b'G', b'V', b'M', b'M'];
    /// Current model version.
    pub const VERSION: u32 = 1;

    pub fn new(marker_ids: Vec<String>, effects: Vec<f64>, fixed_effects: Vec<f64>) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            marker_ids,
            effects,
            fixed_effects,
            lambda: Lambda::Scalar(0.0),
            n_train: 0,
            sweeps: 0,
            converged: true,
        }
    }

    /// Build from a streamed fit, which carries marker IDs.
    pub fn from_fit(fit: &MarkerFit, lambda: Lambda) -> Self {
        Self {
            lambda,
            n_train: fit.residual.len(),
            sweeps: fit.sweeps,
            converged: fit.converged,
            ..Self::new(
                fit.marker_ids.clone(),
                fit.effects.clone(),
                fit.fixed_effects.clone(),
            )
        }
    }

    pub fn n_markers(&self) -> usize {
        self.marker_ids.len()
    }
}
