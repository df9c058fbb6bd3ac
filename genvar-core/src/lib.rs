//! genvar-core: Variance components and marker effects for genvar
//!
//! Implements AI-REML variance-component estimation over one or more
//! relationship kernels, the Gauss-Seidel marker-effect solvers (dense,
//! QR-block and streamed from a genotype store), GRM construction,
//! genetic scoring, model serialization and cross-validation.

pub mod cv;
pub mod error;
pub mod grm;
pub mod marker;
pub mod model;
pub mod reml;
pub mod score;

pub use cv::{cross_validate, CvOptions, CvResult, FoldModel, Partition};
pub use error::{GenvarError, Result};
pub use marker::{
    solve_marker_effects, solve_marker_effects_qr, solve_marker_effects_streamed, Lambda,
    MarkerFit, MarkerSolverConfig,
};
pub use reml::{estimate_variance_components, RemlConfig, RemlFit, VarianceEstimator};
