//! genvar-linalg: Linear algebra wrappers for genvar
//!
//! Provides the dense matrix type and the Cholesky / QR decompositions
//! used by the REML estimator and the marker-effect solvers.

pub mod dense;
pub mod decomposition;

pub use decomposition::LinalgError;
pub use dense::DenseMatrix;
