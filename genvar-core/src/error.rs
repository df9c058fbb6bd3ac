//! Error taxonomy for the estimators and solvers.
//!
//! Shape and numerical failures abort a call. Non-convergence and markers
//! missing from a genotype store are reported on the returned fit instead.

use genvar_linalg::LinalgError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenvarError {
    #[error("Input shape mismatch for {what}: expected {expected}, got {got}")]
    InputShape {
        what: String,
        expected: usize,
        got: usize,
    },

    #[error("Numerical failure in {context}: {source}")]
    NumericalFailure {
        context: String,
        #[source]
        source: LinalgError,
    },

    #[error("Genotype access failed: {0:#}")]
    GenotypeAccess(#[from] anyhow::Error),

    #[error("External estimator failed: {0}")]
    ExternalEstimator(String),

    #[error("Invalid partition: {0}")]
    InvalidPartition(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, GenvarError>;

impl GenvarError {
    pub(crate) fn shape(what: impl Into<String>, expected: usize, got: usize) -> Self {
        GenvarError::InputShape {
            what: what.into(),
            expected,
            got,
        }
    }

    pub(crate) fn numerical(context: impl Into<String>, source: LinalgError) -> Self {
        GenvarError::NumericalFailure {
            context: context.into(),
            source,
        }
    }
}

/// Fail with `InputShape` unless `got == expected`.
pub(crate) fn check_len(what: &str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(GenvarError::shape(what, expected, got))
    }
}
