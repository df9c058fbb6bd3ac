#![allow(clippy::needless_range_loop)]
//! Matrix decompositions and solvers.
//!
//! Cholesky for symmetric positive definite systems (the REML covariance
//! V, X'V^{-1}X and the AI matrix) and a thin QR used to orthogonalize
//! marker blocks.

use crate::dense::DenseMatrix;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("Matrix is not positive definite (failed at pivot {pivot})")]
    NotPositiveDefinite { pivot: usize },

    #[error("Singular matrix encountered (column {column})")]
    SingularMatrix { column: usize },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Result of a Cholesky decomposition.
#[derive(Debug, Clone)]
pub struct CholeskyDecomp {
    /// Lower triangular factor L such that A = L * L'.
    pub l: DenseMatrix,
}

impl CholeskyDecomp {
    /// Compute the Cholesky decomposition of a symmetric positive definite matrix.
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: a.ncols(),
            });
        }
        let mut l = DenseMatrix::zeros(n, n);

        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l.get(j, k) * l.get(j, k);
            }
            let diag = a.get(j, j) - sum;
            if diag <= 0.0 || !diag.is_finite() {
                return Err(LinalgError::NotPositiveDefinite { pivot: j });
            }
            l.set(j, j, diag.sqrt());

            for i in (j + 1)..n {
                let mut sum = 0.0;
                for k in 0..j {
                    sum += l.get(i, k) * l.get(j, k);
                }
                l.set(i, j, (a.get(i, j) - sum) / l.get(j, j));
            }
        }

        Ok(CholeskyDecomp { l })
    }

    /// Dimension of the factored matrix.
    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// Solve L * L' * x = b.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.l.nrows();
        assert_eq!(b.len(), n);

        // Forward substitution: L * y = b
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..i {
                sum += self.l.get(i, j) * y[j];
            }
            y[i] = (b[i] - sum) / self.l.get(i, i);
        }

        // Backward substitution: L' * x = y
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..n {
                sum += self.l.get(j, i) * x[j];
            }
            x[i] = (y[i] - sum) / self.l.get(i, i);
        }

        x
    }

    /// Solve A * X = B column by column.
    pub fn solve_matrix(&self, b: &DenseMatrix) -> DenseMatrix {
        assert_eq!(b.nrows(), self.dim());
        let mut out = DenseMatrix::zeros(b.nrows(), b.ncols());
        for j in 0..b.ncols() {
            out.set_col(j, &self.solve(&b.col(j)));
        }
        out
    }

    /// Compute the inverse of the original matrix A^{-1} = (L L')^{-1}.
    pub fn inverse(&self) -> DenseMatrix {
        let n = self.l.nrows();
        let mut inv = DenseMatrix::zeros(n, n);
        let mut e = vec![0.0; n];
        for j in 0..n {
            e.iter_mut().for_each(|v| *v = 0.0);
            e[j] = 1.0;
            let col = self.solve(&e);
            inv.set_col(j, &col);
        }
        // Symmetrize to remove round-off asymmetry.
        for j in 0..n {
            for i in (j + 1)..n {
                let v = 0.5 * (inv.get(i, j) + inv.get(j, i));
                inv.set(i, j, v);
                inv.set(j, i, v);
            }
        }
        inv
    }

    /// log|A| = 2 * sum(log(diag(L))).
    pub fn log_det(&self) -> f64 {
        2.0 * self.l.diag().iter().map(|d| d.ln()).sum::<f64>()
    }
}

/// Result of a QR decomposition: A = Q * R.
#[derive(Debug, Clone)]
pub struct QrDecomp {
    pub q: DenseMatrix,
    pub r: DenseMatrix,
}

impl QrDecomp {
    /// Compute the thin QR decomposition of an m x n matrix (m >= n).
    /// Uses modified Gram-Schmidt.
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let m = a.nrows();
        let n = a.ncols();
        if m < n {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: m,
            });
        }

        let mut q = DenseMatrix::zeros(m, n);
        let mut r = DenseMatrix::zeros(n, n);

        let mut cols: Vec<Vec<f64>> = (0..n).map(|j| a.col(j)).collect();
        let scale = cols
            .iter()
            .map(|c| DenseMatrix::dot(c, c).sqrt())
            .fold(0.0_f64, f64::max)
            .max(1.0);

        for j in 0..n {
            for i in 0..j {
                let q_col = q.col(i);
                let rij = DenseMatrix::dot(&q_col, &cols[j]);
                r.set(i, j, rij);
                for k in 0..m {
                    cols[j][k] -= rij * q_col[k];
                }
            }

            let norm = DenseMatrix::dot(&cols[j], &cols[j]).sqrt();
            if norm < 1e-10 * scale {
                return Err(LinalgError::SingularMatrix { column: j });
            }
            r.set(j, j, norm);
            for k in 0..m {
                q.set(k, j, cols[j][k] / norm);
            }
        }

        Ok(QrDecomp { q, r })
    }

    /// Solve R * x = rhs by back substitution.
    pub fn back_substitute(&self, rhs: &[f64]) -> Vec<f64> {
        let n = self.r.nrows();
        assert_eq!(rhs.len(), n);
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..n {
                sum += self.r.get(i, j) * x[j];
            }
            x[i] = (rhs[i] - sum) / self.r.get(i, i);
        }
        x
    }

    /// Least squares: solve R * x = Q' * b.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let qtb = self.q.tmat_vec(b);
        self.back_substitute(&qtb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cholesky() {
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let chol = CholeskyDecomp::new(&a).unwrap();
        assert!((chol.l.get(0, 0) - 2.0).abs() < 1e-10);
        assert!((chol.l.get(1, 0) - 1.0).abs() < 1e-10);
        assert!((chol.l.get(1, 1) - 2.0f64.sqrt()).abs() < 1e-10);
    }

    #[test]
    fn test_cholesky_solve() {
        let a = DenseMatrix::from_row_major(3, 3, &[4.0, 2.0, 1.0, 2.0, 5.0, 3.0, 1.0, 3.0, 6.0]);
        let b = vec![1.0, 2.0, 3.0];
        let x = CholeskyDecomp::new(&a).unwrap().solve(&b);
        let ax = a.mat_vec(&x);
        for i in 0..3 {
            assert!((ax[i] - b[i]).abs() < 1e-10, "ax[{}]={} != {}", i, ax[i], b[i]);
        }
    }

    #[test]
    fn test_cholesky_not_pd() {
        let a = DenseMatrix::from_row_major(2, 2, &[1.0, 3.0, 3.0, 1.0]);
        assert_eq!(
            CholeskyDecomp::new(&a).unwrap_err(),
            LinalgError::NotPositiveDefinite { pivot: 1 }
        );
    }

    #[test]
    fn test_log_det() {
        // det = 4*3 - 2*2 = 8
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let chol = CholeskyDecomp::new(&a).unwrap();
        assert!((chol.log_det() - 8.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_qr_orthonormal_and_reconstructs() {
        let a = DenseMatrix::from_row_major(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let qr = QrDecomp::new(&a).unwrap();
        let qtq = qr.q.transpose().mat_mul(&qr.q);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((qtq.get(i, j) - expected).abs() < 1e-10);
            }
        }
        let qr_prod = qr.q.mat_mul(&qr.r);
        for i in 0..3 {
            for j in 0..2 {
                assert!((qr_prod.get(i, j) - a.get(i, j)).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_qr_solve_normal_equations() {
        let a = DenseMatrix::from_row_major(3, 2, &[1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let b = vec![1.0, 2.0, 2.0];
        let x = QrDecomp::new(&a).unwrap().solve(&b);
        let atax = a.crossprod().mat_vec(&x);
        let atb = a.tmat_vec(&b);
        for i in 0..2 {
            assert!((atax[i] - atb[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_qr_collinear_columns() {
        let a = DenseMatrix::from_row_major(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        assert_eq!(
            QrDecomp::new(&a).unwrap_err(),
            LinalgError::SingularMatrix { column: 1 }
        );
    }
}
