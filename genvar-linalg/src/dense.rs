#![allow(clippy::needless_range_loop)]
//! Dense matrix operations backed by faer.
//!
//! Wraps faer's column-major Mat<f64> with the operations the REML and
//! marker solvers lean on: matrix-vector products, cross-products,
//! row/column sub-selection and elementwise accumulation of kernels.

use faer::Mat;

/// A dense matrix wrapper around faer's `Mat<f64>`.
///
/// Column-major, so a marker matrix stores one marker per column and
/// column reads are contiguous.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    inner: Mat<f64>,
}

impl DenseMatrix {
    /// Create a new dense matrix filled with zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            inner: Mat::zeros(nrows, ncols),
        }
    }

    /// Create a matrix whose entries are produced by `f(row, col)`.
    pub fn from_fn<F>(nrows: usize, ncols: usize, f: F) -> Self
    where
        F: FnMut(usize, usize) -> f64,
    {
        Self {
            inner: Mat::from_fn(nrows, ncols, f),
        }
    }

    /// Create a dense matrix from a 2D slice (row-major input).
    pub fn from_row_major(nrows: usize, ncols: usize, data: &[f64]) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        let inner = Mat::from_fn(nrows, ncols, |i, j| data[i * ncols + j]);
        Self { inner }
    }

    /// Build an n x p matrix from p columns of equal length.
    pub fn from_columns(columns: &[Vec<f64>]) -> Self {
        let ncols = columns.len();
        let nrows = columns.first().map_or(0, |c| c.len());
        assert!(columns.iter().all(|c| c.len() == nrows));
        let inner = Mat::from_fn(nrows, ncols, |i, j| columns[j][i]);
        Self { inner }
    }

    /// Create an identity matrix of size n x n.
    pub fn identity(n: usize) -> Self {
        let inner = Mat::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 });
        Self { inner }
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    /// Get element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner.read(row, col)
    }

    /// Set element at (row, col).
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.inner.write(row, col, value);
    }

    /// Matrix-vector product: self * v.
    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.ncols(), v.len());
        let n = self.nrows();
        let mut result = vec![0.0; n];
        for j in 0..self.ncols() {
            let vj = v[j];
            if vj == 0.0 {
                continue;
            }
            for i in 0..n {
                result[i] += self.inner.read(i, j) * vj;
            }
        }
        result
    }

    /// Transposed matrix-vector product: self' * v.
    pub fn tmat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.nrows(), v.len());
        (0..self.ncols())
            .map(|j| {
                let mut s = 0.0;
                for i in 0..self.nrows() {
                    s += self.inner.read(i, j) * v[i];
                }
                s
            })
            .collect()
    }

    /// Matrix-matrix product: self * other.
    pub fn mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.ncols(), other.nrows());
        let result = &self.inner * &other.inner;
        DenseMatrix { inner: result }
    }

    /// Transpose.
    pub fn transpose(&self) -> DenseMatrix {
        let inner = self.inner.transpose().to_owned();
        DenseMatrix { inner }
    }

    /// Extract column as a Vec<f64>.
    pub fn col(&self, j: usize) -> Vec<f64> {
        let n = self.nrows();
        let mut v = Vec::with_capacity(n);
        for i in 0..n {
            v.push(self.inner.read(i, j));
        }
        v
    }

    /// Copy column `j` into `out` without allocating.
    pub fn copy_col_into(&self, j: usize, out: &mut [f64]) {
        assert_eq!(out.len(), self.nrows());
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.inner.read(i, j);
        }
    }

    /// Set an entire column from a slice.
    pub fn set_col(&mut self, j: usize, data: &[f64]) {
        assert_eq!(data.len(), self.nrows());
        for i in 0..self.nrows() {
            self.inner.write(i, j, data[i]);
        }
    }

    /// Rows `rows` (in the given order), all columns.
    pub fn select_rows(&self, rows: &[usize]) -> DenseMatrix {
        let inner = Mat::from_fn(rows.len(), self.ncols(), |i, j| {
            self.inner.read(rows[i], j)
        });
        DenseMatrix { inner }
    }

    /// Sub-matrix at the intersection of `rows` and `cols`.
    pub fn select(&self, rows: &[usize], cols: &[usize]) -> DenseMatrix {
        let inner = Mat::from_fn(rows.len(), cols.len(), |i, j| {
            self.inner.read(rows[i], cols[j])
        });
        DenseMatrix { inner }
    }

    /// Columns `cols` (in the given order), all rows.
    pub fn select_cols(&self, cols: &[usize]) -> DenseMatrix {
        let inner = Mat::from_fn(self.nrows(), cols.len(), |i, j| {
            self.inner.read(i, cols[j])
        });
        DenseMatrix { inner }
    }

    /// In-place `self += alpha * other`.
    pub fn add_scaled(&mut self, other: &DenseMatrix, alpha: f64) {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                let v = self.inner.read(i, j) + alpha * other.inner.read(i, j);
                self.inner.write(i, j, v);
            }
        }
    }

    /// In-place `self += alpha * I`.
    pub fn add_diag(&mut self, alpha: f64) {
        let n = self.nrows().min(self.ncols());
        for i in 0..n {
            let v = self.inner.read(i, i) + alpha;
            self.inner.write(i, i, v);
        }
    }

    /// Scalar multiplication.
    pub fn scale(&self, s: f64) -> DenseMatrix {
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| {
            self.inner.read(i, j) * s
        });
        DenseMatrix { inner }
    }

    /// Diagonal of a square matrix.
    pub fn diag(&self) -> Vec<f64> {
        let n = self.nrows().min(self.ncols());
        let mut d = Vec::with_capacity(n);
        for i in 0..n {
            d.push(self.inner.read(i, i));
        }
        d
    }

    /// Trace of a square matrix.
    pub fn trace(&self) -> f64 {
        self.diag().iter().sum()
    }

    /// Sum of the elementwise product, sum_ij A_ij * B_ij.
    ///
    /// For symmetric A and B this is trace(A * B).
    pub fn sum_product(&self, other: &DenseMatrix) -> f64 {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        let mut sum = 0.0;
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                sum += self.inner.read(i, j) * other.inner.read(i, j);
            }
        }
        sum
    }

    /// Largest absolute asymmetry, max |A_ij - A_ji|.
    pub fn max_asymmetry(&self) -> f64 {
        let n = self.nrows();
        let mut worst: f64 = 0.0;
        for j in 0..n {
            for i in (j + 1)..n {
                worst = worst.max((self.inner.read(i, j) - self.inner.read(j, i)).abs());
            }
        }
        worst
    }

    /// Dot product of two vectors.
    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(a.len(), b.len());
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    /// Compute X' * X.
    pub fn crossprod(&self) -> DenseMatrix {
        let n = self.nrows();
        let p = self.ncols();
        let mut result = DenseMatrix::zeros(p, p);
        for j in 0..p {
            for k in j..p {
                let mut s = 0.0;
                for i in 0..n {
                    s += self.inner.read(i, j) * self.inner.read(i, k);
                }
                result.set(j, k, s);
                if j != k {
                    result.set(k, j, s);
                }
            }
        }
        result
    }

    /// Extract data as a flat Vec in column-major order.
    pub fn to_col_major(&self) -> Vec<f64> {
        let mut data = Vec::with_capacity(self.nrows() * self.ncols());
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                data.push(self.inner.read(i, j));
            }
        }
        data
    }

    /// Upper triangle (diagonal included) packed row by row.
    pub fn to_packed_upper(&self) -> Vec<f64> {
        let n = self.nrows();
        assert_eq!(n, self.ncols());
        let mut data = Vec::with_capacity(n * (n + 1) / 2);
        for i in 0..n {
            for j in i..n {
                data.push(self.inner.read(i, j));
            }
        }
        data
    }
}

impl std::fmt::Display for DenseMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.nrows() {
            for j in 0..self.ncols() {
                if j > 0 {
                    write!(f, "\t")?;
                }
                write!(f, "{:.6}", self.inner.read(i, j))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
