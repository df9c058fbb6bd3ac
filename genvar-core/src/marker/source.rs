//! Column access for the sweep engine.
//!
//! A solve reads every marker column once per sweep, always through a
//! [`ColumnPass`] opened for that sweep. Resident matrices hand out column
//! copies; genotype stores decode columns from disk.

use genvar_geno::{GenotypeStore, MarkerPass};
use genvar_linalg::DenseMatrix;

use crate::error::{GenvarError, Result};

/// A matrix whose columns can be visited in passes.
pub trait ColumnSource: Sync {
    type Pass<'a>: ColumnPass
    where
        Self: 'a;

    fn n_rows(&self) -> usize;
    fn n_cols(&self) -> usize;
    fn open_pass(&self) -> Result<Self::Pass<'_>>;
}

pub trait ColumnPass {
    /// Write column `j` into `out` (length `n_rows`).
    fn load(&mut self, j: usize, out: &mut [f64]) -> Result<()>;
}

pub struct DensePass<'a> {
    matrix: &'a DenseMatrix,
}

impl ColumnPass for DensePass<'_> {
    fn load(&mut self, j: usize, out: &mut [f64]) -> Result<()> {
        self.matrix.copy_col_into(j, out);
        Ok(())
    }
}

impl ColumnSource for DenseMatrix {
    type Pass<'a> = DensePass<'a>;

    fn n_rows(&self) -> usize {
        self.nrows()
    }

    fn n_cols(&self) -> usize {
        self.ncols()
    }

    fn open_pass(&self) -> Result<DensePass<'_>> {
        Ok(DensePass { matrix: self })
    }
}

/// Standardized marker columns read from a genotype store.
///
/// Column `j` is store marker `markers[j]` restricted to `rows`.
#[derive(Debug, Clone)]
pub struct StreamedColumns<'s> {
    store: &'s GenotypeStore,
    markers: Vec<usize>,
    rows: Vec<usize>,
}

impl<'s> StreamedColumns<'s> {
    /// `markers` must be ascending so each pass only seeks forward.
    pub fn new(store: &'s GenotypeStore, markers: Vec<usize>, rows: Vec<usize>) -> Result<Self> {
        if markers.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GenvarError::InvalidConfig(
                "streamed marker indices must be strictly ascending".into(),
            ));
        }
        if let Some(&last) = markers.last() {
            if last >= store.n_markers() {
                return Err(GenvarError::shape("marker index bound", store.n_markers(), last));
            }
        }
        if let Some(&bad) = rows.iter().find(|&&r| r >= store.n_individuals()) {
            return Err(GenvarError::shape("individual row bound", store.n_individuals(), bad));
        }
        Ok(Self {
            store,
            markers,
            rows,
        })
    }

    pub fn markers(&self) -> &[usize] {
        &self.markers
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }
}

pub struct StreamedPass<'a> {
    pass: MarkerPass<'a>,
    markers: &'a [usize],
    rows: &'a [usize],
}

impl ColumnPass for StreamedPass<'_> {
    fn load(&mut self, j: usize, out: &mut [f64]) -> Result<()> {
        let marker = *self
            .markers
            .get(j)
            .ok_or_else(|| GenvarError::shape("streamed column", self.markers.len(), j))?;
        self.pass.read_standardized(marker, self.rows, out)?;
        Ok(())
    }
}

impl ColumnSource for StreamedColumns<'_> {
    type Pass<'a> = StreamedPass<'a> where Self: 'a;

    fn n_rows(&self) -> usize {
        self.rows.len()
    }

    fn n_cols(&self) -> usize {
        self.markers.len()
    }

    fn open_pass(&self) -> Result<StreamedPass<'_>> {
        Ok(StreamedPass {
            pass: self.store.open_pass()?,
            markers: &self.markers,
            rows: &self.rows,
        })
    }
}

/// W * s, one pass over the columns.
pub fn column_product<S: ColumnSource>(source: &S, s: &[f64]) -> Result<Vec<f64>> {
    if s.len() != source.n_cols() {
        return Err(GenvarError::shape("effect vector", source.n_cols(), s.len()));
    }
    let mut out = vec![0.0; source.n_rows()];
    let mut col = vec![0.0; source.n_rows()];
    let mut pass = source.open_pass()?;
    for (j, &sj) in s.iter().enumerate() {
        if sj == 0.0 {
            continue;
        }
        pass.load(j, &mut col)?;
        for (o, w) in out.iter_mut().zip(&col) {
            *o += w * sj;
        }
    }
    Ok(out)
}
