//! Dense GRM construction from a genotype store.
//!
//! Computes GRM = (1/M) * sum_m w_m * w_m'
//! where w_m is the standardized genotype vector for marker m:
//!   w_m = (dosage - 2*p) / sqrt(2*p*(1-p))
//!
//! Markers are streamed in chunks; each chunk adds W_c W_c' with one
//! matrix product.

use genvar_geno::GenotypeStore;
use genvar_linalg::DenseMatrix;
use tracing::{debug, info};

use crate::error::Result;
use crate::marker::source::{ColumnPass, ColumnSource, StreamedColumns};

const CHUNK: usize = 256;

/// Compute the dense GRM for store `rows` from store `markers` (ascending).
///
/// Markers whose standardized column is identically zero are skipped.
/// Returns the GRM and the number of markers used.
pub fn compute_grm(
    store: &GenotypeStore,
    markers: &[usize],
    rows: &[usize],
) -> Result<(DenseMatrix, usize)> {
    let columns = StreamedColumns::new(store, markers.to_vec(), rows.to_vec())?;
    let n = rows.len();
    let m = markers.len();
    info!("Computing dense GRM: {} individuals x {} markers", n, m);

    let mut grm = DenseMatrix::zeros(n, n);
    let mut n_used = 0;
    let mut chunk: Vec<Vec<f64>> = Vec::with_capacity(CHUNK);
    let mut col = vec![0.0; n];
    let mut pass = columns.open_pass()?;

    for j in 0..columns.n_cols() {
        pass.load(j, &mut col)?;
        if col.iter().all(|v| *v == 0.0) {
            continue;
        }
        chunk.push(col.clone());
        n_used += 1;
        if chunk.len() == CHUNK {
            add_chunk(&mut grm, &chunk);
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        add_chunk(&mut grm, &chunk);
    }
    drop(pass);

    if n_used > 0 {
        grm = grm.scale(1.0 / n_used as f64);
    }
    info!(
        "Dense GRM computed using {} markers ({} without variation)",
        n_used,
        m - n_used
    );
    Ok((grm, n_used))
}

fn add_chunk(grm: &mut DenseMatrix, chunk: &[Vec<f64>]) {
    let w = DenseMatrix::from_columns(chunk);
    grm.add_scaled(&w.mat_mul(&w.transpose()), 1.0);
    debug!("Added GRM chunk of {} markers", chunk.len());
}
