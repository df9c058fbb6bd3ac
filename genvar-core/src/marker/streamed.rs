//! Marker-effect solver streaming columns from a genotype store.
//!
//! Same sweep as the dense solver; every sweep opens one pass over the
//! store and decodes each selected marker in ascending file order.

use genvar_geno::GenotypeStore;
use genvar_linalg::DenseMatrix;
use tracing::info;

use super::source::StreamedColumns;
use super::{finish, MarkerFit, MarkerSolverConfig};
use crate::error::{GenvarError, Result};

/// Solve for the effects of `marker_ids` using genotypes read from `store`.
///
/// `individual_ids` selects and orders the rows matched to `y`; `None`
/// uses every individual in store order. Marker IDs missing from the store
/// are skipped and counted in `markers_dropped`.
pub fn solve_marker_effects_streamed<S: AsRef<str>>(
    y: &[f64],
    x: Option<&DenseMatrix>,
    store: &GenotypeStore,
    marker_ids: &[S],
    individual_ids: Option<&[S]>,
    config: &MarkerSolverConfig,
) -> Result<MarkerFit> {
    let selection = store.resolve_markers(marker_ids);
    let rows = match individual_ids {
        Some(ids) => {
            let sel = store.resolve_individuals(ids);
            if sel.n_missing > 0 {
                return Err(GenvarError::shape(
                    "individuals found in genotype store",
                    ids.len(),
                    sel.rows.len(),
                ));
            }
            sel.rows
        }
        None => store.all_rows(),
    };
    let mut fit = solve_streamed_rows(y, x, store, selection.indices, rows, config)?;
    fit.markers_dropped = selection.n_missing;
    Ok(fit)
}

/// Streamed solve over store marker indices (ascending) and store rows.
pub fn solve_streamed_rows(
    y: &[f64],
    x: Option<&DenseMatrix>,
    store: &GenotypeStore,
    markers: Vec<usize>,
    rows: Vec<usize>,
    config: &MarkerSolverConfig,
) -> Result<MarkerFit> {
    let columns = StreamedColumns::new(store, markers, rows)?;
    let marker_ids = columns
        .markers()
        .iter()
        .map(|&j| store.marker_ids()[j].clone())
        .collect();
    info!(
        "Streaming {} markers x {} individuals from {}",
        columns.markers().len(),
        columns.rows().len(),
        store.path().display()
    );
    finish(&columns, y, x, None, config, marker_ids, 0)
}
