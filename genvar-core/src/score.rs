//! Genetic scores for individuals in a genotype store.
//!
//! A score is W s over the standardized genotypes of the scored markers,
//! streamed one marker at a time.

use genvar_geno::GenotypeStore;
use tracing::{info, warn};

use crate::error::{check_len, Result};
use crate::marker::source::{column_product, StreamedColumns};
use crate::model::MarkerModel;

/// W s for store `markers` (ascending) and store `rows`.
pub fn score_streamed(
    store: &GenotypeStore,
    markers: &[usize],
    effects: &[f64],
    rows: &[usize],
) -> Result<Vec<f64>> {
    check_len("effects", markers.len(), effects.len())?;
    let columns = StreamedColumns::new(store, markers.to_vec(), rows.to_vec())?;
    column_product(&columns, effects)
}

/// Score `rows` with a saved model. Model markers absent from the store
/// are skipped; their count is returned alongside the scores.
pub fn score_model(
    store: &GenotypeStore,
    model: &MarkerModel,
    rows: &[usize],
) -> Result<(Vec<f64>, usize)> {
    check_len("model effects", model.marker_ids.len(), model.effects.len())?;
    let effect_of: std::collections::HashMap<&str, f64> = model
        .marker_ids
        .iter()
        .map(String::as_str)
        .zip(model.effects.iter().copied())
        .collect();

    let selection = store.resolve_markers(&model.marker_ids);
    let effects: Vec<f64> = selection
        .indices
        .iter()
        .map(|&j| effect_of[store.marker_ids()[j].as_str()])
        .collect();
    if selection.n_missing > 0 {
        warn!(
            "Scoring without {} model markers absent from the genotype store",
            selection.n_missing
        );
    }
    info!(
        "Scoring {} individuals on {} markers",
        rows.len(),
        selection.indices.len()
    );
    let scores = score_streamed(store, &selection.indices, &effects, rows)?;
    Ok((scores, selection.n_missing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use genvar_geno::store::write_store_file;
    use genvar_geno::ByteCoding;

    #[test]
    fn test_score_model_follows_ids_not_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.raw");
        write_store_file(&path, &[vec![1, 3, 2], vec![3, 1, 2]]).unwrap();
        let store = GenotypeStore::with_computed_frequencies(
            &path,
            vec!["a".into(), "b".into(), "c".into()],
            vec!["m0".into(), "m1".into()],
            ByteCoding::default(),
        )
        .unwrap();

        // Listed in reverse file order, plus one unknown marker.
        let model = MarkerModel::new(
            vec!["m1".into(), "gone".into(), "m0".into()],
            vec![2.0, 100.0, 1.0],
            Vec::new(),
        );
        let (scores, missing) = score_model(&store, &model, &store.all_rows()).unwrap();
        assert_eq!(missing, 1);

        let direct = score_streamed(&store, &[0, 1], &[1.0, 2.0], &store.all_rows()).unwrap();
        for (a, b) in scores.iter().zip(&direct) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
