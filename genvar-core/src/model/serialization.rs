//! Model serialization and deserialization.
//!
//! Uses bincode for fast, compact binary serialization.
//! Format: bincode payload whose leading fields are the magic bytes (GVMM)
//! and a version (u32). Optional JSON sidecar for human inspection.

use std::path::Path;

use anyhow::{bail, Context, Result};

use super::marker_model::MarkerModel;

/// Save a marker model to a binary file (.gvm).
pub fn save_model(model: &MarkerModel, path: &Path) -> Result<()> {
    if model.marker_ids.len() != model.effects.len() {
        bail!(
            "Model has {} marker IDs but {} effects",
            model.marker_ids.len(),
            model.effects.len()
        );
    }
    let encoded = bincode::serialize(model)?;
    std::fs::write(path, &encoded)
        .with_context(|| format!("Failed to write model: {}", path.display()))?;
    Ok(())
}

/// Load a marker model from a binary file (.gvm).
pub fn load_model(path: &Path) -> Result<MarkerModel> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read model: {}", path.display()))?;
    if data.len() < 4 || data[..4] != MarkerModel::MAGIC {
        bail!(
            "Invalid model file {}: expected magic bytes {:?}",
            path.display(),
            MarkerModel::MAGIC
        );
    }
    let model: MarkerModel = bincode::deserialize(&data)
        .with_context(|| format!("Corrupt model file: {}", path.display()))?;
    if model.version > MarkerModel::VERSION {
        bail!(
            "Model version {} is newer than supported version {}",
            model.version,
            MarkerModel::VERSION
        );
    }
    Ok(model)
}

/// Save a JSON sidecar for debugging (.gvm.json).
pub fn save_model_json(model: &MarkerModel, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(model)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Summary of a marker model (for display).
pub fn model_summary(model: &MarkerModel) -> String {
    let nonzero = model.effects.iter().filter(|e| **e != 0.0).count();
    format!(
        "genvar marker model v{}\n\
         Markers: {} ({} non-zero effects)\n\
         Fixed effects: {}\n\
         Training individuals: {}\n\
         Sweeps: {} (converged: {})",
        model.version,
        model.n_markers(),
        nonzero,
        model.fixed_effects.len(),
        model.n_train,
        model.sweeps,
        if model.converged { "yes" } else { "no" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_roundtrip() {
        let model = MarkerModel::new(
            vec!["rs1".into(), "rs2".into()],
            vec![0.25, -0.5],
            vec![3.0],
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.gvm");

        save_model(&model, &path).unwrap();
        let loaded = load_model(&path).unwrap();
        assert_eq!(loaded, model);
        assert!(model_summary(&loaded).contains("Markers: 2"));
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.gvm");
        std::fs::write(&path, b"not a model at all").unwrap();
        assert!(load_model(&path).is_err());
    }

    #[test]
    fn test_mismatched_lengths_are_not_saved() {
        let model = MarkerModel::new(vec!["rs1".into()], vec![0.1, 0.2], Vec::new());
        let dir = tempfile::tempdir().unwrap();
        assert!(save_model(&model, &dir.path().join("bad.gvm")).is_err());
    }
}
