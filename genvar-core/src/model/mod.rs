//! Persisted marker-effect models.

pub mod marker_model;
pub mod serialization;

pub use marker_model::MarkerModel;
pub use serialization::{load_model, model_summary, save_model, save_model_json};
