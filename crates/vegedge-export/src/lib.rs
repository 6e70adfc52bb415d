//! vegedge-export: Pure format serializers for merged output (sans-IO)
//!
//! Converts a [`MergedOutput`](vegedge_pipeline::MergedOutput) into
//! columnar JSON or per-image GeoJSON. Writing the strings to disk is left
//! to the caller.

pub mod geojson;
pub mod json;

pub use geojson::{GeoJsonMetadata, to_geojson};
pub use json::{from_json, to_json};

/// Serialization failures.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The table's columns disagree in length.
    #[error(transparent)]
    Shape(#[from] vegedge_pipeline::PipelineError),

    /// JSON encoding or decoding failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
