//! vegedge-pipeline: Vegetation and water edge extraction (sans-IO).
//!
//! Turns georeferenced multispectral frames into edge lines through:
//! quality gate -> reference buffer -> pixel classification ->
//! weighted-peak threshold -> marching squares -> line building.
//!
//! This crate has **no I/O dependencies** -- frames, classifiers, water
//! levels and record stores come in through traits and in-memory types.
//! Files, terminals and CLI parsing live in `vegedge-cli`.

pub mod batch;
pub mod buffer;
pub mod classifier;
pub mod contour;
pub mod crs;
pub mod features;
pub mod georef;
pub mod index;
pub mod line;
pub mod morphology;
pub mod pipeline;
pub mod quality;
pub mod record;
pub mod review;
pub mod threshold;
pub mod types;

#[cfg(test)]
mod fixtures;

use rand::SeedableRng;
use rand::rngs::StdRng;

pub use batch::{Batch, BatchOutput, Classifiers, RunSummary, SceneProvider};
pub use classifier::{ClassLabels, ClassScheme, Classifier, MlpClassifier};
pub use contour::{ContourTracer, ContourTracerKind};
pub use georef::GeoTransform;
pub use line::EdgeLine;
pub use pipeline::{FrameContext, Rejection};
pub use record::{
    CrsVariant, Detection, LineKind, MergedOutput, RecordStore, SiteRecord, TideTable,
    WaterLevelLookup,
};
pub use review::{AutoAccept, DetectionReview, ReviewDecision, ThresholdReviewer};
pub use types::{
    ExtractionSettings, PipelineError, Point, Polyline, RasterFrame, ReferenceLine, SkipReason,
};

/// Extract the vegetation edge (and the wet/dry edge when `wetdry` is set)
/// of a single frame, without review.
///
/// The minimum patch size is derived from the frame's own pixel size.
/// Sample balancing is seeded from `settings.seed`, or from entropy.
///
/// # Pipeline steps
///
/// 1. Quality gate (cloud fractions)
/// 2. Reference buffer rasterization
/// 3. Pixel classification and small-patch removal
/// 4. Weighted-peak NDVI threshold (Otsu NDWI threshold for wet/dry)
/// 5. Marching squares inside the buffer
/// 6. Cloud filtering, length filtering and reprojection
///
/// # Errors
///
/// [`Rejection::Skip`] when the frame is excluded, [`Rejection::Fatal`]
/// on invalid settings or a setup problem.
pub fn extract(
    frame: RasterFrame,
    reference: &ReferenceLine,
    classifiers: Classifiers<'_>,
    settings: &ExtractionSettings,
) -> Result<Detection, Rejection> {
    settings.validate()?;
    let ctx = FrameContext {
        settings,
        reference,
        classifier: classifiers.vegetation,
        shore_classifier: classifiers.shoreline,
        tracer: ContourTracerKind::default(),
        min_area_pixels: batch::min_area_pixels(settings.min_beach_area, frame.georef.pixel_size()),
        satellite: "",
    };
    let mut rng = settings
        .seed
        .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    pipeline::process_frame(frame, 0, ctx, &mut rng, None)
}
