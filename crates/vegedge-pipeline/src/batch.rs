//! Batch orchestration: every scene of every satellite through the
//! per-image pipeline, accumulated into site records and merged.
//!
//! Scenes are processed in order, or on the rayon pool when
//! [`ExtractionSettings::parallel`] is set. Each scene draws its random
//! numbers from a generator seeded by `(seed, satellite, index)`, so the
//! two modes produce identical records. Results are only merged after
//! every scene has finished.

use std::collections::BTreeMap;
use std::hash::Hasher;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use siphasher::sip::SipHasher13;

use crate::classifier::Classifier;
use crate::contour::ContourTracerKind;
use crate::pipeline::{FrameContext, Rejection, process_frame};
use crate::record::{Detection, MergedOutput, SiteRecord, WaterLevelLookup};
use crate::review::ThresholdReviewer;
use crate::types::{ExtractionSettings, PipelineError, RasterFrame, ReferenceLine, SkipReason};

/// Source of the scenes to process.
pub trait SceneProvider: Sync {
    /// Satellites to process, in order.
    fn satellites(&self) -> Vec<String>;

    /// Number of scenes of `satellite`.
    fn scene_count(&self, satellite: &str) -> usize;

    /// Load the `idx`-th scene. `Ok(None)` means no image could be
    /// produced, which skips the scene.
    ///
    /// # Errors
    ///
    /// An error stops the satellite's run.
    fn load(&self, satellite: &str, idx: usize) -> Result<Option<RasterFrame>, PipelineError>;
}

/// Nominal pan-sharpened pixel size of known missions.
#[must_use]
pub fn nominal_pixel_size(satellite: &str) -> Option<f64> {
    match satellite {
        "L5" | "L7" | "L8" | "L9" => Some(15.0),
        "S2" => Some(10.0),
        _ => None,
    }
}

/// Pixel count of an area in m², rounded up.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn min_area_pixels(area: f64, pixel_size: f64) -> usize {
    if pixel_size <= 0.0 {
        return 0;
    }
    (area / (pixel_size * pixel_size)).ceil() as usize
}

/// Seed of one scene's random generator.
#[must_use]
pub fn scene_seed(seed: u64, satellite: &str, idx: usize) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(seed, 0);
    hasher.write(satellite.as_bytes());
    hasher.write_u64(idx as u64);
    hasher.finish()
}

/// Classifiers shared by every scene.
#[derive(Clone, Copy)]
pub struct Classifiers<'a> {
    /// Vegetation / non-vegetation.
    pub vegetation: &'a dyn Classifier,
    /// Sand / swash / water, needed when `wetdry` is set.
    pub shoreline: Option<&'a dyn Classifier>,
}

/// Scene counts of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Scenes offered by the provider.
    pub scenes: usize,
    /// Scenes recorded.
    pub kept: usize,
    /// Recorded scenes whose vegetation edge came out empty.
    pub empty: usize,
    /// Skipped scenes per reason.
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl RunSummary {
    /// Total skipped scenes.
    #[must_use]
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    fn record(&mut self, outcome: &Outcome) {
        self.scenes += 1;
        match outcome {
            Outcome::Kept(d) => {
                self.kept += 1;
                if d.vegline.is_empty() {
                    self.empty += 1;
                }
            }
            Outcome::Skipped(reason) => *self.skipped.entry(*reason).or_default() += 1,
        }
    }
}

/// Everything a batch run produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutput {
    /// One record per satellite, in processing order.
    pub records: Vec<SiteRecord>,
    /// All records merged by acquisition time.
    pub merged: MergedOutput,
    /// Scene counts.
    pub summary: RunSummary,
}

enum Outcome {
    Kept(Box<Detection>),
    Skipped(SkipReason),
}

/// A configured batch run.
pub struct Batch<'a> {
    settings: &'a ExtractionSettings,
    reference: &'a ReferenceLine,
    classifiers: Classifiers<'a>,
    tracer: ContourTracerKind,
    water_levels: Option<&'a dyn WaterLevelLookup>,
}

impl<'a> Batch<'a> {
    /// Prepare a run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for invalid settings or
    /// when the wet/dry edge is requested without a shoreline classifier.
    pub fn new(
        settings: &'a ExtractionSettings,
        reference: &'a ReferenceLine,
        classifiers: Classifiers<'a>,
    ) -> Result<Self, PipelineError> {
        settings.validate()?;
        if settings.wetdry && classifiers.shoreline.is_none() {
            return Err(PipelineError::InvalidConfig(
                "wetdry needs a shoreline classifier".to_owned(),
            ));
        }
        Ok(Self {
            settings,
            reference,
            classifiers,
            tracer: ContourTracerKind::default(),
            water_levels: None,
        })
    }

    /// Use another contour tracing strategy.
    #[must_use]
    pub const fn with_tracer(mut self, tracer: ContourTracerKind) -> Self {
        self.tracer = tracer;
        self
    }

    /// Attach a water elevation to every kept image.
    #[must_use]
    pub fn with_water_levels(mut self, lookup: &'a dyn WaterLevelLookup) -> Self {
        self.water_levels = Some(lookup);
        self
    }

    /// Process every scene. `reviewer` is consulted only when the
    /// settings ask for review.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Satellite`] wrapping the first fatal error.
    pub fn run(
        &self,
        provider: &dyn SceneProvider,
        reviewer: &mut dyn ThresholdReviewer,
    ) -> Result<BatchOutput, PipelineError> {
        let seed = self.settings.seed.unwrap_or_else(rand::random);
        let mut output = BatchOutput::default();
        for satellite in provider.satellites() {
            let record = self
                .run_satellite(provider, &satellite, seed, reviewer, &mut output.summary)
                .map_err(|source| PipelineError::Satellite {
                    satellite: satellite.clone(),
                    source: Box::new(source),
                })?;
            output.records.push(record);
        }
        output.merged = MergedOutput::merge(&output.records);
        tracing::info!(
            scenes = output.summary.scenes,
            kept = output.summary.kept,
            empty = output.summary.empty,
            skipped = output.summary.skipped_total(),
            "batch complete"
        );
        Ok(output)
    }

    fn run_satellite(
        &self,
        provider: &dyn SceneProvider,
        satellite: &str,
        seed: u64,
        reviewer: &mut dyn ThresholdReviewer,
        summary: &mut RunSummary,
    ) -> Result<SiteRecord, PipelineError> {
        let count = provider.scene_count(satellite);
        tracing::info!(satellite, scenes = count, "processing satellite");

        let outcomes: Vec<Outcome> = if self.settings.parallel {
            (0..count)
                .into_par_iter()
                .map(|idx| self.scene(provider, satellite, idx, seed, None))
                .collect::<Result<_, _>>()?
        } else {
            let review = self.settings.wants_review();
            let mut outcomes = Vec::with_capacity(count);
            for idx in 0..count {
                let reviewer: Option<&mut dyn ThresholdReviewer> =
                    if review { Some(&mut *reviewer) } else { None };
                outcomes.push(self.scene(provider, satellite, idx, seed, reviewer)?);
            }
            outcomes
        };

        let mut record = SiteRecord::new(satellite);
        for outcome in outcomes {
            summary.record(&outcome);
            if let Outcome::Kept(d) = outcome {
                record.push(*d);
            }
        }
        if let Some(lookup) = self.water_levels {
            record.attach_water_levels(lookup);
        }
        tracing::info!(satellite, kept = record.len(), "satellite complete");
        Ok(record)
    }

    fn scene(
        &self,
        provider: &dyn SceneProvider,
        satellite: &str,
        idx: usize,
        seed: u64,
        reviewer: Option<&mut dyn ThresholdReviewer>,
    ) -> Result<Outcome, PipelineError> {
        let Some(frame) = provider.load(satellite, idx)? else {
            tracing::info!(satellite, idx, reason = %SkipReason::EmptyRaster, "scene skipped");
            return Ok(Outcome::Skipped(SkipReason::EmptyRaster));
        };
        let pixel_size =
            nominal_pixel_size(satellite).unwrap_or_else(|| frame.georef.pixel_size());
        let ctx = FrameContext {
            settings: self.settings,
            reference: self.reference,
            classifier: self.classifiers.vegetation,
            shore_classifier: self.classifiers.shoreline,
            tracer: self.tracer,
            min_area_pixels: min_area_pixels(self.settings.min_beach_area, pixel_size),
            satellite,
        };
        let mut rng = StdRng::seed_from_u64(scene_seed(seed, satellite, idx));
        let filename = frame.filename.clone();
        match process_frame(frame, idx, ctx, &mut rng, reviewer) {
            Ok(detection) => {
                tracing::debug!(
                    satellite,
                    idx,
                    threshold = detection.vthreshold,
                    parts = detection.vegline.part_count(),
                    "scene kept"
                );
                Ok(Outcome::Kept(Box::new(detection)))
            }
            Err(Rejection::Skip(reason)) => {
                tracing::info!(satellite, idx, %filename, %reason, "scene skipped");
                Ok(Outcome::Skipped(reason))
            }
            Err(Rejection::Fatal(e)) => {
                tracing::error!(satellite, idx, %filename, error = %e, "scene failed");
                Err(e)
            }
        }
    }
}
