//! Incremental per-image pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! ```rust,ignore
//! let detection = Pending::new(frame, idx, ctx)
//!     .gate()?
//!     .buffer()?
//!     .classify()?
//!     .threshold(&mut rng)?
//!     .trace()
//!     .build()?
//!     .into_detection();
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages), carrying all previously computed
//! intermediates. Fallible stages fail with a [`Rejection`]: either a
//! recoverable [`SkipReason`] or a fatal [`PipelineError`].
//!
//! # Memory
//!
//! Every stage retains the frame and its derived grids until the final
//! [`Built::into_detection`] drops them, so an operator reviewing a
//! detection can be shown any intermediate.

use rand::Rng;

use crate::buffer::build_buffer;
use crate::classifier::{ClassLabels, Classifier, classify};
use crate::contour::{ContourTracerKind, find_contours};
use crate::index::{ndvi, ndwi};
use crate::line::{EdgeLine, LineBuilder};
use crate::quality::{CloudCover, assess};
use crate::record::{Detection, WaterDetection};
use crate::review::{DetectionReview, ThresholdReviewer, settle};
use crate::threshold::{
    ClassSamples, ThresholdEstimate, class_samples, corridor, water_threshold, weighted_peaks,
};
use crate::types::{
    ExtractionSettings, FloatGrid, Mask, PipelineError, Polyline, RasterFrame, ReferenceLine,
    SkipReason,
};

/// Why a frame did not produce a detection.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    /// The image is excluded and the batch continues.
    #[error("skipped: {0}")]
    Skip(#[from] SkipReason),
    /// The run stops.
    #[error(transparent)]
    Fatal(#[from] PipelineError),
}

/// Shared, read-only inputs of every frame of one satellite.
#[derive(Clone, Copy)]
pub struct FrameContext<'a> {
    /// Extraction settings.
    pub settings: &'a ExtractionSettings,
    /// Static reference line.
    pub reference: &'a ReferenceLine,
    /// Vegetation / non-vegetation classifier.
    pub classifier: &'a dyn Classifier,
    /// Sand / swash / water classifier, required for the wet/dry edge.
    pub shore_classifier: Option<&'a dyn Classifier>,
    /// Contour tracing strategy.
    pub tracer: ContourTracerKind,
    /// Minimum classified patch size in pixels.
    pub min_area_pixels: usize,
    /// Satellite name, for logs and review.
    pub satellite: &'a str,
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any check has run.
///
/// Call [`gate`](Self::gate) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .gate() to continue"]
pub struct Pending<'a> {
    ctx: FrameContext<'a>,
    frame: RasterFrame,
    idx: usize,
}

impl<'a> Pending<'a> {
    /// Wrap the `idx`-th frame of a satellite.
    pub const fn new(frame: RasterFrame, idx: usize, ctx: FrameContext<'a>) -> Self {
        Self { ctx, frame, idx }
    }

    /// The frame being processed.
    #[must_use]
    pub const fn frame(&self) -> &RasterFrame {
        &self.frame
    }

    /// Run the quality gate and check the frame's layers agree.
    ///
    /// # Errors
    ///
    /// Skips on empty rasters, missing cloud masks and excessive cloud.
    /// Fails fatally on too few bands or mismatched layer sizes.
    pub fn gate(self) -> Result<Gated<'a>, Rejection> {
        let cover = assess(&self.frame, self.ctx.settings.cloud_thresh)?;
        self.frame.validate()?;
        Ok(Gated {
            ctx: self.ctx,
            frame: self.frame,
            idx: self.idx,
            cover,
        })
    }
}

// ───────────────────────── Stage 1: Gated ────────────────────────────

/// Pipeline state after the quality gate accepted the frame.
///
/// Call [`buffer`](Self::buffer) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .buffer() to continue"]
pub struct Gated<'a> {
    ctx: FrameContext<'a>,
    frame: RasterFrame,
    idx: usize,
    cover: CloudCover,
}

impl<'a> Gated<'a> {
    /// Cloud statistics.
    #[must_use]
    pub const fn cloud_cover(&self) -> CloudCover {
        self.cover
    }

    /// Rasterize the reference corridor onto the frame grid.
    ///
    /// # Errors
    ///
    /// Fails fatally when the reference line cannot be reprojected into
    /// the frame's CRS.
    pub fn buffer(self) -> Result<Buffered<'a>, Rejection> {
        let buffer = build_buffer(
            self.ctx.reference,
            self.frame.epsg,
            &self.frame.georef,
            self.frame.dimensions(),
            self.ctx.settings.max_dist_ref,
        )?;
        Ok(Buffered {
            ctx: self.ctx,
            frame: self.frame,
            idx: self.idx,
            cover: self.cover,
            buffer,
        })
    }
}

// ───────────────────────── Stage 2: Buffered ─────────────────────────

/// Pipeline state after the reference corridor was built.
///
/// Call [`classify`](Self::classify) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .classify() to continue"]
pub struct Buffered<'a> {
    ctx: FrameContext<'a>,
    frame: RasterFrame,
    idx: usize,
    cover: CloudCover,
    buffer: Mask,
}

impl<'a> Buffered<'a> {
    /// The reference corridor.
    #[must_use]
    pub const fn buffer(&self) -> &Mask {
        &self.buffer
    }

    /// Classify the frame's pixels.
    ///
    /// # Errors
    ///
    /// Skips when vegetation or non-vegetation covers less than 5% of the
    /// frame. Fails fatally on classifier or band problems, and when the
    /// wet/dry edge is requested without a shoreline classifier.
    pub fn classify(self) -> Result<Classified<'a>, Rejection> {
        let labels = classify(&self.frame, self.ctx.classifier, self.ctx.min_area_pixels)?;
        if !labels.has_variety() {
            return Err(SkipReason::InsufficientClassVariety.into());
        }
        let shore_labels = if self.ctx.settings.wetdry {
            let shore = self.ctx.shore_classifier.ok_or_else(|| {
                PipelineError::InvalidConfig("wetdry needs a shoreline classifier".to_owned())
            })?;
            Some(classify(&self.frame, shore, self.ctx.min_area_pixels)?)
        } else {
            None
        };
        Ok(Classified {
            ctx: self.ctx,
            frame: self.frame,
            idx: self.idx,
            cover: self.cover,
            buffer: self.buffer,
            labels,
            shore_labels,
        })
    }
}

// ───────────────────────── Stage 3: Classified ───────────────────────

/// Pipeline state after classification.
///
/// Call [`threshold`](Self::threshold) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .threshold() to continue"]
pub struct Classified<'a> {
    ctx: FrameContext<'a>,
    frame: RasterFrame,
    idx: usize,
    cover: CloudCover,
    buffer: Mask,
    labels: ClassLabels,
    shore_labels: Option<ClassLabels>,
}

impl<'a> Classified<'a> {
    /// Vegetation / non-vegetation planes.
    #[must_use]
    pub const fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    /// Sand / swash / water planes, when the wet/dry edge is requested.
    #[must_use]
    pub const fn shore_labels(&self) -> Option<&ClassLabels> {
        self.shore_labels.as_ref()
    }

    /// Estimate the separation thresholds. `rng` drives class-sample
    /// balancing.
    ///
    /// # Errors
    ///
    /// Skips when a class has no pixels to sample.
    pub fn threshold<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Thresholded<'a>, Rejection> {
        let index = ndvi(&self.frame)?;
        let region = corridor(&self.buffer);
        let mut samples = class_samples(
            &index,
            self.labels.plane(0),
            self.labels.plane(1),
            Some(&region),
        );
        samples.balance(rng);
        let estimate = weighted_peaks(&samples)?;

        let water = match &self.shore_labels {
            Some(shore) => {
                let index = ndwi(&self.frame)?;
                let mut samples = class_samples(&index, shore.plane(2), shore.plane(0), None);
                samples.balance(rng);
                let threshold = water_threshold(&samples)?;
                Some(WaterStage {
                    index,
                    samples,
                    threshold,
                    contours: Vec::new(),
                })
            }
            None => None,
        };

        Ok(Thresholded {
            ctx: self.ctx,
            frame: self.frame,
            idx: self.idx,
            cover: self.cover,
            buffer: self.buffer,
            index,
            samples,
            estimate,
            water,
        })
    }
}

/// Wet/dry intermediates.
struct WaterStage {
    index: FloatGrid,
    samples: ClassSamples,
    threshold: f64,
    contours: Vec<Polyline>,
}

// ───────────────────────── Stage 4: Thresholded ──────────────────────

/// Pipeline state after the thresholds were estimated.
///
/// Call [`trace`](Self::trace) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .trace() to continue"]
pub struct Thresholded<'a> {
    ctx: FrameContext<'a>,
    frame: RasterFrame,
    idx: usize,
    cover: CloudCover,
    buffer: Mask,
    index: FloatGrid,
    samples: ClassSamples,
    estimate: ThresholdEstimate,
    water: Option<WaterStage>,
}

impl<'a> Thresholded<'a> {
    /// Vegetation threshold estimate.
    #[must_use]
    pub const fn estimate(&self) -> &ThresholdEstimate {
        &self.estimate
    }

    /// Balanced vegetation / non-vegetation samples.
    #[must_use]
    pub const fn samples(&self) -> &ClassSamples {
        &self.samples
    }

    /// Wet/dry threshold, when requested.
    #[must_use]
    pub fn water_threshold(&self) -> Option<f64> {
        self.water.as_ref().map(|w| w.threshold)
    }

    /// Trace both edges. The vegetation edge is restricted to the
    /// reference corridor; the wet/dry edge is traced over the whole frame.
    pub fn trace(self) -> Traced<'a> {
        let contours = find_contours(
            &self.index,
            self.estimate.threshold,
            Some(&self.buffer),
            &self.ctx.tracer,
        );
        let water = self.water.map(|mut w| {
            w.contours = find_contours(&w.index, w.threshold, None, &self.ctx.tracer);
            w
        });
        Traced {
            ctx: self.ctx,
            frame: self.frame,
            idx: self.idx,
            cover: self.cover,
            buffer: self.buffer,
            index: self.index,
            samples: self.samples,
            threshold: self.estimate.threshold,
            contours,
            water,
        }
    }
}

// ───────────────────────── Stage 5: Traced ───────────────────────────

/// Pipeline state after contour tracing.
///
/// Call [`build`](Self::build) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .build() to continue"]
pub struct Traced<'a> {
    ctx: FrameContext<'a>,
    frame: RasterFrame,
    idx: usize,
    cover: CloudCover,
    buffer: Mask,
    index: FloatGrid,
    samples: ClassSamples,
    threshold: f64,
    contours: Vec<Polyline>,
    water: Option<WaterStage>,
}

impl<'a> Traced<'a> {
    /// Cleaned vegetation contours in pixel coordinates.
    #[must_use]
    pub fn contours(&self) -> &[Polyline] {
        &self.contours
    }

    /// Convert the contours into georeferenced lines.
    ///
    /// # Errors
    ///
    /// Fails fatally when an output CRS is unsupported.
    pub fn build(self) -> Result<Built<'a>, Rejection> {
        let builder = LineBuilder::new(self.frame.epsg, self.ctx.settings)?;
        let cloud = self.frame.cloud_mask.as_ref();
        let line = builder.build(&self.contours, &self.frame.georef, cloud);
        let water = self.water.map(|w| WaterDetection {
            threshold: w.threshold,
            line: builder.build(&w.contours, &self.frame.georef, cloud),
        });
        Ok(Built {
            ctx: self.ctx,
            frame: self.frame,
            idx: self.idx,
            cover: self.cover,
            buffer: self.buffer,
            index: self.index,
            samples: self.samples,
            threshold: self.threshold,
            builder,
            line,
            water,
        })
    }
}

// ───────────────────────── Stage 6: Built ────────────────────────────

/// Final pipeline state: lines built, ready for review and recording.
#[must_use = "call .into_detection() to extract the result"]
pub struct Built<'a> {
    ctx: FrameContext<'a>,
    frame: RasterFrame,
    idx: usize,
    cover: CloudCover,
    buffer: Mask,
    index: FloatGrid,
    samples: ClassSamples,
    threshold: f64,
    builder: LineBuilder,
    line: EdgeLine,
    water: Option<WaterDetection>,
}

impl Built<'_> {
    /// Vegetation threshold the line was traced at.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Vegetation edge.
    #[must_use]
    pub const fn line(&self) -> &EdgeLine {
        &self.line
    }

    /// Wet/dry edge, when requested.
    #[must_use]
    pub const fn water(&self) -> Option<&WaterDetection> {
        self.water.as_ref()
    }

    /// Let an operator accept, adjust or reject the vegetation edge.
    ///
    /// # Errors
    ///
    /// [`Rejection::Skip`] when the operator skips the image,
    /// [`Rejection::Fatal`] when they abort the run.
    pub fn review(mut self, reviewer: &mut dyn ThresholdReviewer) -> Result<Self, Rejection> {
        let template = DetectionReview {
            satellite: self.ctx.satellite,
            index: self.idx,
            filename: &self.frame.filename,
            acquired: self.frame.acquired,
            threshold: self.threshold,
            samples: &self.samples,
            line: &self.line,
            adjustable: self.ctx.settings.adjust_detection,
            buffer_size: self.ctx.settings.buffer_size,
        };
        let (index, buffer, frame, builder, tracer) = (
            &self.index,
            &self.buffer,
            &self.frame,
            &self.builder,
            &self.ctx.tracer,
        );
        let (threshold, line) = settle(reviewer, template, |t| {
            let contours = find_contours(index, t, Some(buffer), tracer);
            builder.build(&contours, &frame.georef, frame.cloud_mask.as_ref())
        })?;
        self.threshold = threshold;
        self.line = line;
        Ok(self)
    }

    /// Consume the pipeline into a record entry.
    #[must_use]
    pub fn into_detection(self) -> Detection {
        Detection {
            acquired: self.frame.acquired,
            filename: self.frame.filename,
            cloud_cover: self.cover.valid,
            geoaccuracy: self.frame.geoaccuracy,
            idx: self.idx,
            vthreshold: self.threshold,
            vegline: self.line,
            water: self.water,
        }
    }
}

/// Run every stage on one frame, with operator review when a reviewer
/// is given.
///
/// # Errors
///
/// See the individual stages.
pub fn process_frame<R: Rng + ?Sized>(
    frame: RasterFrame,
    idx: usize,
    ctx: FrameContext<'_>,
    rng: &mut R,
    reviewer: Option<&mut dyn ThresholdReviewer>,
) -> Result<Detection, Rejection> {
    let built = Pending::new(frame, idx, ctx)
        .gate()?
        .buffer()?
        .classify()?
        .threshold(rng)?
        .trace()
        .build()?;
    let built = match reviewer {
        Some(r) => built.review(r)?,
        None => built,
    };
    Ok(built.into_detection())
}
