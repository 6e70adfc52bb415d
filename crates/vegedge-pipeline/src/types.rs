//! Shared types for the vegedge extraction pipeline.

use chrono::NaiveDateTime;
use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use crate::georef::GeoTransform;

/// Re-export `GrayImage` so downstream crates can build masks without
/// depending on `image` directly.
pub use image::GrayImage;

/// Single-band floating point raster. `NaN` marks undefined pixels.
pub type FloatGrid = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Binary raster: [`MASK_SET`] where the condition holds, `0` elsewhere.
///
/// Masks share the representation `imageproc` morphology operates on.
pub type Mask = GrayImage;

/// Pixel value of a set mask pixel.
pub const MASK_SET: u8 = 255;

/// A 2D point in image coordinates.
///
/// Contour vertices are fractional: `x` is the column and `y` the row,
/// both measured in pixels from the top-left sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Column position.
    pub x: f64,
    /// Row position.
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns `true` if either coordinate is `NaN`.
    #[must_use]
    pub const fn is_nan(self) -> bool {
        self.x.is_nan() || self.y.is_nan()
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }
}

/// An ordered sequence of contour vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first point, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Returns the last point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// Returns `true` if the first and last points coincide.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match (self.0.first(), self.0.last()) {
            (Some(a), Some(b)) => self.0.len() > 2 && a.distance_squared(*b) < 1e-18,
            _ => false,
        }
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the polyline and returns the underlying vector of points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }
}

/// Raster dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width (columns).
    pub width: u32,
    /// Height (rows).
    pub height: u32,
}

impl Dimensions {
    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Spectral bands in the order preprocessing stacks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    /// Blue.
    Blue,
    /// Green.
    Green,
    /// Red.
    Red,
    /// Near infrared.
    Nir,
    /// Shortwave infrared. Only present on sensors that provide it.
    Swir,
}

impl Band {
    /// Position of this band in [`RasterFrame::bands`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Minimum number of bands every frame must carry (B, G, R, NIR).
pub const MIN_BANDS: usize = 4;

/// One preprocessed satellite acquisition.
///
/// Produced by the acquisition collaborator and never mutated by the
/// pipeline. Serialized through a flat proxy struct because
/// `image::ImageBuffer` does not implement serde traits.
#[derive(Debug, Clone)]
pub struct RasterFrame {
    /// Source file name, carried into the output record.
    pub filename: String,
    /// Spectral bands, indexed by [`Band::index`].
    pub bands: Vec<FloatGrid>,
    /// Cloud mask. `None` when the preprocessing step could not build one.
    pub cloud_mask: Option<Mask>,
    /// Pixels without data (e.g. Landsat 7 scan-line gaps).
    pub nodata_mask: Mask,
    /// Affine pixel-to-world transform.
    pub georef: GeoTransform,
    /// EPSG code of the frame's coordinate reference system.
    pub epsg: u32,
    /// Acquisition timestamp (UTC).
    pub acquired: NaiveDateTime,
    /// Georeferencing accuracy reported by the provider, if any.
    pub geoaccuracy: Option<f64>,
}

impl RasterFrame {
    /// Dimensions of the band stack (zero when there are no bands).
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        self.bands.first().map_or(
            Dimensions {
                width: 0,
                height: 0,
            },
            |b| Dimensions {
                width: b.width(),
                height: b.height(),
            },
        )
    }

    /// Returns `true` when the frame carries no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dimensions().pixel_count() == 0
    }

    /// Number of spectral bands.
    #[must_use]
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// The requested band, if the sensor provides it.
    #[must_use]
    pub fn band(&self, band: Band) -> Option<&FloatGrid> {
        self.bands.get(band.index())
    }

    /// Like [`band`](Self::band) but a missing band is a fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InsufficientBands`] when the band is absent.
    pub fn require_band(&self, band: Band) -> Result<&FloatGrid, PipelineError> {
        self.band(band).ok_or(PipelineError::InsufficientBands {
            found: self.bands.len(),
            required: band.index() + 1,
        })
    }

    /// Verify every layer shares the band stack's dimensions and that
    /// the minimum band set is present.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InsufficientBands`] or
    /// [`PipelineError::ShapeMismatch`].
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.bands.len() < MIN_BANDS {
            return Err(PipelineError::InsufficientBands {
                found: self.bands.len(),
                required: MIN_BANDS,
            });
        }
        let dims = self.dimensions();
        let same = |w: u32, h: u32| w == dims.width && h == dims.height;
        if let Some(i) = self.bands.iter().position(|b| !same(b.width(), b.height())) {
            return Err(PipelineError::ShapeMismatch(format!(
                "band {i} is {}x{}, expected {}x{}",
                self.bands[i].width(),
                self.bands[i].height(),
                dims.width,
                dims.height
            )));
        }
        if let Some(cloud) = &self.cloud_mask
            && !same(cloud.width(), cloud.height())
        {
            return Err(PipelineError::ShapeMismatch("cloud mask".to_owned()));
        }
        if !same(self.nodata_mask.width(), self.nodata_mask.height()) {
            return Err(PipelineError::ShapeMismatch("no-data mask".to_owned()));
        }
        Ok(())
    }
}

/// Serde-compatible proxy for [`RasterFrame`].
///
/// Bands are stored row-major with `null` for undefined samples, masks
/// as row-major booleans. An empty `nodata_mask` means every pixel holds
/// data.
#[derive(Serialize, Deserialize)]
struct RasterFrameProxy {
    filename: String,
    width: u32,
    height: u32,
    bands: Vec<Vec<Option<f32>>>,
    cloud_mask: Option<Vec<bool>>,
    #[serde(default)]
    nodata_mask: Vec<bool>,
    georef: GeoTransform,
    epsg: u32,
    acquired: NaiveDateTime,
    #[serde(default)]
    geoaccuracy: Option<f64>,
}

fn mask_to_bools(mask: &Mask) -> Vec<bool> {
    mask.as_raw().iter().map(|&v| v != 0).collect()
}

fn bools_to_mask<E: serde::de::Error>(
    width: u32,
    height: u32,
    values: Vec<bool>,
    what: &str,
) -> Result<Mask, E> {
    let raw = values
        .into_iter()
        .map(|b| if b { MASK_SET } else { 0 })
        .collect();
    Mask::from_raw(width, height, raw)
        .ok_or_else(|| E::custom(format!("{what} does not match {width}x{height}")))
}

impl Serialize for RasterFrame {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let dims = self.dimensions();
        let proxy = RasterFrameProxy {
            filename: self.filename.clone(),
            width: dims.width,
            height: dims.height,
            bands: self
                .bands
                .iter()
                .map(|b| {
                    b.as_raw()
                        .iter()
                        .map(|v| (!v.is_nan()).then_some(*v))
                        .collect()
                })
                .collect(),
            cloud_mask: self.cloud_mask.as_ref().map(mask_to_bools),
            nodata_mask: mask_to_bools(&self.nodata_mask),
            georef: self.georef,
            epsg: self.epsg,
            acquired: self.acquired,
            geoaccuracy: self.geoaccuracy,
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RasterFrame {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = RasterFrameProxy::deserialize(deserializer)?;
        let (w, h) = (proxy.width, proxy.height);

        let bands = proxy
            .bands
            .into_iter()
            .enumerate()
            .map(|(i, values)| {
                let raw = values.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
                FloatGrid::from_raw(w, h, raw).ok_or_else(|| {
                    serde::de::Error::custom(format!("band {i} does not match {w}x{h}"))
                })
            })
            .collect::<Result<Vec<_>, D::Error>>()?;

        let cloud_mask = proxy
            .cloud_mask
            .map(|m| bools_to_mask(w, h, m, "cloud mask"))
            .transpose()?;
        let nodata_mask = if proxy.nodata_mask.is_empty() {
            Mask::new(w, h)
        } else {
            bools_to_mask(w, h, proxy.nodata_mask, "no-data mask")?
        };

        Ok(Self {
            filename: proxy.filename,
            bands,
            cloud_mask,
            nodata_mask,
            georef: proxy.georef,
            epsg: proxy.epsg,
            acquired: proxy.acquired,
            geoaccuracy: proxy.geoaccuracy,
        })
    }
}

/// A reference line the edge search is anchored to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLine {
    /// EPSG code the coordinates are expressed in.
    pub epsg: u32,
    /// The line itself.
    pub line: geo::LineString<f64>,
}

/// Configuration for edge extraction.
///
/// Distances are in metres of the frame's projected CRS, areas in m².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Maximum cloud fraction (of valid pixels) an image may carry.
    pub cloud_thresh: f64,

    /// Classified patches smaller than this area (m²) are removed.
    pub min_beach_area: f64,

    /// Radius of the search corridor shown to an operator during review.
    pub buffer_size: f64,

    /// Half-width of the corridor around the reference line.
    pub max_dist_ref: f64,

    /// Lines shorter than this are discarded (inclusive minimum).
    pub min_length_sl: f64,

    /// Contour vertices closer than this to a cloud pixel are dropped.
    pub cloud_distance: f64,

    /// Also extract the wet/dry (water) edge with the shoreline classifier.
    pub wetdry: bool,

    /// Ask the reviewer to accept or skip every detection.
    pub check_detection: bool,

    /// Let the reviewer replace the vegetation threshold.
    pub adjust_detection: bool,

    /// CRS of the primary output geometry. `None` keeps each frame's own CRS.
    pub output_epsg: Option<u32>,

    /// Secondary projected CRS every line is also expressed in.
    pub projection_epsg: u32,

    /// Geographic CRS of the lat/lon variant.
    pub ref_epsg: u32,

    /// Seed for class-sample balancing. `None` draws from entropy.
    pub seed: Option<u64>,

    /// Process the images of a satellite on the rayon pool.
    pub parallel: bool,
}

impl ExtractionSettings {
    /// Default maximum cloud fraction.
    pub const DEFAULT_CLOUD_THRESH: f64 = 0.5;
    /// Default minimum patch area in m².
    pub const DEFAULT_MIN_BEACH_AREA: f64 = 200.0;
    /// Default review corridor radius in metres.
    pub const DEFAULT_BUFFER_SIZE: f64 = 250.0;
    /// Default reference corridor half-width in metres.
    pub const DEFAULT_MAX_DIST_REF: f64 = 100.0;
    /// Default minimum line length in metres.
    pub const DEFAULT_MIN_LENGTH_SL: f64 = 500.0;
    /// Default vertex-to-cloud exclusion distance in metres.
    pub const DEFAULT_CLOUD_DISTANCE: f64 = 30.0;
    /// Default secondary projected CRS (Web Mercator).
    pub const DEFAULT_PROJECTION_EPSG: u32 = 3857;
    /// Default geographic CRS (WGS 84).
    pub const DEFAULT_REF_EPSG: u32 = 4326;

    /// Whether any operator review is requested.
    #[must_use]
    pub const fn wants_review(&self) -> bool {
        self.check_detection || self.adjust_detection
    }

    /// Check value ranges and option combinations.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: &str| Err(PipelineError::InvalidConfig(msg.to_owned()));
        // NaN fails every range check below.
        let non_negative = |v: f64| (0.0..=f64::INFINITY).contains(&v);
        if !(0.0..=1.0).contains(&self.cloud_thresh) {
            return invalid("cloud_thresh must be within [0, 1]");
        }
        if !non_negative(self.min_beach_area) {
            return invalid("min_beach_area must be non-negative");
        }
        if !non_negative(self.buffer_size) {
            return invalid("buffer_size must be non-negative");
        }
        if !non_negative(self.max_dist_ref) || self.max_dist_ref == 0.0 {
            return invalid("max_dist_ref must be positive");
        }
        if !non_negative(self.min_length_sl) {
            return invalid("min_length_sl must be non-negative");
        }
        if !non_negative(self.cloud_distance) {
            return invalid("cloud_distance must be non-negative");
        }
        if self.parallel && self.wants_review() {
            return invalid("parallel processing cannot be combined with operator review");
        }
        Ok(())
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            cloud_thresh: Self::DEFAULT_CLOUD_THRESH,
            min_beach_area: Self::DEFAULT_MIN_BEACH_AREA,
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            max_dist_ref: Self::DEFAULT_MAX_DIST_REF,
            min_length_sl: Self::DEFAULT_MIN_LENGTH_SL,
            cloud_distance: Self::DEFAULT_CLOUD_DISTANCE,
            wetdry: false,
            check_detection: false,
            adjust_detection: false,
            output_epsg: None,
            projection_epsg: Self::DEFAULT_PROJECTION_EPSG,
            ref_epsg: Self::DEFAULT_REF_EPSG,
            seed: None,
            parallel: false,
        }
    }
}

/// Why an image was excluded from the record.
///
/// Skips are recoverable: the batch logs the reason and moves on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, thiserror::Error,
)]
pub enum SkipReason {
    /// No raster data was produced for the image.
    #[error("empty raster")]
    EmptyRaster,

    /// Preprocessing could not build a cloud mask.
    #[error("no cloud mask available")]
    NoCloudMask,

    /// More than 95% of all pixels are cloud.
    #[error("cloud cover over 95%")]
    CloudCoverOverCeiling,

    /// Cloud fraction of valid pixels exceeds the configured threshold.
    #[error("cloud cover over user threshold")]
    CloudCoverOverThreshold,

    /// One of the two dominant classes covers less than 5% of the image.
    #[error("classifier cannot find enough variety of classes")]
    InsufficientClassVariety,

    /// A class has no pixels inside the search corridor.
    #[error("no classified pixels inside the reference corridor")]
    EmptyClassSample,

    /// The operator rejected the detection.
    #[error("skipped by operator")]
    OperatorSkipped,
}

/// Fatal errors: a setup problem that stops the run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Extraction settings are invalid.
    #[error("invalid extraction settings: {0}")]
    InvalidConfig(String),

    /// A CRS outside the supported set was requested.
    #[error("unsupported coordinate reference system EPSG:{0}")]
    UnsupportedCrs(u32),

    /// The reference line cannot be used with this run.
    #[error("reference line unusable: {0}")]
    ReferenceLine(String),

    /// The classifier artifact is missing, malformed or incompatible.
    #[error("classifier artifact invalid: {0}")]
    Classifier(String),

    /// The frame lacks bands the feature set needs.
    #[error("raster has {found} bands but {required} are required")]
    InsufficientBands {
        /// Bands present.
        found: usize,
        /// Bands needed.
        required: usize,
    },

    /// Raster layers of one frame disagree in size.
    #[error("raster layers disagree in size: {0}")]
    ShapeMismatch(String),

    /// The scene provider failed to produce a frame.
    #[error("scene acquisition failed: {0}")]
    Acquisition(String),

    /// A record store was read before anything was saved to it.
    #[error("record store is empty")]
    EmptyStore,

    /// The operator aborted the run.
    #[error("run cancelled by operator")]
    Cancelled,

    /// A fatal error raised while processing one satellite.
    #[error("satellite {satellite}: {source}")]
    Satellite {
        /// Satellite name.
        satellite: String,
        /// Underlying error.
        #[source]
        source: Box<Self>,
    },
}
