//! Per-pixel feature vectors for the pixel classifiers.
//!
//! Each feature set stacks the raw bands, a fixed list of normalized
//! difference indices, then the 3x3 local standard deviation of every
//! band and index in the same order. Pixels under cloud, or with an
//! undefined band or index value, are left out of the matrix. Undefined
//! texture values are replaced by [`TEXTURE_FILL`].

use serde::{Deserialize, Serialize};

use crate::index::{local_std, nd_index, rb_ndvi, savi};
use crate::types::{Band, FloatGrid, MIN_BANDS, Mask, PipelineError, RasterFrame};

/// Stand-in for texture values that cannot be computed.
pub const TEXTURE_FILL: f32 = 1e-9;

/// Maximum number of bands a feature set consumes (B, G, R, NIR, SWIR).
pub const MAX_BANDS: usize = 5;

/// Which feature layout to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureSet {
    /// Bands, NDVI, NIR-G, R-G, SAVI, RB-NDVI, then texture of each.
    Vegetation,
    /// Bands, [SWIR-G, SWIR-NIR], NIR-G, NIR-R, B-R, then texture of
    /// each. The SWIR indices are present only with five bands.
    Shoreline,
}

impl FeatureSet {
    /// Number of features produced for a frame with `bands` bands.
    #[must_use]
    pub const fn feature_count(self, bands: usize) -> usize {
        let bands = if bands > MAX_BANDS { MAX_BANDS } else { bands };
        let indices = match self {
            Self::Vegetation => 5,
            Self::Shoreline if bands >= MAX_BANDS => 5,
            Self::Shoreline => 3,
        };
        2 * (bands + indices)
    }

    fn index_planes(self, frame: &RasterFrame) -> Result<Vec<FloatGrid>, PipelineError> {
        let cloud = frame.cloud_mask.as_ref();
        let blue = frame.require_band(Band::Blue)?;
        let green = frame.require_band(Band::Green)?;
        let red = frame.require_band(Band::Red)?;
        let nir = frame.require_band(Band::Nir)?;
        Ok(match self {
            Self::Vegetation => vec![
                nd_index(nir, red, cloud),
                nd_index(nir, green, cloud),
                nd_index(red, green, cloud),
                savi(nir, red, cloud),
                rb_ndvi(nir, red, blue, cloud),
            ],
            Self::Shoreline => match frame.band(Band::Swir) {
                Some(swir) => vec![
                    nd_index(swir, green, cloud),
                    nd_index(swir, nir, cloud),
                    nd_index(nir, green, cloud),
                    nd_index(nir, red, cloud),
                    nd_index(blue, red, cloud),
                ],
                None => vec![
                    nd_index(nir, green, cloud),
                    nd_index(nir, red, cloud),
                    nd_index(blue, red, cloud),
                ],
            },
        })
    }

    /// Compute the feature matrix of a frame.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InsufficientBands`] when the frame has
    /// fewer than four bands.
    pub fn compute(self, frame: &RasterFrame) -> Result<FeatureMatrix, PipelineError> {
        if frame.band_count() < MIN_BANDS {
            return Err(PipelineError::InsufficientBands {
                found: frame.band_count(),
                required: MIN_BANDS,
            });
        }
        let indices = self.index_planes(frame)?;
        let mut base: Vec<&FloatGrid> = frame.bands.iter().take(MAX_BANDS).collect();
        base.extend(indices.iter());
        let texture: Vec<FloatGrid> = base.iter().map(|g| local_std(g, 1)).collect();

        let dims = frame.dimensions();
        Ok(FeatureMatrix::assemble(
            dims.pixel_count(),
            &base,
            &texture,
            frame.cloud_mask.as_ref(),
        ))
    }
}

/// Row-major feature vectors for the valid pixels of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    cols: usize,
    data: Vec<f32>,
    pixels: Vec<usize>,
}

impl FeatureMatrix {
    fn assemble(
        total: usize,
        base: &[&FloatGrid],
        texture: &[FloatGrid],
        cloud: Option<&Mask>,
    ) -> Self {
        let cols = base.len() + texture.len();
        let mut data = Vec::new();
        let mut pixels = Vec::new();
        for i in 0..total {
            if cloud.is_some_and(|m| m.as_raw()[i] != 0) {
                continue;
            }
            if base.iter().any(|g| !g.as_raw()[i].is_finite()) {
                continue;
            }
            data.extend(base.iter().map(|g| g.as_raw()[i]));
            data.extend(texture.iter().map(|g| {
                let v = g.as_raw()[i];
                if v.is_finite() { v } else { TEXTURE_FILL }
            }));
            pixels.push(i);
        }
        Self { cols, data, pixels }
    }

    /// Build a matrix directly from rows, one per listed pixel index.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Classifier`] when row and pixel counts
    /// disagree or a row has the wrong length.
    pub fn from_rows(rows: Vec<Vec<f32>>, pixels: Vec<usize>) -> Result<Self, PipelineError> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.len() != pixels.len() || rows.iter().any(|r| r.len() != cols) {
            return Err(PipelineError::Classifier(
                "ragged feature rows".to_owned(),
            ));
        }
        Ok(Self {
            cols,
            data: rows.into_iter().flatten().collect(),
            pixels,
        })
    }

    /// Number of valid pixels (rows).
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.pixels.len()
    }

    /// Number of features per pixel.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Feature vector of row `i`.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Row-major pixel index (`y * width + x`) of row `i`.
    #[must_use]
    pub fn pixel(&self, i: usize) -> usize {
        self.pixels[i]
    }
}
