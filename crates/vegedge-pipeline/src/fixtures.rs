//! Synthetic frames and stub classifiers shared by unit tests.

#![allow(clippy::unwrap_used)]

use chrono::{NaiveDate, NaiveDateTime};
use geo::LineString;
use image::Luma;

use crate::classifier::{ClassScheme, Classifier};
use crate::features::FeatureMatrix;
use crate::georef::GeoTransform;
use crate::types::{ExtractionSettings, FloatGrid, Mask, PipelineError, RasterFrame, ReferenceLine};

/// Frame side length in pixels.
pub const SIDE: u32 = 60;

/// Vegetation where NDVI (vegetation feature column 4) is positive.
pub struct NdviSign;

impl Classifier for NdviSign {
    fn scheme(&self) -> ClassScheme {
        ClassScheme::Vegetation
    }
    fn feature_count(&self) -> usize {
        18
    }
    fn predict(&self, f: &FeatureMatrix) -> Result<Vec<u8>, PipelineError> {
        Ok((0..f.rows())
            .map(|i| if f.row(i)[4] > 0.0 { 1 } else { 2 })
            .collect())
    }
}

/// Water where NIR-G (shoreline feature column 4) is negative, sand
/// elsewhere.
pub struct NdwiSign;

impl Classifier for NdwiSign {
    fn scheme(&self) -> ClassScheme {
        ClassScheme::Shoreline
    }
    fn feature_count(&self) -> usize {
        14
    }
    fn predict(&self, f: &FeatureMatrix) -> Result<Vec<u8>, PipelineError> {
        Ok((0..f.rows())
            .map(|i| if f.row(i)[4] < 0.0 { 3 } else { 1 })
            .collect())
    }
}

/// 11:00 on the given day of June 2019.
pub fn june(day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2019, 6, day)
        .unwrap()
        .and_hms_opt(11, 0, 0)
        .unwrap()
}

/// 60x60 frame at 10 m in UTM 30N: vegetated rows 0..20 (NDVI 0.5), bare
/// rows 40..60 (NDVI -0.3) and a linear ramp between. Green jumps above
/// NIR from row 30, making the lower half water for [`NdwiSign`].
pub fn frame(acquired: NaiveDateTime) -> RasterFrame {
    let red = FloatGrid::from_pixel(SIDE, SIDE, Luma([0.1]));
    let nir = FloatGrid::from_fn(SIDE, SIDE, |_, y| {
        #[allow(clippy::cast_precision_loss)]
        let ndvi = if y < 20 {
            0.5
        } else if y >= 40 {
            -0.3
        } else {
            0.5 - 0.8 * (y - 20) as f32 / 20.0
        };
        Luma([0.1 * (1.0 + ndvi) / (1.0 - ndvi)])
    });
    let green = FloatGrid::from_fn(SIDE, SIDE, |_, y| Luma([if y < 30 { 0.05 } else { 0.4 }]));
    RasterFrame {
        filename: format!("{}.tif", acquired.format("%Y%m%d")),
        bands: vec![
            FloatGrid::from_pixel(SIDE, SIDE, Luma([0.05])),
            green,
            red,
            nir,
        ],
        cloud_mask: Some(Mask::new(SIDE, SIDE)),
        nodata_mask: Mask::new(SIDE, SIDE),
        georef: GeoTransform::north_up(500_000.0, 0.0, 10.0),
        epsg: 32630,
        acquired,
        geoaccuracy: Some(4.2),
    }
}

/// Horizontal reference line across row 30 of [`frame`].
pub fn reference() -> ReferenceLine {
    ReferenceLine {
        epsg: 32630,
        line: LineString::from(vec![(500_000.0, -300.0), (500_600.0, -300.0)]),
    }
}

/// Settings under which [`frame`] yields a full-width vegetation edge.
pub fn settings() -> ExtractionSettings {
    ExtractionSettings {
        max_dist_ref: 400.0,
        min_length_sl: 300.0,
        seed: Some(1),
        ..ExtractionSettings::default()
    }
}
