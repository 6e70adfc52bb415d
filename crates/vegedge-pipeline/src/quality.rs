//! Quality gate: decide from the cloud and no-data masks whether an
//! image is usable.
//!
//! Checks run in order and the first failure wins:
//!
//! 1. empty raster
//! 2. missing cloud mask
//! 3. cloud fraction over all pixels above [`CLOUD_CEILING`]
//! 4. cloud fraction over valid pixels above the configured threshold,
//!    where no-data pixels are removed from the cloud mask by XOR

use crate::types::{Mask, RasterFrame, SkipReason};

/// Hard cloud ceiling, independent of the configured threshold.
pub const CLOUD_CEILING: f64 = 0.95;

/// Cloud statistics of an accepted image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudCover {
    /// Cloud pixels over all pixels.
    pub combined: f64,
    /// Cloud pixels (no-data removed) over valid pixels. This is the
    /// figure recorded in the output.
    pub valid: f64,
}

/// Fraction-only form of the gate, for callers that already hold counts.
///
/// # Errors
///
/// Returns the matching [`SkipReason`] when either bound is exceeded.
pub fn check_fractions(
    combined: f64,
    valid: f64,
    cloud_thresh: f64,
) -> Result<CloudCover, SkipReason> {
    if combined > CLOUD_CEILING {
        return Err(SkipReason::CloudCoverOverCeiling);
    }
    if valid > cloud_thresh {
        return Err(SkipReason::CloudCoverOverThreshold);
    }
    Ok(CloudCover { combined, valid })
}

/// Cloud fractions `(combined, valid)` for a cloud and no-data mask pair.
///
/// With no valid pixels at all the valid fraction is `1.0`, so such an
/// image never passes a threshold below one.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cloud_fractions(cloud: &Mask, nodata: &Mask) -> (f64, f64) {
    let total = cloud.as_raw().len();
    let mut cloudy = 0usize;
    let mut adjusted = 0usize;
    let mut valid = 0usize;
    for (&c, &n) in cloud.as_raw().iter().zip(nodata.as_raw()) {
        let (c, n) = (c != 0, n != 0);
        cloudy += usize::from(c);
        adjusted += usize::from(c ^ n);
        valid += usize::from(!n);
    }
    let combined = if total == 0 {
        1.0
    } else {
        cloudy as f64 / total as f64
    };
    let valid = if valid == 0 {
        1.0
    } else {
        adjusted as f64 / valid as f64
    };
    (combined, valid)
}

/// Run the full gate on a frame.
///
/// Pure: the same frame and threshold always yield the same decision.
///
/// # Errors
///
/// Returns the [`SkipReason`] of the first failing check.
pub fn assess(frame: &RasterFrame, cloud_thresh: f64) -> Result<CloudCover, SkipReason> {
    if frame.is_empty() {
        return Err(SkipReason::EmptyRaster);
    }
    let cloud = frame.cloud_mask.as_ref().ok_or(SkipReason::NoCloudMask)?;
    let (combined, valid) = cloud_fractions(cloud, &frame.nodata_mask);
    check_fractions(combined, valid, cloud_thresh)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;
    use image::Luma;

    use super::*;
    use crate::georef::GeoTransform;
    use crate::types::{FloatGrid, MASK_SET};

    fn frame_with(cloud: Option<Mask>, nodata: Mask) -> RasterFrame {
        let (w, h) = nodata.dimensions();
        RasterFrame {
            filename: "f".to_owned(),
            bands: vec![FloatGrid::new(w, h); 4],
            cloud_mask: cloud,
            nodata_mask: nodata,
            georef: GeoTransform::north_up(0.0, 0.0, 10.0),
            epsg: 32630,
            acquired: NaiveDate::from_ymd_opt(2020, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            geoaccuracy: None,
        }
    }

    /// A 10x10 mask with the first `n` pixels (row-major) set.
    fn first_n(n: usize) -> Mask {
        let mut m = Mask::new(10, 10);
        for (i, p) in m.pixels_mut().enumerate() {
            if i < n {
                *p = Luma([MASK_SET]);
            }
        }
        m
    }

    #[test]
    fn clear_image_is_accepted() {
        let f = frame_with(Some(Mask::new(10, 10)), Mask::new(10, 10));
        let cover = assess(&f, 0.5).unwrap();
        assert!(cover.combined.abs() < f64::EPSILON);
        assert!(cover.valid.abs() < f64::EPSILON);
    }

    #[test]
    fn empty_raster_is_skipped_first() {
        let mut f = frame_with(None, Mask::new(10, 10));
        f.bands.clear();
        assert_eq!(assess(&f, 0.5), Err(SkipReason::EmptyRaster));
    }

    #[test]
    fn missing_cloud_mask_is_skipped() {
        let f = frame_with(None, Mask::new(10, 10));
        assert_eq!(assess(&f, 0.5), Err(SkipReason::NoCloudMask));
    }

    #[test]
    fn ceiling_applies_even_with_permissive_threshold() {
        let f = frame_with(Some(first_n(96)), Mask::new(10, 10));
        assert_eq!(assess(&f, 1.0), Err(SkipReason::CloudCoverOverCeiling));
    }

    #[test]
    fn exactly_at_ceiling_passes_ceiling() {
        assert!(check_fractions(0.95, 0.0, 0.5).is_ok());
        assert_eq!(
            check_fractions(0.950_001, 0.0, 0.5),
            Err(SkipReason::CloudCoverOverCeiling)
        );
    }

    #[test]
    fn user_threshold_is_inclusive() {
        assert!(check_fractions(0.5, 0.5, 0.5).is_ok());
        assert_eq!(
            check_fractions(0.5, 0.51, 0.5),
            Err(SkipReason::CloudCoverOverThreshold)
        );
    }

    #[test]
    fn nodata_overlap_is_removed_from_cloud() {
        // 60 cloud pixels, 40 of which are also no-data.
        let cloud = first_n(60);
        let nodata = first_n(40);
        let (combined, valid) = cloud_fractions(&cloud, &nodata);
        assert!((combined - 0.6).abs() < 1e-12);
        // (60 - 40) / (100 - 40)
        assert!((valid - 20.0 / 60.0).abs() < 1e-12);
        let f = frame_with(Some(cloud), nodata);
        assert!(assess(&f, 0.5).is_ok());
    }

    #[test]
    fn nodata_outside_cloud_counts_as_cloud_by_xor() {
        let cloud = Mask::new(10, 10);
        let nodata = first_n(10);
        let (_, valid) = cloud_fractions(&cloud, &nodata);
        assert!((valid - 10.0 / 90.0).abs() < 1e-12);
    }

    #[test]
    fn all_nodata_never_passes() {
        let (_, valid) = cloud_fractions(&Mask::new(10, 10), &first_n(100));
        assert!((valid - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn decision_is_idempotent() {
        for n in [0, 30, 50, 51, 80, 96] {
            let f = frame_with(Some(first_n(n)), Mask::new(10, 10));
            assert_eq!(assess(&f, 0.5), assess(&f, 0.5));
        }
    }

    #[test]
    fn fractions_below_both_bounds_accept_above_reject() {
        for i in 0..=100 {
            let frac = f64::from(i) / 100.0;
            let decision = check_fractions(frac, frac, 0.4);
            assert_eq!(decision.is_ok(), frac <= 0.4, "fraction {frac}");
        }
    }
}
