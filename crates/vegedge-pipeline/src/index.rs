//! Spectral indices and local texture.
//!
//! Every index is `NaN` under cloud and wherever its denominator is zero.

use image::Luma;

use crate::types::{Band, FloatGrid, Mask, PipelineError, RasterFrame};

/// Soil brightness correction of SAVI.
pub const SAVI_L: f32 = 0.5;

fn is_cloud(cloud: Option<&Mask>, x: u32, y: u32) -> bool {
    cloud.is_some_and(|m| m.get_pixel(x, y)[0] != 0)
}

fn ratio(num: f32, den: f32) -> f32 {
    if den == 0.0 { f32::NAN } else { num / den }
}

/// Normalized difference `(a - b) / (a + b)`.
#[must_use]
pub fn nd_index(a: &FloatGrid, b: &FloatGrid, cloud: Option<&Mask>) -> FloatGrid {
    FloatGrid::from_fn(a.width(), a.height(), |x, y| {
        if is_cloud(cloud, x, y) {
            return Luma([f32::NAN]);
        }
        let (va, vb) = (a.get_pixel(x, y)[0], b.get_pixel(x, y)[0]);
        Luma([ratio(va - vb, va + vb)])
    })
}

/// Soil-adjusted vegetation index `(1 + L)(NIR - R) / (NIR + R + L)`.
#[must_use]
pub fn savi(nir: &FloatGrid, red: &FloatGrid, cloud: Option<&Mask>) -> FloatGrid {
    FloatGrid::from_fn(nir.width(), nir.height(), |x, y| {
        if is_cloud(cloud, x, y) {
            return Luma([f32::NAN]);
        }
        let (n, r) = (nir.get_pixel(x, y)[0], red.get_pixel(x, y)[0]);
        Luma([ratio((1.0 + SAVI_L) * (n - r), n + r + SAVI_L)])
    })
}

/// Red-blue NDVI `(NIR - (R + B)) / (NIR + (R + B))`.
#[must_use]
pub fn rb_ndvi(
    nir: &FloatGrid,
    red: &FloatGrid,
    blue: &FloatGrid,
    cloud: Option<&Mask>,
) -> FloatGrid {
    FloatGrid::from_fn(nir.width(), nir.height(), |x, y| {
        if is_cloud(cloud, x, y) {
            return Luma([f32::NAN]);
        }
        let n = nir.get_pixel(x, y)[0];
        let rb = red.get_pixel(x, y)[0] + blue.get_pixel(x, y)[0];
        Luma([ratio(n - rb, n + rb)])
    })
}

/// NDVI (NIR, red) of a frame: the vegetation edge index.
///
/// # Errors
///
/// Returns [`PipelineError::InsufficientBands`] if NIR or red is missing.
pub fn ndvi(frame: &RasterFrame) -> Result<FloatGrid, PipelineError> {
    Ok(nd_index(
        frame.require_band(Band::Nir)?,
        frame.require_band(Band::Red)?,
        frame.cloud_mask.as_ref(),
    ))
}

/// NDWI (NIR, green) of a frame: the wet/dry edge index.
///
/// # Errors
///
/// Returns [`PipelineError::InsufficientBands`] if NIR or green is missing.
pub fn ndwi(frame: &RasterFrame) -> Result<FloatGrid, PipelineError> {
    Ok(nd_index(
        frame.require_band(Band::Nir)?,
        frame.require_band(Band::Green)?,
        frame.cloud_mask.as_ref(),
    ))
}

/// Mirror an out-of-range index back into `0..len` without repeating the
/// edge sample (`-1 -> 1`, `len -> len - 2`).
fn reflect(i: i64, len: i64) -> u32 {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let m = i.rem_euclid(period);
    let r = if m < len { m } else { period - m };
    u32::try_from(r).unwrap_or(0)
}

/// Population standard deviation over a `(2r+1)²` window, with mirrored
/// borders. Any `NaN` in the window yields `NaN`.
#[must_use]
pub fn local_std(grid: &FloatGrid, radius: u32) -> FloatGrid {
    let (w, h) = (i64::from(grid.width()), i64::from(grid.height()));
    let r = i64::from(radius);
    let side = 2 * radius as usize + 1;
    #[allow(clippy::cast_precision_loss)]
    let n = (side * side) as f64;
    FloatGrid::from_fn(grid.width(), grid.height(), |x, y| {
        let mut values = Vec::with_capacity(side * side);
        for dy in -r..=r {
            for dx in -r..=r {
                let sx = reflect(i64::from(x) + dx, w);
                let sy = reflect(i64::from(y) + dy, h);
                values.push(f64::from(grid.get_pixel(sx, sy)[0]));
            }
        }
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        #[allow(clippy::cast_possible_truncation)]
        Luma([var.sqrt() as f32])
    })
}

/// Finite values of `grid` where `mask` is set.
#[must_use]
pub fn sample(grid: &FloatGrid, mask: &Mask) -> Vec<f64> {
    grid.as_raw()
        .iter()
        .zip(mask.as_raw())
        .filter(|&(v, &m)| m != 0 && v.is_finite())
        .map(|(&v, _)| f64::from(v))
        .collect()
}
