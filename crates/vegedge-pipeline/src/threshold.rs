//! Per-image separation thresholds on a spectral index.
//!
//! Two estimators:
//!
//! - [`weighted_peaks`] for the vegetation edge: the modal index values of
//!   a weak-signal class and a strong-signal class, combined as
//!   `0.2 * weak + 0.8 * strong`.
//! - [`otsu`] for the wet/dry edge.
//!
//! Both operate on [`ClassSamples`], the index values of two classes
//! collected by [`class_samples`] and equalised in size by
//! [`ClassSamples::balance`].

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::morphology::dilate_disk;
use crate::types::{FloatGrid, Mask, SkipReason};

/// Gaussian kernel bandwidth of the density estimates.
pub const KDE_BANDWIDTH: f64 = 0.01;

/// Number of grid points the densities are evaluated on.
pub const BIN_COUNT: usize = 200;

/// Weight of the weak-signal peak.
pub const WEAK_WEIGHT: f64 = 0.2;

/// Weight of the strong-signal peak.
pub const STRONG_WEIGHT: f64 = 0.8;

/// Radius (pixels) by which the reference buffer is grown before sampling.
pub const CORRIDOR_DILATION: u8 = 5;

/// Prominence a strong-class peak must reach on the first attempt.
pub const INITIAL_PROMINENCE: f64 = 0.5;

/// Amount the prominence requirement drops per retry.
pub const PROMINENCE_STEP: f64 = 0.05;

/// Histogram bins used by [`otsu`].
pub const OTSU_BINS: usize = 256;

/// Evaluation grid `-1, -0.99, ..., 0.99`.
///
/// The step is taken as the difference of the first two grid values, so
/// the point nominally at zero lands a few ulps above it and counts as
/// positive.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bins() -> Vec<f64> {
    let start = -1.0_f64;
    let step = (start + 0.01) - start;
    (0..BIN_COUNT).map(|i| (i as f64).mul_add(step, start)).collect()
}

/// Gaussian kernel density of `sample` evaluated at each point of `grid`.
///
/// The density integrates to one. An empty sample yields zeros.
#[must_use]
pub fn kde(sample: &[f64], grid: &[f64], bandwidth: f64) -> Vec<f64> {
    if sample.is_empty() {
        return vec![0.0; grid.len()];
    }
    #[allow(clippy::cast_precision_loss)]
    let norm = 1.0 / (sample.len() as f64 * bandwidth * (2.0 * std::f64::consts::PI).sqrt());
    grid.par_iter()
        .map(|&x| {
            let sum: f64 = sample
                .iter()
                .map(|&v| {
                    let z = (x - v) / bandwidth;
                    (-0.5 * z * z).exp()
                })
                .sum();
            sum * norm
        })
        .collect()
}

/// Strict local maxima of `y`. A flat top counts once, at its middle
/// (rounded down); a flat top touching either end is not a maximum.
fn local_maxima(y: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if y.len() < 3 {
        return peaks;
    }
    let mut i = 1;
    let last = y.len() - 1;
    while i < last {
        if y[i - 1] < y[i] {
            let mut ahead = i + 1;
            while ahead < last && y[ahead] == y[i] {
                ahead += 1;
            }
            if y[ahead] < y[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Topographic prominence of the peak at `peak`: its height above the
/// higher of the two lowest points reached before climbing above it on
/// either side.
fn prominence(y: &[f64], peak: usize) -> f64 {
    let top = y[peak];
    let left_min = y[..=peak]
        .iter()
        .rev()
        .take_while(|&&v| v <= top)
        .fold(top, |m, &v| m.min(v));
    let right_min = y[peak..]
        .iter()
        .take_while(|&&v| v <= top)
        .fold(top, |m, &v| m.min(v));
    top - left_min.max(right_min)
}

/// Indices of local maxima of `y` whose prominence is at least
/// `min_prominence`, in ascending order.
#[must_use]
pub fn find_peaks(y: &[f64], min_prominence: f64) -> Vec<usize> {
    local_maxima(y)
        .into_iter()
        .filter(|&p| prominence(y, p) >= min_prominence)
        .collect()
}

fn argmax(y: &[f64]) -> Option<usize> {
    y.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Modal value of a weak-signal density: the grid point of maximum
/// density, first one on ties.
#[must_use]
pub fn weak_peak(density: &[f64], grid: &[f64]) -> f64 {
    argmax(density).map_or(0.0, |i| grid[i])
}

/// First prominent peak of a strong-signal density above zero.
///
/// The prominence requirement starts at [`INITIAL_PROMINENCE`] and drops
/// by [`PROMINENCE_STEP`] until a peak qualifies. A positive half with no
/// local maximum at all falls back to its highest grid point.
#[must_use]
pub fn strong_peak(density: &[f64], grid: &[f64]) -> f64 {
    let (clip_grid, clip_density): (Vec<f64>, Vec<f64>) = grid
        .iter()
        .zip(density)
        .filter(|&(&x, _)| x > 0.0)
        .map(|(&x, &d)| (x, d))
        .unzip();
    if clip_grid.is_empty() {
        return 0.0;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let steps = (INITIAL_PROMINENCE / PROMINENCE_STEP).round() as u32;
    for k in 0..=steps {
        let min_prominence = f64::from(k).mul_add(-PROMINENCE_STEP, INITIAL_PROMINENCE);
        if let Some(&first) = find_peaks(&clip_density, min_prominence.max(0.0)).first() {
            if k > 0 {
                tracing::debug!(min_prominence, "strong-class peak found after relaxing");
            }
            return clip_grid[first];
        }
    }

    tracing::warn!("strong-class density has no peak above zero, using its maximum");
    argmax(&clip_density).map_or(0.0, |i| clip_grid[i])
}

/// Index values of the two classes compared by a threshold estimator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassSamples {
    /// Weak-signal class (vegetation, or water for the wet/dry edge).
    pub weak: Vec<f64>,
    /// Strong-signal class (bare ground, or sand for the wet/dry edge).
    pub strong: Vec<f64>,
}

impl ClassSamples {
    /// Whether either class has no values.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.weak.is_empty() || self.strong.is_empty()
    }

    /// Randomly subsample the larger class, without replacement, down to
    /// the size of the smaller one. Does nothing when either is empty.
    pub fn balance<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.is_degenerate() || self.weak.len() == self.strong.len() {
            return;
        }
        let target = self.weak.len().min(self.strong.len());
        let larger = if self.weak.len() > self.strong.len() {
            &mut self.weak
        } else {
            &mut self.strong
        };
        let mut keep = rand::seq::index::sample(rng, larger.len(), target).into_vec();
        keep.sort_unstable();
        *larger = keep.into_iter().map(|i| larger[i]).collect();
    }

    /// Smallest and largest value over both classes.
    #[must_use]
    pub fn range(&self) -> Option<(f64, f64)> {
        self.weak
            .iter()
            .chain(&self.strong)
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Grow the reference buffer into the sampling corridor.
#[must_use]
pub fn corridor(buffer: &Mask) -> Mask {
    dilate_disk(buffer, CORRIDOR_DILATION)
}

/// Collect the finite index values of two class planes, restricted to
/// `region` when given.
#[must_use]
pub fn class_samples(
    index: &FloatGrid,
    weak: &Mask,
    strong: &Mask,
    region: Option<&Mask>,
) -> ClassSamples {
    let mut samples = ClassSamples::default();
    for (i, &v) in index.as_raw().iter().enumerate() {
        if !v.is_finite() || region.is_some_and(|r| r.as_raw()[i] == 0) {
            continue;
        }
        if weak.as_raw()[i] != 0 {
            samples.weak.push(f64::from(v));
        } else if strong.as_raw()[i] != 0 {
            samples.strong.push(f64::from(v));
        }
    }
    samples
}

/// Result of the weighted-peak estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEstimate {
    /// The separation threshold.
    pub threshold: f64,
    /// Modal value of the weak-signal class.
    pub weak_peak: f64,
    /// First prominent peak of the strong-signal class.
    pub strong_peak: f64,
    /// Whether the combined value had to be pulled inside the sample range.
    pub clamped: bool,
}

/// Keep `t` strictly inside `(lo, hi)`.
fn clamp_inside(t: f64, lo: f64, hi: f64) -> (f64, bool) {
    if t > lo && t < hi {
        return (t, false);
    }
    let margin = (0.5 / 100.0_f64).min((hi - lo) / 4.0);
    (t.clamp(lo + margin, hi - margin), true)
}

/// Weighted-peak threshold of two (already balanced) class samples.
///
/// # Errors
///
/// [`SkipReason::EmptyClassSample`] when either class has no values,
/// [`SkipReason::InsufficientClassVariety`] when all values are equal.
pub fn weighted_peaks(samples: &ClassSamples) -> Result<ThresholdEstimate, SkipReason> {
    if samples.is_degenerate() {
        return Err(SkipReason::EmptyClassSample);
    }
    let Some((lo, hi)) = samples.range() else {
        return Err(SkipReason::EmptyClassSample);
    };
    if lo >= hi {
        return Err(SkipReason::InsufficientClassVariety);
    }

    let grid = bins();
    let weak = weak_peak(&kde(&samples.weak, &grid, KDE_BANDWIDTH), &grid);
    let strong = strong_peak(&kde(&samples.strong, &grid, KDE_BANDWIDTH), &grid);
    let raw = WEAK_WEIGHT.mul_add(weak, STRONG_WEIGHT * strong);
    let (threshold, clamped) = clamp_inside(raw, lo, hi);
    if clamped {
        tracing::warn!(raw, threshold, lo, hi, "weighted-peak threshold outside sample range");
    }
    tracing::debug!(weak, strong, threshold, "weighted-peak threshold");

    Ok(ThresholdEstimate {
        threshold,
        weak_peak: weak,
        strong_peak: strong,
        clamped,
    })
}

/// Otsu threshold of a sample: the histogram bin centre maximising the
/// between-class variance. A constant sample returns its value.
#[must_use]
pub fn otsu(values: &[f64]) -> Option<f64> {
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;
    if lo >= hi {
        return Some(lo);
    }

    #[allow(clippy::cast_precision_loss)]
    let width = (hi - lo) / OTSU_BINS as f64;
    let mut hist = [0.0_f64; OTSU_BINS];
    for &v in values.iter().filter(|v| v.is_finite()) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let b = (((v - lo) / width) as usize).min(OTSU_BINS - 1);
        hist[b] += 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let centres: Vec<f64> = (0..OTSU_BINS)
        .map(|i| (i as f64 + 0.5).mul_add(width, lo))
        .collect();

    // Cumulative weights and means from the low end and the high end.
    let mut w1 = [0.0_f64; OTSU_BINS];
    let mut m1 = [0.0_f64; OTSU_BINS];
    let (mut w, mut s) = (0.0, 0.0);
    for i in 0..OTSU_BINS {
        w += hist[i];
        s += hist[i] * centres[i];
        w1[i] = w;
        m1[i] = if w > 0.0 { s / w } else { 0.0 };
    }
    let mut w2 = [0.0_f64; OTSU_BINS];
    let mut m2 = [0.0_f64; OTSU_BINS];
    let (mut w, mut s) = (0.0, 0.0);
    for i in (0..OTSU_BINS).rev() {
        w += hist[i];
        s += hist[i] * centres[i];
        w2[i] = w;
        m2[i] = if w > 0.0 { s / w } else { 0.0 };
    }

    let best = (0..OTSU_BINS - 1)
        .map(|i| (i, w1[i] * w2[i + 1] * (m1[i] - m2[i + 1]).powi(2)))
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, v)| {
            if v > bv { (i, v) } else { (bi, bv) }
        })
        .0;
    Some(centres[best])
}

/// Otsu threshold over the union of two (already balanced) class samples.
///
/// # Errors
///
/// [`SkipReason::EmptyClassSample`] when either class has no values.
pub fn water_threshold(samples: &ClassSamples) -> Result<f64, SkipReason> {
    if samples.is_degenerate() {
        return Err(SkipReason::EmptyClassSample);
    }
    let all: Vec<f64> = samples.weak.iter().chain(&samples.strong).copied().collect();
    let t = otsu(&all).ok_or(SkipReason::EmptyClassSample)?;
    tracing::debug!(threshold = t, "wet/dry threshold");
    Ok(t)
}
