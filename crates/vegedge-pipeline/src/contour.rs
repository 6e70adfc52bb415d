//! Contour tracing: extract iso-lines of a spectral index grid.
//!
//! This module defines the [`ContourTracer`] trait for pluggable contour
//! tracing algorithms and the [`ContourTracerKind`] enum for selecting
//! which algorithm to use at runtime.
//!
//! # Strategy pattern
//!
//! A tracer turns a float grid and an iso-value into a set of pixel-space
//! polylines. Cells touching undefined (`NaN`) samples produce `NaN`
//! vertices, which [`clean_contours`] strips afterwards. Pixels outside the
//! search corridor are made undefined with [`mask_outside`] before tracing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{FloatGrid, Mask, Point, Polyline};

/// Selects which contour tracing algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContourTracerKind {
    /// Marching squares with linear interpolation along cell edges.
    ///
    /// A sample is inside when its value is strictly above the level.
    /// Saddle cells keep the low corners connected.
    #[default]
    MarchingSquares,
}

/// Trait for contour tracing strategies.
///
/// Input: a float grid (row-major, `NaN` = undefined) and an iso-value.
/// Output: a set of polylines in pixel coordinates (`x` = column,
/// `y` = row). Closed contours repeat their first vertex at the end.
pub trait ContourTracer {
    /// Trace the iso-lines of `grid` at `level`.
    fn trace(&self, grid: &FloatGrid, level: f64) -> Vec<Polyline>;
}

impl ContourTracer for ContourTracerKind {
    fn trace(&self, grid: &FloatGrid, level: f64) -> Vec<Polyline> {
        match *self {
            Self::MarchingSquares => trace_marching_squares(grid, level),
        }
    }
}

/// A cell edge, identified by its upper/left sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Edge {
    /// Between `(row, col)` and `(row, col + 1)`.
    Horizontal(u32, u32),
    /// Between `(row, col)` and `(row + 1, col)`.
    Vertical(u32, u32),
}

fn value(grid: &FloatGrid, row: u32, col: u32) -> f64 {
    f64::from(grid.get_pixel(col, row)[0])
}

fn crossing(grid: &FloatGrid, edge: Edge, level: f64) -> Point {
    let (r, c, r2, c2) = match edge {
        Edge::Horizontal(r, c) => (r, c, r, c + 1),
        Edge::Vertical(r, c) => (r, c, r + 1, c),
    };
    let (a, b) = (value(grid, r, c), value(grid, r2, c2));
    let t = (level - a) / (b - a);
    let (r, c, r2, c2) = (f64::from(r), f64::from(c), f64::from(r2), f64::from(c2));
    Point::new(t.mul_add(c2 - c, c), t.mul_add(r2 - r, r))
}

fn trace_marching_squares(grid: &FloatGrid, level: f64) -> Vec<Polyline> {
    let (w, h) = grid.dimensions();
    if w < 2 || h < 2 {
        return Vec::new();
    }
    let above = |r: u32, c: u32| value(grid, r, c) > level;

    let mut segments: Vec<(Edge, Edge)> = Vec::new();
    for r in 0..h - 1 {
        for c in 0..w - 1 {
            let (ul, ur, ll, lr) = (above(r, c), above(r, c + 1), above(r + 1, c), above(r + 1, c + 1));
            let top = Edge::Horizontal(r, c);
            let bottom = Edge::Horizontal(r + 1, c);
            let left = Edge::Vertical(r, c);
            let right = Edge::Vertical(r, c + 1);

            match (ul, ur, ll, lr) {
                // Saddles: cut around each high corner.
                (true, false, false, true) => {
                    segments.push((top, left));
                    segments.push((bottom, right));
                }
                (false, true, true, false) => {
                    segments.push((top, right));
                    segments.push((bottom, left));
                }
                _ => {
                    let crossed: Vec<Edge> = [
                        (ul != ur, top),
                        (ur != lr, right),
                        (ll != lr, bottom),
                        (ul != ll, left),
                    ]
                    .into_iter()
                    .filter_map(|(hit, e)| hit.then_some(e))
                    .collect();
                    if let [a, b] = crossed[..] {
                        segments.push((a, b));
                    }
                }
            }
        }
    }

    let mut points: HashMap<Edge, Point> = HashMap::new();
    for &(a, b) in &segments {
        for e in [a, b] {
            points.entry(e).or_insert_with(|| crossing(grid, e, level));
        }
    }
    assemble(&segments, &points)
}

/// Chain segments sharing an edge crossing into polylines. Open chains
/// are walked from their free ends first, then the remaining closed loops.
fn assemble(segments: &[(Edge, Edge)], points: &HashMap<Edge, Point>) -> Vec<Polyline> {
    let mut ends: HashMap<Edge, Vec<usize>> = HashMap::new();
    for (i, &(a, b)) in segments.iter().enumerate() {
        ends.entry(a).or_default().push(i);
        ends.entry(b).or_default().push(i);
    }
    let mut used = vec![false; segments.len()];

    let walk = |start: Edge, used: &mut [bool]| -> Vec<Point> {
        let mut chain = vec![points[&start]];
        let mut current = start;
        while let Some(&seg) = ends
            .get(&current)
            .and_then(|segs| segs.iter().find(|&&s| !used[s]))
        {
            used[seg] = true;
            let (a, b) = segments[seg];
            current = if a == current { b } else { a };
            chain.push(points[&current]);
        }
        chain
    };

    let mut open_starts: Vec<Edge> = ends
        .iter()
        .filter(|(_, s)| s.len() == 1)
        .map(|(e, _)| *e)
        .collect();
    open_starts.sort_unstable();

    let mut contours = Vec::new();
    for start in open_starts {
        if ends[&start].iter().all(|&s| used[s]) {
            continue;
        }
        contours.push(Polyline::new(walk(start, &mut used)));
    }
    for i in 0..segments.len() {
        if !used[i] {
            contours.push(Polyline::new(walk(segments[i].0, &mut used)));
        }
    }
    contours
}

/// Copy of `index` with every pixel outside `region` set to `NaN`.
#[must_use]
pub fn mask_outside(index: &FloatGrid, region: &Mask) -> FloatGrid {
    let mut out = index.clone();
    for (v, &m) in out.iter_mut().zip(region.as_raw()) {
        if m == 0 {
            *v = f32::NAN;
        }
    }
    out
}

/// Drop undefined vertices; keep polylines with at least two left.
#[must_use]
pub fn clean_contours(contours: Vec<Polyline>) -> Vec<Polyline> {
    contours
        .into_iter()
        .filter_map(|p| {
            let points: Vec<Point> = p.into_points().into_iter().filter(|q| !q.is_nan()).collect();
            (points.len() >= 2).then(|| Polyline::new(points))
        })
        .collect()
}

/// Trace and clean the iso-lines of `index` at `level`, restricted to
/// `region` when given.
#[must_use]
pub fn find_contours(
    index: &FloatGrid,
    level: f64,
    region: Option<&Mask>,
    tracer: &impl ContourTracer,
) -> Vec<Polyline> {
    let raw = match region {
        Some(region) => tracer.trace(&mask_outside(index, region), level),
        None => tracer.trace(index, level),
    };
    let traced = raw.len();
    let contours = clean_contours(raw);
    tracing::debug!(level, traced, kept = contours.len(), "contours traced");
    contours
}
