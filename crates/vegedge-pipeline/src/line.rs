//! Line building: pixel contours to georeferenced edge lines.
//!
//! Contours are moved into the frame's CRS through its affine
//! georeference. Vertices closer than the cloud distance to any cloud
//! pixel are dropped (the line is not split), lines shorter than the
//! minimum length are discarded, and the survivors are reprojected into
//! the three output systems.

use geo::{Coord, Euclidean, Length, LineString, MultiLineString};
use rstar::RTree;
use serde::{Deserialize, Serialize};

use crate::crs::Reprojector;
use crate::georef::GeoTransform;
use crate::types::{ExtractionSettings, Mask, PipelineError, Polyline};

/// An extracted edge in the three output coordinate systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeLine {
    /// In the configured output CRS (the frame's own when unset).
    pub output: MultiLineString<f64>,
    /// In the geographic reference CRS.
    pub latlon: MultiLineString<f64>,
    /// In the fixed secondary projected CRS.
    pub projected: MultiLineString<f64>,
}

impl Default for EdgeLine {
    fn default() -> Self {
        Self {
            output: MultiLineString::new(Vec::new()),
            latlon: MultiLineString::new(Vec::new()),
            projected: MultiLineString::new(Vec::new()),
        }
    }
}

impl EdgeLine {
    /// Whether no line survived filtering.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.output.0.is_empty()
    }

    /// Number of line parts.
    #[must_use]
    pub fn part_count(&self) -> usize {
        self.output.0.len()
    }
}

/// Sum of segment lengths.
#[must_use]
pub fn line_length(line: &LineString<f64>) -> f64 {
    Euclidean.length(line)
}

/// Convert pixel-space polylines to world-space line strings.
#[must_use]
pub fn to_world(contours: &[Polyline], georef: &GeoTransform) -> Vec<LineString<f64>> {
    contours
        .iter()
        .map(|c| {
            c.points()
                .iter()
                .map(|&p| georef.point_to_world(p))
                .collect::<Vec<Coord<f64>>>()
                .into()
        })
        .collect()
}

/// World positions of every cloud pixel, indexed for proximity queries.
pub struct CloudIndex {
    tree: RTree<[f64; 2]>,
}

impl CloudIndex {
    /// Index the set pixels of `cloud`.
    #[must_use]
    pub fn new(cloud: &Mask, georef: &GeoTransform) -> Self {
        let points: Vec<[f64; 2]> = cloud
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] != 0)
            .map(|(x, y, _)| {
                let (wx, wy) = georef.pixel_to_world(f64::from(x), f64::from(y));
                [wx, wy]
            })
            .collect();
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    /// Number of cloud pixels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether there are no cloud pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Whether a cloud pixel lies strictly closer than `distance` to `c`.
    #[must_use]
    pub fn is_near(&self, c: Coord<f64>, distance: f64) -> bool {
        self.tree
            .nearest_neighbor(&[c.x, c.y])
            .is_some_and(|p| (p[0] - c.x).hypot(p[1] - c.y) < distance)
    }

    /// Drop the vertices of each line that are near cloud. Lines left
    /// with fewer than two vertices are removed.
    #[must_use]
    pub fn filter(&self, lines: Vec<LineString<f64>>, distance: f64) -> Vec<LineString<f64>> {
        if self.is_empty() {
            return lines;
        }
        lines
            .into_iter()
            .filter_map(|line| {
                let kept: Vec<Coord<f64>> = line
                    .0
                    .into_iter()
                    .filter(|&c| !self.is_near(c, distance))
                    .collect();
                (kept.len() >= 2).then(|| LineString::from(kept))
            })
            .collect()
    }
}

/// Converts one frame's contours into an [`EdgeLine`].
#[derive(Debug, Clone)]
pub struct LineBuilder {
    to_output: Reprojector,
    to_latlon: Reprojector,
    to_projected: Reprojector,
    min_length: f64,
    cloud_distance: f64,
}

impl LineBuilder {
    /// Prepare the reprojections from `frame_epsg` into the configured
    /// output systems.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnsupportedCrs`] if any CRS involved is
    /// unsupported.
    pub fn new(frame_epsg: u32, settings: &ExtractionSettings) -> Result<Self, PipelineError> {
        let output_epsg = settings.output_epsg.unwrap_or(frame_epsg);
        Ok(Self {
            to_output: Reprojector::new(frame_epsg, output_epsg)?,
            to_latlon: Reprojector::new(frame_epsg, settings.ref_epsg)?,
            to_projected: Reprojector::new(frame_epsg, settings.projection_epsg)?,
            min_length: settings.min_length_sl,
            cloud_distance: settings.cloud_distance,
        })
    }

    /// Build the edge line of one frame.
    #[must_use]
    pub fn build(
        &self,
        contours: &[Polyline],
        georef: &GeoTransform,
        cloud: Option<&Mask>,
    ) -> EdgeLine {
        let mut lines = to_world(contours, georef);
        if let Some(cloud) = cloud {
            let clouds = CloudIndex::new(cloud, georef);
            lines = clouds.filter(lines, self.cloud_distance);
        }
        let before = lines.len();
        lines.retain(|l| line_length(l) >= self.min_length);
        tracing::debug!(
            contours = contours.len(),
            after_cloud = before,
            kept = lines.len(),
            "edge line built"
        );

        let native = MultiLineString::new(lines);
        EdgeLine {
            output: self.to_output.transform_geometry(&native),
            latlon: self.to_latlon.transform_geometry(&native),
            projected: self.to_projected.transform_geometry(&native),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;
    use image::Luma;

    use super::*;
    use crate::types::{MASK_SET, Point};

    fn settings(min_length_sl: f64) -> ExtractionSettings {
        ExtractionSettings {
            min_length_sl,
            ..ExtractionSettings::default()
        }
    }

    fn row_line(row: f64, cols: std::ops::RangeInclusive<u32>) -> Polyline {
        Polyline::new(cols.map(|c| Point::new(f64::from(c), row)).collect())
    }

    #[test]
    fn pixel_contours_move_to_world() {
        let georef = GeoTransform::north_up(1000.0, 2000.0, 10.0);
        let lines = to_world(&[row_line(2.5, 0..=1)], &georef);
        assert_eq!(lines.len(), 1);
        assert_relative_eq!(lines[0].0[0].x, 1000.0);
        assert_relative_eq!(lines[0].0[0].y, 1975.0);
        assert_relative_eq!(lines[0].0[1].x, 1010.0);
    }

    #[test]
    fn length_sums_segments() {
        let l = LineString::from(vec![(0.0, 0.0), (3.0, 4.0), (3.0, 10.0)]);
        assert_relative_eq!(line_length(&l), 11.0);
        assert_relative_eq!(line_length(&LineString::from(vec![(5.0, 5.0)])), 0.0);
        assert_relative_eq!(line_length(&LineString::new(vec![])), 0.0);
    }

    #[test]
    fn vertices_within_cloud_distance_are_dropped() {
        // One cloud pixel at world (100, -100).
        let georef = GeoTransform::north_up(0.0, 0.0, 10.0);
        let mut cloud = Mask::new(20, 20);
        cloud.put_pixel(10, 10, Luma([MASK_SET]));
        let clouds = CloudIndex::new(&cloud, &georef);
        assert_eq!(clouds.len(), 1);

        // Vertices at x = 60, 70, ..., 140 on the cloud's row.
        let line = LineString::from(
            (6..=14)
                .map(|c| (f64::from(c) * 10.0, -100.0))
                .collect::<Vec<_>>(),
        );
        let kept = clouds.filter(vec![line], 30.0);
        let xs: Vec<f64> = kept[0].0.iter().map(|c| c.x).collect();
        // 70 and 130 are exactly 30 m away and survive; 80..=120 are dropped.
        assert_eq!(xs, vec![60.0, 70.0, 130.0, 140.0]);
    }

    #[test]
    fn line_reduced_below_two_vertices_disappears() {
        let georef = GeoTransform::north_up(0.0, 0.0, 10.0);
        let cloud = Mask::from_pixel(5, 5, Luma([MASK_SET]));
        let clouds = CloudIndex::new(&cloud, &georef);
        let line = LineString::from(vec![(10.0, -10.0), (20.0, -20.0)]);
        assert!(clouds.filter(vec![line], 30.0).is_empty());
    }

    #[test]
    fn min_length_is_inclusive() {
        // 50 pixels of 10 m = 500 m.
        let georef = GeoTransform::north_up(500_000.0, 0.0, 10.0);
        let contour = [row_line(5.0, 0..=50)];

        let builder = LineBuilder::new(32630, &settings(500.0)).unwrap();
        let edge = builder.build(&contour, &georef, None);
        assert_eq!(edge.part_count(), 1);

        let builder = LineBuilder::new(32630, &settings(500.001)).unwrap();
        assert!(builder.build(&contour, &georef, None).is_empty());
    }

    #[test]
    fn variants_are_reprojected() {
        let georef = GeoTransform::north_up(500_000.0, 100.0, 10.0);
        let builder = LineBuilder::new(32630, &settings(10.0)).unwrap();
        let edge = builder.build(&[row_line(0.0, 0..=5)], &georef, Some(&Mask::new(10, 10)));

        // Output defaults to the frame's own CRS.
        assert_relative_eq!(edge.output.0[0].0[0].x, 500_000.0);
        // Lat/lon: the zone 30 central meridian is 3 degrees west.
        assert_relative_eq!(edge.latlon.0[0].0[0].x, -3.0, epsilon = 1e-9);
        assert!(edge.latlon.0[0].0[0].y.abs() < 0.01);
        // Web Mercator at the equator: x = R * lon.
        assert_relative_eq!(
            edge.projected.0[0].0[0].x,
            -3.0_f64.to_radians() * 6_378_137.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn no_contours_gives_empty_edge() {
        let georef = GeoTransform::north_up(0.0, 0.0, 10.0);
        let builder = LineBuilder::new(32630, &settings(0.0)).unwrap();
        let edge = builder.build(&[], &georef, None);
        assert!(edge.is_empty());
        assert!(edge.latlon.0.is_empty());
    }

    #[test]
    fn unsupported_output_crs_is_fatal() {
        let s = ExtractionSettings {
            output_epsg: Some(2193),
            ..ExtractionSettings::default()
        };
        assert!(matches!(
            LineBuilder::new(32630, &s),
            Err(PipelineError::UnsupportedCrs(2193))
        ));
    }
}
