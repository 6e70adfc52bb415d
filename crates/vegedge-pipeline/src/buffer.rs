//! Reference buffer: the corridor around the reference line in which
//! edges are searched for.
//!
//! The reference line is reprojected into the frame's CRS and its
//! segments are loaded into an R-tree. A pixel belongs to the buffer when
//! the world position of its sample lies within `max_dist_ref` of the
//! nearest segment, which rasterizes the round-capped buffer polygon of
//! the line at sample positions.

use geo::line_measures::Distance;
use geo::{Coord, Euclidean, Line};
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::crs::{Projection, Reprojector};
use crate::georef::GeoTransform;
use crate::morphology::mask_from_fn;
use crate::types::{Dimensions, Mask, PipelineError, ReferenceLine};

/// A reference segment tagged with its position along the line.
type IndexedSegment = GeomWithData<Line<f64>, usize>;

/// Spatial index over the reference line, expressed in one CRS.
pub struct ReferenceIndex {
    tree: RTree<IndexedSegment>,
    epsg: u32,
}

impl ReferenceIndex {
    /// Reproject `reference` into `epsg` and index its segments.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ReferenceLine`] for an empty line or a
    /// geographic target CRS (buffer distances are metres), and
    /// [`PipelineError::UnsupportedCrs`] when either CRS is unsupported.
    pub fn new(reference: &ReferenceLine, epsg: u32) -> Result<Self, PipelineError> {
        if reference.line.0.is_empty() {
            return Err(PipelineError::ReferenceLine("line has no vertices".to_owned()));
        }
        if Projection::from_epsg(epsg)?.is_geographic() {
            return Err(PipelineError::ReferenceLine(format!(
                "cannot buffer by metres in geographic EPSG:{epsg}"
            )));
        }
        let projected = Reprojector::new(reference.epsg, epsg)?.transform_geometry(&reference.line);

        let coords = &projected.0;
        let segments: Vec<IndexedSegment> = if coords.len() == 1 {
            vec![GeomWithData::new(Line::new(coords[0], coords[0]), 0)]
        } else {
            coords
                .windows(2)
                .enumerate()
                .map(|(i, w)| GeomWithData::new(Line::new(w[0], w[1]), i))
                .collect()
        };

        Ok(Self {
            tree: RTree::bulk_load(segments),
            epsg,
        })
    }

    /// EPSG code the index is expressed in.
    #[must_use]
    pub const fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Distance from `c` to the nearest reference segment.
    #[must_use]
    pub fn distance(&self, c: Coord<f64>) -> f64 {
        let query = geo::Point::from(c);
        self.tree
            .nearest_neighbor(&query)
            .map_or(f64::INFINITY, |seg| Euclidean.distance(&query, seg.geom()))
    }

    /// Rasterize the buffer of radius `max_dist` onto a frame grid.
    #[must_use]
    pub fn rasterize(&self, georef: &GeoTransform, dims: Dimensions, max_dist: f64) -> Mask {
        mask_from_fn(dims, |x, y| {
            let (wx, wy) = georef.pixel_to_world(f64::from(x), f64::from(y));
            self.distance(Coord { x: wx, y: wy }) <= max_dist
        })
    }
}

/// Build the reference buffer for one frame.
///
/// # Errors
///
/// See [`ReferenceIndex::new`].
pub fn build_buffer(
    reference: &ReferenceLine,
    epsg: u32,
    georef: &GeoTransform,
    dims: Dimensions,
    max_dist_ref: f64,
) -> Result<Mask, PipelineError> {
    let index = ReferenceIndex::new(reference, epsg)?;
    let mask = index.rasterize(georef, dims, max_dist_ref);
    tracing::debug!(
        epsg,
        max_dist_ref,
        pixels = crate::morphology::count_set(&mask),
        "reference buffer built"
    );
    Ok(mask)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use geo::LineString;

    use super::*;
    use crate::morphology::{count_set, is_set};

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    /// Horizontal line along world y = -100 (row 10 at 10 m pixels).
    fn horizontal_reference() -> ReferenceLine {
        ReferenceLine {
            epsg: 32630,
            line: LineString::from(vec![(0.0, -100.0), (500.0, -100.0)]),
        }
    }

    #[test]
    fn corridor_around_horizontal_line() {
        let georef = GeoTransform::north_up(0.0, 0.0, 10.0);
        let mask = build_buffer(&horizontal_reference(), 32630, &georef, dims(20, 21), 35.0).unwrap();
        // Rows 7..=13 are within 35 m of row 10.
        for row in 0..21 {
            let expected = (7..=13).contains(&row);
            assert_eq!(is_set(&mask, 5, row), expected, "row {row}");
        }
    }

    #[test]
    fn boundary_distance_is_inside() {
        let georef = GeoTransform::north_up(0.0, 0.0, 10.0);
        let mask = build_buffer(&horizontal_reference(), 32630, &georef, dims(5, 21), 20.0).unwrap();
        assert!(is_set(&mask, 0, 8));
        assert!(!is_set(&mask, 0, 7));
    }

    #[test]
    fn round_cap_beyond_line_end() {
        // Line ends at x = 500 (column 50). Column 52 at the same row is
        // 20 m away, column 54 is 40 m away.
        let georef = GeoTransform::north_up(0.0, 0.0, 10.0);
        let mask = build_buffer(&horizontal_reference(), 32630, &georef, dims(60, 20), 30.0).unwrap();
        assert!(is_set(&mask, 52, 10));
        assert!(!is_set(&mask, 54, 10));
        // Diagonal off the end: (52, 12) is sqrt(800) < 30 m away.
        assert!(is_set(&mask, 52, 12));
    }

    #[test]
    fn line_far_from_frame_gives_empty_buffer() {
        let georef = GeoTransform::north_up(10_000.0, 10_000.0, 10.0);
        let mask = build_buffer(&horizontal_reference(), 32630, &georef, dims(10, 10), 100.0).unwrap();
        assert_eq!(count_set(&mask), 0);
    }

    #[test]
    fn geographic_reference_is_reprojected() {
        // A line in lon/lat crossing UTM zone 30 at the equator near the
        // central meridian (easting 500 000).
        let reference = ReferenceLine {
            epsg: 4326,
            line: LineString::from(vec![(-3.0, -0.01), (-3.0, 0.01)]),
        };
        let georef = GeoTransform::north_up(499_900.0, 100.0, 10.0);
        let mask = build_buffer(&reference, 32630, &georef, dims(21, 21), 25.0).unwrap();
        // Column 10 sits on easting 500 000.
        assert!(is_set(&mask, 10, 10));
        assert!(is_set(&mask, 12, 10));
        assert!(!is_set(&mask, 13, 10));
        assert!(!is_set(&mask, 0, 10));
    }

    #[test]
    fn single_vertex_reference_buffers_a_disk() {
        let reference = ReferenceLine {
            epsg: 32630,
            line: LineString::from(vec![(50.0, -50.0)]),
        };
        let georef = GeoTransform::north_up(0.0, 0.0, 10.0);
        let mask = build_buffer(&reference, 32630, &georef, dims(11, 11), 20.0).unwrap();
        assert!(is_set(&mask, 5, 5));
        assert!(is_set(&mask, 7, 5));
        assert!(!is_set(&mask, 7, 7));
    }

    #[test]
    fn empty_reference_is_fatal() {
        let reference = ReferenceLine {
            epsg: 32630,
            line: LineString::new(vec![]),
        };
        let georef = GeoTransform::north_up(0.0, 0.0, 10.0);
        assert!(matches!(
            build_buffer(&reference, 32630, &georef, dims(2, 2), 10.0),
            Err(PipelineError::ReferenceLine(_))
        ));
    }

    #[test]
    fn unsupported_reference_crs_is_fatal() {
        let reference = ReferenceLine {
            epsg: 2193,
            ..horizontal_reference()
        };
        let georef = GeoTransform::north_up(0.0, 0.0, 10.0);
        assert!(matches!(
            build_buffer(&reference, 32630, &georef, dims(2, 2), 10.0),
            Err(PipelineError::UnsupportedCrs(2193))
        ));
    }

    #[test]
    fn geographic_frame_is_fatal() {
        let georef = GeoTransform::north_up(0.0, 0.0, 0.0001);
        assert!(matches!(
            build_buffer(&horizontal_reference(), 4326, &georef, dims(2, 2), 10.0),
            Err(PipelineError::ReferenceLine(_))
        ));
    }
}
