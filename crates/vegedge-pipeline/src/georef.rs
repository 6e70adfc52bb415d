//! Affine georeference: pixel grid to world coordinates.
//!
//! Coefficients follow GDAL order
//! `[x0, x_scale, x_shear, y0, y_shear, y_scale]`:
//!
//! ```text
//! x = x0 + col * x_scale + row * x_shear
//! y = y0 + col * y_shear + row * y_scale
//! ```
//!
//! Pixel values are treated as samples located exactly at integer
//! `(col, row)` positions, the same convention contour vertices use, so
//! no half-pixel offset is applied in either direction.

use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Affine pixel-to-world transform. Serialized as the six GDAL coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct GeoTransform {
    /// World X of sample (0, 0).
    pub x0: f64,
    /// X change per column.
    pub x_scale: f64,
    /// X change per row.
    pub x_shear: f64,
    /// World Y of sample (0, 0).
    pub y0: f64,
    /// Y change per column.
    pub y_shear: f64,
    /// Y change per row (negative for north-up rasters).
    pub y_scale: f64,
}

impl GeoTransform {
    /// A north-up transform with square pixels of `pixel_size` metres.
    #[must_use]
    pub const fn north_up(x0: f64, y0: f64, pixel_size: f64) -> Self {
        Self {
            x0,
            x_scale: pixel_size,
            x_shear: 0.0,
            y0,
            y_shear: 0.0,
            y_scale: -pixel_size,
        }
    }

    /// Build from GDAL-ordered coefficients.
    #[must_use]
    pub const fn from_gdal(c: [f64; 6]) -> Self {
        Self {
            x0: c[0],
            x_scale: c[1],
            x_shear: c[2],
            y0: c[3],
            y_shear: c[4],
            y_scale: c[5],
        }
    }

    /// GDAL-ordered coefficients.
    #[must_use]
    pub const fn to_gdal(self) -> [f64; 6] {
        [
            self.x0,
            self.x_scale,
            self.x_shear,
            self.y0,
            self.y_shear,
            self.y_scale,
        ]
    }

    /// World coordinates of a (fractional) pixel position.
    #[must_use]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let x = row.mul_add(self.x_shear, col.mul_add(self.x_scale, self.x0));
        let y = row.mul_add(self.y_scale, col.mul_add(self.y_shear, self.y0));
        (x, y)
    }

    /// World coordinates of a contour vertex.
    #[must_use]
    pub fn point_to_world(&self, p: Point) -> geo::Coord<f64> {
        let (x, y) = self.pixel_to_world(p.x, p.y);
        geo::Coord { x, y }
    }

    /// Fractional pixel position of a world coordinate.
    ///
    /// Returns `None` for a degenerate (non-invertible) transform.
    #[must_use]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.x_scale.mul_add(self.y_scale, -(self.x_shear * self.y_shear));
        if det.abs() < 1e-12 {
            return None;
        }
        let dx = x - self.x0;
        let dy = y - self.y0;
        let col = self.y_scale.mul_add(dx, -(self.x_shear * dy)) / det;
        let row = self.x_scale.mul_add(dy, -(self.y_shear * dx)) / det;
        Some((col, row))
    }

    /// Ground size of one pixel along X.
    #[must_use]
    pub const fn pixel_size(&self) -> f64 {
        self.x_scale.abs()
    }
}

impl From<[f64; 6]> for GeoTransform {
    fn from(c: [f64; 6]) -> Self {
        Self::from_gdal(c)
    }
}

impl From<GeoTransform> for [f64; 6] {
    fn from(t: GeoTransform) -> Self {
        t.to_gdal()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn north_up_origin_maps_to_corner() {
        let t = GeoTransform::north_up(500_000.0, 6_000_000.0, 10.0);
        let (x, y) = t.pixel_to_world(0.0, 0.0);
        assert_relative_eq!(x, 500_000.0);
        assert_relative_eq!(y, 6_000_000.0);
    }

    #[test]
    fn rows_go_south() {
        let t = GeoTransform::north_up(0.0, 1000.0, 15.0);
        let (x, y) = t.pixel_to_world(2.0, 3.0);
        assert_relative_eq!(x, 30.0);
        assert_relative_eq!(y, 955.0);
    }

    #[test]
    fn fractional_positions_interpolate() {
        let t = GeoTransform::north_up(0.0, 0.0, 10.0);
        let c = t.point_to_world(Point::new(0.5, 1.25));
        assert_relative_eq!(c.x, 5.0);
        assert_relative_eq!(c.y, -12.5);
    }

    #[test]
    fn world_to_pixel_inverts_sheared_transform() {
        let t = GeoTransform::from_gdal([100.0, 10.0, 2.0, 200.0, 1.0, -10.0]);
        let (x, y) = t.pixel_to_world(7.5, 3.25);
        let (col, row) = t.world_to_pixel(x, y).unwrap();
        assert_relative_eq!(col, 7.5, epsilon = 1e-9);
        assert_relative_eq!(row, 3.25, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_transform_has_no_inverse() {
        let t = GeoTransform::from_gdal([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(t.world_to_pixel(1.0, 1.0).is_none());
    }

    #[test]
    fn gdal_round_trip_and_pixel_size() {
        let c = [1.0, -30.0, 0.0, 2.0, 0.0, -30.0];
        let t = GeoTransform::from(c);
        assert_eq!(<[f64; 6]>::from(t), c);
        assert_relative_eq!(t.pixel_size(), 30.0);
    }

    #[test]
    fn serializes_as_coefficient_array() {
        let t = GeoTransform::north_up(1.0, 2.0, 10.0);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "[1.0,10.0,0.0,2.0,0.0,-10.0]");
        let back: GeoTransform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
