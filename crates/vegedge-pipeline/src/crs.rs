//! Pure-Rust reprojection between the coordinate systems a run touches.
//!
//! Supported EPSG codes:
//!
//! - 4326: WGS 84 geographic, `x` = longitude, `y` = latitude (degrees)
//! - 326xx / 327xx: WGS 84 UTM north / south
//! - 3857: Web Mercator
//! - 27700: British National Grid (OSGB36 transverse Mercator, reached
//!   from WGS 84 through a 7-parameter Helmert shift)
//!
//! Transverse Mercator uses the Snyder (USGS Prof. Paper 1395) series,
//! accurate to well under a metre within a few degrees of the central
//! meridian. Every other code is rejected with
//! [`PipelineError::UnsupportedCrs`].

use geo::{Coord, MapCoords};

use crate::types::PipelineError;

/// WGS 84 geographic.
pub const EPSG_WGS84: u32 = 4326;
/// Web Mercator.
pub const EPSG_WEB_MERCATOR: u32 = 3857;
/// British National Grid.
pub const EPSG_BNG: u32 = 27700;

// ── Ellipsoids ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ellipsoid {
    a: f64,
    e2: f64,
}

impl Ellipsoid {
    const fn from_flattening(a: f64, f: f64) -> Self {
        Self {
            a,
            e2: 2.0 * f - f * f,
        }
    }

    const fn from_axes(a: f64, b: f64) -> Self {
        Self {
            a,
            e2: (a * a - b * b) / (a * a),
        }
    }

    /// Second eccentricity squared.
    fn ep2(self) -> f64 {
        self.e2 / (1.0 - self.e2)
    }

    /// Meridional arc from the equator to `lat` (radians). Snyder eq. 3-21.
    fn meridional_arc(self, lat: f64) -> f64 {
        let e2 = self.e2;
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        self.a
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
    }

    fn to_ecef(self, lon: f64, lat: f64) -> [f64; 3] {
        let (sin_lat, cos_lat) = lat.sin_cos();
        let n = self.a / (1.0 - self.e2 * sin_lat * sin_lat).sqrt();
        [
            n * cos_lat * lon.cos(),
            n * cos_lat * lon.sin(),
            n * (1.0 - self.e2) * sin_lat,
        ]
    }

    fn from_ecef(self, [x, y, z]: [f64; 3]) -> (f64, f64) {
        let lon = y.atan2(x);
        let p = x.hypot(y);
        let mut lat = z.atan2(p * (1.0 - self.e2));
        for _ in 0..10 {
            let sin_lat = lat.sin();
            let n = self.a / (1.0 - self.e2 * sin_lat * sin_lat).sqrt();
            lat = (self.e2 * n).mul_add(sin_lat, z).atan2(p);
        }
        (lon, lat)
    }
}

const WGS84: Ellipsoid = Ellipsoid::from_flattening(6_378_137.0, 1.0 / 298.257_223_563);
const AIRY_1830: Ellipsoid = Ellipsoid::from_axes(6_377_563.396, 6_356_256.909);

// ── Transverse Mercator ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
struct TransverseMercator {
    ellipsoid: Ellipsoid,
    lat0: f64,
    lon0: f64,
    k0: f64,
    false_easting: f64,
    false_northing: f64,
}

impl TransverseMercator {
    fn utm(zone: u32, north: bool) -> Self {
        Self {
            ellipsoid: WGS84,
            lat0: 0.0,
            lon0: f64::from(zone).mul_add(6.0, -183.0).to_radians(),
            k0: 0.9996,
            false_easting: 500_000.0,
            false_northing: if north { 0.0 } else { 10_000_000.0 },
        }
    }

    fn national_grid() -> Self {
        Self {
            ellipsoid: AIRY_1830,
            lat0: 49.0_f64.to_radians(),
            lon0: (-2.0_f64).to_radians(),
            k0: 0.999_601_271_7,
            false_easting: 400_000.0,
            false_northing: -100_000.0,
        }
    }

    /// Geodetic (radians) to easting/northing. Snyder eqs. 8-9, 8-10.
    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let el = self.ellipsoid;
        let ep2 = el.ep2();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let tan_lat = lat.tan();

        let n = el.a / (1.0 - el.e2 * sin_lat * sin_lat).sqrt();
        let t = tan_lat * tan_lat;
        let c = ep2 * cos_lat * cos_lat;
        let a = cos_lat * (lon - self.lon0);
        let a2 = a * a;
        let a4 = a2 * a2;
        let a6 = a4 * a2;

        let m = el.meridional_arc(lat);
        let m0 = el.meridional_arc(self.lat0);

        let easting = self.k0
            * n
            * (a + (1.0 - t + c) * a2 * a / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a4 * a / 120.0)
            + self.false_easting;
        let northing = self.k0
            * (m - m0
                + n * tan_lat
                    * (a2 / 2.0
                        + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                        + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0))
            + self.false_northing;
        (easting, northing)
    }

    /// Easting/northing to geodetic (radians). Snyder eqs. 8-11 to 8-25.
    fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let el = self.ellipsoid;
        let e2 = el.e2;
        let ep2 = el.ep2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;

        let m = el.meridional_arc(self.lat0) + (northing - self.false_northing) / self.k0;
        let mu = m / (el.a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
        let sq = (1.0 - e2).sqrt();
        let e1 = (1.0 - sq) / (1.0 + sq);
        let e1_2 = e1 * e1;
        let e1_3 = e1_2 * e1;
        let e1_4 = e1_3 * e1;

        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let tan1 = phi1.tan();
        let c1 = ep2 * cos1 * cos1;
        let t1 = tan1 * tan1;
        let w = 1.0 - e2 * sin1 * sin1;
        let n1 = el.a / w.sqrt();
        let r1 = el.a * (1.0 - e2) / (w * w.sqrt());
        let d = (easting - self.false_easting) / (n1 * self.k0);
        let d2 = d * d;
        let d4 = d2 * d2;
        let d6 = d4 * d2;

        let lat = phi1
            - (n1 * tan1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                        - 252.0 * ep2
                        - 3.0 * c1 * c1)
                        * d6
                        / 720.0);
        let lon = self.lon0
            + (d - (1.0 + 2.0 * t1 + c1) * d2 * d / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                    * d4
                    * d
                    / 120.0)
                / cos1;
        (lon, lat)
    }
}

// ── Datum shift ──────────────────────────────────────────────────────────

/// WGS 84 to OSGB36 Helmert parameters (Ordnance Survey): translations
/// in metres, scale in ppm, rotations in arc-seconds.
const OSGB36_HELMERT: [f64; 7] = [-446.448, 125.157, -542.060, 20.4894, -0.1502, -0.2470, -0.8421];

/// Position-vector Helmert transform. `sign = -1.0` applies the inverse.
fn helmert(p: [f64; 3], sign: f64) -> [f64; 3] {
    let [tx, ty, tz, s, rx, ry, rz] = OSGB36_HELMERT.map(|v| v * sign);
    let s = 1.0 + s * 1e-6;
    let [rx, ry, rz] = [rx, ry, rz].map(|r| (r / 3600.0).to_radians());
    let [x, y, z] = p;
    [
        tx + s * x - rz * y + ry * z,
        ty + rz * x + s * y - rx * z,
        tz - ry * x + rx * y + s * z,
    ]
}

// ── Public API ───────────────────────────────────────────────────────────

/// A resolved coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// WGS 84 longitude/latitude in degrees.
    Geographic,
    /// WGS 84 UTM.
    Utm {
        /// Zone number, 1 to 60.
        zone: u32,
        /// Northern hemisphere.
        north: bool,
    },
    /// Spherical Web Mercator.
    WebMercator,
    /// OSGB36 British National Grid.
    BritishNationalGrid,
}

/// Parse a UTM EPSG code into `(zone, north)`.
#[must_use]
pub fn parse_utm_epsg(epsg: u32) -> Option<(u32, bool)> {
    if (32601..=32660).contains(&epsg) {
        Some((epsg - 32600, true))
    } else if (32701..=32760).contains(&epsg) {
        Some((epsg - 32700, false))
    } else {
        None
    }
}

impl Projection {
    /// Resolve an EPSG code.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnsupportedCrs`] for codes outside the
    /// supported set.
    pub fn from_epsg(epsg: u32) -> Result<Self, PipelineError> {
        match epsg {
            EPSG_WGS84 => Ok(Self::Geographic),
            EPSG_WEB_MERCATOR => Ok(Self::WebMercator),
            EPSG_BNG => Ok(Self::BritishNationalGrid),
            _ => parse_utm_epsg(epsg)
                .map(|(zone, north)| Self::Utm { zone, north })
                .ok_or(PipelineError::UnsupportedCrs(epsg)),
        }
    }

    /// The EPSG code of this projection.
    #[must_use]
    pub const fn epsg(self) -> u32 {
        match self {
            Self::Geographic => EPSG_WGS84,
            Self::WebMercator => EPSG_WEB_MERCATOR,
            Self::BritishNationalGrid => EPSG_BNG,
            Self::Utm { zone, north: true } => 32600 + zone,
            Self::Utm { zone, north: false } => 32700 + zone,
        }
    }

    /// Returns `true` for angular (degree) coordinates.
    #[must_use]
    pub const fn is_geographic(self) -> bool {
        matches!(self, Self::Geographic)
    }

    /// Convert native coordinates to WGS 84 `(lon, lat)` in degrees.
    #[must_use]
    pub fn to_wgs84(self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Self::Geographic => (x, y),
            Self::WebMercator => {
                let lon = x / WGS84.a;
                let lat = 2.0f64.mul_add((y / WGS84.a).exp().atan(), -std::f64::consts::FRAC_PI_2);
                (lon.to_degrees(), lat.to_degrees())
            }
            Self::Utm { zone, north } => {
                let (lon, lat) = TransverseMercator::utm(zone, north).inverse(x, y);
                (lon.to_degrees(), lat.to_degrees())
            }
            Self::BritishNationalGrid => {
                let (lon, lat) = TransverseMercator::national_grid().inverse(x, y);
                let ecef = helmert(AIRY_1830.to_ecef(lon, lat), -1.0);
                let (lon, lat) = WGS84.from_ecef(ecef);
                (lon.to_degrees(), lat.to_degrees())
            }
        }
    }

    /// Convert WGS 84 `(lon, lat)` in degrees to native coordinates.
    #[must_use]
    pub fn from_wgs84(self, lon: f64, lat: f64) -> (f64, f64) {
        let (lon_r, lat_r) = (lon.to_radians(), lat.to_radians());
        match self {
            Self::Geographic => (lon, lat),
            Self::WebMercator => (
                WGS84.a * lon_r,
                WGS84.a * (std::f64::consts::FRAC_PI_4 + lat_r / 2.0).tan().ln(),
            ),
            Self::Utm { zone, north } => TransverseMercator::utm(zone, north).forward(lon_r, lat_r),
            Self::BritishNationalGrid => {
                let ecef = helmert(WGS84.to_ecef(lon_r, lat_r), 1.0);
                let (lon, lat) = AIRY_1830.from_ecef(ecef);
                TransverseMercator::national_grid().forward(lon, lat)
            }
        }
    }
}

/// Point transformer between two resolved coordinate systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reprojector {
    source: Projection,
    target: Projection,
}

impl Reprojector {
    /// Resolve both ends of a transformation.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnsupportedCrs`] if either code is unsupported.
    pub fn new(source_epsg: u32, target_epsg: u32) -> Result<Self, PipelineError> {
        Ok(Self {
            source: Projection::from_epsg(source_epsg)?,
            target: Projection::from_epsg(target_epsg)?,
        })
    }

    /// Source projection.
    #[must_use]
    pub const fn source(&self) -> Projection {
        self.source
    }

    /// Target projection.
    #[must_use]
    pub const fn target(&self) -> Projection {
        self.target
    }

    /// Returns `true` when source and target coincide.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    /// Transform a single coordinate pair.
    #[must_use]
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_identity() {
            return (x, y);
        }
        let (lon, lat) = self.source.to_wgs84(x, y);
        self.target.from_wgs84(lon, lat)
    }

    /// Transform a `geo` coordinate.
    #[must_use]
    pub fn transform_coord(&self, c: Coord<f64>) -> Coord<f64> {
        let (x, y) = self.transform(c.x, c.y);
        Coord { x, y }
    }

    /// Transform every coordinate of a `geo` geometry.
    #[must_use]
    pub fn transform_geometry<G>(&self, geometry: &G) -> G
    where
        G: MapCoords<f64, f64, Output = G> + Clone,
    {
        if self.is_identity() {
            return geometry.clone();
        }
        geometry.map_coords(|c| self.transform_coord(c))
    }
}
