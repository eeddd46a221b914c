//! Coordinate reference systems and equal-area measurement
//!
//! Only two CRS families are accepted for uploads: geographic WGS84 and
//! spherical Web Mercator. Area is measured in a spherical Lambert azimuthal
//! equal-area projection centered on the geometry, never in degree units.

use std::f64::consts::PI;

use super::{Geometry, Position};

/// WGS84 semi-major axis, used by spherical Web Mercator (meters)
pub const WEB_MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// Radius of the sphere with the same surface area as the WGS84 ellipsoid (meters)
pub const AUTHALIC_RADIUS_M: f64 = 6_371_007.2;

/// Latitude limit of the Web Mercator square
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Supported coordinate reference systems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// EPSG:4326 / OGC:CRS84, `[lon, lat]` degrees
    Wgs84,
    /// EPSG:3857 and its legacy aliases, meters
    WebMercator,
}

impl Crs {
    /// Parse a CRS identifier such as `EPSG:4326`, `urn:ogc:def:crs:EPSG::3857`
    /// or `OGC:CRS84`.
    pub fn parse(identifier: &str) -> Option<Crs> {
        let normalized = identifier.trim().to_ascii_uppercase();
        if normalized.ends_with("CRS84") {
            return Some(Crs::Wgs84);
        }

        let code = normalized
            .rsplit(|c: char| c == ':' || c == '/')
            .find(|part| !part.is_empty())?;
        match code {
            "4326" => Some(Crs::Wgs84),
            "3857" | "900913" | "102100" | "102113" => Some(Crs::WebMercator),
            _ => None,
        }
    }

    /// Convert one position to WGS84 `[lon, lat]`
    pub fn to_wgs84(self, position: Position) -> Position {
        match self {
            Crs::Wgs84 => position,
            Crs::WebMercator => web_mercator_to_lon_lat(position[0], position[1]),
        }
    }
}

/// Inverse spherical Mercator
pub fn web_mercator_to_lon_lat(x: f64, y: f64) -> Position {
    let lon = (x / WEB_MERCATOR_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / WEB_MERCATOR_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    [lon, lat]
}

/// Forward spherical Mercator, latitude clamped to the Web Mercator square
pub fn lon_lat_to_web_mercator(lon: f64, lat: f64) -> Position {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = WEB_MERCATOR_RADIUS_M * lon.to_radians();
    let y = WEB_MERCATOR_RADIUS_M * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    [x, y]
}

/// Spherical Lambert azimuthal equal-area projection
#[derive(Debug, Clone, Copy)]
pub struct LambertAzimuthalEqualArea {
    lon0: f64,
    sin_lat0: f64,
    cos_lat0: f64,
    radius: f64,
}

impl LambertAzimuthalEqualArea {
    /// Projection centered on `[lon, lat]` degrees
    pub fn centered_on(center: Position) -> Self {
        let lat0 = center[1].to_radians();
        Self {
            lon0: center[0].to_radians(),
            sin_lat0: lat0.sin(),
            cos_lat0: lat0.cos(),
            radius: AUTHALIC_RADIUS_M,
        }
    }

    /// Project `[lon, lat]` degrees to planar meters.
    ///
    /// Returns `None` for the antipode of the center, which has no image.
    pub fn project(&self, position: Position) -> Option<Position> {
        let lat = position[1].to_radians();
        let dlon = position[0].to_radians() - self.lon0;
        let (sin_lat, cos_lat) = lat.sin_cos();
        let cos_dlon = dlon.cos();

        let denom = 1.0 + self.sin_lat0 * sin_lat + self.cos_lat0 * cos_lat * cos_dlon;
        if denom <= f64::EPSILON {
            return None;
        }
        let k = (2.0 / denom).sqrt();

        let x = self.radius * k * cos_lat * dlon.sin();
        let y = self.radius * k * (self.cos_lat0 * sin_lat - self.sin_lat0 * cos_lat * cos_dlon);
        Some([x, y])
    }
}

/// Unsigned shoelace area of a planar ring
pub fn planar_ring_area(ring: &[Position]) -> f64 {
    let twice: f64 = ring
        .windows(2)
        .map(|w| w[0][0] * w[1][1] - w[1][0] * w[0][1])
        .sum();
    twice.abs() / 2.0
}

/// Area of a WGS84 polygonal geometry in km², measured on a Lambert
/// azimuthal equal-area projection centered on it.
///
/// Exterior rings add, holes subtract. Non-polygonal geometries and positions
/// without a projected image yield `None`.
pub fn equal_area_km2(geometry: &Geometry) -> Option<f64> {
    let parts = geometry.polygons()?;
    let projection = LambertAzimuthalEqualArea::centered_on(geometry.centroid()?);

    let mut total_m2 = 0.0;
    for rings in parts {
        for (index, ring) in rings.iter().enumerate() {
            let projected = ring
                .iter()
                .map(|p| projection.project(*p))
                .collect::<Option<Vec<_>>>()?;
            let area = planar_ring_area(&projected);
            if index == 0 {
                total_m2 += area;
            } else {
                total_m2 -= area;
            }
        }
    }

    Some(total_m2.max(0.0) / 1_000_000.0)
}
