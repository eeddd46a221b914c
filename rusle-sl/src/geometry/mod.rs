//! Vector geometry for areas of interest
//!
//! GeoJSON geometries are parsed into [`Geometry`], reprojected to WGS84 and
//! validated before any area is computed. Positions are `[x, y]`, which is
//! `[longitude, latitude]` once in WGS84.

pub mod projection;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use projection::{equal_area_km2, Crs, LambertAzimuthalEqualArea};

/// `[x, y]` coordinate pair
pub type Position = [f64; 2];

/// Closed sequence of positions (first == last)
pub type Ring = Vec<Position>;

/// Exterior ring followed by holes
pub type PolygonRings = Vec<Ring>;

/// GeoJSON geometry object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(PolygonRings),
    MultiPolygon(Vec<PolygonRings>),
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Polygon parts, or `None` for non-polygonal geometries
    pub fn polygons(&self) -> Option<Vec<&PolygonRings>> {
        match self {
            Geometry::Polygon(rings) => Some(vec![rings]),
            Geometry::MultiPolygon(parts) => Some(parts.iter().collect()),
            _ => None,
        }
    }

    /// Build a Polygon for one part, MultiPolygon otherwise
    pub fn from_polygons(mut parts: Vec<PolygonRings>) -> Geometry {
        if parts.len() == 1 {
            Geometry::Polygon(parts.remove(0))
        } else {
            Geometry::MultiPolygon(parts)
        }
    }

    /// Apply `f` to every position
    pub fn map_positions<F>(&self, f: F) -> Geometry
    where
        F: Fn(Position) -> Position,
    {
        let ring = |r: &Vec<Position>| r.iter().map(|p| f(*p)).collect::<Vec<_>>();
        match self {
            Geometry::Point(p) => Geometry::Point(f(*p)),
            Geometry::MultiPoint(ps) => Geometry::MultiPoint(ring(ps)),
            Geometry::LineString(ps) => Geometry::LineString(ring(ps)),
            Geometry::MultiLineString(ls) => Geometry::MultiLineString(ls.iter().map(ring).collect()),
            Geometry::Polygon(rs) => Geometry::Polygon(rs.iter().map(ring).collect()),
            Geometry::MultiPolygon(ps) => {
                Geometry::MultiPolygon(ps.iter().map(|rs| rs.iter().map(ring).collect()).collect())
            }
        }
    }

    fn positions(&self) -> Vec<Position> {
        match self {
            Geometry::Point(p) => vec![*p],
            Geometry::MultiPoint(ps) | Geometry::LineString(ps) => ps.clone(),
            Geometry::MultiLineString(ls) => ls.iter().flatten().copied().collect(),
            Geometry::Polygon(rs) => rs.iter().flatten().copied().collect(),
            Geometry::MultiPolygon(ps) => ps.iter().flatten().flatten().copied().collect(),
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_positions(&self.positions())
    }

    /// Point-in-polygon test (even-odd rule, holes excluded).
    /// Always false for non-polygonal geometries.
    pub fn contains(&self, point: Position) -> bool {
        let parts = match self.polygons() {
            Some(parts) => parts,
            None => return false,
        };
        parts.iter().any(|rings| {
            let mut rings = rings.iter();
            match rings.next() {
                Some(exterior) if ring_contains(exterior, point) => {
                    !rings.any(|hole| ring_contains(hole, point))
                }
                _ => false,
            }
        })
    }

    /// Area-weighted planar centroid of the exterior rings.
    ///
    /// Falls back to the bounding-box center for degenerate input.
    pub fn centroid(&self) -> Option<Position> {
        let bbox = self.bounding_box()?;
        let parts = match self.polygons() {
            Some(parts) => parts,
            None => return Some(bbox.center()),
        };

        let (mut area2, mut cx, mut cy) = (0.0, 0.0, 0.0);
        for part in parts {
            if let Some(exterior) = part.first() {
                for w in exterior.windows(2) {
                    let cross = w[0][0] * w[1][1] - w[1][0] * w[0][1];
                    area2 += cross;
                    cx += (w[0][0] + w[1][0]) * cross;
                    cy += (w[0][1] + w[1][1]) * cross;
                }
            }
        }

        if area2.abs() < f64::EPSILON {
            return Some(bbox.center());
        }
        Some([cx / (3.0 * area2), cy / (3.0 * area2)])
    }
}

/// Axis-aligned extent in the geometry's coordinate system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn from_positions(positions: &[Position]) -> Option<Self> {
        let first = positions.first()?;
        let mut bbox = BoundingBox::new(first[0], first[1], first[0], first[1]);
        for p in &positions[1..] {
            bbox.min_x = bbox.min_x.min(p[0]);
            bbox.min_y = bbox.min_y.min(p[1]);
            bbox.max_x = bbox.max_x.max(p[0]);
            bbox.max_y = bbox.max_y.max(p[1]);
        }
        Some(bbox)
    }

    /// Touching edges count as intersecting
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn center(&self) -> Position {
        [(self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0]
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// GeoJSON Feature with its properties
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Option<Geometry>,
    pub properties: Map<String, Value>,
}

/// Any top-level GeoJSON object accepted as an upload
#[derive(Debug, Clone, PartialEq)]
pub enum GeoJson {
    Geometry(Geometry),
    Feature(Feature),
    FeatureCollection(Vec<Feature>),
}

impl GeoJson {
    /// Parse a GeoJSON document already decoded to JSON
    pub fn from_value(value: Value) -> Result<Self, String> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "GeoJSON object has no \"type\"".to_string())?
            .to_string();

        match kind.as_str() {
            "Feature" => Ok(GeoJson::Feature(parse_feature(value)?)),
            "FeatureCollection" => {
                let features = match value.get("features") {
                    Some(Value::Array(items)) => items.clone(),
                    _ => return Err("FeatureCollection has no \"features\" array".to_string()),
                };
                let features = features
                    .into_iter()
                    .map(parse_feature)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(GeoJson::FeatureCollection(features))
            }
            _ => serde_json::from_value::<Geometry>(value)
                .map(GeoJson::Geometry)
                .map_err(|e| format!("invalid {} geometry: {}", kind, e)),
        }
    }

    /// Every geometry in document order (features without geometry are skipped)
    pub fn into_geometries(self) -> Vec<Geometry> {
        match self {
            GeoJson::Geometry(g) => vec![g],
            GeoJson::Feature(f) => f.geometry.into_iter().collect(),
            GeoJson::FeatureCollection(fs) => fs.into_iter().filter_map(|f| f.geometry).collect(),
        }
    }

    pub fn feature_count(&self) -> usize {
        match self {
            GeoJson::Geometry(_) | GeoJson::Feature(_) => 1,
            GeoJson::FeatureCollection(fs) => fs.len(),
        }
    }
}

fn parse_feature(value: Value) -> Result<Feature, String> {
    let mut object = match value {
        Value::Object(object) => object,
        _ => return Err("Feature must be a JSON object".to_string()),
    };

    let geometry = match object.remove("geometry") {
        None | Some(Value::Null) => None,
        Some(g) => Some(
            serde_json::from_value::<Geometry>(g).map_err(|e| format!("invalid feature geometry: {}", e))?,
        ),
    };
    let properties = match object.remove("properties") {
        Some(Value::Object(props)) => props,
        _ => Map::new(),
    };

    Ok(Feature { geometry, properties })
}

/// CRS named in a legacy GeoJSON `crs` member, if any
pub fn declared_crs(value: &Value) -> Option<String> {
    value
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

/// Check one ring: closed, at least four positions, finite, no self-intersection
pub fn validate_ring(ring: &[Position]) -> Result<(), String> {
    if ring.len() < 4 {
        return Err(format!("ring has {} positions, at least 4 required", ring.len()));
    }
    if ring.iter().any(|p| !p[0].is_finite() || !p[1].is_finite()) {
        return Err("ring contains non-finite coordinates".to_string());
    }
    if ring.first() != ring.last() {
        return Err("ring is not closed".to_string());
    }
    if let Some((i, j)) = find_self_intersection(ring) {
        return Err(format!("ring self-intersects between segments {} and {}", i, j));
    }
    Ok(())
}

/// First pair of non-adjacent crossing segments in a closed ring
pub fn find_self_intersection(ring: &[Position]) -> Option<(usize, usize)> {
    let n = ring.len().saturating_sub(1);
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            if segments_intersect(ring[i], ring[i + 1], ring[j], ring[j + 1]) {
                return Some((i, j));
            }
        }
    }
    None
}

fn ring_contains(ring: &[Position], point: Position) -> bool {
    let mut inside = false;
    for w in ring.windows(2) {
        let (a, b) = (w[0], w[1]);
        if (a[1] > point[1]) != (b[1] > point[1]) {
            let x_cross = a[0] + (point[1] - a[1]) * (b[0] - a[0]) / (b[1] - a[1]);
            if point[0] < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

fn orientation(a: Position, b: Position, c: Position) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn on_segment(a: Position, b: Position, p: Position) -> bool {
    p[0] >= a[0].min(b[0]) && p[0] <= a[0].max(b[0]) && p[1] >= a[1].min(b[1]) && p[1] <= a[1].max(b[1])
}

/// Closed-segment intersection test, collinear overlap included
pub fn segments_intersect(p1: Position, p2: Position, p3: Position, p4: Position) -> bool {
    let d1 = orientation(p3, p4, p1);
    let d2 = orientation(p3, p4, p2);
    let d3 = orientation(p1, p2, p3);
    let d4 = orientation(p1, p2, p4);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(p3, p4, p1))
        || (d2 == 0.0 && on_segment(p3, p4, p2))
        || (d3 == 0.0 && on_segment(p1, p2, p3))
        || (d4 == 0.0 && on_segment(p1, p2, p4))
}
