//! Resolved area of interest

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::geometry::{BoundingBox, Geometry, Position};

/// Where an area of interest came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AoiSource {
    Upload {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    AdminRegion {
        name: String,
        /// 0 = country, 1 = region/state, 2 = province/county
        level: u8,
    },
}

impl AoiSource {
    pub fn admin_level(&self) -> Option<u8> {
        match self {
            AoiSource::AdminRegion { level, .. } => Some(*level),
            AoiSource::Upload { .. } => None,
        }
    }

    pub fn upload_filename(&self) -> Option<&str> {
        match self {
            AoiSource::Upload { filename } => filename.as_deref(),
            AoiSource::AdminRegion { .. } => None,
        }
    }
}

/// Validated WGS84 polygonal area. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaOfInterest {
    geometry: Geometry,
    source: AoiSource,
    area_km2: f64,
    bbox: BoundingBox,
    centroid: Position,
}

impl AreaOfInterest {
    pub(crate) fn new(
        geometry: Geometry,
        source: AoiSource,
        area_km2: f64,
        bbox: BoundingBox,
        centroid: Position,
    ) -> Self {
        Self {
            geometry,
            source,
            area_km2,
            bbox,
            centroid,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn source(&self) -> &AoiSource {
        &self.source
    }

    pub fn area_km2(&self) -> f64 {
        self.area_km2
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn centroid(&self) -> Position {
        self.centroid
    }

    /// GeoJSON Feature for map previews
    pub fn to_feature(&self) -> Value {
        json!({
            "type": "Feature",
            "geometry": self.geometry,
            "properties": {
                "source": self.source,
                "area_km2": self.area_km2,
                "bbox": [self.bbox.min_x, self.bbox.min_y, self.bbox.max_x, self.bbox.max_y],
                "centroid": self.centroid,
            }
        })
    }
}
