//! Area-of-interest resolution
//!
//! Turns an uploaded GeoJSON boundary or a named administrative region into a
//! validated WGS84 [`AreaOfInterest`]. Pure: no I/O beyond the in-memory
//! boundary catalog.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{RusleError, RusleResult};
use crate::geometry::{
    declared_crs, equal_area_km2, validate_ring, Crs, GeoJson, Geometry, PolygonRings,
};
use crate::models::{AoiSource, AreaOfInterest};
use crate::services::boundary_catalog::{BoundaryCatalog, MAX_ADMIN_LEVEL};

/// Input accepted by [`AoiResolver::resolve`]
#[derive(Debug, Clone)]
pub enum AoiInput {
    Upload {
        geojson: Value,
        /// Overrides a `crs` member inside the document
        crs: Option<String>,
        filename: Option<String>,
    },
    AdminRegion {
        name: String,
        level: u8,
    },
}

/// Resolved upload plus facts about the original file
#[derive(Debug, Clone)]
pub struct ResolvedUpload {
    pub aoi: AreaOfInterest,
    pub feature_count: usize,
    pub declared_crs: Option<String>,
}

pub struct AoiResolver {
    catalog: Arc<BoundaryCatalog>,
    max_area_km2: f64,
}

impl AoiResolver {
    pub fn new(catalog: Arc<BoundaryCatalog>, max_area_km2: f64) -> Self {
        Self {
            catalog,
            max_area_km2,
        }
    }

    pub fn max_area_km2(&self) -> f64 {
        self.max_area_km2
    }

    pub fn resolve(&self, input: &AoiInput) -> RusleResult<AreaOfInterest> {
        match input {
            AoiInput::Upload {
                geojson,
                crs,
                filename,
            } => self
                .resolve_upload(geojson, crs.as_deref(), filename.clone())
                .map(|resolved| resolved.aoi),
            AoiInput::AdminRegion { name, level } => self.resolve_admin_region(name, *level),
        }
    }

    pub fn resolve_upload(
        &self,
        geojson: &Value,
        crs: Option<&str>,
        filename: Option<String>,
    ) -> RusleResult<ResolvedUpload> {
        let declared = crs.map(str::to_string).or_else(|| declared_crs(geojson));
        let source_crs = match declared.as_deref() {
            Some(name) => Crs::parse(name).ok_or_else(|| {
                RusleError::InvalidGeometry(format!(
                    "unsupported CRS '{}', expected EPSG:4326, OGC:CRS84 or EPSG:3857",
                    name
                ))
            })?,
            None => {
                warn!("Upload declares no CRS, assuming WGS84");
                Crs::Wgs84
            }
        };

        let parsed = GeoJson::from_value(geojson.clone()).map_err(RusleError::InvalidGeometry)?;
        let feature_count = parsed.feature_count();

        let mut parts: Vec<PolygonRings> = Vec::new();
        for geometry in parsed.into_geometries() {
            let geometry = geometry.map_positions(|p| source_crs.to_wgs84(p));
            match geometry {
                Geometry::Polygon(rings) => parts.push(rings),
                Geometry::MultiPolygon(polygons) => parts.extend(polygons),
                other => {
                    return Err(RusleError::InvalidGeometry(format!(
                        "{} is not polygonal",
                        other.type_name()
                    )))
                }
            }
        }

        debug!(feature_count, parts = parts.len(), crs = ?source_crs, "Parsed upload");

        let aoi = self.build(parts, AoiSource::Upload { filename })?;
        Ok(ResolvedUpload {
            aoi,
            feature_count,
            declared_crs: declared,
        })
    }

    pub fn resolve_admin_region(&self, name: &str, level: u8) -> RusleResult<AreaOfInterest> {
        if name.trim().is_empty() {
            return Err(RusleError::Validation("admin region name is empty".to_string()));
        }
        if level > MAX_ADMIN_LEVEL {
            return Err(RusleError::Validation(format!(
                "admin level must be 0..={}, got {}",
                MAX_ADMIN_LEVEL, level
            )));
        }

        let matches = self.catalog.lookup(name, level);
        if matches.is_empty() {
            return Err(RusleError::InvalidGeometry(format!(
                "administrative region '{}' not found at level {}",
                name, level
            )));
        }

        let mut parts: Vec<PolygonRings> = Vec::new();
        for geometry in matches {
            match geometry {
                Geometry::Polygon(rings) => parts.push(rings.clone()),
                Geometry::MultiPolygon(polygons) => parts.extend(polygons.iter().cloned()),
                _ => {}
            }
        }

        self.build(
            parts,
            AoiSource::AdminRegion {
                name: name.trim().to_string(),
                level,
            },
        )
    }

    /// Validate WGS84 polygon parts, measure them and enforce the area limit
    fn build(&self, parts: Vec<PolygonRings>, source: AoiSource) -> RusleResult<AreaOfInterest> {
        if parts.is_empty() {
            return Err(RusleError::InvalidGeometry(
                "no polygon geometry found".to_string(),
            ));
        }

        for (part_index, rings) in parts.iter().enumerate() {
            if rings.is_empty() {
                return Err(RusleError::InvalidGeometry(format!(
                    "polygon {} has no rings",
                    part_index
                )));
            }
            for (ring_index, ring) in rings.iter().enumerate() {
                validate_ring(ring).map_err(|reason| {
                    RusleError::InvalidGeometry(format!(
                        "polygon {} ring {}: {}",
                        part_index, ring_index, reason
                    ))
                })?;
                if let Some(p) = ring
                    .iter()
                    .find(|p| !(-180.0..=180.0).contains(&p[0]) || !(-90.0..=90.0).contains(&p[1]))
                {
                    return Err(RusleError::InvalidGeometry(format!(
                        "coordinate [{}, {}] is outside WGS84 bounds",
                        p[0], p[1]
                    )));
                }
            }
        }

        let geometry = Geometry::from_polygons(parts);
        let area_km2 = equal_area_km2(&geometry)
            .filter(|a| a.is_finite() && *a > 0.0)
            .ok_or_else(|| RusleError::InvalidGeometry("geometry has zero area".to_string()))?;

        if area_km2 > self.max_area_km2 {
            return Err(RusleError::AreaTooLarge {
                area_km2,
                max_km2: self.max_area_km2,
            });
        }

        let (bbox, centroid) = match (geometry.bounding_box(), geometry.centroid()) {
            (Some(bbox), Some(centroid)) => (bbox, centroid),
            _ => {
                return Err(RusleError::InvalidGeometry(
                    "geometry has no extent".to_string(),
                ))
            }
        };

        Ok(AreaOfInterest::new(geometry, source, area_km2, bbox, centroid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::projection::lon_lat_to_web_mercator;
    use serde_json::json;

    fn resolver(max_area_km2: f64) -> AoiResolver {
        AoiResolver::new(Arc::new(BoundaryCatalog::empty()), max_area_km2)
    }

    fn box_polygon(lon: f64, lat: f64, size: f64) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[
                [lon, lat], [lon + size, lat], [lon + size, lat + size], [lon, lat + size], [lon, lat]
            ]]
        })
    }

    #[test]
    fn test_upload_polygon_wgs84() {
        let resolved = resolver(50_000.0)
            .resolve_upload(&box_polygon(36.0, -1.5, 0.35), Some("EPSG:4326"), Some("aoi.geojson".into()))
            .unwrap();
        let area = resolved.aoi.area_km2();
        // 0.35° square near the equator
        assert!(area > 1450.0 && area < 1530.0, "area {}", area);
        assert_eq!(resolved.feature_count, 1);
        assert_eq!(resolved.declared_crs.as_deref(), Some("EPSG:4326"));
    }

    #[test]
    fn test_web_mercator_matches_wgs84() {
        let corners = [[10.0, 45.0], [10.5, 45.0], [10.5, 45.5], [10.0, 45.5], [10.0, 45.0]];
        let projected: Vec<[f64; 2]> = corners
            .iter()
            .map(|c| lon_lat_to_web_mercator(c[0], c[1]))
            .collect();
        let mercator = json!({
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3857"}},
            "features": [{"type": "Feature", "properties": {},
                          "geometry": {"type": "Polygon", "coordinates": [projected]}}]
        });
        let wgs84 = json!({"type": "Polygon", "coordinates": [corners]});

        let r = resolver(50_000.0);
        let a = r.resolve_upload(&mercator, None, None).unwrap().aoi.area_km2();
        let b = r.resolve_upload(&wgs84, None, None).unwrap().aoi.area_km2();
        assert!((a - b).abs() / b < 1e-6);
    }

    #[test]
    fn test_unsupported_crs() {
        let err = resolver(50_000.0)
            .resolve_upload(&box_polygon(0.0, 0.0, 1.0), Some("EPSG:32633"), None)
            .unwrap_err();
        assert!(matches!(err, RusleError::InvalidGeometry(msg) if msg.contains("EPSG:32633")));
    }

    #[test]
    fn test_self_intersecting_rejected() {
        let bow_tie = json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [1, 1], [1, 0], [0, 1], [0, 0]]]
        });
        assert!(matches!(
            resolver(50_000.0).resolve_upload(&bow_tie, None, None),
            Err(RusleError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_line_string_rejected() {
        let line = json!({"type": "LineString", "coordinates": [[0, 0], [1, 1]]});
        let err = resolver(50_000.0).resolve_upload(&line, None, None).unwrap_err();
        assert!(err.to_string().contains("not polygonal"));
    }

    #[test]
    fn test_empty_collection_rejected() {
        let empty = json!({"type": "FeatureCollection", "features": []});
        assert!(matches!(
            resolver(50_000.0).resolve_upload(&empty, None, None),
            Err(RusleError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_out_of_bounds_coordinates() {
        assert!(resolver(1e9)
            .resolve_upload(&box_polygon(179.5, 10.0, 1.0), None, None)
            .is_err());
    }

    #[test]
    fn test_area_too_large() {
        let err = resolver(50_000.0)
            .resolve_upload(&box_polygon(0.0, 0.0, 4.0), None, None)
            .unwrap_err();
        match err {
            RusleError::AreaTooLarge { area_km2, max_km2 } => {
                assert!(area_km2 > 190_000.0);
                assert_eq!(max_km2, 50_000.0);
            }
            other => panic!("expected AreaTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_features_are_dissolved() {
        let two = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {}, "geometry": box_polygon(0.0, 0.0, 0.1)},
                {"type": "Feature", "properties": {}, "geometry": box_polygon(1.0, 0.0, 0.1)}
            ]
        });
        let resolved = resolver(50_000.0).resolve_upload(&two, None, None).unwrap();
        assert!(matches!(resolved.aoi.geometry(), Geometry::MultiPolygon(parts) if parts.len() == 2));
        assert_eq!(resolved.feature_count, 2);
    }

    #[test]
    fn test_admin_region_lookup() {
        let catalog = BoundaryCatalog::from_geojson(json!({
            "type": "FeatureCollection",
            "features": [{"type": "Feature", "geometry": box_polygon(30.0, -2.0, 0.5),
                          "properties": {"ADM0_NAME": "Rwanda", "ADM1_NAME": "Kigali"}}]
        }))
        .unwrap();
        let r = AoiResolver::new(Arc::new(catalog), 50_000.0);

        let aoi = r.resolve_admin_region("kigali", 1).unwrap();
        assert_eq!(aoi.source().admin_level(), Some(1));

        let err = r.resolve_admin_region("Atlantis", 1).unwrap_err();
        assert!(matches!(err, RusleError::InvalidGeometry(msg) if msg.contains("Atlantis") && msg.contains("level 1")));

        assert!(matches!(r.resolve_admin_region("Kigali", 4), Err(RusleError::Validation(_))));
    }
}
