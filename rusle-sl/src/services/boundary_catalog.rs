//! In-memory administrative boundary catalog
//!
//! Loaded once at startup from a GeoJSON FeatureCollection in WGS84. Features
//! are named either GAUL-style (`ADM0_NAME`, `ADM1_NAME`, `ADM2_NAME`, level
//! taken from the deepest name present) or with explicit `name` + `level`
//! properties.

use std::path::Path;

use rusle_common::{Error, Result};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::geometry::{GeoJson, Geometry};

/// Deepest administrative level served
pub const MAX_ADMIN_LEVEL: u8 = 2;

#[derive(Debug, Clone)]
struct BoundaryEntry {
    /// Name at each level 0..=2, lowercased
    names: [Option<String>; 3],
    level: u8,
    geometry: Geometry,
}

#[derive(Debug, Clone, Default)]
pub struct BoundaryCatalog {
    entries: Vec<BoundaryEntry>,
}

impl BoundaryCatalog {
    /// Catalog without boundaries; every admin lookup misses
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
        let catalog = Self::from_geojson(value)?;
        info!(
            path = %path.display(),
            boundaries = catalog.len(),
            "Loaded administrative boundary catalog"
        );
        Ok(catalog)
    }

    pub fn from_geojson(value: Value) -> Result<Self> {
        let features = match GeoJson::from_value(value).map_err(Error::InvalidGeoJson)? {
            GeoJson::FeatureCollection(features) => features,
            GeoJson::Feature(feature) => vec![feature],
            GeoJson::Geometry(_) => {
                return Err(Error::InvalidGeoJson(
                    "boundary catalog must contain features with name properties".to_string(),
                ))
            }
        };

        let mut entries = Vec::with_capacity(features.len());
        for (index, feature) in features.into_iter().enumerate() {
            let geometry = match feature.geometry {
                Some(g) if g.polygons().is_some() => g,
                _ => {
                    warn!(index, "Skipping boundary feature without polygon geometry");
                    continue;
                }
            };
            match names_and_level(&feature.properties) {
                Some((names, level)) => entries.push(BoundaryEntry {
                    names,
                    level,
                    geometry,
                }),
                None => warn!(index, "Skipping boundary feature without usable name properties"),
            }
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Geometries of the region `name` at `level`, exact case-insensitive match.
    ///
    /// Features at exactly `level` win; otherwise finer features whose
    /// `level` name matches are returned so they can be dissolved.
    pub fn lookup(&self, name: &str, level: u8) -> Vec<&Geometry> {
        if level > MAX_ADMIN_LEVEL {
            return Vec::new();
        }
        let wanted = name.trim().to_lowercase();
        let slot = usize::from(level);
        let matching = |entry: &&BoundaryEntry| entry.names[slot].as_deref() == Some(wanted.as_str());

        let exact: Vec<&Geometry> = self
            .entries
            .iter()
            .filter(|e| e.level == level)
            .filter(matching)
            .map(|e| &e.geometry)
            .collect();
        if !exact.is_empty() {
            return exact;
        }

        self.entries
            .iter()
            .filter(|e| e.level > level)
            .filter(matching)
            .map(|e| &e.geometry)
            .collect()
    }
}

fn names_and_level(properties: &Map<String, Value>) -> Option<([Option<String>; 3], u8)> {
    let text = |key: &str| {
        properties
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    };

    if let (Some(name), Some(level)) = (text("name"), properties.get("level").and_then(Value::as_u64)) {
        let level = u8::try_from(level).ok().filter(|l| *l <= MAX_ADMIN_LEVEL)?;
        let mut names: [Option<String>; 3] = Default::default();
        names[usize::from(level)] = Some(name);
        return Some((names, level));
    }

    let names = [text("ADM0_NAME"), text("ADM1_NAME"), text("ADM2_NAME")];
    let level = names.iter().rposition(Option::is_some)?;
    Some((names, level as u8))
}
