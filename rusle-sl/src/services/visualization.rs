//! Layer styling and map configuration

use serde::{Deserialize, Serialize};

use crate::models::{AreaOfInterest, Factor, JobArtifacts};

const SOIL_LOSS_PALETTE: &[&str] = &[
    "00ff00", "7fff00", "ffff00", "ffa500", "ff4500", "ff0000", "8b0000",
];
const RAMP_FIVE: &[&str] = &["blue", "green", "yellow", "orange", "red"];
const RAMP_THREE: &[&str] = &["green", "yellow", "red"];

const LAYER_OPACITY: f64 = 0.8;

/// Upper bounds (t/ha/yr) and labels of the soil loss classes, one per palette colour
const SOIL_LOSS_CLASSES: &[(Option<f64>, &str)] = &[
    (Some(5.0), "Very Low"),
    (Some(10.0), "Low"),
    (Some(20.0), "Moderate"),
    (Some(30.0), "High"),
    (Some(40.0), "Very High"),
    (Some(50.0), "Severe"),
    (None, "Very Severe"),
];

/// Stretch and palette for rendering one band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisParams {
    pub min: f64,
    pub max: f64,
    pub palette: Vec<String>,
}

impl VisParams {
    fn new(min: f64, max: f64, palette: &[&str]) -> Self {
        Self {
            min,
            max,
            palette: palette.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Soil loss, t/ha/yr
    pub fn soil_loss() -> Self {
        Self::new(0.0, 50.0, SOIL_LOSS_PALETTE)
    }

    pub fn factor(factor: Factor) -> Self {
        match factor {
            Factor::R => Self::new(0.0, 5000.0, RAMP_FIVE),
            Factor::K => Self::new(0.3, 0.5, RAMP_FIVE),
            Factor::LS => Self::new(0.0, 45.0, RAMP_THREE),
            Factor::C => Self::new(0.0, 0.5, RAMP_THREE),
            Factor::P => Self::new(0.0, 1.0, RAMP_FIVE),
        }
    }
}

/// One soil loss class; `max` is `None` for the open-ended top class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendClass {
    pub min: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Human-readable range, e.g. "10-20" or ">50"
    pub range: String,
    pub label: String,
    /// `#rrggbb`, matching the soil loss tile palette
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legend {
    pub soil_loss_classes: Vec<LegendClass>,
    pub unit: String,
}

/// Soil loss classes in ascending order, coloured like the composite tiles
pub fn legend() -> Legend {
    let mut min = 0.0;
    let classes = SOIL_LOSS_CLASSES
        .iter()
        .zip(SOIL_LOSS_PALETTE)
        .map(|(&(max, label), color)| {
            let range = match max {
                Some(max) => format!("{}-{}", min, max),
                None => format!(">{}", min),
            };
            let class = LegendClass {
                min,
                max,
                range,
                label: label.to_string(),
                color: format!("#{}", color),
            };
            if let Some(max) = max {
                min = max;
            }
            class
        })
        .collect();

    Legend {
        soil_loss_classes: classes,
        unit: "t/ha/yr".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLayer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factor: Option<Factor>,
    #[serde(rename = "type")]
    pub layer_type: String,
    pub url: String,
    pub visible: bool,
    pub opacity: f64,
}

/// Everything a web map needs to show a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    pub center_lat: f64,
    pub center_lng: f64,
    pub zoom: u8,
    pub layers: Vec<MapLayer>,
}

/// Web map zoom that fits the AOI extent (degrees) in a typical viewport
pub fn zoom_for_extent(width_deg: f64, height_deg: f64) -> u8 {
    let extent = width_deg.max(height_deg);
    if !(extent.is_finite() && extent > 0.0) {
        return 14;
    }
    let zoom = (360.0 / extent).log2().floor() + 1.0;
    zoom.clamp(2.0, 14.0) as u8
}

/// Map configuration: soil loss visible, factor layers hidden
pub fn map_config(aoi: &AreaOfInterest, artifacts: &JobArtifacts) -> MapConfig {
    let mut layers = vec![MapLayer {
        name: "Soil Loss (t/ha/yr)".to_string(),
        factor: None,
        layer_type: "tile".to_string(),
        url: artifacts.composite_tile().url_template.clone(),
        visible: true,
        opacity: LAYER_OPACITY,
    }];

    for (factor, tile) in artifacts.factor_tiles() {
        layers.push(MapLayer {
            name: factor.info().display_name.to_string(),
            factor: Some(*factor),
            layer_type: "tile".to_string(),
            url: tile.url_template.clone(),
            visible: false,
            opacity: LAYER_OPACITY,
        });
    }

    let bbox = aoi.bbox();
    let [lng, lat] = aoi.centroid();
    MapConfig {
        center_lat: lat,
        center_lng: lng,
        zoom: zoom_for_extent(bbox.width(), bbox.height()),
        layers,
    }
}
