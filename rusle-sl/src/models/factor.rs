//! RUSLE factors and their sources
//!
//! A [`FactorSpec`] says where one factor comes from: a user-supplied layer
//! ([`FactorOverride`]) or a recipe over public datasets ([`DerivationRecipe`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RusleError;
use crate::geometry::BoundingBox;
use crate::models::date_range::DateRange;
use crate::raster::RasterExpr;

/// One multiplicative term of `A = R × K × LS × C × P`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Factor {
    R,
    K,
    LS,
    C,
    P,
}

/// Canonical unit, valid range and labels for a factor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorInfo {
    pub display_name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub valid_range: (f64, f64),
    /// Unit spellings accepted on overrides, compared after normalization
    pub unit_aliases: &'static [&'static str],
    pub requires_date_range: bool,
}

const DIMENSIONLESS: &[&str] = &["", "1", "-", "dimensionless", "unitless", "none", "ratio"];

impl Factor {
    /// Fixed evaluation order
    pub const ALL: [Factor; 5] = [Factor::R, Factor::K, Factor::LS, Factor::C, Factor::P];

    pub fn as_str(self) -> &'static str {
        match self {
            Factor::R => "R",
            Factor::K => "K",
            Factor::LS => "LS",
            Factor::C => "C",
            Factor::P => "P",
        }
    }

    pub fn info(self) -> FactorInfo {
        match self {
            Factor::R => FactorInfo {
                display_name: "Rainfall Erosivity (R)",
                description: "Erosive force of rainfall, derived from accumulated precipitation",
                unit: "MJ mm ha⁻¹ h⁻¹ yr⁻¹",
                valid_range: (0.0, 20_000.0),
                unit_aliases: &[
                    "MJ mm ha⁻¹ h⁻¹ yr⁻¹",
                    "MJ mm ha-1 h-1 yr-1",
                    "MJ·mm/(ha·h·yr)",
                    "MJ mm/(ha h yr)",
                ],
                requires_date_range: true,
            },
            Factor::K => FactorInfo {
                display_name: "Soil Erodibility (K)",
                description: "Susceptibility of soil to erosion from texture and organic carbon",
                unit: "t ha h ha⁻¹ MJ⁻¹ mm⁻¹",
                valid_range: (0.0, 1.0),
                unit_aliases: &[
                    "t ha h ha⁻¹ MJ⁻¹ mm⁻¹",
                    "t ha h ha-1 MJ-1 mm-1",
                    "t·ha·h/(ha·MJ·mm)",
                    "t h/(MJ mm)",
                    "t·h/(MJ·mm)",
                ],
                requires_date_range: false,
            },
            Factor::LS => FactorInfo {
                display_name: "Slope Length & Steepness (LS)",
                description: "Topographic effect of slope length and gradient",
                unit: "dimensionless",
                valid_range: (0.0, 100.0),
                unit_aliases: DIMENSIONLESS,
                requires_date_range: false,
            },
            Factor::C => FactorInfo {
                display_name: "Cover Management (C)",
                description: "Protection offered by vegetation cover, derived from NDVI",
                unit: "dimensionless",
                valid_range: (0.0, 1.0),
                unit_aliases: DIMENSIONLESS,
                requires_date_range: true,
            },
            Factor::P => FactorInfo {
                display_name: "Support Practice (P)",
                description: "Effect of conservation practices, derived from land cover",
                unit: "dimensionless",
                valid_range: (0.0, 1.0),
                unit_aliases: DIMENSIONLESS,
                requires_date_range: false,
            },
        }
    }

    /// Whether `unit` is an accepted spelling of this factor's canonical unit
    pub fn accepts_unit(self, unit: &str) -> bool {
        let declared = normalize_unit(unit);
        self.info()
            .unit_aliases
            .iter()
            .any(|alias| normalize_unit(alias) == declared)
    }
}

fn normalize_unit(unit: &str) -> String {
    unit.to_lowercase()
        .replace('⁻', "-")
        .replace('¹', "1")
        .chars()
        .filter(|c| !matches!(c, ' ' | '·' | '*' | '.' | '(' | ')' | '_'))
        .collect()
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Factor {
    type Err = RusleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "R" => Ok(Factor::R),
            "K" => Ok(Factor::K),
            "LS" => Ok(Factor::LS),
            "C" => Ok(Factor::C),
            "P" => Ok(Factor::P),
            _ => Err(RusleError::UnsupportedFactor(s.to_string())),
        }
    }
}

/// User-supplied raster standing in for a derived factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorOverride {
    pub asset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Declared `[min, max]` of pixel values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_range: Option<[f64; 2]>,
    /// Footprint of the layer in WGS84
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_scale_m: Option<f64>,
}

impl FactorOverride {
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            unit: None,
            value_range: None,
            bounds: None,
            native_scale_m: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_value_range(mut self, min: f64, max: f64) -> Self {
        self.value_range = Some([min, max]);
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_native_scale(mut self, scale_m: f64) -> Self {
        self.native_scale_m = Some(scale_m);
        self
    }

    /// Copy with absent metadata taken from `described`; declared values win
    pub fn filled_from(&self, described: &FactorOverride) -> FactorOverride {
        FactorOverride {
            asset_id: self.asset_id.clone(),
            unit: self.unit.clone().or_else(|| described.unit.clone()),
            value_range: self.value_range.or(described.value_range),
            bounds: self.bounds.or(described.bounds),
            native_scale_m: self.native_scale_m.or(described.native_scale_m),
        }
    }
}

/// How a factor is derived from public datasets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivationRecipe {
    pub datasets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// Name of the empirical transform
    pub transform: String,
    pub native_scale_m: f64,
    pub expression: RasterExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactorSource {
    Override(FactorOverride),
    Derived(DerivationRecipe),
}

/// Resolved source of one factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSpec {
    pub factor: Factor,
    pub source: FactorSource,
}

impl FactorSpec {
    pub fn is_override(&self) -> bool {
        matches!(self.source, FactorSource::Override(_))
    }

    pub fn native_scale_m(&self) -> Option<f64> {
        match &self.source {
            FactorSource::Override(o) => o.native_scale_m,
            FactorSource::Derived(recipe) => Some(recipe.native_scale_m),
        }
    }

    /// Unevaluated raster for this factor
    pub fn expression(&self) -> RasterExpr {
        match &self.source {
            FactorSource::Override(o) => RasterExpr::image(o.asset_id.clone()),
            FactorSource::Derived(recipe) => recipe.expression.clone(),
        }
    }
}

/// Elevation model feeding the LS factor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DemSource {
    #[default]
    Srtm,
    Merit,
}

impl DemSource {
    pub fn dataset(self) -> &'static str {
        match self {
            DemSource::Srtm => "USGS/SRTMGL1_003",
            DemSource::Merit => "MERIT/DEM/v1_0_3",
        }
    }

    pub fn band(self) -> &'static str {
        match self {
            DemSource::Srtm => "elevation",
            DemSource::Merit => "dem",
        }
    }

    pub fn native_scale_m(self) -> f64 {
        match self {
            DemSource::Srtm => 30.0,
            DemSource::Merit => 90.0,
        }
    }
}

impl FromStr for DemSource {
    type Err = RusleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SRTM" => Ok(DemSource::Srtm),
            "MERIT" => Ok(DemSource::Merit),
            other => Err(RusleError::Validation(format!(
                "unknown DEM source '{}', expected SRTM or MERIT",
                other
            ))),
        }
    }
}
