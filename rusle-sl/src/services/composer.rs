//! Soil-loss raster composition
//!
//! `A = R × K × LS × C × P` on a common grid. The grid is the coarsest native
//! resolution among the factors so no layer is ever upsampled. The result is
//! an unevaluated expression.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{RusleError, RusleResult};
use crate::geometry::Geometry;
use crate::models::{AreaOfInterest, Factor, FactorOverride, FactorSource, FactorSpec};
use crate::raster::RasterExpr;

/// Grid used when no factor reports a native resolution
pub const DEFAULT_GRID_SCALE_M: f64 = 30.0;

/// Composite soil-loss expression plus the per-factor layers behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeExpression {
    pub soil_loss: RasterExpr,
    /// Each factor resampled to the grid and clipped to the AOI
    pub factor_layers: BTreeMap<Factor, RasterExpr>,
    pub grid_scale_m: f64,
    pub region: Geometry,
}

/// Compose exactly one spec per factor into the soil-loss expression
pub fn compose(aoi: &AreaOfInterest, factors: &[FactorSpec]) -> RusleResult<CompositeExpression> {
    let mut by_factor: BTreeMap<Factor, &FactorSpec> = BTreeMap::new();
    for spec in factors {
        if by_factor.insert(spec.factor, spec).is_some() {
            return Err(RusleError::Validation(format!(
                "factor {} is specified more than once",
                spec.factor
            )));
        }
    }
    if let Some(missing) = Factor::ALL.into_iter().find(|f| !by_factor.contains_key(f)) {
        return Err(RusleError::Validation(format!("factor {} is missing", missing)));
    }

    for spec in by_factor.values() {
        if let FactorSource::Override(layer) = &spec.source {
            check_override(spec.factor, layer)?;
        }
    }

    let grid_scale_m = grid_scale(by_factor.values().copied());
    let region = aoi.geometry().clone();

    let mut factor_layers = BTreeMap::new();
    let mut product: Option<RasterExpr> = None;
    for (factor, spec) in &by_factor {
        let on_grid = to_grid(spec, grid_scale_m);
        factor_layers.insert(*factor, on_grid.clone().clip(region.clone()));

        let floored = on_grid.max(0.0);
        product = Some(match product {
            Some(acc) => acc.multiply(floored),
            None => floored,
        });
    }

    let soil_loss = product
        .ok_or_else(|| RusleError::Validation("no factors to compose".to_string()))?
        .max(0.0)
        .unmask(0.0)
        .clip(region.clone())
        .rename("soil_loss");

    debug!(grid_scale_m, "Composed soil loss expression");

    Ok(CompositeExpression {
        soil_loss,
        factor_layers,
        grid_scale_m,
        region,
    })
}

/// Coarsest known native resolution, or the default
pub fn grid_scale<'a>(specs: impl IntoIterator<Item = &'a FactorSpec>) -> f64 {
    specs
        .into_iter()
        .filter_map(FactorSpec::native_scale_m)
        .filter(|s| s.is_finite() && *s > 0.0)
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))))
        .unwrap_or(DEFAULT_GRID_SCALE_M)
}

fn to_grid(spec: &FactorSpec, grid_scale_m: f64) -> RasterExpr {
    let expr = spec.expression();
    match spec.native_scale_m() {
        Some(native) if native >= grid_scale_m => expr,
        _ => expr.resample(grid_scale_m),
    }
}

/// Reject overrides whose declared unit or value range cannot be this factor.
/// Absent metadata is trusted.
pub fn check_override(factor: Factor, layer: &FactorOverride) -> RusleResult<()> {
    let info = factor.info();

    if let Some(unit) = &layer.unit {
        if !factor.accepts_unit(unit) {
            return Err(RusleError::FactorUnitMismatch {
                factor,
                reason: format!("unit '{}' is not {}", unit, info.unit),
            });
        }
    }

    if let Some([min, max]) = layer.value_range {
        let (valid_min, valid_max) = info.valid_range;
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(RusleError::FactorUnitMismatch {
                factor,
                reason: format!("declared range [{}, {}] is malformed", min, max),
            });
        }
        if min < valid_min || max > valid_max {
            return Err(RusleError::FactorUnitMismatch {
                factor,
                reason: format!(
                    "declared range [{}, {}] exceeds valid range [{}, {}]",
                    min, max, valid_min, valid_max
                ),
            });
        }
    }

    Ok(())
}
