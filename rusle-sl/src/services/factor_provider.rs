//! Per-factor source selection and derivation recipes
//!
//! For each RUSLE factor either the user's override is passed through or a
//! [`DerivationRecipe`] is built over public datasets. Nothing is evaluated
//! here; recipes carry unevaluated [`RasterExpr`] trees.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::{RusleError, RusleResult};
use crate::models::{
    AreaOfInterest, DateRange, DemSource, DerivationRecipe, Factor, FactorOverride, FactorSource,
    FactorSpec,
};
use crate::raster::{RasterExpr, Reducer, UnaryOp};
use crate::services::composer::check_override;

pub const CHIRPS_DAILY: &str = "UCSB-CHG/CHIRPS/DAILY";
pub const SOIL_ORGANIC_CARBON: &str = "OpenLandMap/SOL/SOL_ORGANIC-CARBON_USDA-6A1C_M/v02";
pub const SOIL_CLAY: &str = "OpenLandMap/SOL/SOL_CLAY-WFRACTION_USDA-3A1A1A_M/v02";
pub const SOIL_SAND: &str = "OpenLandMap/SOL/SOL_SAND-WFRACTION_USDA-3A1A1A_M/v02";
pub const LANDSAT8_L2: &str = "LANDSAT/LC08/C02/T1_L2";
pub const MODIS_LANDCOVER: &str = "MODIS/061/MCD12Q1";

const CHIRPS_SCALE_M: f64 = 5566.0;
const SOIL_SCALE_M: f64 = 250.0;
const LANDSAT_SCALE_M: f64 = 30.0;
const MODIS_SCALE_M: f64 = 500.0;

/// Gap fill values
const R_FILL: f64 = 0.0;
const K_FILL: f64 = 0.04;
const LS_FILL: f64 = 0.065;
const C_FILL: f64 = 0.15;
const P_FILL: f64 = 1.0;

/// MODIS LC_Type1 class → P. Classes not listed map to 1.0.
pub fn p_factor_table() -> BTreeMap<i64, f64> {
    let mut table = BTreeMap::new();
    for class in 1..=10 {
        table.insert(class, 0.8);
    }
    table.insert(12, 0.5);
    table.insert(14, 0.5);
    for class in [11, 13, 15, 16, 17] {
        table.insert(class, 1.0);
    }
    table
}

/// Builds a [`FactorSpec`] per factor
#[derive(Debug, Clone, Copy, Default)]
pub struct FactorProvider {
    dem_source: DemSource,
}

impl FactorProvider {
    pub fn new(dem_source: DemSource) -> Self {
        Self { dem_source }
    }

    pub fn dem_source(&self) -> DemSource {
        self.dem_source
    }

    pub fn provide(
        &self,
        factor: Factor,
        aoi: &AreaOfInterest,
        date_range: Option<&DateRange>,
        overrides: &BTreeMap<Factor, FactorOverride>,
    ) -> RusleResult<FactorSpec> {
        if let Some(layer) = overrides.get(&factor) {
            if let Some(bounds) = layer.bounds {
                if !bounds.intersects(&aoi.bbox()) {
                    return Err(RusleError::Validation(format!(
                        "override for factor {} ({}) does not cover the area of interest",
                        factor, layer.asset_id
                    )));
                }
            }
            // Declared metadata is checked now; metadata only the remote
            // catalog knows is checked again before composing.
            check_override(factor, layer)?;
            debug!(factor = %factor, asset_id = %layer.asset_id, "Using override");
            return Ok(FactorSpec {
                factor,
                source: FactorSource::Override(layer.clone()),
            });
        }

        let recipe = match factor {
            Factor::R => self.rainfall_erosivity(aoi, require_dates(factor, date_range)?),
            Factor::K => self.soil_erodibility(),
            Factor::LS => self.slope_length_steepness(),
            Factor::C => self.cover_management(aoi, require_dates(factor, date_range)?),
            Factor::P => self.support_practice(),
        };
        debug!(factor = %factor, transform = %recipe.transform, "Derived factor recipe");

        Ok(FactorSpec {
            factor,
            source: FactorSource::Derived(recipe),
        })
    }

    /// Same as [`provide`](Self::provide) with a factor name as received from clients
    pub fn provide_named(
        &self,
        name: &str,
        aoi: &AreaOfInterest,
        date_range: Option<&DateRange>,
        overrides: &BTreeMap<Factor, FactorOverride>,
    ) -> RusleResult<FactorSpec> {
        let factor: Factor = name.parse()?;
        self.provide(factor, aoi, date_range, overrides)
    }

    /// All five specs in R, K, LS, C, P order. Override keys are factor names.
    pub fn provide_all(
        &self,
        aoi: &AreaOfInterest,
        date_range: Option<&DateRange>,
        overrides: &HashMap<String, FactorOverride>,
    ) -> RusleResult<Vec<FactorSpec>> {
        let mut by_factor = BTreeMap::new();
        for (name, layer) in overrides {
            let factor: Factor = name.parse()?;
            if by_factor.insert(factor, layer.clone()).is_some() {
                return Err(RusleError::Validation(format!(
                    "factor {} is overridden more than once",
                    factor
                )));
            }
        }

        Factor::ALL
            .into_iter()
            .map(|factor| self.provide(factor, aoi, date_range, &by_factor))
            .collect()
    }

    /// R = 0.0483·P + 0.6207 over summed daily precipitation
    fn rainfall_erosivity(&self, aoi: &AreaOfInterest, dates: &DateRange) -> DerivationRecipe {
        let precipitation = RasterExpr::composite(
            CHIRPS_DAILY,
            &["precipitation"],
            dates.date_from(),
            dates.date_to(),
            Reducer::Sum,
            Some(aoi.bbox()),
        );
        let expression = precipitation
            .multiply(0.0483)
            .add(0.6207)
            .unmask(R_FILL)
            .rename("R");
        recipe(expression, Some(*dates), "chirps_linear_erosivity", CHIRPS_SCALE_M)
    }

    /// Williams (1995) EPIC erodibility from sand, silt, clay and organic carbon
    fn soil_erodibility(&self) -> DerivationRecipe {
        let org_c = || RasterExpr::image_band(SOIL_ORGANIC_CARBON, "b0");
        let clay = || RasterExpr::image_band(SOIL_CLAY, "b0");
        let sand = || RasterExpr::image_band(SOIL_SAND, "b0");
        let silt = || RasterExpr::constant(100.0).subtract(clay()).subtract(sand());

        // 0.2 + 0.3·exp(−0.256·sand·(1 − silt/100))
        let f_csand = RasterExpr::constant(0.2).add(
            sand()
                .multiply(-0.256)
                .multiply(RasterExpr::constant(1.0).subtract(silt().divide(100.0)))
                .unary(UnaryOp::Exp)
                .multiply(0.3),
        );

        // (silt / (clay + silt))^0.3
        let f_cl_si = silt().divide(clay().add(silt())).pow(0.3);

        // 1 − 0.25·C / (C + exp(3.72 − 2.95·C))
        let f_orgc = RasterExpr::constant(1.0).subtract(
            org_c().multiply(0.25).divide(
                org_c().add(
                    RasterExpr::constant(3.72)
                        .subtract(org_c().multiply(2.95))
                        .unary(UnaryOp::Exp),
                ),
            ),
        );

        // 1 − 0.7·SN / (SN + exp(−5.51 + 22.9·SN)), SN = 1 − sand/100
        let sn = || RasterExpr::constant(1.0).subtract(sand().divide(100.0));
        let f_hisand = RasterExpr::constant(1.0).subtract(
            sn().multiply(0.7).divide(
                sn().add(
                    RasterExpr::constant(-5.51)
                        .add(sn().multiply(22.9))
                        .unary(UnaryOp::Exp),
                ),
            ),
        );

        let expression = f_csand
            .multiply(f_cl_si)
            .multiply(f_orgc)
            .multiply(f_hisand)
            .unmask(K_FILL)
            .rename("K");
        recipe(expression, None, "williams_epic_erodibility", SOIL_SCALE_M)
    }

    /// LS = (λ/22.13)^m · (65.41·sin²θ + 4.56·sinθ + 0.065)
    fn slope_length_steepness(&self) -> DerivationRecipe {
        let dem = RasterExpr::image_band(self.dem_source.dataset(), self.dem_source.band());
        let theta = || RasterExpr::slope(dem.clone()).unary(UnaryOp::ToRadians);
        let sin_theta = || theta().unary(UnaryOp::Sin);

        let slope_percent = theta().unary(UnaryOp::Tan).multiply(100.0);
        let m = slope_percent.steps(vec![1.0, 3.0, 5.0], vec![0.2, 0.3, 0.4, 0.5]);

        let flow_length = RasterExpr::flow_accumulation(dem.clone()).multiply(RasterExpr::cell_size());
        let length = flow_length.divide(22.13).pow(m);
        let steepness = sin_theta()
            .pow(2.0)
            .multiply(65.41)
            .add(sin_theta().multiply(4.56))
            .add(0.065);

        let expression = length.multiply(steepness).unmask(LS_FILL).rename("LS");
        recipe(
            expression,
            None,
            "flow_accumulation_ls",
            self.dem_source.native_scale_m(),
        )
    }

    /// C = 0.431 − 0.805·NDVI, clamped to [0, 1]
    fn cover_management(&self, aoi: &AreaOfInterest, dates: &DateRange) -> DerivationRecipe {
        let reflectance = RasterExpr::composite(
            LANDSAT8_L2,
            &["SR_B5", "SR_B4"],
            dates.date_from(),
            dates.date_to(),
            Reducer::Median,
            Some(aoi.bbox()),
        )
        .multiply(0.0000275)
        .add(-0.2);
        let ndvi = reflectance.normalized_difference("SR_B5", "SR_B4");

        let expression = RasterExpr::constant(0.431)
            .subtract(ndvi.multiply(0.805))
            .clamp(0.0, 1.0)
            .unmask(C_FILL)
            .rename("C");
        recipe(expression, Some(*dates), "ndvi_cover_management", LANDSAT_SCALE_M)
    }

    /// Static land-cover lookup
    fn support_practice(&self) -> DerivationRecipe {
        let expression = RasterExpr::latest(MODIS_LANDCOVER, "LC_Type1")
            .remap(p_factor_table(), 1.0)
            .unmask(P_FILL)
            .rename("P");
        recipe(expression, None, "landcover_support_practice", MODIS_SCALE_M)
    }
}

fn require_dates(factor: Factor, date_range: Option<&DateRange>) -> RusleResult<&DateRange> {
    date_range.ok_or(RusleError::MissingDateRange(factor))
}

fn recipe(
    expression: RasterExpr,
    date_range: Option<DateRange>,
    transform: &str,
    native_scale_m: f64,
) -> DerivationRecipe {
    DerivationRecipe {
        datasets: expression.datasets(),
        date_range,
        transform: transform.to_string(),
        native_scale_m,
        expression,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::models::job::tests::sample_aoi;
    use crate::raster::PointSample;

    fn dates() -> DateRange {
        DateRange::parse("2022-01-01", "2023-01-01").unwrap()
    }

    fn derived(spec: &FactorSpec) -> &DerivationRecipe {
        match &spec.source {
            FactorSource::Derived(recipe) => recipe,
            FactorSource::Override(_) => panic!("expected derived spec"),
        }
    }

    #[test]
    fn test_r_requires_dates() {
        let provider = FactorProvider::default();
        let err = provider
            .provide(Factor::R, &sample_aoi(), None, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RusleError::MissingDateRange(Factor::R)));

        let err = provider
            .provide(Factor::C, &sample_aoi(), None, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RusleError::MissingDateRange(Factor::C)));
    }

    #[test]
    fn test_static_factors_without_dates() {
        let provider = FactorProvider::default();
        for factor in [Factor::K, Factor::LS, Factor::P] {
            let spec = provider.provide(factor, &sample_aoi(), None, &BTreeMap::new()).unwrap();
            assert!(derived(&spec).date_range.is_none());
        }
    }

    #[test]
    fn test_r_recipe_values() {
        let spec = FactorProvider::default()
            .provide(Factor::R, &sample_aoi(), Some(&dates()), &BTreeMap::new())
            .unwrap();
        let recipe = derived(&spec);
        assert_eq!(recipe.datasets, vec![CHIRPS_DAILY.to_string()]);
        assert_eq!(recipe.native_scale_m, 5566.0);

        let sample = PointSample::new(30.0).with(format!("{}/precipitation", CHIRPS_DAILY), 1200.0);
        let r = recipe.expression.sample(&sample, [0.05, 0.05]).unwrap();
        assert!((r - (0.0483 * 1200.0 + 0.6207)).abs() < 1e-9);

        // No data falls back to zero erosivity
        let empty = PointSample::new(30.0);
        assert_eq!(recipe.expression.sample(&empty, [0.05, 0.05]), Some(0.0));
    }

    #[test]
    fn test_k_recipe_in_plausible_range() {
        let spec = FactorProvider::default()
            .provide(Factor::K, &sample_aoi(), None, &BTreeMap::new())
            .unwrap();
        let sample = PointSample::new(250.0)
            .with(format!("{}/b0", SOIL_ORGANIC_CARBON), 1.5)
            .with(format!("{}/b0", SOIL_CLAY), 25.0)
            .with(format!("{}/b0", SOIL_SAND), 40.0);
        let k = derived(&spec).expression.sample(&sample, [0.0, 0.0]).unwrap();
        assert!(k > 0.05 && k < 0.5, "K = {}", k);

        let missing = PointSample::new(250.0);
        assert_eq!(derived(&spec).expression.sample(&missing, [0.0, 0.0]), Some(0.04));
    }

    #[test]
    fn test_ls_m_exponent_thresholds() {
        let spec = FactorProvider::new(DemSource::Merit)
            .provide(Factor::LS, &sample_aoi(), None, &BTreeMap::new())
            .unwrap();
        let recipe = derived(&spec);
        assert_eq!(recipe.native_scale_m, 90.0);
        assert_eq!(recipe.datasets, vec!["MERIT/DEM/v1_0_3".to_string()]);

        // 10 cells of 22.13 m: λ/22.13 = 10, so LS = 10^m · S(θ)
        let ls_at = |slope_deg: f64| {
            let sample = PointSample::new(22.13).with_terrain(slope_deg, 10.0);
            recipe.expression.sample(&sample, [0.0, 0.0]).unwrap()
        };
        let steepness = |slope_deg: f64| {
            let s = slope_deg.to_radians().sin();
            65.41 * s * s + 4.56 * s + 0.065
        };

        let gentle = 0.5_f64; // tan ≈ 0.87 %
        assert!((ls_at(gentle) - 10f64.powf(0.2) * steepness(gentle)).abs() < 1e-9);
        let steep = 10.0_f64; // ≈ 17.6 %
        assert!((ls_at(steep) - 10f64.powf(0.5) * steepness(steep)).abs() < 1e-9);
    }

    #[test]
    fn test_c_recipe_clamped() {
        let spec = FactorProvider::default()
            .provide(Factor::C, &sample_aoi(), Some(&dates()), &BTreeMap::new())
            .unwrap();
        let expr = &derived(&spec).expression;

        let raw = |value: f64| (value + 0.2) / 0.0000275;
        let sample = PointSample::new(30.0)
            .with(format!("{}/SR_B5", LANDSAT8_L2), raw(0.5))
            .with(format!("{}/SR_B4", LANDSAT8_L2), raw(0.1));
        let c = expr.sample(&sample, [0.0, 0.0]).unwrap();
        let ndvi = (0.5 - 0.1) / (0.5 + 0.1);
        assert!((c - (0.431 - 0.805 * ndvi)).abs() < 1e-9);

        // Negative NDVI pushes C above 1 before clamping
        let water = PointSample::new(30.0)
            .with(format!("{}/SR_B5", LANDSAT8_L2), raw(0.01))
            .with(format!("{}/SR_B4", LANDSAT8_L2), raw(0.2));
        assert!(expr.sample(&water, [0.0, 0.0]).unwrap() <= 1.0);
    }

    #[test]
    fn test_p_table_default() {
        let spec = FactorProvider::default()
            .provide(Factor::P, &sample_aoi(), None, &BTreeMap::new())
            .unwrap();
        let expr = &derived(&spec).expression;
        let at = |class: f64| {
            let sample = PointSample::new(500.0).with(format!("{}/LC_Type1", MODIS_LANDCOVER), class);
            expr.sample(&sample, [0.0, 0.0]).unwrap()
        };
        assert_eq!(at(5.0), 0.8);
        assert_eq!(at(12.0), 0.5);
        assert_eq!(at(13.0), 1.0);
        assert_eq!(at(255.0), 1.0);
    }

    #[test]
    fn test_override_passes_through_unchanged() {
        let layer = FactorOverride::new("users/me/k_layer")
            .with_unit("t h/(MJ mm)")
            .with_bounds(BoundingBox::new(-1.0, -1.0, 1.0, 1.0));
        let overrides = BTreeMap::from([(Factor::K, layer.clone())]);

        let spec = FactorProvider::default()
            .provide(Factor::K, &sample_aoi(), None, &overrides)
            .unwrap();
        assert_eq!(spec.source, FactorSource::Override(layer));
    }

    #[test]
    fn test_override_with_foreign_unit_rejected() {
        let layer = FactorOverride::new("users/me/c_percent")
            .with_unit("percent")
            .with_value_range(0.0, 100.0);
        let overrides = BTreeMap::from([(Factor::C, layer)]);
        assert!(matches!(
            FactorProvider::default().provide(Factor::C, &sample_aoi(), Some(&dates()), &overrides),
            Err(RusleError::FactorUnitMismatch { factor: Factor::C, .. })
        ));

        let layer = FactorOverride::new("users/me/k").with_value_range(0.0, 0.6);
        let overrides = BTreeMap::from([(Factor::K, layer)]);
        assert!(FactorProvider::default()
            .provide(Factor::K, &sample_aoi(), None, &overrides)
            .is_ok());
    }

    #[test]
    fn test_override_outside_aoi_rejected() {
        let layer = FactorOverride::new("users/me/far").with_bounds(BoundingBox::new(50.0, 50.0, 51.0, 51.0));
        let overrides = BTreeMap::from([(Factor::P, layer)]);
        assert!(matches!(
            FactorProvider::default().provide(Factor::P, &sample_aoi(), None, &overrides),
            Err(RusleError::Validation(_))
        ));
    }

    #[test]
    fn test_provide_all_order_and_unknown_keys() {
        let provider = FactorProvider::default();
        let specs = provider.provide_all(&sample_aoi(), Some(&dates()), &HashMap::new()).unwrap();
        let order: Vec<Factor> = specs.iter().map(|s| s.factor).collect();
        assert_eq!(order, Factor::ALL.to_vec());

        let bad = HashMap::from([("Z".to_string(), FactorOverride::new("x"))]);
        assert!(matches!(
            provider.provide_all(&sample_aoi(), Some(&dates()), &bad),
            Err(RusleError::UnsupportedFactor(_))
        ));
    }

    #[test]
    fn test_k_override_without_dates_still_needs_r() {
        let overrides = HashMap::from([("k".to_string(), FactorOverride::new("users/me/k"))]);
        let err = FactorProvider::default()
            .provide_all(&sample_aoi(), None, &overrides)
            .unwrap_err();
        assert!(matches!(err, RusleError::MissingDateRange(Factor::R)));
    }
}
