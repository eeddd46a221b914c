//! Unevaluated raster algebra
//!
//! Factor recipes and the soil-loss composite are built as [`RasterExpr`]
//! trees. Building is pure; evaluation happens remotely through
//! [`crate::services::compute_client::ComputeService`], which receives the
//! tree as tagged JSON (`{"op": "binary", ...}`).
//!
//! [`RasterExpr::sample`] evaluates a tree at a single point against a
//! [`PixelSource`], which is how recipes are checked without a compute backend.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Geometry, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Pow,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Abs,
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
    Tan,
    ToRadians,
}

/// Temporal reducer for image collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Sum,
    Mean,
    Median,
}

/// Raster expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RasterExpr {
    Constant {
        value: f64,
    },
    /// Single image asset; `band: None` keeps all bands
    Image {
        dataset: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        band: Option<String>,
    },
    /// Most recent image of a collection
    Latest {
        collection: String,
        band: String,
    },
    /// Collection filtered to `[start, end)` and reduced over time
    Composite {
        collection: String,
        bands: Vec<String>,
        start: NaiveDate,
        end: NaiveDate,
        reducer: Reducer,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bounds: Option<BoundingBox>,
    },
    Select {
        input: Box<RasterExpr>,
        band: String,
    },
    Binary {
        operator: BinaryOp,
        lhs: Box<RasterExpr>,
        rhs: Box<RasterExpr>,
    },
    Unary {
        operator: UnaryOp,
        input: Box<RasterExpr>,
    },
    /// `(first - second) / (first + second)`
    NormalizedDifference {
        input: Box<RasterExpr>,
        first: String,
        second: String,
    },
    Clamp {
        input: Box<RasterExpr>,
        min: f64,
        max: f64,
    },
    /// Piecewise constant: `values[i]` where `i` counts thresholds `<= x`.
    /// `values.len() == thresholds.len() + 1`.
    Steps {
        input: Box<RasterExpr>,
        thresholds: Vec<f64>,
        values: Vec<f64>,
    },
    /// Integer class lookup with a fallback for absent classes
    Remap {
        input: Box<RasterExpr>,
        table: BTreeMap<i64, f64>,
        default: f64,
    },
    /// Terrain slope in degrees
    Slope {
        dem: Box<RasterExpr>,
    },
    /// Upstream contributing cell count
    FlowAccumulation {
        dem: Box<RasterExpr>,
    },
    /// Pixel edge length in meters at the evaluation grid
    CellSize,
    /// Replace masked pixels with `value`
    Unmask {
        input: Box<RasterExpr>,
        value: f64,
    },
    /// Aggregate to a coarser grid (never upsampled)
    Resample {
        input: Box<RasterExpr>,
        scale_m: f64,
    },
    /// Mask pixels outside `region`
    Clip {
        input: Box<RasterExpr>,
        region: Geometry,
    },
    Rename {
        input: Box<RasterExpr>,
        name: String,
    },
}

impl From<f64> for RasterExpr {
    fn from(value: f64) -> Self {
        RasterExpr::Constant { value }
    }
}

impl RasterExpr {
    pub fn constant(value: f64) -> Self {
        RasterExpr::Constant { value }
    }

    pub fn image(dataset: impl Into<String>) -> Self {
        RasterExpr::Image {
            dataset: dataset.into(),
            band: None,
        }
    }

    pub fn image_band(dataset: impl Into<String>, band: impl Into<String>) -> Self {
        RasterExpr::Image {
            dataset: dataset.into(),
            band: Some(band.into()),
        }
    }

    pub fn latest(collection: impl Into<String>, band: impl Into<String>) -> Self {
        RasterExpr::Latest {
            collection: collection.into(),
            band: band.into(),
        }
    }

    pub fn composite(
        collection: impl Into<String>,
        bands: &[&str],
        start: NaiveDate,
        end: NaiveDate,
        reducer: Reducer,
        bounds: Option<BoundingBox>,
    ) -> Self {
        RasterExpr::Composite {
            collection: collection.into(),
            bands: bands.iter().map(|b| b.to_string()).collect(),
            start,
            end,
            reducer,
            bounds,
        }
    }

    pub fn cell_size() -> Self {
        RasterExpr::CellSize
    }

    pub fn slope(dem: RasterExpr) -> Self {
        RasterExpr::Slope { dem: Box::new(dem) }
    }

    pub fn flow_accumulation(dem: RasterExpr) -> Self {
        RasterExpr::FlowAccumulation { dem: Box::new(dem) }
    }

    pub fn select(self, band: impl Into<String>) -> Self {
        RasterExpr::Select {
            input: Box::new(self),
            band: band.into(),
        }
    }

    fn binary(self, operator: BinaryOp, rhs: impl Into<RasterExpr>) -> Self {
        RasterExpr::Binary {
            operator,
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }

    pub fn add(self, rhs: impl Into<RasterExpr>) -> Self {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn subtract(self, rhs: impl Into<RasterExpr>) -> Self {
        self.binary(BinaryOp::Subtract, rhs)
    }

    pub fn multiply(self, rhs: impl Into<RasterExpr>) -> Self {
        self.binary(BinaryOp::Multiply, rhs)
    }

    pub fn divide(self, rhs: impl Into<RasterExpr>) -> Self {
        self.binary(BinaryOp::Divide, rhs)
    }

    pub fn pow(self, rhs: impl Into<RasterExpr>) -> Self {
        self.binary(BinaryOp::Pow, rhs)
    }

    pub fn max(self, rhs: impl Into<RasterExpr>) -> Self {
        self.binary(BinaryOp::Max, rhs)
    }

    pub fn min(self, rhs: impl Into<RasterExpr>) -> Self {
        self.binary(BinaryOp::Min, rhs)
    }

    pub fn unary(self, operator: UnaryOp) -> Self {
        RasterExpr::Unary {
            operator,
            input: Box::new(self),
        }
    }

    pub fn normalized_difference(self, first: impl Into<String>, second: impl Into<String>) -> Self {
        RasterExpr::NormalizedDifference {
            input: Box::new(self),
            first: first.into(),
            second: second.into(),
        }
    }

    pub fn clamp(self, min: f64, max: f64) -> Self {
        RasterExpr::Clamp {
            input: Box::new(self),
            min,
            max,
        }
    }

    pub fn steps(self, thresholds: Vec<f64>, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), thresholds.len() + 1);
        RasterExpr::Steps {
            input: Box::new(self),
            thresholds,
            values,
        }
    }

    pub fn remap(self, table: BTreeMap<i64, f64>, default: f64) -> Self {
        RasterExpr::Remap {
            input: Box::new(self),
            table,
            default,
        }
    }

    pub fn unmask(self, value: f64) -> Self {
        RasterExpr::Unmask {
            input: Box::new(self),
            value,
        }
    }

    pub fn resample(self, scale_m: f64) -> Self {
        RasterExpr::Resample {
            input: Box::new(self),
            scale_m,
        }
    }

    pub fn clip(self, region: Geometry) -> Self {
        RasterExpr::Clip {
            input: Box::new(self),
            region,
        }
    }

    pub fn rename(self, name: impl Into<String>) -> Self {
        RasterExpr::Rename {
            input: Box::new(self),
            name: name.into(),
        }
    }

    fn children(&self) -> Vec<&RasterExpr> {
        match self {
            RasterExpr::Constant { .. }
            | RasterExpr::Image { .. }
            | RasterExpr::Latest { .. }
            | RasterExpr::Composite { .. }
            | RasterExpr::CellSize => Vec::new(),
            RasterExpr::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            RasterExpr::Select { input, .. }
            | RasterExpr::Unary { input, .. }
            | RasterExpr::NormalizedDifference { input, .. }
            | RasterExpr::Clamp { input, .. }
            | RasterExpr::Steps { input, .. }
            | RasterExpr::Remap { input, .. }
            | RasterExpr::Unmask { input, .. }
            | RasterExpr::Resample { input, .. }
            | RasterExpr::Clip { input, .. }
            | RasterExpr::Rename { input, .. } => vec![input],
            RasterExpr::Slope { dem } | RasterExpr::FlowAccumulation { dem } => vec![dem],
        }
    }

    /// Dataset and collection ids referenced anywhere in the tree, sorted and unique
    pub fn datasets(&self) -> Vec<String> {
        let mut found = Vec::new();
        self.collect_datasets(&mut found);
        found.sort();
        found.dedup();
        found
    }

    fn collect_datasets(&self, found: &mut Vec<String>) {
        match self {
            RasterExpr::Image { dataset, .. } => found.push(dataset.clone()),
            RasterExpr::Latest { collection, .. } | RasterExpr::Composite { collection, .. } => {
                found.push(collection.clone())
            }
            _ => {}
        }
        for child in self.children() {
            child.collect_datasets(found);
        }
    }

    /// Evaluate at one point. `None` means the pixel is masked.
    pub fn sample(&self, source: &dyn PixelSource, at: Position) -> Option<f64> {
        self.sample_band(source, at, None)
    }

    fn sample_band(&self, source: &dyn PixelSource, at: Position, band: Option<&str>) -> Option<f64> {
        match self {
            RasterExpr::Constant { value } => Some(*value),
            RasterExpr::Image { dataset, band: own } => {
                source.band_value(dataset, own.as_deref().or(band))
            }
            RasterExpr::Latest { collection, band: own } => {
                source.band_value(collection, Some(own.as_str()))
            }
            RasterExpr::Composite { collection, bands, .. } => {
                let chosen = band.or_else(|| bands.first().map(String::as_str));
                source.band_value(collection, chosen)
            }
            RasterExpr::Select { input, band: selected } => {
                input.sample_band(source, at, Some(selected))
            }
            RasterExpr::Binary { operator, lhs, rhs } => {
                let a = lhs.sample_band(source, at, band)?;
                let b = rhs.sample_band(source, at, band)?;
                apply_binary(*operator, a, b)
            }
            RasterExpr::Unary { operator, input } => {
                let x = input.sample_band(source, at, band)?;
                apply_unary(*operator, x)
            }
            RasterExpr::NormalizedDifference { input, first, second } => {
                let a = input.sample_band(source, at, Some(first))?;
                let b = input.sample_band(source, at, Some(second))?;
                let sum = a + b;
                if sum == 0.0 {
                    None
                } else {
                    Some((a - b) / sum)
                }
            }
            RasterExpr::Clamp { input, min, max } => {
                input.sample_band(source, at, band).map(|x| x.clamp(*min, *max))
            }
            RasterExpr::Steps { input, thresholds, values } => {
                let x = input.sample_band(source, at, band)?;
                let index = thresholds.iter().filter(|t| x >= **t).count();
                values.get(index).copied()
            }
            RasterExpr::Remap { input, table, default } => {
                let class = input.sample_band(source, at, band)?.round() as i64;
                Some(table.get(&class).copied().unwrap_or(*default))
            }
            RasterExpr::Slope { dem } => source.slope_degrees(dem),
            RasterExpr::FlowAccumulation { dem } => source.flow_accumulation(dem),
            RasterExpr::CellSize => Some(source.cell_size_m()),
            RasterExpr::Unmask { input, value } => {
                input.sample_band(source, at, band).or(Some(*value))
            }
            RasterExpr::Resample { input, .. } | RasterExpr::Rename { input, .. } => {
                input.sample_band(source, at, band)
            }
            RasterExpr::Clip { input, region } => {
                if region.contains(at) {
                    input.sample_band(source, at, band)
                } else {
                    None
                }
            }
        }
    }
}

fn apply_binary(operator: BinaryOp, a: f64, b: f64) -> Option<f64> {
    let value = match operator {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide if b == 0.0 => return None,
        BinaryOp::Divide => a / b,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Max => a.max(b),
        BinaryOp::Min => a.min(b),
    };
    value.is_finite().then_some(value)
}

fn apply_unary(operator: UnaryOp, x: f64) -> Option<f64> {
    let value = match operator {
        UnaryOp::Abs => x.abs(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Ln => x.ln(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Tan => x.tan(),
        UnaryOp::ToRadians => x.to_radians(),
    };
    value.is_finite().then_some(value)
}

/// Input values for point evaluation
pub trait PixelSource {
    /// Value of `band` of a dataset or collection; `None` when masked.
    /// A `None` band means the dataset's first band.
    fn band_value(&self, dataset: &str, band: Option<&str>) -> Option<f64>;

    fn slope_degrees(&self, dem: &RasterExpr) -> Option<f64>;

    fn flow_accumulation(&self, dem: &RasterExpr) -> Option<f64>;

    fn cell_size_m(&self) -> f64;
}

/// Fixed per-band values, keyed by `dataset` or `dataset/band`
#[derive(Debug, Clone, Default)]
pub struct PointSample {
    values: BTreeMap<String, f64>,
    pub slope_degrees: Option<f64>,
    pub flow_accumulation: Option<f64>,
    pub cell_size_m: f64,
}

impl PointSample {
    pub fn new(cell_size_m: f64) -> Self {
        Self {
            cell_size_m,
            ..Default::default()
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn with_terrain(mut self, slope_degrees: f64, flow_accumulation: f64) -> Self {
        self.slope_degrees = Some(slope_degrees);
        self.flow_accumulation = Some(flow_accumulation);
        self
    }
}

impl PixelSource for PointSample {
    fn band_value(&self, dataset: &str, band: Option<&str>) -> Option<f64> {
        band.and_then(|b| self.values.get(&format!("{}/{}", dataset, b)))
            .or_else(|| self.values.get(dataset))
            .copied()
    }

    fn slope_degrees(&self, _dem: &RasterExpr) -> Option<f64> {
        self.slope_degrees
    }

    fn flow_accumulation(&self, _dem: &RasterExpr) -> Option<f64> {
        self.flow_accumulation
    }

    fn cell_size_m(&self) -> f64 {
        self.cell_size_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit_square() -> Geometry {
        Geometry::Polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]])
    }

    #[test]
    fn test_serializes_with_op_tag() {
        let expr = RasterExpr::image_band("asset/r", "b1").multiply(2.0);
        let value = serde_json::to_value(&expr).unwrap();
        assert_eq!(
            value,
            json!({
                "op": "binary",
                "operator": "multiply",
                "lhs": {"op": "image", "dataset": "asset/r", "band": "b1"},
                "rhs": {"op": "constant", "value": 2.0}
            })
        );
        let back: RasterExpr = serde_json::from_value(value).unwrap();
        assert_eq!(back, expr);
    }

    #[test]
    fn test_datasets_are_collected_unique() {
        let expr = RasterExpr::image("a")
            .add(RasterExpr::latest("b", "x"))
            .multiply(RasterExpr::image("a"));
        assert_eq!(expr.datasets(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_sample_arithmetic_and_unmask() {
        let source = PointSample::new(30.0).with("rain", 1000.0);
        let r = RasterExpr::image("rain").multiply(0.0483).add(0.6207);
        let value = r.sample(&source, [0.5, 0.5]).unwrap();
        assert!((value - 48.9207).abs() < 1e-9);

        let missing = RasterExpr::image("absent").unmask(0.04);
        assert_eq!(missing.sample(&source, [0.5, 0.5]), Some(0.04));
    }

    #[test]
    fn test_steps_are_lower_inclusive() {
        let source = |x: f64| PointSample::new(30.0).with("s", x);
        let expr = RasterExpr::image("s").steps(vec![1.0, 3.0, 5.0], vec![0.2, 0.3, 0.4, 0.5]);
        assert_eq!(expr.sample(&source(0.5), [0.0, 0.0]), Some(0.2));
        assert_eq!(expr.sample(&source(1.0), [0.0, 0.0]), Some(0.3));
        assert_eq!(expr.sample(&source(4.9), [0.0, 0.0]), Some(0.4));
        assert_eq!(expr.sample(&source(5.0), [0.0, 0.0]), Some(0.5));
    }

    #[test]
    fn test_remap_uses_default_for_absent_class() {
        let table = BTreeMap::from([(1, 0.8), (12, 0.5)]);
        let expr = RasterExpr::image("lc").remap(table, 1.0);
        let at = [0.0, 0.0];
        assert_eq!(expr.sample(&PointSample::new(500.0).with("lc", 12.0), at), Some(0.5));
        assert_eq!(expr.sample(&PointSample::new(500.0).with("lc", 99.0), at), Some(1.0));
    }

    #[test]
    fn test_normalized_difference_selects_bands() {
        let source = PointSample::new(30.0)
            .with("landsat/SR_B5", 0.6)
            .with("landsat/SR_B4", 0.2);
        let expr = RasterExpr::image("landsat").normalized_difference("SR_B5", "SR_B4");
        let ndvi = expr.sample(&source, [0.0, 0.0]).unwrap();
        assert!((ndvi - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_clip_masks_outside_region() {
        let source = PointSample::new(30.0).with("x", 3.0);
        let expr = RasterExpr::image("x").unmask(0.0).clip(unit_square());
        assert_eq!(expr.sample(&source, [0.5, 0.5]), Some(3.0));
        assert_eq!(expr.sample(&source, [2.0, 0.5]), None);
    }

    #[test]
    fn test_divide_by_zero_is_masked() {
        let source = PointSample::new(30.0);
        let expr = RasterExpr::constant(1.0).divide(0.0);
        assert_eq!(expr.sample(&source, [0.0, 0.0]), None);
    }
}
