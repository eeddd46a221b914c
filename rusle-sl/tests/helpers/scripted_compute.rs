//! In-memory compute service with scripted failure modes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rusle_common::events::ExportState;
use rusle_sl::geometry::Geometry;
use rusle_sl::models::{SoilLossStatistics, TileReference};
use rusle_sl::raster::RasterExpr;
use rusle_sl::services::compute_client::{
    ComputeError, ComputeService, DatasetInfo, ExportSpec, ExpressionHandle, RemoteExportStatus,
};
use rusle_sl::services::VisParams;

/// How the service misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeMode {
    /// Everything succeeds
    Healthy,
    /// Tile requests never return
    HangTiles,
    /// The first `n` tile requests fail transiently
    FlakyTiles(usize),
    /// Expression registration is rejected
    RejectExpressions,
}

pub struct ScriptedCompute {
    mode: ComputeMode,
    statistics: SoilLossStatistics,
    expressions: Mutex<Vec<RasterExpr>>,
    tile_calls: AtomicUsize,
    exports: Mutex<Vec<ExportSpec>>,
    export_polls: AtomicUsize,
}

impl ScriptedCompute {
    pub fn new(mode: ComputeMode) -> Self {
        Self {
            mode,
            statistics: SoilLossStatistics {
                mean: 2.7,
                min: 0.0,
                max: 48.3,
                std_dev: 4.9,
            },
            expressions: Mutex::new(Vec::new()),
            tile_calls: AtomicUsize::new(0),
            exports: Mutex::new(Vec::new()),
            export_polls: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComputeMode::Healthy)
    }

    /// Every expression registered so far
    pub fn expressions(&self) -> Vec<RasterExpr> {
        self.expressions.lock().unwrap().clone()
    }

    pub fn tile_calls(&self) -> usize {
        self.tile_calls.load(Ordering::SeqCst)
    }

    pub fn exports(&self) -> Vec<ExportSpec> {
        self.exports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeService for ScriptedCompute {
    async fn describe_dataset(&self, dataset_id: &str) -> Result<DatasetInfo, ComputeError> {
        Ok(DatasetInfo {
            id: dataset_id.to_string(),
            bands: vec!["b1".to_string()],
            native_scale_m: Some(250.0),
            ..Default::default()
        })
    }

    async fn evaluate(&self, expr: &RasterExpr) -> Result<ExpressionHandle, ComputeError> {
        if self.mode == ComputeMode::RejectExpressions {
            return Err(ComputeError::Rejected {
                status: 400,
                message: "expression references an unknown band".to_string(),
            });
        }
        let mut expressions = self.expressions.lock().unwrap();
        expressions.push(expr.clone());
        Ok(ExpressionHandle {
            id: format!("expr-{}", expressions.len()),
        })
    }

    async fn tile_reference(
        &self,
        handle: &ExpressionHandle,
        _vis: &VisParams,
    ) -> Result<TileReference, ComputeError> {
        let call = self.tile_calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            ComputeMode::HangTiles => {
                futures::future::pending::<()>().await;
            }
            ComputeMode::FlakyTiles(failures) if call < failures => {
                return Err(ComputeError::Transient("503 Service Unavailable".to_string()));
            }
            _ => {}
        }
        Ok(TileReference {
            url_template: format!("https://tiles.example.test/{}/{{z}}/{{x}}/{{y}}", handle.id),
            map_id: Some(handle.id.clone()),
        })
    }

    async fn zonal_statistics(
        &self,
        _handle: &ExpressionHandle,
        _region: &Geometry,
        _scale_m: f64,
    ) -> Result<SoilLossStatistics, ComputeError> {
        Ok(self.statistics)
    }

    async fn start_export(&self, spec: &ExportSpec) -> Result<String, ComputeError> {
        let mut exports = self.exports.lock().unwrap();
        exports.push(spec.clone());
        Ok(format!("task-{}", exports.len()))
    }

    /// RUNNING on the first poll, COMPLETED afterwards
    async fn export_status(&self, _task_id: &str) -> Result<RemoteExportStatus, ComputeError> {
        let poll = self.export_polls.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteExportStatus {
            state: if poll == 0 {
                ExportState::Running
            } else {
                ExportState::Completed
            },
            error: None,
        })
    }
}
