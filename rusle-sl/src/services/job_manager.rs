//! Soil-loss job lifecycle
//!
//! Owns the job registry, the export registry and one cancellation token per
//! live job. Every state change goes through [`SoilLossJob`]'s validated
//! transitions under the registry write lock, and is then broadcast on the
//! [`EventBus`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures::future::try_join_all;
use rusle_common::config::TomlConfig;
use rusle_common::events::{EventBus, ExportState, JobState, RusleEvent};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{RusleError, RusleResult};
use crate::models::{
    AreaOfInterest, DateRange, DemSource, ExportRequest, Factor, FactorOverride, FactorSource,
    FactorSpec, JobArtifacts, JobFailure, SoilLossJob, SoilLossStatistics, StateTransition,
    TileReference,
};
use crate::services::composer::{self, CompositeExpression};
use crate::services::compute_client::{ComputeService, ExportSpec, ExpressionHandle};
use crate::services::factor_provider::FactorProvider;
use crate::services::scale_policy::effective_scale;
use crate::services::visualization::{self, MapConfig, VisParams};
use crate::utils::{retry_transient, RetryPolicy};

/// Request-level limits
#[derive(Debug, Clone, PartialEq)]
pub struct JobLimits {
    pub max_aoi_area_km2: f64,
    pub min_scale_m: u32,
    pub max_scale_m: u32,
    pub default_scale_m: u32,
    pub export_folder: String,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

impl JobLimits {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            max_aoi_area_km2: config.limits.max_aoi_area_km2,
            min_scale_m: config.limits.min_export_scale,
            max_scale_m: config.limits.max_export_scale,
            default_scale_m: config.limits.default_export_scale,
            export_folder: config.compute.export_folder.clone(),
        }
    }
}

/// Retry policies for the two classes of remote call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemotePolicies {
    /// Dataset lookups, expression registration, export polling
    pub lookup: RetryPolicy,
    /// Tiles, statistics and export start
    pub materialize: RetryPolicy,
}

impl Default for RemotePolicies {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

impl RemotePolicies {
    pub fn from_config(config: &TomlConfig) -> Self {
        let compute = &config.compute;
        let backoff = Duration::from_millis(compute.retry_backoff_ms);
        Self {
            lookup: RetryPolicy::new(
                compute.max_retries,
                backoff,
                Duration::from_secs(compute.request_timeout_secs),
            ),
            materialize: RetryPolicy::new(
                compute.max_retries,
                backoff,
                Duration::from_secs(compute.materialize_timeout_secs),
            ),
        }
    }
}

/// Everything `submit` needs, as received from a client
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub aoi: Option<Arc<AreaOfInterest>>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Requested export scale in meters, default from limits when absent
    pub scale_m: Option<u32>,
    pub dem_source: DemSource,
    /// Keyed by factor name as sent by the client
    pub overrides: HashMap<String, FactorOverride>,
}

/// Tile references of a completed job
#[derive(Debug, Clone, PartialEq)]
pub struct JobTiles {
    pub composite: TileReference,
    pub factors: BTreeMap<Factor, TileReference>,
}

#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<Uuid, SoilLossJob>>>,
    exports: Arc<RwLock<HashMap<Uuid, ExportRequest>>>,
    cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    compute: Arc<dyn ComputeService>,
    event_bus: EventBus,
    limits: JobLimits,
    policies: RemotePolicies,
}

impl JobManager {
    pub fn new(
        compute: Arc<dyn ComputeService>,
        event_bus: EventBus,
        limits: JobLimits,
        policies: RemotePolicies,
    ) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            exports: Arc::new(RwLock::new(HashMap::new())),
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            compute,
            event_bus,
            limits,
            policies,
        }
    }

    pub fn limits(&self) -> &JobLimits {
        &self.limits
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Validate a request and register it as PENDING.
    ///
    /// Nothing is registered if any check fails.
    pub async fn submit(&self, request: SubmitRequest) -> RusleResult<SoilLossJob> {
        let aoi = request
            .aoi
            .ok_or_else(|| RusleError::Validation("an area of interest is required".to_string()))?;

        if aoi.area_km2() > self.limits.max_aoi_area_km2 {
            return Err(RusleError::AreaTooLarge {
                area_km2: aoi.area_km2(),
                max_km2: self.limits.max_aoi_area_km2,
            });
        }

        let date_range = match (request.date_from, request.date_to) {
            (Some(from), Some(to)) => Some(DateRange::new(from, to)?),
            (None, None) => None,
            _ => {
                return Err(RusleError::Validation(
                    "date_from and date_to must be given together".to_string(),
                ))
            }
        };

        let requested_scale_m = request.scale_m.unwrap_or(self.limits.default_scale_m);
        if !(self.limits.min_scale_m..=self.limits.max_scale_m).contains(&requested_scale_m) {
            return Err(RusleError::Validation(format!(
                "scale {} m outside {}..={} m",
                requested_scale_m, self.limits.min_scale_m, self.limits.max_scale_m
            )));
        }

        let factors = FactorProvider::new(request.dem_source).provide_all(
            &aoi,
            date_range.as_ref(),
            &request.overrides,
        )?;

        let scale = effective_scale(requested_scale_m, &aoi);
        if scale.adjusted() {
            info!(
                requested_m = scale.requested_m,
                effective_m = scale.effective_m,
                area_km2 = aoi.area_km2(),
                "Export scale raised for large area"
            );
        }

        let now = Utc::now();
        let job = SoilLossJob::new(
            Uuid::new_v4(),
            aoi,
            date_range,
            scale.requested_m,
            scale.effective_m,
            request.dem_source,
            factors,
            now,
        );

        self.jobs.write().await.insert(job.job_id, job.clone());
        self.cancellation_tokens
            .write()
            .await
            .insert(job.job_id, CancellationToken::new());

        info!(
            job_id = %job.job_id,
            area_km2 = job.aoi.area_km2(),
            export_scale_m = job.export_scale_m,
            overrides = job.factors.iter().filter(|f| f.is_override()).count(),
            "Job submitted"
        );
        self.event_bus.emit_lossy(RusleEvent::JobSubmitted {
            job_id: job.job_id,
            area_km2: job.aoi.area_km2(),
            export_scale_m: job.export_scale_m,
            timestamp: now,
        });

        Ok(job)
    }

    /// Run the job on a background task
    pub fn spawn(&self, job_id: Uuid) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            debug!(job_id = %job_id, "Background job task started");
            match manager.run(job_id).await {
                Ok(state) => info!(job_id = %job_id, state = %state, "Background job task finished"),
                Err(e) => warn!(job_id = %job_id, error = %e, "Job could not run"),
            }
        })
    }

    /// PENDING → RUNNING → COMPLETED | FAILED.
    ///
    /// Materialization errors end up on the job, not in the return value. The
    /// returned state is the job's state after this call.
    pub async fn run(&self, job_id: Uuid) -> RusleResult<JobState> {
        let token = self.cancellation_token(job_id).await;

        let started = {
            let mut jobs = self.jobs.write().await;
            match jobs.get_mut(&job_id) {
                Some(job) => job.start(Utc::now()).map(|t| (job.clone(), t)),
                None => Err(RusleError::NotFound(format!("job {}", job_id))),
            }
        };
        let (job, transition) = match started {
            Ok(started) => started,
            Err(e) => {
                self.cancellation_tokens.write().await.remove(&job_id);
                return Err(e);
            }
        };
        self.emit_transition(transition, None);

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(RusleError::Cancelled(format!("job {} cancelled while running", job_id))),
            result = self.materialize(&job) => result,
        };

        self.cancellation_tokens.write().await.remove(&job_id);
        self.finish(job_id, outcome).await
    }

    /// Publish the outcome in a single write
    async fn finish(&self, job_id: Uuid, outcome: RusleResult<JobArtifacts>) -> RusleResult<JobState> {
        let now = Utc::now();
        let mut detail = None;
        let (result, state) = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or_else(|| RusleError::NotFound(format!("job {}", job_id)))?;
            let result = match outcome {
                Ok(artifacts) => job.complete(artifacts, now),
                Err(e) => {
                    error!(job_id = %job_id, kind = %e.kind(), error = %e, "Job failed");
                    detail = Some(e.to_string());
                    job.fail(JobFailure::from(&e), now)
                }
            };
            (result, job.state())
        };

        match result {
            Ok(transition) => {
                if transition.new_state == JobState::Completed {
                    info!(job_id = %job_id, "Job completed");
                }
                self.emit_transition(transition, detail);
            }
            // Cancelled while running: the job was already failed by `cancel`
            Err(e) => debug!(job_id = %job_id, error = %e, "Discarding late job outcome"),
        }
        Ok(state)
    }

    async fn materialize(&self, job: &SoilLossJob) -> RusleResult<JobArtifacts> {
        let specs = self.describe_overrides(job).await?;
        let composite = composer::compose(&job.aoi, &specs)?;
        let soil_loss = self.evaluate(&composite.soil_loss, "soil loss expression").await?;

        let composite_tile = self.tile(&soil_loss, VisParams::soil_loss(), "composite tile");
        let factor_tiles = try_join_all(
            composite
                .factor_layers
                .iter()
                .map(|(factor, layer)| self.factor_tile(*factor, layer)),
        );
        let statistics = self.statistics(&soil_loss, &composite, job.export_scale_m);

        let (composite_tile, factor_tiles, statistics) =
            tokio::try_join!(composite_tile, factor_tiles, statistics)?;

        debug!(
            job_id = %job.job_id,
            mean = statistics.mean,
            max = statistics.max,
            "Materialized soil loss"
        );

        Ok(JobArtifacts::new(
            composite_tile,
            factor_tiles.into_iter().collect(),
            statistics,
            composite.grid_scale_m,
        )?
        .with_expression_id(soil_loss.id))
    }

    /// Fill override metadata the client left out from the remote catalog
    async fn describe_overrides(&self, job: &SoilLossJob) -> RusleResult<Vec<FactorSpec>> {
        let mut specs = Vec::with_capacity(job.factors.len());
        for spec in &job.factors {
            let FactorSource::Override(layer) = &spec.source else {
                specs.push(spec.clone());
                continue;
            };

            let compute = self.compute.as_ref();
            let asset_id = layer.asset_id.as_str();
            let described = retry_transient("dataset lookup", &self.policies.lookup, move || {
                compute.describe_dataset(asset_id)
            })
            .await?;

            let filled = layer.filled_from(&described.as_override());
            if let Some(bounds) = filled.bounds {
                if !bounds.intersects(&job.aoi.bbox()) {
                    return Err(RusleError::Validation(format!(
                        "override for factor {} ({}) does not cover the area of interest",
                        spec.factor, filled.asset_id
                    )));
                }
            }
            specs.push(FactorSpec {
                factor: spec.factor,
                source: FactorSource::Override(filled),
            });
        }
        Ok(specs)
    }

    async fn evaluate(
        &self,
        expr: &crate::raster::RasterExpr,
        operation: &str,
    ) -> RusleResult<ExpressionHandle> {
        let compute = self.compute.as_ref();
        Ok(retry_transient(operation, &self.policies.lookup, move || compute.evaluate(expr)).await?)
    }

    async fn tile(
        &self,
        handle: &ExpressionHandle,
        vis: VisParams,
        operation: &str,
    ) -> RusleResult<TileReference> {
        let compute = self.compute.as_ref();
        let vis = &vis;
        Ok(retry_transient(operation, &self.policies.materialize, move || {
            compute.tile_reference(handle, vis)
        })
        .await?)
    }

    async fn factor_tile(
        &self,
        factor: Factor,
        layer: &crate::raster::RasterExpr,
    ) -> RusleResult<(Factor, TileReference)> {
        let operation = format!("{} tile", factor);
        let handle = self.evaluate(layer, &operation).await?;
        let tile = self.tile(&handle, VisParams::factor(factor), &operation).await?;
        Ok((factor, tile))
    }

    async fn statistics(
        &self,
        handle: &ExpressionHandle,
        composite: &CompositeExpression,
        scale_m: u32,
    ) -> RusleResult<SoilLossStatistics> {
        let compute = self.compute.as_ref();
        let region = &composite.region;
        let scale_m = f64::from(scale_m);
        Ok(retry_transient("zonal statistics", &self.policies.materialize, move || {
            compute.zonal_statistics(handle, region, scale_m)
        })
        .await?)
    }

    /// Start an export of a completed job
    pub async fn export(
        &self,
        job_id: Uuid,
        destination: Option<String>,
        description: Option<String>,
    ) -> RusleResult<ExportRequest> {
        let job = self.job(job_id).await?;
        let artifacts = job.status().artifacts().cloned().ok_or(RusleError::JobNotReady {
            job_id,
            state: job.state(),
        })?;

        let destination = destination
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| self.limits.export_folder.clone());
        let description =
            description.unwrap_or_else(|| format!("soil_loss_{}", job_id.simple()));

        // Reserve the export slot before any remote call
        let mut export = {
            let mut exports = self.exports.write().await;
            if let Some(active) = exports.values().find(|e| e.job_id == job_id && e.is_active()) {
                return Err(RusleError::ExportInProgress {
                    job_id,
                    export_id: active.export_id,
                });
            }
            let export = ExportRequest::new(job_id, destination, description, Utc::now());
            exports.insert(export.export_id, export.clone());
            export
        };

        match self.start_remote_export(&job, &artifacts, &export).await {
            Ok(task_id) => {
                export.task_id = Some(task_id.clone());
                if let Some(stored) = self.exports.write().await.get_mut(&export.export_id) {
                    stored.task_id = Some(task_id);
                }
                info!(
                    job_id = %job_id,
                    export_id = %export.export_id,
                    destination = %export.destination,
                    "Export started"
                );
                self.emit_export(&export);
                Ok(export)
            }
            Err(e) => {
                warn!(job_id = %job_id, export_id = %export.export_id, error = %e, "Export failed to start");
                if let Some(stored) = self.exports.write().await.get_mut(&export.export_id) {
                    stored.advance(ExportState::Failed, Some(e.to_string()), Utc::now());
                }
                Err(e)
            }
        }
    }

    async fn start_remote_export(
        &self,
        job: &SoilLossJob,
        artifacts: &JobArtifacts,
        export: &ExportRequest,
    ) -> RusleResult<String> {
        let expression_id = match artifacts.expression_id() {
            Some(id) => id.to_string(),
            None => {
                let specs = self.describe_overrides(job).await?;
                let composite = composer::compose(&job.aoi, &specs)?;
                self.evaluate(&composite.soil_loss, "soil loss expression").await?.id
            }
        };

        let spec = ExportSpec {
            expression_id,
            region: job.aoi.geometry().clone(),
            scale_m: f64::from(job.export_scale_m),
            folder: export.destination.clone(),
            description: export.description.clone(),
        };
        let compute = self.compute.as_ref();
        let spec = &spec;
        Ok(retry_transient("export start", &self.policies.materialize, move || {
            compute.start_export(spec)
        })
        .await?)
    }

    /// Poll the remote task and move the export forward
    pub async fn export_status(&self, export_id: Uuid) -> RusleResult<ExportRequest> {
        let export = self
            .exports
            .read()
            .await
            .get(&export_id)
            .cloned()
            .ok_or_else(|| RusleError::NotFound(format!("export {}", export_id)))?;

        let Some(task_id) = export.task_id.clone().filter(|_| export.is_active()) else {
            return Ok(export);
        };

        let compute = self.compute.as_ref();
        let task_id = task_id.as_str();
        let remote = retry_transient("export status", &self.policies.lookup, move || {
            compute.export_status(task_id)
        })
        .await?;

        let mut exports = self.exports.write().await;
        let stored = exports
            .get_mut(&export_id)
            .ok_or_else(|| RusleError::NotFound(format!("export {}", export_id)))?;
        if stored.advance(remote.state, remote.error, Utc::now()) {
            info!(export_id = %export_id, state = ?stored.state, "Export advanced");
            self.emit_export(stored);
        }
        Ok(stored.clone())
    }

    /// Cancel a job.
    ///
    /// PENDING → CANCELLED. RUNNING → FAILED with kind `CANCELLED`; the
    /// manager stops waiting but the remote computation may continue.
    pub async fn cancel(&self, job_id: Uuid) -> RusleResult<SoilLossJob> {
        let now = Utc::now();
        let (job, transition, detail) = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(&job_id)
                .ok_or_else(|| RusleError::NotFound(format!("job {}", job_id)))?;
            let (transition, detail) = if job.state() == JobState::Running {
                let reason = RusleError::Cancelled(format!("job {} cancelled while running", job_id));
                (job.fail(JobFailure::from(&reason), now)?, Some(reason.to_string()))
            } else {
                (job.cancel(now)?, None)
            };
            (job.clone(), transition, detail)
        };

        if let Some(token) = self.cancellation_tokens.write().await.remove(&job_id) {
            token.cancel();
        }
        info!(job_id = %job_id, state = %job.state(), "Job cancelled");
        self.emit_transition(transition, detail);
        Ok(job)
    }

    pub async fn job(&self, job_id: Uuid) -> RusleResult<SoilLossJob> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| RusleError::NotFound(format!("job {}", job_id)))
    }

    pub async fn export_request(&self, export_id: Uuid) -> Option<ExportRequest> {
        self.exports.read().await.get(&export_id).cloned()
    }

    async fn artifacts(&self, job_id: Uuid) -> RusleResult<(SoilLossJob, JobArtifacts)> {
        let job = self.job(job_id).await?;
        match job.status().artifacts().cloned() {
            Some(artifacts) => Ok((job, artifacts)),
            None => Err(RusleError::JobNotReady {
                job_id,
                state: job.state(),
            }),
        }
    }

    pub async fn statistics_of(&self, job_id: Uuid) -> RusleResult<SoilLossStatistics> {
        Ok(self.artifacts(job_id).await?.1.statistics())
    }

    pub async fn tiles(&self, job_id: Uuid) -> RusleResult<JobTiles> {
        let (_, artifacts) = self.artifacts(job_id).await?;
        Ok(JobTiles {
            composite: artifacts.composite_tile().clone(),
            factors: artifacts.factor_tiles().clone(),
        })
    }

    pub async fn map_config(&self, job_id: Uuid) -> RusleResult<MapConfig> {
        let (job, artifacts) = self.artifacts(job_id).await?;
        Ok(visualization::map_config(&job.aoi, &artifacts))
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Drop terminal jobs finished more than `retention` ago, with their exports
    pub async fn purge_expired(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let purged: Vec<Uuid> = {
            let mut jobs = self.jobs.write().await;
            let purged: Vec<Uuid> = jobs
                .values()
                .filter(|job| {
                    job.status()
                        .finished_at()
                        .is_some_and(|at| rusle_common::time::is_expired(at, retention, now))
                })
                .map(|job| job.job_id)
                .collect();
            for id in &purged {
                jobs.remove(id);
            }
            purged
        };

        if !purged.is_empty() {
            self.exports
                .write()
                .await
                .retain(|_, export| !purged.contains(&export.job_id));
            let mut tokens = self.cancellation_tokens.write().await;
            for id in &purged {
                tokens.remove(id);
            }
            info!(count = purged.len(), "Purged expired jobs");
        }
        purged.len()
    }

    async fn cancellation_token(&self, job_id: Uuid) -> CancellationToken {
        self.cancellation_tokens
            .write()
            .await
            .entry(job_id)
            .or_default()
            .clone()
    }

    fn emit_transition(&self, transition: StateTransition, detail: Option<String>) {
        debug!(
            job_id = %transition.job_id,
            old_state = %transition.old_state,
            new_state = %transition.new_state,
            "Job state changed"
        );
        self.event_bus.emit_lossy(RusleEvent::JobStateChanged {
            job_id: transition.job_id,
            old_state: transition.old_state,
            new_state: transition.new_state,
            detail,
            timestamp: Utc::now(),
        });
    }

    fn emit_export(&self, export: &ExportRequest) {
        self.event_bus.emit_lossy(RusleEvent::ExportStateChanged {
            export_id: export.export_id,
            job_id: export.job_id,
            state: export.state,
            timestamp: export.updated_at,
        });
    }
}
