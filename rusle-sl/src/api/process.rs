//! Processing API handlers
//!
//! POST /process submits a job and runs it in the background. The remaining
//! routes poll, cancel and export it by job id.

use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    DemSource, ExportRequest, Factor, FactorOverride, FactorSource, JobStatus, SoilLossJob,
    SoilLossStatistics, TileReference,
};
use crate::services::{AoiInput, SubmitRequest};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AdminRegionRequest {
    pub name: String,
    /// 0 = country, 1 = region/state, 2 = province/county
    #[serde(default)]
    pub level: u8,
}

/// POST /process request
#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    /// Upload session holding the AOI
    pub session_id: Option<Uuid>,
    /// Named administrative region, alternative to `session_id`
    pub admin_region: Option<AdminRegionRequest>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Export scale in meters
    pub scale: Option<u32>,
    #[serde(default)]
    pub dem_source: DemSource,
    /// Factor name → user layer
    #[serde(default)]
    pub overrides: HashMap<String, FactorOverride>,
}

/// Factor as reported on a job
#[derive(Debug, Serialize)]
pub struct FactorSummary {
    pub factor: Factor,
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    /// "override" or "derived"
    pub source: &'static str,
    /// Override asset or derivation datasets
    pub inputs: Vec<String>,
}

/// Job status response
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub status: JobStatus,
    pub area_km2: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    pub requested_scale_m: u32,
    pub export_scale_m: u32,
    pub scale_adjusted: bool,
    pub dem_source: DemSource,
    pub factors: Vec<FactorSummary>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&SoilLossJob> for JobResponse {
    fn from(job: &SoilLossJob) -> Self {
        let factors = job
            .factors
            .iter()
            .map(|spec| {
                let info = spec.factor.info();
                let (source, inputs) = match &spec.source {
                    FactorSource::Override(layer) => ("override", vec![layer.asset_id.clone()]),
                    FactorSource::Derived(recipe) => ("derived", recipe.datasets.clone()),
                };
                FactorSummary {
                    factor: spec.factor,
                    name: info.display_name,
                    description: info.description,
                    unit: info.unit,
                    source,
                    inputs,
                }
            })
            .collect();

        let mut message = match job.status() {
            JobStatus::Pending => "Job queued".to_string(),
            JobStatus::Running { .. } => "Computing soil loss".to_string(),
            JobStatus::Completed { .. } => "Soil loss computed".to_string(),
            JobStatus::Failed { error, .. } => format!("Job failed: {}", error.message),
            JobStatus::Cancelled { .. } => "Job cancelled".to_string(),
        };
        if job.scale_adjusted {
            message.push_str(&format!(
                ". Export scale raised from {} m to {} m for a {:.0} km² area",
                job.requested_scale_m,
                job.export_scale_m,
                job.aoi.area_km2()
            ));
        }

        Self {
            job_id: job.job_id,
            status: job.status().clone(),
            area_km2: job.aoi.area_km2(),
            date_from: job.date_range.map(|r| r.date_from()),
            date_to: job.date_range.map(|r| r.date_to()),
            requested_scale_m: job.requested_scale_m,
            export_scale_m: job.export_scale_m,
            scale_adjusted: job.scale_adjusted,
            dem_source: job.dem_source,
            factors,
            message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub statistics: SoilLossStatistics,
    pub unit: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TilesResponse {
    pub job_id: Uuid,
    pub soil_loss: TileReference,
    pub factors: BTreeMap<Factor, TileReference>,
}

/// POST /process/:job_id/export request
#[derive(Debug, Default, Deserialize)]
pub struct ExportBody {
    /// Destination folder, default from configuration
    pub destination: Option<String>,
    pub description: Option<String>,
}

/// POST /process
///
/// Returns 202 Accepted with the PENDING job; computation continues in the
/// background.
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let aoi = match (request.session_id, request.admin_region) {
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "give either session_id or admin_region, not both".to_string(),
            ))
        }
        (Some(session_id), None) => {
            let session = state.sessions.get(session_id).await.ok_or_else(|| {
                ApiError::NotFound(format!(
                    "Upload session not found or expired: {}",
                    session_id
                ))
            })?;
            Some(session.aoi)
        }
        (None, Some(region)) => {
            let input = AoiInput::AdminRegion {
                name: region.name,
                level: region.level,
            };
            Some(std::sync::Arc::new(state.resolver.resolve(&input)?))
        }
        (None, None) => None,
    };

    let job = state
        .jobs
        .submit(SubmitRequest {
            aoi,
            date_from: request.date_from,
            date_to: request.date_to,
            scale_m: request.scale,
            dem_source: request.dem_source,
            overrides: request.overrides,
        })
        .await?;

    state.jobs.spawn(job.job_id);

    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(&job))))
}

/// GET /process/:job_id
pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.jobs.job(job_id).await?;
    tracing::debug!(job_id = %job_id, state = %job.state(), "Status query");
    Ok(Json(JobResponse::from(&job)))
}

/// GET /process/:job_id/statistics
pub async fn statistics(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<StatisticsResponse>> {
    let statistics = state.jobs.statistics_of(job_id).await?;
    Ok(Json(StatisticsResponse {
        job_id,
        statistics,
        unit: "t/ha/yr",
    }))
}

/// GET /process/:job_id/tiles
pub async fn tiles(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<TilesResponse>> {
    let tiles = state.jobs.tiles(job_id).await?;
    Ok(Json(TilesResponse {
        job_id,
        soil_loss: tiles.composite,
        factors: tiles.factors,
    }))
}

/// POST /process/:job_id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.jobs.cancel(job_id).await?;
    Ok(Json(JobResponse::from(&job)))
}

/// POST /process/:job_id/export
pub async fn export(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<ExportBody>>,
) -> ApiResult<(StatusCode, Json<ExportRequest>)> {
    let Json(body) = body.unwrap_or_default();
    let export = state
        .jobs
        .export(job_id, body.destination, body.description)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(export)))
}

/// Build processing routes
pub fn process_routes() -> Router<AppState> {
    Router::new()
        .route("/process", post(submit))
        .route("/process/:job_id", get(status))
        .route("/process/:job_id/statistics", get(statistics))
        .route("/process/:job_id/tiles", get(tiles))
        .route("/process/:job_id/cancel", post(cancel))
        .route("/process/:job_id/export", post(export))
}
