//! Map configuration for completed jobs and the soil loss legend

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::visualization::{self, Legend};
use crate::services::MapConfig;
use crate::AppState;

/// GET /visualize/:job_id
///
/// Center, zoom and tile layers; 409 until the job is COMPLETED.
pub async fn map_config(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<MapConfig>> {
    Ok(Json(state.jobs.map_config(job_id).await?))
}

/// GET /legend
pub async fn legend() -> Json<Legend> {
    Json(visualization::legend())
}

pub fn visualize_routes() -> Router<AppState> {
    Router::new()
        .route("/visualize/:job_id", get(map_config))
        .route("/legend", get(legend))
}
