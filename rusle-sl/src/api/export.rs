//! Export polling

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::ExportRequest;
use crate::AppState;

/// GET /export/:export_id
///
/// Polls the remote task and returns the export after any state advance.
pub async fn export_status(
    State(state): State<AppState>,
    Path(export_id): Path<Uuid>,
) -> ApiResult<Json<ExportRequest>> {
    Ok(Json(state.jobs.export_status(export_id).await?))
}

pub fn export_routes() -> Router<AppState> {
    Router::new().route("/export/:export_id", get(export_status))
}
