//! Upload API handlers
//!
//! POST /upload, GET /upload/:session_id/preview, DELETE /upload/:session_id

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::geometry::Position;
use crate::AppState;

/// POST /upload query parameters. The body is the GeoJSON document.
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    /// CRS of the coordinates, takes precedence over one named in the document
    pub crs: Option<String>,
    pub filename: Option<String>,
}

/// POST /upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: Uuid,
    pub area_km2: f64,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: [f64; 4],
    pub centroid: Position,
    pub feature_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_crs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RemoveSessionResponse {
    pub session_id: Uuid,
    pub removed: bool,
}

/// POST /upload
///
/// Parse, validate and measure an uploaded AOI and keep it as a session.
/// The body must be a GeoJSON document; zipped shapefiles are not accepted.
pub async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(format!(
                "upload exceeds {} MB",
                state.config.limits.max_upload_size_mb
            ))
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    })?;

    let geojson: Value = serde_json::from_slice(&body)
        .map_err(|e| {
            ApiError::BadRequest(format!(
                "body must be a GeoJSON document, zipped shapefiles are not accepted: {}",
                e
            ))
        })?;

    let resolved = state
        .resolver
        .resolve_upload(&geojson, params.crs.as_deref(), params.filename)?;
    let session = state.sessions.create(resolved).await;

    let bbox = session.aoi.bbox();
    let response = UploadResponse {
        session_id: session.session_id,
        area_km2: session.aoi.area_km2(),
        bbox: [bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y],
        centroid: session.aoi.centroid(),
        feature_count: session.feature_count,
        declared_crs: session.declared_crs.clone(),
        expires_at: session.expires_at(),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /upload/:session_id/preview
///
/// The session AOI as a GeoJSON Feature.
pub async fn preview(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let session = state.sessions.get(session_id).await.ok_or_else(|| {
        ApiError::NotFound(format!("Upload session not found or expired: {}", session_id))
    })?;
    Ok(Json(session.aoi.to_feature()))
}

/// DELETE /upload/:session_id
pub async fn remove(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<RemoveSessionResponse>> {
    if !state.sessions.remove(session_id).await {
        return Err(ApiError::NotFound(format!(
            "Upload session not found: {}",
            session_id
        )));
    }
    Ok(Json(RemoveSessionResponse {
        session_id,
        removed: true,
    }))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .route("/upload/:session_id", delete(remove))
        .route("/upload/:session_id/preview", get(preview))
}
