//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use rusle_common::events::{JobState, RusleEvent};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok" or "degraded")
    pub status: String,
    /// Module name ("rusle-sl")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub jobs: usize,
    pub sessions: usize,
    /// Last job failure, for diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if last_error.is_some() { "degraded" } else { "ok" }.to_string(),
        module: "rusle-sl".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        jobs: state.jobs.job_count().await,
        sessions: state.sessions.len().await,
        last_error,
    })
}

/// Record the most recent job failure as the service's last error.
///
/// A later completion clears it.
pub fn spawn_error_tracker(state: AppState) -> JoinHandle<()> {
    let mut rx = state.event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(RusleEvent::JobStateChanged {
                    job_id,
                    new_state: JobState::Failed,
                    detail,
                    ..
                }) => {
                    let message = detail.unwrap_or_else(|| "failed".to_string());
                    *state.last_error.write().await = Some(format!("job {}: {}", job_id, message));
                }
                Ok(RusleEvent::JobStateChanged {
                    new_state: JobState::Completed,
                    ..
                }) => {
                    *state.last_error.write().await = None;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Error tracker lagged behind event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
