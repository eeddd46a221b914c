//! rusle-sl library interface
//!
//! Soil loss (RUSLE) job orchestration: AOI resolution, factor selection,
//! raster algebra composition and the job lifecycle, served over HTTP.

pub mod api;
pub mod error;
pub mod geometry;
pub mod models;
pub mod raster;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, RusleError, RusleResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use rusle_common::config::TomlConfig;
use rusle_common::events::EventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::{
    AoiResolver, BoundaryCatalog, ComputeService, JobLimits, JobManager, RemotePolicies,
    SessionStore,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobManager,
    pub sessions: SessionStore,
    pub resolver: Arc<AoiResolver>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub config: Arc<TomlConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last job failure for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        config: TomlConfig,
        catalog: BoundaryCatalog,
        compute: Arc<dyn ComputeService>,
        event_bus: EventBus,
    ) -> Self {
        let jobs = JobManager::new(
            compute,
            event_bus.clone(),
            JobLimits::from_config(&config),
            RemotePolicies::from_config(&config),
        );
        let sessions = SessionStore::new(
            Duration::from_secs(config.sessions.ttl_secs),
            event_bus.clone(),
        );
        let resolver = AoiResolver::new(Arc::new(catalog), config.limits.max_aoi_area_km2);

        Self {
            jobs,
            sessions,
            resolver: Arc::new(resolver),
            event_bus,
            config: Arc::new(config),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let upload_limit_bytes = state
        .config
        .limits
        .max_upload_size_mb
        .saturating_mul(1024 * 1024)
        .try_into()
        .unwrap_or(usize::MAX);

    Router::new()
        .merge(api::upload_routes())
        .merge(api::process_routes())
        .merge(api::export_routes())
        .merge(api::visualize_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(DefaultBodyLimit::max(upload_limit_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Purge expired sessions and old jobs every `sessions.sweep_interval_secs`
pub fn spawn_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(state.config.sessions.sweep_interval_secs.max(1));
    let retention = Duration::from_secs(state.config.sessions.job_retention_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let sessions = state.sessions.purge_expired().await;
            let jobs = state.jobs.purge_expired(retention).await;
            if sessions + jobs > 0 {
                tracing::debug!(sessions, jobs, "Sweep finished");
            }
        }
    })
}
