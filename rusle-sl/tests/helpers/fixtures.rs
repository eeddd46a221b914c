//! AOI, configuration and app fixtures

use std::sync::Arc;
use std::time::Duration;

use rusle_common::config::TomlConfig;
use rusle_common::events::{EventBus, JobState};
use rusle_sl::models::AreaOfInterest;
use rusle_sl::services::{
    AoiResolver, BoundaryCatalog, ComputeService, JobLimits, JobManager, RemotePolicies,
};
use rusle_sl::utils::RetryPolicy;
use rusle_sl::AppState;
use serde_json::{json, Value};
use uuid::Uuid;

/// Closed square polygon with its south-west corner at (`lon`, `lat`)
pub fn square_polygon(lon: f64, lat: f64, size_deg: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [lon, lat],
            [lon + size_deg, lat],
            [lon + size_deg, lat + size_deg],
            [lon, lat + size_deg],
            [lon, lat]
        ]]
    })
}

/// Resolve a square upload without an area limit
pub fn resolve_square(lon: f64, lat: f64, size_deg: f64) -> Arc<AreaOfInterest> {
    let resolver = AoiResolver::new(Arc::new(BoundaryCatalog::empty()), f64::MAX);
    let resolved = resolver
        .resolve_upload(&square_polygon(lon, lat, size_deg), None, None)
        .expect("square resolves");
    Arc::new(resolved.aoi)
}

/// Defaults with quick retries
pub fn test_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.compute.retry_backoff_ms = 1;
    config.compute.materialize_timeout_secs = 1;
    config.compute.request_timeout_secs = 1;
    config
}

/// Job manager with millisecond-scale timeouts
pub fn manager_with(compute: Arc<dyn ComputeService>, attempt_timeout: Duration) -> JobManager {
    let policy = RetryPolicy::new(3, Duration::from_millis(1), attempt_timeout);
    JobManager::new(
        compute,
        EventBus::new(128),
        JobLimits::default(),
        RemotePolicies {
            lookup: policy,
            materialize: policy,
        },
    )
}

pub fn test_state(
    config: TomlConfig,
    catalog: BoundaryCatalog,
    compute: Arc<dyn ComputeService>,
) -> AppState {
    AppState::new(config, catalog, compute, EventBus::new(128))
}

pub fn test_app(compute: Arc<dyn ComputeService>) -> axum::Router {
    rusle_sl::build_router(test_state(test_config(), BoundaryCatalog::empty(), compute))
}

/// Poll until the job leaves PENDING/RUNNING, at most ~5 s
pub async fn wait_for_terminal(manager: &JobManager, job_id: Uuid) -> JobState {
    for _ in 0..500 {
        let state = manager.job(job_id).await.expect("job exists").state();
        if state.is_terminal() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}
