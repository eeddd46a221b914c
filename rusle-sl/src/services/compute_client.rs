//! Remote Earth-observation compute service
//!
//! [`ComputeService`] is the evaluation seam: everything upstream of it builds
//! unevaluated [`RasterExpr`] trees, everything behind it materializes them.
//! [`HttpComputeClient`] speaks JSON over HTTP to a compute gateway.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use rusle_common::config::ComputeConfig;
use rusle_common::events::ExportState;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::error::RusleError;
use crate::geometry::{BoundingBox, Geometry};
use crate::models::{FactorOverride, SoilLossStatistics, TileReference};
use crate::raster::RasterExpr;
use crate::services::visualization::VisParams;

const USER_AGENT: &str = concat!("rusle-sl/", env!("CARGO_PKG_VERSION"));

/// Compute service errors
#[derive(Debug, Clone, Error)]
pub enum ComputeError {
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Network failure or retryable HTTP status
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Compute service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ComputeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ComputeError::Transient(_))
    }
}

impl From<ComputeError> for RusleError {
    fn from(err: ComputeError) -> Self {
        match err {
            ComputeError::Timeout { operation, after } => RusleError::Timeout { operation, after },
            other => RusleError::RemoteService(other.to_string()),
        }
    }
}

/// Remote metadata for a dataset or user asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    #[serde(default)]
    pub bands: Vec<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub value_range: Option<[f64; 2]>,
    #[serde(default)]
    pub bounds: Option<BoundingBox>,
    #[serde(default)]
    pub native_scale_m: Option<f64>,
}

impl DatasetInfo {
    /// Override metadata as reported by the remote catalog
    pub fn as_override(&self) -> FactorOverride {
        FactorOverride {
            asset_id: self.id.clone(),
            unit: self.unit.clone(),
            value_range: self.value_range,
            bounds: self.bounds,
            native_scale_m: self.native_scale_m,
        }
    }
}

/// Server-side handle of a validated expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionHandle {
    pub id: String,
}

/// Parameters of an export task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSpec {
    pub expression_id: String,
    pub region: Geometry,
    pub scale_m: f64,
    pub folder: String,
    pub description: String,
}

/// Remote export task state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteExportStatus {
    pub state: ExportState,
    #[serde(default)]
    pub error: Option<String>,
}

/// Evaluation backend for raster expressions
#[async_trait]
pub trait ComputeService: Send + Sync {
    async fn describe_dataset(&self, dataset_id: &str) -> Result<DatasetInfo, ComputeError>;

    /// Validate an expression and register it for evaluation
    async fn evaluate(&self, expr: &RasterExpr) -> Result<ExpressionHandle, ComputeError>;

    async fn tile_reference(
        &self,
        handle: &ExpressionHandle,
        vis: &VisParams,
    ) -> Result<TileReference, ComputeError>;

    /// Mean, min, max and standard deviation over `region` at `scale_m`
    async fn zonal_statistics(
        &self,
        handle: &ExpressionHandle,
        region: &Geometry,
        scale_m: f64,
    ) -> Result<SoilLossStatistics, ComputeError>;

    /// Start an export and return the remote task id
    async fn start_export(&self, spec: &ExportSpec) -> Result<String, ComputeError>;

    async fn export_status(&self, task_id: &str) -> Result<RemoteExportStatus, ComputeError>;
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    expression: &'a RasterExpr,
}

#[derive(Serialize)]
struct StatisticsRequest<'a> {
    region: &'a Geometry,
    scale_m: f64,
}

#[derive(Deserialize)]
struct TaskResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the compute gateway
///
/// Requests carry no overall deadline of their own; each call is bounded by
/// the per-attempt timeout of the caller's [`crate::utils::RetryPolicy`].
pub struct HttpComputeClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpComputeClient {
    pub fn new(config: &ComputeConfig) -> Result<Self, ComputeError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ComputeError::Transient(e.to_string()))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ComputeError> {
        self.rate_limiter.until_ready().await;

        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ComputeError::Timeout {
                    operation: operation.to_string(),
                    after: started.elapsed(),
                }
            } else {
                ComputeError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ComputeError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<RemoteErrorBody>(&body)
            .ok()
            .and_then(|b| b.message.or(b.error))
            .unwrap_or(body);

        tracing::debug!(status = status.as_u16(), %message, "Compute service returned error");

        if is_retryable_status(status) {
            Err(ComputeError::Transient(format!("HTTP {}: {}", status.as_u16(), message)))
        } else {
            Err(ComputeError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[async_trait]
impl ComputeService for HttpComputeClient {
    async fn describe_dataset(&self, dataset_id: &str) -> Result<DatasetInfo, ComputeError> {
        let request = self
            .http_client
            .get(self.url("/datasets"))
            .query(&[("id", dataset_id)]);
        self.send("dataset lookup", request).await
    }

    async fn evaluate(&self, expr: &RasterExpr) -> Result<ExpressionHandle, ComputeError> {
        let request = self
            .http_client
            .post(self.url("/expressions"))
            .json(&EvaluateRequest { expression: expr });
        self.send("expression registration", request).await
    }

    async fn tile_reference(
        &self,
        handle: &ExpressionHandle,
        vis: &VisParams,
    ) -> Result<TileReference, ComputeError> {
        let request = self
            .http_client
            .post(self.url(&format!("/expressions/{}/tiles", handle.id)))
            .json(vis);
        self.send("tile request", request).await
    }

    async fn zonal_statistics(
        &self,
        handle: &ExpressionHandle,
        region: &Geometry,
        scale_m: f64,
    ) -> Result<SoilLossStatistics, ComputeError> {
        let request = self
            .http_client
            .post(self.url(&format!("/expressions/{}/statistics", handle.id)))
            .json(&StatisticsRequest { region, scale_m });
        self.send("zonal statistics", request).await
    }

    async fn start_export(&self, spec: &ExportSpec) -> Result<String, ComputeError> {
        let request = self.http_client.post(self.url("/exports")).json(spec);
        let task: TaskResponse = self.send("export start", request).await?;
        Ok(task.task_id)
    }

    async fn export_status(&self, task_id: &str) -> Result<RemoteExportStatus, ComputeError> {
        let request = self.http_client.get(self.url(&format!("/exports/{}", task_id)));
        self.send("export status", request).await
    }
}
