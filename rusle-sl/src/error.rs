//! Error types for rusle-sl
//!
//! [`RusleError`] is the domain error shared by the resolver, factor provider,
//! composer and job manager. [`ApiError`] maps it onto HTTP responses.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rusle_common::events::JobState;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::factor::Factor;

/// Serializable error classification, recorded on failed jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidGeometry,
    AreaTooLarge,
    MissingDateRange,
    UnsupportedFactor,
    FactorUnitMismatch,
    ValidationError,
    JobNotReady,
    Timeout,
    RemoteServiceError,
    Cancelled,
    NotFound,
    ExportInProgress,
    InvalidTransition,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidGeometry => "INVALID_GEOMETRY",
            ErrorKind::AreaTooLarge => "AREA_TOO_LARGE",
            ErrorKind::MissingDateRange => "MISSING_DATE_RANGE",
            ErrorKind::UnsupportedFactor => "UNSUPPORTED_FACTOR",
            ErrorKind::FactorUnitMismatch => "FACTOR_UNIT_MISMATCH",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::JobNotReady => "JOB_NOT_READY",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::RemoteServiceError => "REMOTE_SERVICE_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ExportInProgress => "EXPORT_IN_PROGRESS",
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain error
#[derive(Debug, Clone, Error)]
pub enum RusleError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Area of interest is {area_km2:.1} km², maximum is {max_km2:.1} km²")]
    AreaTooLarge { area_km2: f64, max_km2: f64 },

    #[error("Factor {0} requires a date range")]
    MissingDateRange(Factor),

    #[error("Unsupported factor '{0}', expected one of R, K, LS, C, P")]
    UnsupportedFactor(String),

    #[error("Factor {factor} override rejected: {reason}")]
    FactorUnitMismatch { factor: Factor, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Job {job_id} is {state}, results are not available")]
    JobNotReady { job_id: Uuid, state: JobState },

    #[error("{operation} timed out after {}s", .after.as_secs_f64())]
    Timeout { operation: String, after: Duration },

    #[error("Remote service error: {0}")]
    RemoteService(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} already has an active export {export_id}")]
    ExportInProgress { job_id: Uuid, export_id: Uuid },

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition { job_id: Uuid, from: JobState, to: JobState },
}

impl RusleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RusleError::InvalidGeometry(_) => ErrorKind::InvalidGeometry,
            RusleError::AreaTooLarge { .. } => ErrorKind::AreaTooLarge,
            RusleError::MissingDateRange(_) => ErrorKind::MissingDateRange,
            RusleError::UnsupportedFactor(_) => ErrorKind::UnsupportedFactor,
            RusleError::FactorUnitMismatch { .. } => ErrorKind::FactorUnitMismatch,
            RusleError::Validation(_) => ErrorKind::ValidationError,
            RusleError::JobNotReady { .. } => ErrorKind::JobNotReady,
            RusleError::Timeout { .. } => ErrorKind::Timeout,
            RusleError::RemoteService(_) => ErrorKind::RemoteServiceError,
            RusleError::Cancelled(_) => ErrorKind::Cancelled,
            RusleError::NotFound(_) => ErrorKind::NotFound,
            RusleError::ExportInProgress { .. } => ErrorKind::ExportInProgress,
            RusleError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
        }
    }

    /// Raised synchronously on bad input, before any job exists
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidGeometry
                | ErrorKind::AreaTooLarge
                | ErrorKind::MissingDateRange
                | ErrorKind::UnsupportedFactor
                | ErrorKind::FactorUnitMismatch
                | ErrorKind::ValidationError
        )
    }
}

pub type RusleResult<T> = Result<T, RusleError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Payload over the configured upload limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Domain error, status depends on kind
    #[error(transparent)]
    Domain(#[from] RusleError),

    /// rusle-common error
    #[error("Common error: {0}")]
    Common(#[from] rusle_common::Error),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND".to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST".to_string()),
            ApiError::PayloadTooLarge(_) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE".to_string())
            }
            ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR".to_string())
            }
            ApiError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR".to_string()),
            ApiError::Domain(err) => {
                let status = match err.kind() {
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::JobNotReady
                    | ErrorKind::ExportInProgress
                    | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
                    ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    ErrorKind::RemoteServiceError => StatusCode::BAD_GATEWAY,
                    ErrorKind::Cancelled => StatusCode::CONFLICT,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, err.kind().to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();
        let message = match &self {
            ApiError::Domain(err) => err.to_string(),
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::Common(err) => err.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
