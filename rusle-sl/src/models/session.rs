//! Upload session (in-memory state)

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::aoi::AreaOfInterest;

/// Parsed upload waiting to be referenced by a processing request
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub session_id: Uuid,
    /// Original filename, if the client sent one
    pub filename: Option<String>,
    pub feature_count: usize,
    /// CRS named by the upload, before reprojection
    pub declared_crs: Option<String>,
    pub aoi: Arc<AreaOfInterest>,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl UploadSession {
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        rusle_common::time::is_expired(self.created_at, self.ttl, at)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.ttl).ok()?;
        self.created_at.checked_add_signed(ttl)
    }
}
