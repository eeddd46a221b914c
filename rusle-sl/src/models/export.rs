//! Export task tracking

use chrono::{DateTime, Utc};
use rusle_common::events::ExportState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pollable handle for a remote export of a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub export_id: Uuid,
    pub job_id: Uuid,
    /// Destination folder on the compute service side
    pub destination: String,
    pub description: String,
    /// Remote task id once the export was accepted
    pub task_id: Option<String>,
    pub state: ExportState,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExportRequest {
    pub fn new(job_id: Uuid, destination: String, description: String, at: DateTime<Utc>) -> Self {
        Self {
            export_id: Uuid::new_v4(),
            job_id,
            destination,
            description,
            task_id: None,
            state: ExportState::Queued,
            error: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Move forward to `next`. Returns false (and changes nothing) for
    /// regressions, repeats and updates after a terminal state.
    pub fn advance(&mut self, next: ExportState, error: Option<String>, at: DateTime<Utc>) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        if next == ExportState::Failed {
            self.error = error;
        }
        self.updated_at = at;
        true
    }
}
