//! Event types and EventBus for the RUSLE services
//!
//! Job, export and upload-session changes are broadcast on the [`EventBus`] and
//! serialized for SSE transmission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Soil-loss job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Accepted, waiting for a worker
    Pending,
    /// Materialization in progress
    Running,
    /// All artifacts materialized
    Completed,
    /// Terminated with an error (including cancellation while running)
    Failed,
    /// Cancelled before it started running
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Allowed forward transitions. Everything else is a regression or a skip.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Export task state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ExportState {
    pub fn is_active(self) -> bool {
        matches!(self, ExportState::Queued | ExportState::Running)
    }

    fn rank(self) -> u8 {
        match self {
            ExportState::Queued => 0,
            ExportState::Running => 1,
            ExportState::Completed | ExportState::Failed => 2,
        }
    }

    /// Export states only move forward; terminal states are final
    pub fn can_advance_to(self, next: ExportState) -> bool {
        self.is_active() && next.rank() > self.rank()
    }
}

/// RUSLE event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RusleEvent {
    /// Job accepted and registered as PENDING
    JobSubmitted {
        job_id: Uuid,
        area_km2: f64,
        export_scale_m: u32,
        timestamp: DateTime<Utc>,
    },

    /// Job moved to a new lifecycle state
    JobStateChanged {
        job_id: Uuid,
        old_state: JobState,
        new_state: JobState,
        /// Failure message for FAILED transitions
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Export task advanced
    ExportStateChanged {
        export_id: Uuid,
        job_id: Uuid,
        state: ExportState,
        timestamp: DateTime<Utc>,
    },

    /// Upload parsed and stored as a session
    SessionCreated {
        session_id: Uuid,
        area_km2: f64,
        timestamp: DateTime<Utc>,
    },

    /// Session removed explicitly or by expiry
    SessionRemoved {
        session_id: Uuid,
        expired: bool,
        timestamp: DateTime<Utc>,
    },
}

impl RusleEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            RusleEvent::JobSubmitted { .. } => "JobSubmitted",
            RusleEvent::JobStateChanged { .. } => "JobStateChanged",
            RusleEvent::ExportStateChanged { .. } => "ExportStateChanged",
            RusleEvent::SessionCreated { .. } => "SessionCreated",
            RusleEvent::SessionRemoved { .. } => "SessionRemoved",
        }
    }
}

/// Central event distribution bus
///
/// Uses `tokio::broadcast` internally: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling producers.
///
/// # Examples
///
/// ```
/// use rusle_common::events::{EventBus, JobState, RusleEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(RusleEvent::JobStateChanged {
///     job_id: uuid::Uuid::new_v4(),
///     old_state: JobState::Pending,
///     new_state: JobState::Running,
///     detail: None,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RusleEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RusleEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: RusleEvent,
    ) -> Result<usize, broadcast::error::SendError<RusleEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: RusleEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
