//! Soil-loss job state machine
//!
//! PENDING → RUNNING → COMPLETED | FAILED, or PENDING → CANCELLED.
//! Artifacts exist only inside the `Completed` variant, so a job can never
//! expose partial results.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusle_common::events::JobState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, RusleError, RusleResult};
use crate::models::aoi::AreaOfInterest;
use crate::models::date_range::DateRange;
use crate::models::factor::{DemSource, Factor, FactorSpec};

/// Map tile endpoint for one rendered layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileReference {
    /// XYZ template, e.g. `https://host/tiles/{z}/{x}/{y}`
    pub url_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_id: Option<String>,
}

impl TileReference {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            map_id: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.url_template.trim().is_empty()
    }
}

/// Zonal statistics of soil loss over the AOI (t/ha/yr)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoilLossStatistics {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

/// Everything a completed job produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArtifacts {
    composite_tile: TileReference,
    factor_tiles: BTreeMap<Factor, TileReference>,
    statistics: SoilLossStatistics,
    grid_scale_m: f64,
    /// Remote handle of the evaluated soil-loss expression, reused by exports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expression_id: Option<String>,
}

impl JobArtifacts {
    /// Requires a non-empty tile for the composite and each of the five factors
    pub fn new(
        composite_tile: TileReference,
        factor_tiles: BTreeMap<Factor, TileReference>,
        statistics: SoilLossStatistics,
        grid_scale_m: f64,
    ) -> RusleResult<Self> {
        if composite_tile.is_empty() {
            return Err(RusleError::RemoteService(
                "compute service returned an empty composite tile reference".to_string(),
            ));
        }
        for factor in Factor::ALL {
            match factor_tiles.get(&factor) {
                Some(tile) if !tile.is_empty() => {}
                _ => {
                    return Err(RusleError::RemoteService(format!(
                        "missing tile reference for factor {}",
                        factor
                    )))
                }
            }
        }

        Ok(Self {
            composite_tile,
            factor_tiles,
            statistics,
            grid_scale_m,
            expression_id: None,
        })
    }

    pub fn with_expression_id(mut self, expression_id: impl Into<String>) -> Self {
        self.expression_id = Some(expression_id.into());
        self
    }

    pub fn composite_tile(&self) -> &TileReference {
        &self.composite_tile
    }

    pub fn factor_tiles(&self) -> &BTreeMap<Factor, TileReference> {
        &self.factor_tiles
    }

    pub fn factor_tile(&self, factor: Factor) -> Option<&TileReference> {
        self.factor_tiles.get(&factor)
    }

    pub fn statistics(&self) -> SoilLossStatistics {
        self.statistics
    }

    pub fn grid_scale_m(&self) -> f64 {
        self.grid_scale_m
    }

    pub fn expression_id(&self) -> Option<&str> {
        self.expression_id.as_deref()
    }
}

/// Error recorded on a failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&RusleError> for JobFailure {
    fn from(err: &RusleError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Job status with per-state data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        artifacts: JobArtifacts,
    },
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
        failed_at: DateTime<Utc>,
        error: JobFailure,
    },
    Cancelled {
        cancelled_at: DateTime<Utc>,
    },
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            JobStatus::Pending => JobState::Pending,
            JobStatus::Running { .. } => JobState::Running,
            JobStatus::Completed { .. } => JobState::Completed,
            JobStatus::Failed { .. } => JobState::Failed,
            JobStatus::Cancelled { .. } => JobState::Cancelled,
        }
    }

    pub fn artifacts(&self) -> Option<&JobArtifacts> {
        match self {
            JobStatus::Completed { artifacts, .. } => Some(artifacts),
            _ => None,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Running { started_at } | JobStatus::Completed { started_at, .. } => {
                Some(*started_at)
            }
            JobStatus::Failed { started_at, .. } => *started_at,
            JobStatus::Pending | JobStatus::Cancelled { .. } => None,
        }
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Completed { completed_at, .. } => Some(*completed_at),
            JobStatus::Failed { failed_at, .. } => Some(*failed_at),
            JobStatus::Cancelled { cancelled_at } => Some(*cancelled_at),
            JobStatus::Pending | JobStatus::Running { .. } => None,
        }
    }
}

/// Observed state change, used for event emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub job_id: Uuid,
    pub old_state: JobState,
    pub new_state: JobState,
}

/// One soil-loss estimation request and its lifecycle
#[derive(Debug, Clone)]
pub struct SoilLossJob {
    pub job_id: Uuid,
    pub aoi: Arc<AreaOfInterest>,
    pub date_range: Option<DateRange>,
    /// Scale the client asked for (meters)
    pub requested_scale_m: u32,
    /// Scale actually used for statistics and exports
    pub export_scale_m: u32,
    pub scale_adjusted: bool,
    pub dem_source: DemSource,
    /// One spec per factor in R, K, LS, C, P order
    pub factors: Vec<FactorSpec>,
    status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SoilLossJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: Uuid,
        aoi: Arc<AreaOfInterest>,
        date_range: Option<DateRange>,
        requested_scale_m: u32,
        export_scale_m: u32,
        dem_source: DemSource,
        factors: Vec<FactorSpec>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            aoi,
            date_range,
            requested_scale_m,
            export_scale_m,
            scale_adjusted: export_scale_m != requested_scale_m,
            dem_source,
            factors,
            status: JobStatus::Pending,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }

    pub fn factor_spec(&self, factor: Factor) -> Option<&FactorSpec> {
        self.factors.iter().find(|spec| spec.factor == factor)
    }

    /// Replace the status if the move is a permitted forward transition
    fn transition(&mut self, next: JobStatus, at: DateTime<Utc>) -> RusleResult<StateTransition> {
        let old_state = self.status.state();
        let new_state = next.state();
        if !old_state.can_transition_to(new_state) {
            return Err(RusleError::InvalidTransition {
                job_id: self.job_id,
                from: old_state,
                to: new_state,
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(StateTransition {
            job_id: self.job_id,
            old_state,
            new_state,
        })
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> RusleResult<StateTransition> {
        self.transition(JobStatus::Running { started_at: at }, at)
    }

    pub fn complete(
        &mut self,
        artifacts: JobArtifacts,
        at: DateTime<Utc>,
    ) -> RusleResult<StateTransition> {
        let started_at = self.status.started_at().unwrap_or(at);
        self.transition(
            JobStatus::Completed {
                started_at,
                completed_at: at,
                artifacts,
            },
            at,
        )
    }

    pub fn fail(&mut self, error: JobFailure, at: DateTime<Utc>) -> RusleResult<StateTransition> {
        let started_at = self.status.started_at();
        self.transition(
            JobStatus::Failed {
                started_at,
                failed_at: at,
                error,
            },
            at,
        )
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) -> RusleResult<StateTransition> {
        self.transition(JobStatus::Cancelled { cancelled_at: at }, at)
    }
}
