//! Job status state machine for pipeline stages.
//!
//! Every stage of the reporting pipeline carries a [`JobStatus`] that only
//! moves forward:
//!
//! ```text
//! NOT_STARTED ──► IN_PROGRESS ──► COMPLETED
//!      │                └───────► FAILED
//!      └──────────────────────────► FAILED / COMPLETED
//! ```
//!
//! `COMPLETED` and `FAILED` are terminal. Attempts to move backwards or out of
//! a terminal state are rejected with [`CoreError::InvalidStatusTransition`].

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{CoreError, Result};

/// Lifecycle marker for one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position in the lifecycle order. Terminal states share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::NotStarted => 0,
            JobStatus::InProgress => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Returns true when moving to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }

    /// Validates a transition and returns the new status.
    pub fn transition(self, next: JobStatus) -> Result<JobStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::invalid_transition(self, next))
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::NotStarted => write!(f, "NOT_STARTED"),
            JobStatus::InProgress => write!(f, "IN_PROGRESS"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Status object for one stage execution (create, close-out, one periodic
/// update, one validation, one submission).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    /// Action that owns this stage.
    pub action_id: String,

    pub job_status: JobStatus,

    /// Report document produced or consumed by this stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eicr_id: Option<String>,

    /// Reason recorded when the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    #[serde(with = "time::serde::rfc3339::option", default)]
    pub updated_at: Option<OffsetDateTime>,
}

impl StageStatus {
    pub fn new(action_id: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            job_status: JobStatus::NotStarted,
            eicr_id: None,
            failure: None,
            updated_at: None,
        }
    }

    /// Creates a status bound to an existing report document.
    pub fn for_document(action_id: impl Into<String>, eicr_id: impl Into<String>) -> Self {
        Self {
            eicr_id: Some(eicr_id.into()),
            ..Self::new(action_id)
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        self.job_status = self.job_status.transition(next)?;
        self.updated_at = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::InProgress)
    }

    /// Marks the stage completed, recording the produced document if any.
    pub fn complete(&mut self, eicr_id: Option<String>) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        if eicr_id.is_some() {
            self.eicr_id = eicr_id;
        }
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.failure = Some(reason.into());
        Ok(())
    }
}

/// Aggregates a list of repeatable stage statuses into one status.
///
/// Empty lists are `NOT_STARTED`; any running entry makes the aggregate
/// `IN_PROGRESS`; otherwise any failure makes it `FAILED`.
pub fn aggregate_status<'a>(statuses: impl IntoIterator<Item = &'a StageStatus>) -> JobStatus {
    let mut seen = false;
    let mut failed = false;
    for status in statuses {
        seen = true;
        match status.job_status {
            JobStatus::NotStarted | JobStatus::InProgress => return JobStatus::InProgress,
            JobStatus::Failed => failed = true,
            JobStatus::Completed => {}
        }
    }
    match (seen, failed) {
        (false, _) => JobStatus::NotStarted,
        (true, true) => JobStatus::Failed,
        (true, false) => JobStatus::Completed,
    }
}
