//! Per-session execution state.
//!
//! [`PatientExecutionState`] is the single source of truth for pipeline
//! progress. Each stage owns its status object; pollers read clones of the
//! whole record.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::action::ActionKind;
use crate::job::{JobStatus, StageStatus, aggregate_status};
use crate::trigger::MatchTriggerStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientExecutionState {
    pub session_id: String,
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_id: Option<String>,

    /// Set once the encounter-close event arrives.
    #[serde(default)]
    pub encounter_closed: bool,

    pub match_trigger_status: MatchTriggerStatus,
    pub create_eicr_status: StageStatus,
    #[serde(default)]
    pub periodic_update_status: Vec<StageStatus>,
    /// Aggregate status of the periodic-update timer.
    #[serde(default)]
    pub periodic_update_job_status: JobStatus,
    pub close_out_eicr_status: StageStatus,
    #[serde(default)]
    pub validate_eicr_status: Vec<StageStatus>,
    #[serde(default)]
    pub submit_eicr_status: Vec<StageStatus>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PatientExecutionState {
    pub fn new(
        session_id: impl Into<String>,
        patient_id: impl Into<String>,
        encounter_id: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            patient_id: patient_id.into(),
            encounter_id,
            encounter_closed: false,
            match_trigger_status: MatchTriggerStatus::new(ActionKind::MatchTrigger.default_id()),
            create_eicr_status: StageStatus::new(ActionKind::CreateEicr.default_id()),
            periodic_update_status: Vec::new(),
            periodic_update_job_status: JobStatus::NotStarted,
            close_out_eicr_status: StageStatus::new(ActionKind::CloseOutEicr.default_id()),
            validate_eicr_status: Vec::new(),
            submit_eicr_status: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Job status of a stage; repeatable stages are aggregated.
    ///
    /// Validation and submission run once per document, so their aggregate
    /// is not monotonic: a stage that reads COMPLETED or FAILED goes back to
    /// IN_PROGRESS while a newly generated document is being handled. The
    /// per-document entries in `validate_eicr_status` and
    /// `submit_eicr_status` only ever move forward.
    pub fn stage_job_status(&self, kind: ActionKind) -> JobStatus {
        match kind {
            ActionKind::MatchTrigger => self.match_trigger_status.job_status(),
            ActionKind::CreateEicr => self.create_eicr_status.job_status,
            ActionKind::PeriodicUpdateEicr => self.periodic_update_job_status,
            ActionKind::CloseOutEicr => self.close_out_eicr_status.job_status,
            ActionKind::ValidateEicr => aggregate_status(&self.validate_eicr_status),
            ActionKind::SubmitEicr => aggregate_status(&self.submit_eicr_status),
        }
    }

    /// Single-instance stage status for create and close-out.
    pub fn single_stage_mut(&mut self, kind: ActionKind) -> Option<&mut StageStatus> {
        match kind {
            ActionKind::MatchTrigger => Some(&mut self.match_trigger_status.stage),
            ActionKind::CreateEicr => Some(&mut self.create_eicr_status),
            ActionKind::CloseOutEicr => Some(&mut self.close_out_eicr_status),
            ActionKind::PeriodicUpdateEicr | ActionKind::ValidateEicr | ActionKind::SubmitEicr => {
                None
            }
        }
    }

    pub fn trigger_matched(&self) -> bool {
        self.match_trigger_status.job_status() == JobStatus::Completed
            && self.match_trigger_status.trigger_match_status
    }

    /// Report documents produced so far, in creation order.
    pub fn generated_documents(&self) -> Vec<&str> {
        std::iter::once(&self.create_eicr_status)
            .chain(self.periodic_update_status.iter())
            .chain(std::iter::once(&self.close_out_eicr_status))
            .filter(|s| s.job_status == JobStatus::Completed)
            .filter_map(|s| s.eicr_id.as_deref())
            .collect()
    }

    /// Generated documents with no validation entry yet.
    pub fn documents_awaiting_validation(&self) -> Vec<String> {
        self.generated_documents()
            .into_iter()
            .filter(|id| !has_entry(&self.validate_eicr_status, id))
            .map(str::to_string)
            .collect()
    }

    /// Successfully validated documents with no submission entry yet.
    pub fn documents_awaiting_submission(&self) -> Vec<String> {
        self.validate_eicr_status
            .iter()
            .filter(|s| s.job_status == JobStatus::Completed)
            .filter_map(|s| s.eicr_id.as_deref())
            .filter(|id| !has_entry(&self.submit_eicr_status, id))
            .map(str::to_string)
            .collect()
    }

    /// Stage name and status pairs, for display and polling.
    ///
    /// A point-in-time view; see [`Self::stage_job_status`] for how the
    /// per-document stages are rolled up.
    pub fn summary(&self) -> Vec<(&'static str, JobStatus)> {
        ActionKind::ALL
            .iter()
            .map(|kind| (kind.stage_name(), self.stage_job_status(*kind)))
            .collect()
    }

    /// True when no stage is running and no document is waiting for a stage.
    pub fn is_settled(&self) -> bool {
        ActionKind::ALL
            .iter()
            .all(|kind| self.stage_job_status(*kind) != JobStatus::InProgress)
            && self.documents_awaiting_validation().is_empty()
            && self.documents_awaiting_submission().is_empty()
    }
}

fn has_entry(statuses: &[StageStatus], eicr_id: &str) -> bool {
    statuses.iter().any(|s| s.eicr_id.as_deref() == Some(eicr_id))
}
