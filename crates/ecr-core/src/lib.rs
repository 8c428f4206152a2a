pub mod action;
pub mod clinical;
pub mod error;
pub mod job;
pub mod matcher;
pub mod state;
pub mod trigger;

pub use action::{
    Action, ActionData, ActionGraph, ActionKind, Condition, EvaluationContext, RelatedAction,
    TemporalRelation, TimingSchedule,
};
pub use clinical::ClinicalData;
pub use error::{CoreError, Result};
pub use job::{JobStatus, StageStatus, aggregate_status};
pub use matcher::{TriggerCatalog, TriggerMatcher, TriggerRule};
pub use state::PatientExecutionState;
pub use trigger::{MatchTriggerStatus, MatchedTriggerCodes};

/// Generates a new document or session identifier.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
