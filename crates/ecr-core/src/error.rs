use thiserror::Error;

use crate::job::JobStatus;

/// Core error types for case-reporting operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid job status transition from {from} to {to}")]
    InvalidStatusTransition { from: JobStatus, to: JobStatus },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Duplicate action id: {0}")]
    DuplicateAction(String),

    #[error("Actions {first} and {second} both have kind {kind}")]
    DuplicateActionKind {
        kind: String,
        first: String,
        second: String,
    },

    #[error("Action graph contains a dependency cycle involving: {0}")]
    CyclicDependency(String),

    #[error("Invalid timing schedule for action {action_id}: {message}")]
    InvalidSchedule { action_id: String, message: String },

    #[error("Execution state not found for session {0}")]
    StateNotFound(String),

    #[error("Invalid trigger catalog: {0}")]
    InvalidCatalog(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Create a new InvalidStatusTransition error
    pub fn invalid_transition(from: JobStatus, to: JobStatus) -> Self {
        Self::InvalidStatusTransition { from, to }
    }

    /// Create a new UnknownAction error
    pub fn unknown_action(action_id: impl Into<String>) -> Self {
        Self::UnknownAction(action_id.into())
    }

    /// Create a new InvalidSchedule error
    pub fn invalid_schedule(action_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            action_id: action_id.into(),
            message: message.into(),
        }
    }

    /// Create a new StateNotFound error
    pub fn state_not_found(session_id: impl Into<String>) -> Self {
        Self::StateNotFound(session_id.into())
    }

    /// Check if this error comes from static configuration (action graph or catalog)
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownAction(_)
                | Self::DuplicateAction(_)
                | Self::DuplicateActionKind { .. }
                | Self::CyclicDependency(_)
                | Self::InvalidSchedule { .. }
                | Self::InvalidCatalog(_)
        )
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
