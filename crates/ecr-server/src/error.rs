use ecr_auth::AuthError;
use ecr_core::CoreError;
use ecr_fhir_client::ClientError;

/// Errors raised by the reporting engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Clinical data request failed: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Report generation failed: {0}")]
    Generation(String),

    #[error("Report submission failed with HTTP {status}: {message}")]
    Submission { status: u16, message: String },

    #[error("Report submission transport error: {0}")]
    SubmissionTransport(String),

    #[error("Report document not found: {0}")]
    DocumentNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl EngineError {
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound(session_id.into())
    }

    /// Errors that end the current stage as FAILED and let the event finish.
    /// Any other error still fails the stage that was running, then aborts
    /// the event.
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            Self::Client(_)
                | Self::Auth(_)
                | Self::Generation(_)
                | Self::Submission { .. }
                | Self::SubmissionTransport(_)
                | Self::DocumentNotFound(_)
                | Self::SessionNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ecr_fhir_client::{Operation, RetryableError};

    #[test]
    fn test_client_errors_fail_the_stage() {
        let err: EngineError =
            ClientError::from(RetryableError::new(503, Operation::Search, "unavailable")).into();
        assert!(err.is_stage_failure());
        assert_eq!(
            err.to_string(),
            "Clinical data request failed: search failed with HTTP 503: unavailable"
        );
    }

    #[test]
    fn test_core_errors_abort() {
        let err: EngineError = CoreError::state_not_found("s-1").into();
        assert!(!err.is_stage_failure());
    }

    #[test]
    fn test_missing_launch_record_fails_the_stage() {
        assert!(EngineError::session_not_found("s-1").is_stage_failure());
    }
}
