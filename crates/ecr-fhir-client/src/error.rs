//! Error types for remote FHIR calls.

use std::fmt;

use serde::Serialize;

/// Idempotent operation being performed against the FHIR server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operation {
    Read,
    Search,
    LoadPage,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Search => write!(f, "search"),
            Operation::LoadPage => write!(f, "loadPage"),
        }
    }
}

/// A remote failure that carried an HTTP status code.
///
/// Whether it is actually retried is decided by the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed with HTTP {status}: {message}")]
pub struct RetryableError {
    pub status: u16,
    pub operation: Operation,
    pub message: String,
}

impl RetryableError {
    pub fn new(status: u16, operation: Operation, message: impl Into<String>) -> Self {
        Self {
            status,
            operation,
            message: message.into(),
        }
    }
}

/// Errors produced by the FHIR client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Remote failure with a status code.
    #[error(transparent)]
    Retryable(#[from] RetryableError),

    /// Connection-level failure with no status code.
    #[error("{operation} transport failure: {message}")]
    Transport { operation: Operation, message: String },

    /// The response body was not valid JSON.
    #[error("Failed to decode {operation} response: {message}")]
    Decode { operation: Operation, message: String },

    /// The request could not be built (bad URL, bad resource type).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Every attempt allowed by the retry policy failed.
    #[error("{operation} gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: Operation,
        attempts: u32,
        #[source]
        last_error: Box<ClientError>,
    },
}

impl ClientError {
    pub fn transport(operation: Operation, message: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
        }
    }

    pub fn decode(operation: Operation, message: impl Into<String>) -> Self {
        Self::Decode {
            operation,
            message: message.into(),
        }
    }

    /// HTTP status behind this error, looking through exhaustion.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Retryable(e) => Some(e.status),
            Self::RetriesExhausted { last_error, .. } => last_error.status_code(),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

/// Convenience result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_error_display() {
        let err = RetryableError::new(503, Operation::Search, "Service Unavailable");
        assert_eq!(err.to_string(), "search failed with HTTP 503: Service Unavailable");
    }

    #[test]
    fn test_status_code_through_exhaustion() {
        let err = ClientError::RetriesExhausted {
            operation: Operation::Read,
            attempts: 3,
            last_error: Box::new(RetryableError::new(502, Operation::Read, "bad gateway").into()),
        };
        assert_eq!(err.status_code(), Some(502));
        assert!(err.is_exhausted());
        assert_eq!(ClientError::transport(Operation::Read, "reset").status_code(), None);
    }
}
