//! Credential error types.

/// Errors raised while scheduling or performing credential refresh.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token lifetime is too short for a minute-based recurrence.
    #[error("Token expiry of {expires_in}s is shorter than one minute")]
    InvalidInterval { expires_in: u64 },

    /// The token endpoint answered with an error status.
    #[error("Token endpoint returned HTTP {status}: {message}")]
    TokenEndpoint { status: u16, message: String },

    /// The token endpoint could not be reached.
    #[error("Token request failed: {0}")]
    Transport(String),

    /// The token response lacked required fields.
    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    /// The session record is missing required data for its grant.
    #[error("Invalid session {session_id}: {message}")]
    InvalidSession { session_id: String, message: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthError {
    pub fn invalid_session(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSession {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    pub fn invalid_token_response(message: impl Into<String>) -> Self {
        Self::InvalidTokenResponse(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Errors that the next scheduled firing may not hit again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::TokenEndpoint { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Result type for credential operations.
pub type AuthResult<T> = Result<T, AuthError>;
