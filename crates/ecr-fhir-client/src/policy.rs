//! Retry policy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Bounded exponential-backoff policy for idempotent reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    pub backoff_multiplier: f64,

    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Status codes worth another attempt.
    pub retry_on_status: Vec<u16>,

    /// Retry connection failures that carry no status code.
    pub retry_on_transport: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
            retry_on_status: vec![408, 425, 429, 500, 502, 503, 504],
            retry_on_transport: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately, mostly useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".into());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("retry.backoff_multiplier must be a finite number >= 1.0".into());
        }
        if self.max_backoff < self.initial_backoff {
            return Err("retry.max_backoff must not be shorter than retry.initial_backoff".into());
        }
        Ok(())
    }

    /// Delay before the attempt that follows attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn should_retry(&self, error: &ClientError) -> bool {
        match error {
            ClientError::Retryable(e) => self.retry_on_status.contains(&e.status),
            ClientError::Transport { .. } => self.retry_on_transport,
            ClientError::Decode { .. }
            | ClientError::InvalidRequest(_)
            | ClientError::RetriesExhausted { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Operation, RetryableError};

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_should_retry_by_status() {
        let policy = RetryPolicy::default();
        let unavailable = RetryableError::new(503, Operation::Read, "unavailable").into();
        let not_found = RetryableError::new(404, Operation::Read, "not found").into();
        assert!(policy.should_retry(&unavailable));
        assert!(!policy.should_retry(&not_found));
        assert!(policy.should_retry(&ClientError::transport(Operation::Read, "reset")));
        assert!(!policy.should_retry(&ClientError::decode(Operation::Read, "eof")));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        assert!(RetryPolicy::immediate(0).validate().is_err());
        assert!(RetryPolicy::immediate(1).validate().is_ok());
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_deserializes_humantime_durations() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"max_attempts": 5, "initial_backoff": "50ms", "max_backoff": "2s"}"#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
        assert_eq!(policy.max_backoff, Duration::from_secs(2));
        assert_eq!(policy.retry_on_status, RetryPolicy::default().retry_on_status);
    }
}
