//! Bounded retry around idempotent remote calls.

use std::future::Future;

use crate::error::{ClientError, Operation, Result};
use crate::policy::RetryPolicy;
use crate::tracker::RequestTracker;

/// Result of a retried call.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success(T),
    /// Failed with an error the policy does not retry.
    Failed(ClientError),
    /// Every allowed attempt failed.
    Exhausted { attempts: u32, last_error: ClientError },
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RetryOutcome<U> {
        match self {
            RetryOutcome::Success(v) => RetryOutcome::Success(f(v)),
            RetryOutcome::Failed(e) => RetryOutcome::Failed(e),
            RetryOutcome::Exhausted { attempts, last_error } => {
                RetryOutcome::Exhausted { attempts, last_error }
            }
        }
    }

    /// Converts to a `Result`, turning exhaustion into
    /// [`ClientError::RetriesExhausted`].
    pub fn into_result(self, operation: Operation) -> Result<T> {
        match self {
            RetryOutcome::Success(v) => Ok(v),
            RetryOutcome::Failed(e) => Err(e),
            RetryOutcome::Exhausted { attempts, last_error } => Err(ClientError::RetriesExhausted {
                operation,
                attempts,
                last_error: Box::new(last_error),
            }),
        }
    }
}

/// Runs `call` until it succeeds, fails with a non-retryable error or the
/// policy runs out of attempts. `call` receives the 1-based attempt number.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    tracker: &RequestTracker,
    operation: Operation,
    mut call: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        tracker.record_attempt();

        let error = match call(attempt).await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(e) => e,
        };

        if !policy.should_retry(&error) {
            tracing::debug!(
                %operation,
                attempt,
                error = %error,
                "Remote call failed with non-retryable error"
            );
            return RetryOutcome::Failed(error);
        }

        if attempt >= max_attempts {
            tracing::warn!(
                %operation,
                attempts = attempt,
                request_id = %tracker.request_id(),
                error = %error,
                "Remote call exhausted retries"
            );
            return RetryOutcome::Exhausted {
                attempts: attempt,
                last_error: error,
            };
        }

        let delay = policy.backoff_for(attempt);
        tracing::info!(
            %operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying remote call"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetryableError;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn run(policy: &RetryPolicy, fail_first: u32, status: u16) -> (RetryOutcome<u32>, u32) {
        let calls = AtomicU32::new(0);
        let tracker = RequestTracker::new();
        let outcome = execute_with_retry(policy, &tracker, Operation::Read, |attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= fail_first {
                    Err(RetryableError::new(status, Operation::Read, "boom").into())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        (outcome, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let policy = RetryPolicy::immediate(4);
        for k in 0..4 {
            let (outcome, calls) = run(&policy, k, 503).await;
            assert!(outcome.is_success(), "k = {k}");
            assert_eq!(calls, k + 1);
        }
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_attempts() {
        let policy = RetryPolicy::immediate(3);
        let (outcome, calls) = run(&policy, u32::MAX, 500).await;
        assert_eq!(calls, 3);
        match outcome {
            RetryOutcome::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.status_code(), Some(500));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_immediately() {
        let policy = RetryPolicy::immediate(5);
        let (outcome, calls) = run(&policy, u32::MAX, 404).await;
        assert_eq!(calls, 1);
        assert!(matches!(outcome, RetryOutcome::Failed(e) if e.status_code() == Some(404)));
    }

    #[tokio::test]
    async fn test_into_result_reports_exhaustion() {
        let policy = RetryPolicy::immediate(2);
        let (outcome, _) = run(&policy, u32::MAX, 429).await;
        let err = outcome.into_result(Operation::Search).unwrap_err();
        assert!(matches!(
            err,
            ClientError::RetriesExhausted { operation: Operation::Search, attempts: 2, .. }
        ));
    }
}
