//! Per-client request bookkeeping.

use std::sync::atomic::{AtomicU32, Ordering};

/// Request id plus attempt and page counters for one client.
///
/// The id is sent as `X-Request-ID` on every call so server logs can be
/// correlated with the session that issued them.
#[derive(Debug)]
pub struct RequestTracker {
    request_id: String,
    attempt: AtomicU32,
    page: AtomicU32,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::with_request_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            attempt: AtomicU32::new(0),
            page: AtomicU32::new(0),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Starts a new logical call: attempts and pages go back to zero.
    pub fn reset(&self) {
        self.attempt.store(0, Ordering::SeqCst);
        self.page.store(0, Ordering::SeqCst);
    }

    /// Starts fetching the next page of a paged result.
    pub fn next_page(&self) -> u32 {
        self.attempt.store(0, Ordering::SeqCst);
        self.page.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_attempt(&self) -> u32 {
        self.attempt.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn page(&self) -> u32 {
        self.page.load(Ordering::SeqCst)
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}
