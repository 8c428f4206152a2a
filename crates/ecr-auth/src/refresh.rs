//! Credential refresh.
//!
//! [`TokenRefresher`] performs one refresh for one session under that
//! session's lock. [`RefreshScheduler`] runs one background task per session
//! that calls the refresher on the session's [`RefreshInterval`] grid until
//! cancelled. A failed firing is logged and leaves the stored record as it
//! was; the next firing is the retry.

use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::error::{AuthError, AuthResult};
use crate::schedule::RefreshInterval;
use crate::session::AuthorizedSession;
use crate::storage::SessionStorage;
use crate::token::{TokenEndpoint, TokenRequest};

/// Refreshes session tokens and persists the result.
pub struct TokenRefresher<S> {
    storage: Arc<S>,
    endpoint: Arc<dyn TokenEndpoint>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: SessionStorage> TokenRefresher<S> {
    pub fn new(storage: Arc<S>, endpoint: impl TokenEndpoint + 'static) -> Self {
        Self {
            storage,
            endpoint: Arc::new(endpoint),
            locks: DashMap::new(),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Requests a new token for the session and stores it.
    ///
    /// The stored record is re-read under the session lock, so concurrent
    /// refreshes for one session are applied one after the other.
    pub async fn refresh(&self, session_id: &str) -> AuthResult<AuthorizedSession> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .storage
            .get(session_id)
            .await?
            .ok_or_else(|| AuthError::SessionNotFound(session_id.to_string()))?;

        tracing::trace!(session_id, client_id = %session.client_id, "Requesting access token");
        let request = TokenRequest::for_session(&session)?;
        let token = self.endpoint.request_token(&request).await?;

        session.apply_token(&token, OffsetDateTime::now_utc())?;
        self.storage.save(&session).await?;

        tracing::debug!(
            session_id,
            client_id = %session.client_id,
            expires_in = session.expires_in,
            "Access token refreshed"
        );
        Ok(session)
    }

    /// Drops the per-session lock once the session is gone.
    pub fn forget(&self, session_id: &str) {
        self.locks.remove(session_id);
    }

    /// Sessions that currently hold a refresh lock.
    pub fn tracked_sessions(&self) -> usize {
        self.locks.len()
    }
}

struct RefreshJob {
    interval: RefreshInterval,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Recurring refresh tasks, one per session.
pub struct RefreshScheduler<S> {
    refresher: Arc<TokenRefresher<S>>,
    jobs: DashMap<String, RefreshJob>,
}

impl<S: SessionStorage + 'static> RefreshScheduler<S> {
    pub fn new(refresher: Arc<TokenRefresher<S>>) -> Self {
        Self {
            refresher,
            jobs: DashMap::new(),
        }
    }

    pub fn refresher(&self) -> &Arc<TokenRefresher<S>> {
        &self.refresher
    }

    /// Starts (or restarts) the recurring refresh for a session.
    ///
    /// Rejects sessions whose token lifetime is under one minute.
    pub fn schedule(&self, session: &AuthorizedSession) -> AuthResult<RefreshInterval> {
        let interval = session.refresh_interval()?;
        self.cancel(&session.id);

        let (cancel, shutdown) = watch::channel(false);
        let handle = tokio::spawn(run_refresh_loop(
            Arc::clone(&self.refresher),
            session.id.clone(),
            interval,
            shutdown,
        ));

        tracing::info!(
            session_id = %session.id,
            client_id = %session.client_id,
            minutes = interval.minutes(),
            schedule = %interval,
            "Scheduled access token refresh"
        );
        self.jobs.insert(
            session.id.clone(),
            RefreshJob {
                interval,
                cancel,
                handle,
            },
        );
        Ok(interval)
    }

    /// Runs a refresh now, outside the recurrence.
    pub async fn trigger(&self, session_id: &str) -> AuthResult<AuthorizedSession> {
        self.refresher.refresh(session_id).await
    }

    pub fn is_scheduled(&self, session_id: &str) -> bool {
        self.jobs
            .get(session_id)
            .is_some_and(|job| !job.handle.is_finished())
    }

    pub fn interval(&self, session_id: &str) -> Option<RefreshInterval> {
        self.jobs.get(session_id).map(|job| job.interval)
    }

    /// Stops the recurring refresh for a session. Returns whether one was running.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.jobs.remove(session_id) {
            Some((_, job)) => {
                let _ = job.cancel.send(true);
                tracing::debug!(session_id, "Cancelled access token refresh");
                true
            }
            None => false,
        }
    }

    /// Ends credential management for a finished session: stops its
    /// refresh job, drops its lock and deletes the stored launch record.
    pub async fn retire(&self, session_id: &str) -> AuthResult<()> {
        let handle = self.jobs.remove(session_id).map(|(_, job)| {
            let _ = job.cancel.send(true);
            job.handle
        });
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.refresher.forget(session_id);
        self.refresher.storage().delete(session_id).await?;
        tracing::info!(session_id, "Session retired");
        Ok(())
    }

    /// Cancels every job and waits for the tasks to finish.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.jobs.iter().map(|j| j.key().clone()).collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, job)) = self.jobs.remove(&id) {
                let _ = job.cancel.send(true);
                handles.push(job.handle);
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("Refresh scheduler stopped");
    }
}

async fn run_refresh_loop<S: SessionStorage>(
    refresher: Arc<TokenRefresher<S>>,
    session_id: String,
    interval: RefreshInterval,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let wait = interval.duration_until_next(OffsetDateTime::now_utc());

        tokio::select! {
            biased;

            result = shutdown.changed() => {
                match result {
                    Ok(()) if *shutdown.borrow() => break,
                    Ok(()) => continue,
                    Err(_) => break,
                }
            }
            _ = tokio::time::sleep(wait) => {}
        }

        if let Err(e) = refresher.refresh(&session_id).await {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                transient = e.is_transient(),
                "Access token refresh failed; will retry at next firing"
            );
        }
    }
    tracing::debug!(session_id = %session_id, "Refresh loop exited");
}
