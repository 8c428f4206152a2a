//! Event-driven reporting engine.
//!
//! Each inbound [`EcrEvent`] updates the session's execution state and then
//! advances the pipeline: eligible actions run one at a time, in dependency
//! order, until none is eligible. All work for one session happens under that
//! session's lock, including periodic-update firings, so stage transitions for
//! a session never interleave.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use ecr_core::{
    Action, ActionKind, CoreError, EvaluationContext, JobStatus, PatientExecutionState,
    StageStatus, TimingSchedule,
};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::event::{EcrEvent, EventKind};
use crate::reports::{EicrDocument, ReportKind};

/// Upper bound on actions executed while handling one event.
const MAX_STEPS_PER_EVENT: usize = 64;

/// Session id, action id and schedule index.
type TimerKey = (String, String, usize);

struct PeriodicTimer {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct EcrEngine {
    ctx: EngineContext,
    documents: DashMap<String, EicrDocument>,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
    timers: DashMap<TimerKey, PeriodicTimer>,
    this: Weak<EcrEngine>,
}

impl EcrEngine {
    pub fn new(ctx: EngineContext) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            ctx,
            documents: DashMap::new(),
            session_locks: DashMap::new(),
            timers: DashMap::new(),
            this: this.clone(),
        })
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Handles an event on a background task.
    pub fn submit_event(self: &Arc<Self>, event: EcrEvent) -> JoinHandle<Result<PatientExecutionState>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.process_event(event).await })
    }

    /// Handles an event and returns the session state once the pipeline has
    /// no more eligible actions.
    pub async fn process_event(&self, event: EcrEvent) -> Result<PatientExecutionState> {
        tracing::info!(session_id = %event.session_id, event = event.name(), "Processing event");
        let session_id = event.session_id;

        match event.kind {
            EventKind::EncounterStart {
                patient_id,
                encounter_id,
            } => {
                let state = PatientExecutionState::new(&session_id, patient_id, encounter_id);
                if !self.ctx.store.insert(state).await? {
                    tracing::debug!(session_id = %session_id, "Execution state already exists");
                }
                self.advance(&session_id).await
            }
            EventKind::EncounterClose => {
                self.cancel_timers(&session_id, None);
                let state = {
                    let lock = self.lock_for(&session_id);
                    let _guard = lock.lock().await;
                    self.update(&session_id, |s| {
                        s.encounter_closed = true;
                        finish_periodic(s)
                    })
                    .await?;
                    self.advance_locked(&session_id).await?
                };
                if state.is_settled() {
                    self.release(&session_id).await;
                }
                Ok(state)
            }
            EventKind::DataChanged => self.advance(&session_id).await,
        }
    }

    pub async fn get_execution_state(&self, session_id: &str) -> Result<Option<PatientExecutionState>> {
        self.ctx.store.get(session_id).await
    }

    pub fn document(&self, eicr_id: &str) -> Option<EicrDocument> {
        self.documents.get(eicr_id).map(|d| d.value().clone())
    }

    pub fn has_periodic_timer(&self, session_id: &str) -> bool {
        self.timers
            .iter()
            .any(|t| t.key().0 == session_id && !t.value().handle.is_finished())
    }

    /// Sessions holding engine resources. A session is dropped from this set
    /// once its encounter is closed and every stage has settled.
    pub fn active_sessions(&self) -> usize {
        self.session_locks.len()
    }

    /// Stops every periodic timer and waits for the tasks to end.
    pub async fn shutdown(&self) {
        let keys: Vec<TimerKey> = self.timers.iter().map(|t| t.key().clone()).collect();
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, timer)) = self.timers.remove(&key) {
                let _ = timer.cancel.send(true);
                handles.push(timer.handle);
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("Reporting engine stopped");
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the session lock and the loader's cached client. The lock
    /// stays while another task still holds it.
    async fn release(&self, session_id: &str) {
        self.session_locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
        self.ctx.loader.release(session_id).await;
        tracing::debug!(session_id, "Session resources released");
    }

    /// Cancels the session's timers, or only those of one action.
    fn cancel_timers(&self, session_id: &str, action_id: Option<&str>) {
        let keys: Vec<TimerKey> = self
            .timers
            .iter()
            .filter(|t| t.key().0 == session_id && action_id.is_none_or(|id| t.key().1 == id))
            .map(|t| t.key().clone())
            .collect();
        for key in keys {
            if let Some((_, timer)) = self.timers.remove(&key) {
                let _ = timer.cancel.send(true);
                tracing::debug!(session_id, action = %key.1, "Cancelled periodic timer");
            }
        }
    }

    async fn update<F>(&self, session_id: &str, mut mutation: F) -> Result<PatientExecutionState>
    where
        F: FnMut(&mut PatientExecutionState) -> ecr_core::Result<()> + Send,
    {
        self.ctx.store.update(session_id, &mut mutation).await
    }

    async fn require_state(&self, session_id: &str) -> Result<PatientExecutionState> {
        self.ctx
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| CoreError::state_not_found(session_id).into())
    }

    async fn advance(&self, session_id: &str) -> Result<PatientExecutionState> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        self.advance_locked(session_id).await
    }

    /// Runs eligible actions until none is left. Caller holds the session lock.
    async fn advance_locked(&self, session_id: &str) -> Result<PatientExecutionState> {
        for _ in 0..MAX_STEPS_PER_EVENT {
            let state = self.require_state(session_id).await?;
            let next = EvaluationContext::new(&state, &self.ctx.graph)
                .eligible_actions()
                .first()
                .map(|a| (*a).clone());
            let Some(action) = next else {
                return Ok(state);
            };
            self.execute(&action, &state).await?;
        }
        tracing::warn!(session_id, "Action step limit reached; remaining work deferred");
        self.require_state(session_id).await
    }

    async fn execute(&self, action: &Action, state: &PatientExecutionState) -> Result<()> {
        tracing::debug!(
            session_id = %state.session_id,
            action = %action.id,
            kind = %action.kind,
            "Executing action"
        );
        match action.kind {
            ActionKind::MatchTrigger => self.run_match(action, state).await,
            ActionKind::CreateEicr => self.run_document_stage(action, state, ReportKind::Initial).await,
            ActionKind::CloseOutEicr => self.run_document_stage(action, state, ReportKind::CloseOut).await,
            ActionKind::PeriodicUpdateEicr => self.start_periodic(action, state).await,
            ActionKind::ValidateEicr => self.run_validation(action, state).await,
            ActionKind::SubmitEicr => self.run_submission(action, state).await,
        }
    }

    /// Marks the running stage FAILED. Errors that are not stage failures
    /// are returned after the stage is marked.
    async fn record_failure<F>(
        &self,
        session_id: &str,
        action: &Action,
        error: EngineError,
        mut mark: F,
    ) -> Result<()>
    where
        F: FnMut(&mut PatientExecutionState, String) -> ecr_core::Result<()> + Send,
    {
        let reason = error.to_string();
        tracing::error!(session_id, action = %action.id, error = %reason, "Action failed");
        self.update(session_id, |s| mark(s, reason.clone())).await?;
        if error.is_stage_failure() {
            Ok(())
        } else {
            Err(error)
        }
    }

    async fn run_match(&self, action: &Action, state: &PatientExecutionState) -> Result<()> {
        let session_id = state.session_id.as_str();
        self.update(session_id, |s| s.match_trigger_status.start()).await?;

        let data = match self.ctx.loader.load(state).await {
            Ok(data) => data,
            Err(e) => {
                return self
                    .record_failure(session_id, action, e, |s, reason| {
                        s.match_trigger_status.fail(reason)
                    })
                    .await;
            }
        };

        let matcher = Arc::clone(&self.ctx.matcher);
        let updated = self
            .update(session_id, |s| {
                matcher.evaluate(&data, &mut s.match_trigger_status);
                s.match_trigger_status.complete()
            })
            .await?;

        tracing::info!(
            session_id,
            matched = updated.match_trigger_status.trigger_match_status,
            codes = updated.match_trigger_status.all_codes().len(),
            resources = data.len(),
            "Trigger matching completed"
        );
        Ok(())
    }

    async fn produce_document(
        &self,
        state: &PatientExecutionState,
        kind: ReportKind,
    ) -> Result<String> {
        let data = self.ctx.loader.load(state).await?;
        let document = self.ctx.generator.generate(state, &data, kind).await?;
        let eicr_id = document.id.clone();
        self.documents.insert(eicr_id.clone(), document);
        Ok(eicr_id)
    }

    async fn run_document_stage(
        &self,
        action: &Action,
        state: &PatientExecutionState,
        report: ReportKind,
    ) -> Result<()> {
        let session_id = state.session_id.as_str();
        let kind = action.kind;
        self.update(session_id, |s| single_stage(s, kind)?.start()).await?;

        match self.produce_document(state, report).await {
            Ok(eicr_id) => {
                self.update(session_id, |s| single_stage(s, kind)?.complete(Some(eicr_id.clone())))
                    .await?;
                tracing::info!(session_id, action = %action.id, eicr_id = %eicr_id, "Report created");
                Ok(())
            }
            Err(e) => {
                self.record_failure(session_id, action, e, |s, reason| {
                    single_stage(s, kind)?.fail(reason)
                })
                .await
            }
        }
    }

    async fn start_periodic(&self, action: &Action, state: &PatientExecutionState) -> Result<()> {
        let session_id = state.session_id.as_str();
        self.update(session_id, |s| {
            s.periodic_update_job_status = s.periodic_update_job_status.transition(JobStatus::InProgress)?;
            Ok(())
        })
        .await?;

        if action.timing.is_empty() {
            let state = self.require_state(session_id).await?;
            self.run_periodic_update(action, &state).await?;
            self.update(session_id, finish_periodic).await?;
            return Ok(());
        }

        for (index, timing) in action.timing.iter().enumerate() {
            self.spawn_timer((session_id.to_string(), action.id.clone(), index), timing.clone());
            tracing::info!(
                session_id,
                action = %action.id,
                schedule = index,
                interval_secs = timing.interval.as_secs(),
                max_repetitions = ?timing.max_repetitions,
                "Periodic updates scheduled"
            );
        }
        Ok(())
    }

    fn spawn_timer(&self, key: TimerKey, timing: TimingSchedule) {
        let (cancel, mut shutdown) = watch::channel(false);
        let engine = self.this.clone();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let mut fired = 0u32;
            loop {
                tokio::select! {
                    biased;

                    result = shutdown.changed() => {
                        match result {
                            Ok(()) if *shutdown.borrow() => break,
                            Ok(()) => continue,
                            Err(_) => break,
                        }
                    }
                    _ = tokio::time::sleep(timing.interval) => {}
                }

                let Some(engine) = engine.upgrade() else {
                    break;
                };
                fired += 1;
                let last = timing.max_repetitions.is_some_and(|max| fired >= max);
                match engine.fire_timed(&task_key, last).await {
                    Ok(true) => {}
                    Ok(false) => {
                        engine.timers.remove(&task_key);
                        break;
                    }
                    Err(e) => {
                        tracing::error!(
                            session_id = %task_key.0,
                            action = %task_key.1,
                            error = %e,
                            "Periodic update stopped after error"
                        );
                        engine.timers.remove(&task_key);
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.timers.insert(key, PeriodicTimer { cancel, handle }) {
            let _ = previous.cancel.send(true);
        }
    }

    /// One timer firing. Returns whether the timer should keep running.
    async fn fire_timed(&self, key: &TimerKey, last: bool) -> Result<bool> {
        let (session_id, action_id) = (key.0.as_str(), key.1.as_str());
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let state = self.require_state(session_id).await?;
        let Some(action) = self.ctx.graph.get(action_id).cloned() else {
            return Ok(false);
        };

        let (stop, skip) = {
            let ctx = EvaluationContext::new(&state, &self.ctx.graph);
            (
                !action.preconditions_hold(&state) || action.relations_violated(&ctx),
                !action.relations_hold(&ctx),
            )
        };
        if stop {
            tracing::info!(session_id, action = %action.id, "Periodic update conditions no longer hold");
            self.cancel_timers(session_id, Some(action_id));
            self.update(session_id, finish_periodic).await?;
            return Ok(false);
        }
        if skip {
            tracing::debug!(session_id, action = %action.id, "Periodic firing skipped");
            if last {
                self.retire_timer(key).await?;
            }
            return Ok(!last);
        }

        self.run_periodic_update(&action, &state).await?;
        if last {
            self.retire_timer(key).await?;
        }
        self.advance_locked(session_id).await?;
        Ok(!last)
    }

    /// Drops a timer that used up its repetitions. The periodic stage ends
    /// with the action's last remaining timer.
    async fn retire_timer(&self, key: &TimerKey) -> Result<()> {
        self.timers.remove(key);
        let (session_id, action_id, _) = key;
        let others = self
            .timers
            .iter()
            .any(|t| t.key().0 == *session_id && t.key().1 == *action_id);
        if !others {
            self.update(session_id, finish_periodic).await?;
        }
        Ok(())
    }

    async fn run_periodic_update(&self, action: &Action, state: &PatientExecutionState) -> Result<()> {
        let session_id = state.session_id.as_str();
        let updated = self
            .update(session_id, |s| {
                let mut stage = StageStatus::new(action.id.as_str());
                stage.start()?;
                s.periodic_update_status.push(stage);
                Ok(())
            })
            .await?;
        let index = updated.periodic_update_status.len() - 1;

        match self.produce_document(&updated, ReportKind::PeriodicUpdate).await {
            Ok(eicr_id) => {
                self.update(session_id, |s| {
                    entry_at(&mut s.periodic_update_status, index, session_id)?
                        .complete(Some(eicr_id.clone()))
                })
                .await?;
                tracing::info!(session_id, eicr_id = %eicr_id, "Periodic update report created");
                Ok(())
            }
            Err(e) => {
                self.record_failure(session_id, action, e, |s, reason| {
                    entry_at(&mut s.periodic_update_status, index, session_id)?.fail(reason)
                })
                .await
            }
        }
    }

    async fn run_validation(&self, action: &Action, state: &PatientExecutionState) -> Result<()> {
        let session_id = state.session_id.as_str();
        for eicr_id in state.documents_awaiting_validation() {
            self.update(session_id, |s| {
                let mut stage = StageStatus::for_document(action.id.as_str(), eicr_id.as_str());
                stage.start()?;
                s.validate_eicr_status.push(stage);
                Ok(())
            })
            .await?;

            let document = self.document(&eicr_id);
            let outcome = match document {
                Some(doc) => self.ctx.validator.validate(&doc).await,
                None => Err(EngineError::DocumentNotFound(eicr_id.clone())),
            };

            match outcome {
                Ok(outcome) if outcome.is_valid() => {
                    self.update(session_id, |s| {
                        document_entry(&mut s.validate_eicr_status, &eicr_id)?.complete(None)
                    })
                    .await?;
                    tracing::info!(session_id, eicr_id = %eicr_id, "Report validated");
                }
                Ok(outcome) => {
                    let reason = outcome.issues.join("; ");
                    tracing::warn!(session_id, eicr_id = %eicr_id, issues = %reason, "Report failed validation");
                    self.update(session_id, |s| {
                        document_entry(&mut s.validate_eicr_status, &eicr_id)?.fail(reason.clone())
                    })
                    .await?;
                }
                Err(e) => {
                    self.record_failure(session_id, action, e, |s, reason| {
                        document_entry(&mut s.validate_eicr_status, &eicr_id)?.fail(reason)
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn run_submission(&self, action: &Action, state: &PatientExecutionState) -> Result<()> {
        let session_id = state.session_id.as_str();
        for eicr_id in state.documents_awaiting_submission() {
            self.update(session_id, |s| {
                let mut stage = StageStatus::for_document(action.id.as_str(), eicr_id.as_str());
                stage.start()?;
                s.submit_eicr_status.push(stage);
                Ok(())
            })
            .await?;

            let document = self.document(&eicr_id);
            let result = match document {
                Some(doc) => self.ctx.submitter.submit(&doc).await,
                None => Err(EngineError::DocumentNotFound(eicr_id.clone())),
            };

            match result {
                Ok(receipt) => {
                    self.update(session_id, |s| {
                        document_entry(&mut s.submit_eicr_status, &eicr_id)?.complete(None)
                    })
                    .await?;
                    tracing::info!(
                        session_id,
                        eicr_id = %eicr_id,
                        status = receipt.status,
                        receipt_id = ?receipt.receipt_id,
                        "Report submitted"
                    );
                }
                Err(e) => {
                    self.record_failure(session_id, action, e, |s, reason| {
                        document_entry(&mut s.submit_eicr_status, &eicr_id)?.fail(reason)
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }
}

/// Ends the periodic stage if it is running.
fn finish_periodic(state: &mut PatientExecutionState) -> ecr_core::Result<()> {
    if state.periodic_update_job_status == JobStatus::InProgress {
        state.periodic_update_job_status = state.periodic_update_job_status.transition(JobStatus::Completed)?;
    }
    Ok(())
}

fn single_stage(state: &mut PatientExecutionState, kind: ActionKind) -> ecr_core::Result<&mut StageStatus> {
    state
        .single_stage_mut(kind)
        .ok_or_else(|| CoreError::unknown_action(kind.default_id()))
}

fn entry_at<'a>(
    stages: &'a mut [StageStatus],
    index: usize,
    session_id: &str,
) -> ecr_core::Result<&'a mut StageStatus> {
    stages
        .get_mut(index)
        .ok_or_else(|| CoreError::state_not_found(session_id))
}

fn document_entry<'a>(stages: &'a mut [StageStatus], eicr_id: &str) -> ecr_core::Result<&'a mut StageStatus> {
    stages
        .iter_mut()
        .rev()
        .find(|s| s.eicr_id.as_deref() == Some(eicr_id))
        .ok_or_else(|| CoreError::state_not_found(eicr_id))
}
