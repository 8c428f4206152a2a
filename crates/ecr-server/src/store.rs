//! Patient execution state storage.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ecr_core::{CoreError, PatientExecutionState};

use crate::error::{EngineError, Result};

/// Mutation applied to one execution state record.
pub type StateMutation<'a> =
    &'a mut (dyn FnMut(&mut PatientExecutionState) -> ecr_core::Result<()> + Send);

/// Storage for execution state records.
///
/// `update` is atomic per record: the mutation runs against a copy that
/// replaces the stored record only if the mutation succeeds, so readers see
/// either the old or the new record.
#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    /// Inserts a record unless one exists. Returns whether it was inserted.
    async fn insert(&self, state: PatientExecutionState) -> Result<bool>;

    async fn get(&self, session_id: &str) -> Result<Option<PatientExecutionState>>;

    async fn update(
        &self,
        session_id: &str,
        mutation: StateMutation<'_>,
    ) -> Result<PatientExecutionState>;

    async fn remove(&self, session_id: &str) -> Result<Option<PatientExecutionState>>;

    async fn list(&self) -> Result<Vec<PatientExecutionState>>;
}

/// In-memory [`ExecutionStateStore`].
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: DashMap<String, PatientExecutionState>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStateStore for InMemoryStateStore {
    async fn insert(&self, state: PatientExecutionState) -> Result<bool> {
        match self.states.entry(state.session_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(state);
                Ok(true)
            }
        }
    }

    async fn get(&self, session_id: &str) -> Result<Option<PatientExecutionState>> {
        Ok(self.states.get(session_id).map(|s| s.value().clone()))
    }

    async fn update(
        &self,
        session_id: &str,
        mutation: StateMutation<'_>,
    ) -> Result<PatientExecutionState> {
        let mut entry = self
            .states
            .get_mut(session_id)
            .ok_or_else(|| EngineError::from(CoreError::state_not_found(session_id)))?;
        let mut next = entry.value().clone();
        mutation(&mut next)?;
        *entry.value_mut() = next.clone();
        Ok(next)
    }

    async fn remove(&self, session_id: &str) -> Result<Option<PatientExecutionState>> {
        Ok(self.states.remove(session_id).map(|(_, s)| s))
    }

    async fn list(&self) -> Result<Vec<PatientExecutionState>> {
        Ok(self.states.iter().map(|s| s.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecr_core::JobStatus;

    #[tokio::test]
    async fn test_insert_is_first_writer_wins() {
        let store = InMemoryStateStore::new();
        assert!(store.insert(PatientExecutionState::new("s-1", "p-1", None)).await.unwrap());
        assert!(!store.insert(PatientExecutionState::new("s-1", "p-2", None)).await.unwrap());
        assert_eq!(store.get("s-1").await.unwrap().unwrap().patient_id, "p-1");
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_record_unchanged() {
        let store = InMemoryStateStore::new();
        store.insert(PatientExecutionState::new("s-1", "p-1", None)).await.unwrap();

        let err = store
            .update("s-1", &mut |s| {
                s.encounter_closed = true;
                s.create_eicr_status.complete(None)?;
                s.create_eicr_status.start()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::InvalidStatusTransition { .. })));

        let stored = store.get("s-1").await.unwrap().unwrap();
        assert!(!stored.encounter_closed);
        assert_eq!(stored.create_eicr_status.job_status, JobStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let store = InMemoryStateStore::new();
        let err = store.update("nope", &mut |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::StateNotFound(_))));
    }
}
