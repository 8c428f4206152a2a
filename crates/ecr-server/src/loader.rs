//! Clinical data loading for a patient session.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ecr_auth::SessionStorage;
use ecr_core::{ClinicalData, PatientExecutionState};
use ecr_fhir_client::{
    HttpTransport, Operation, RetryPolicy, RetryableFhirClient, SearchCriteria, TokenProvider,
};

use crate::config::DataConfig;
use crate::error::{EngineError, Result};

#[async_trait]
pub trait ClinicalDataLoader: Send + Sync {
    /// Loads the patient, the encounter and every configured resource type.
    async fn load(&self, state: &PatientExecutionState) -> Result<ClinicalData>;

    /// Drops anything cached for a session that has finished.
    async fn release(&self, _session_id: &str) {}
}

/// Reads the current access token of a stored session on every attempt.
pub struct SessionTokenProvider<S> {
    storage: Arc<S>,
    session_id: String,
}

impl<S> SessionTokenProvider<S> {
    pub fn new(storage: Arc<S>, session_id: impl Into<String>) -> Self {
        Self {
            storage,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl<S: SessionStorage> TokenProvider for SessionTokenProvider<S> {
    async fn access_token(&self) -> Option<String> {
        match self.storage.get(&self.session_id).await {
            Ok(session) => session.and_then(|s| s.access_token),
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Failed to read session token");
                None
            }
        }
    }
}

type Client = RetryableFhirClient<HttpTransport>;

/// Loads data from the EHR server named in each session's launch record.
pub struct FhirDataLoader<S> {
    sessions: Arc<S>,
    policy: RetryPolicy,
    data: DataConfig,
    transport: HttpTransport,
    clients: DashMap<String, Arc<Client>>,
}

impl<S: SessionStorage + 'static> FhirDataLoader<S> {
    pub fn new(sessions: Arc<S>, policy: RetryPolicy, data: DataConfig) -> Result<Self> {
        let transport = HttpTransport::new(data.request_timeout)?;
        Ok(Self {
            sessions,
            policy,
            data,
            transport,
            clients: DashMap::new(),
        })
    }

    async fn client_for(&self, session_id: &str) -> Result<Arc<Client>> {
        if let Some(client) = self.clients.get(session_id) {
            return Ok(Arc::clone(client.value()));
        }
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| EngineError::session_not_found(session_id))?;
        let tokens = Arc::new(SessionTokenProvider::new(Arc::clone(&self.sessions), session_id));
        let client = Arc::new(RetryableFhirClient::new(
            self.transport.clone(),
            &session.ehr_server_url,
            self.policy.clone(),
            tokens,
        )?);
        self.clients
            .insert(session_id.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Sessions with a cached FHIR client.
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl<S: SessionStorage + 'static> ClinicalDataLoader for FhirDataLoader<S> {
    async fn load(&self, state: &PatientExecutionState) -> Result<ClinicalData> {
        let client = self.client_for(&state.session_id).await?;
        let mut data = ClinicalData::new();

        let patient = client
            .read("Patient", &state.patient_id)
            .await
            .into_result(Operation::Read)?;
        data.push(patient);

        if let Some(encounter_id) = &state.encounter_id {
            let encounter = client
                .read("Encounter", encounter_id)
                .await
                .into_result(Operation::Read)?;
            data.push(encounter);
        }

        for resource_type in &self.data.resource_types {
            let criteria = SearchCriteria::for_patient(resource_type.as_str(), &state.patient_id)
                .count(self.data.page_size);
            let pages = client.search_all(&criteria, self.data.max_pages).await?;
            for page in &pages {
                data.extend_from_bundle(page);
            }
        }

        tracing::debug!(
            session_id = %state.session_id,
            resources = data.len(),
            "Clinical data loaded"
        );
        Ok(data)
    }

    async fn release(&self, session_id: &str) {
        if self.clients.remove(session_id).is_some() {
            tracing::debug!(session_id, "Released FHIR client");
        }
    }
}
