//! Report document collaborators.
//!
//! Document content is deliberately minimal: a JSON summary of the trigger
//! codes and the clinical resources that were loaded. Richer generators,
//! validators and transports plug in through the three traits.

use std::time::Duration;

use async_trait::async_trait;
use ecr_core::{ClinicalData, MatchedTriggerCodes, PatientExecutionState};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    Initial,
    PeriodicUpdate,
    CloseOut,
}

/// Generated initial case report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EicrDocument {
    pub id: String,
    pub session_id: String,
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_id: Option<String>,
    pub kind: ReportKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub trigger_codes: Vec<MatchedTriggerCodes>,
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationOutcome {
    pub issues: Vec<String>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Identifier assigned by the receiver, when it returns one.
    pub receipt_id: Option<String>,
    pub status: u16,
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(
        &self,
        state: &PatientExecutionState,
        data: &ClinicalData,
        kind: ReportKind,
    ) -> Result<EicrDocument>;
}

#[async_trait]
pub trait ReportValidator: Send + Sync {
    async fn validate(&self, document: &EicrDocument) -> Result<ValidationOutcome>;
}

#[async_trait]
pub trait ReportSubmitter: Send + Sync {
    async fn submit(&self, document: &EicrDocument) -> Result<SubmissionReceipt>;
}

/// Produces a JSON summary document.
#[derive(Debug, Clone, Default)]
pub struct SummaryReportGenerator;

#[async_trait]
impl ReportGenerator for SummaryReportGenerator {
    async fn generate(
        &self,
        state: &PatientExecutionState,
        data: &ClinicalData,
        kind: ReportKind,
    ) -> Result<EicrDocument> {
        let references: Vec<String> = data
            .resources
            .iter()
            .filter_map(|r| {
                let rt = r.get("resourceType")?.as_str()?;
                let id = r.get("id")?.as_str()?;
                Some(format!("{rt}/{id}"))
            })
            .collect();

        let id = ecr_core::generate_id();
        let created_at = OffsetDateTime::now_utc();
        let content = json!({
            "documentId": id,
            "reportKind": kind,
            "subject": format!("Patient/{}", state.patient_id),
            "encounter": state.encounter_id.as_ref().map(|e| format!("Encounter/{e}")),
            "triggerCodes": state.match_trigger_status.all_codes(),
            "resources": references,
        });

        Ok(EicrDocument {
            id,
            session_id: state.session_id.clone(),
            patient_id: state.patient_id.clone(),
            encounter_id: state.encounter_id.clone(),
            kind,
            created_at,
            trigger_codes: state.match_trigger_status.matched_codes.clone(),
            content,
        })
    }
}

/// Structural checks only.
#[derive(Debug, Clone, Default)]
pub struct BasicReportValidator;

#[async_trait]
impl ReportValidator for BasicReportValidator {
    async fn validate(&self, document: &EicrDocument) -> Result<ValidationOutcome> {
        let mut issues = Vec::new();
        if document.patient_id.is_empty() {
            issues.push("document has no patient".to_string());
        }
        if !document.trigger_codes.iter().any(MatchedTriggerCodes::has_matches) {
            issues.push("document carries no matched trigger codes".to_string());
        }
        if !document.content.is_object() {
            issues.push("document content is not a JSON object".to_string());
        }
        Ok(ValidationOutcome { issues })
    }
}

/// POSTs documents as JSON to a configured endpoint.
#[derive(Debug, Clone)]
pub struct RestReportSubmitter {
    http: reqwest::Client,
    endpoint: String,
}

impl RestReportSubmitter {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::SubmissionTransport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ReportSubmitter for RestReportSubmitter {
    async fn submit(&self, document: &EicrDocument) -> Result<SubmissionReceipt> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(document)
            .send()
            .await
            .map_err(|e| EngineError::SubmissionTransport(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(EngineError::Submission {
                status: status.as_u16(),
                message: body.chars().take(512).collect(),
            });
        }

        let receipt_id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string));
        Ok(SubmissionReceipt {
            receipt_id,
            status: status.as_u16(),
        })
    }
}

/// Accepts every document and only logs it.
#[derive(Debug, Clone, Default)]
pub struct LogOnlySubmitter;

#[async_trait]
impl ReportSubmitter for LogOnlySubmitter {
    async fn submit(&self, document: &EicrDocument) -> Result<SubmissionReceipt> {
        tracing::info!(
            document_id = %document.id,
            session_id = %document.session_id,
            kind = ?document.kind,
            "No submission endpoint configured; report logged only"
        );
        Ok(SubmissionReceipt {
            receipt_id: None,
            status: 200,
        })
    }
}
