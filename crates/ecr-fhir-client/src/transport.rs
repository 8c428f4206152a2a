//! HTTP transport for FHIR reads.
//!
//! [`FhirTransport`] performs exactly one GET. Retries, tracking and URL
//! construction live in [`crate::client::RetryableFhirClient`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::{ClientError, Operation, Result, RetryableError};

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// One outgoing GET.
#[derive(Debug, Clone)]
pub struct FhirRequest {
    pub operation: Operation,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub access_token: Option<String>,
    pub request_id: String,
    pub attempt: u32,
}

#[async_trait]
pub trait FhirTransport: Send + Sync {
    async fn execute(&self, request: &FhirRequest) -> Result<Value>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl FhirTransport for HttpTransport {
    async fn execute(&self, request: &FhirRequest) -> Result<Value> {
        let mut req = self
            .http
            .get(request.url.clone())
            .header("Accept", "application/fhir+json")
            .header(REQUEST_ID_HEADER, &request.request_id);
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        if let Some(token) = &request.access_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::transport(request.operation, e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ClientError::transport(request.operation, e.to_string()))?;

        if !status.is_success() {
            return Err(RetryableError::new(
                status.as_u16(),
                request.operation,
                failure_message(status, &body),
            )
            .into());
        }

        serde_json::from_str(&body).map_err(|e| ClientError::decode(request.operation, e.to_string()))
    }
}

/// Prefers OperationOutcome diagnostics over the raw body.
fn failure_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body)
        && json.get("resourceType").and_then(|v| v.as_str()) == Some("OperationOutcome")
        && let Some(issues) = json.get("issue").and_then(|v| v.as_array())
    {
        let msgs: Vec<&str> = issues
            .iter()
            .filter_map(|i| i.get("diagnostics").and_then(|d| d.as_str()))
            .collect();
        if !msgs.is_empty() {
            return msgs.join("; ");
        }
    }
    if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body.chars().take(512).collect()
    }
}
