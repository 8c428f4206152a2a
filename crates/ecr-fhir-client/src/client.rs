//! Retrying FHIR client.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::{ClientError, Operation, Result};
use crate::policy::RetryPolicy;
use crate::retry::{RetryOutcome, execute_with_retry};
use crate::search::{SearchCriteria, next_link};
use crate::tracker::RequestTracker;
use crate::transport::{FhirRequest, FhirTransport};

/// Supplies the bearer token for each attempt.
///
/// Looked up per attempt so a token refreshed between retries is picked up.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// Fixed token, or none for open servers.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// FHIR client wrapping every idempotent read in the retry policy.
pub struct RetryableFhirClient<T> {
    transport: T,
    base_url: Url,
    policy: RetryPolicy,
    tracker: RequestTracker,
    tokens: Arc<dyn TokenProvider>,
}

impl<T: FhirTransport> RetryableFhirClient<T> {
    pub fn new(
        transport: T,
        base_url: &str,
        policy: RetryPolicy,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid base URL '{base_url}': {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            transport,
            base_url,
            policy,
            tracker: RequestTracker::new(),
            tokens,
        })
    }

    pub fn with_tracker(mut self, tracker: RequestTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Reads `resource_type/id`.
    pub async fn read(&self, resource_type: &str, id: &str) -> RetryOutcome<Value> {
        self.tracker.reset();
        let url = match self.resource_url(&format!("{resource_type}/{id}")) {
            Ok(url) => url,
            Err(e) => return RetryOutcome::Failed(e),
        };
        self.run(Operation::Read, url, Vec::new()).await
    }

    /// Runs a type-level search and returns the first bundle page.
    pub async fn search(&self, criteria: &SearchCriteria) -> RetryOutcome<Value> {
        self.tracker.reset();
        let url = match self.resource_url(&criteria.resource_type) {
            Ok(url) => url,
            Err(e) => return RetryOutcome::Failed(e),
        };
        self.run(Operation::Search, url, criteria.params.clone()).await
    }

    /// Fetches a follow-up page by its absolute URL.
    pub async fn load_page(&self, page_url: &str) -> RetryOutcome<Value> {
        let page = self.tracker.next_page();
        tracing::debug!(page, url = %page_url, "Loading search page");
        let url = match Url::parse(page_url) {
            Ok(url) => url,
            Err(e) => {
                return RetryOutcome::Failed(ClientError::InvalidRequest(format!(
                    "invalid page URL '{page_url}': {e}"
                )));
            }
        };
        self.run(Operation::LoadPage, url, Vec::new()).await
    }

    /// Runs a search and follows `next` links, returning every bundle page.
    ///
    /// At most `max_pages` pages are fetched, including the first.
    pub async fn search_all(&self, criteria: &SearchCriteria, max_pages: u32) -> Result<Vec<Value>> {
        let first = self.search(criteria).await.into_result(Operation::Search)?;
        let mut next = next_link(&first).map(str::to_string);
        let mut pages = vec![first];

        while let Some(url) = next.take() {
            if pages.len() as u32 >= max_pages {
                tracing::warn!(
                    resource_type = %criteria.resource_type,
                    max_pages,
                    "Search page limit reached, remaining pages skipped"
                );
                break;
            }
            let page = self.load_page(&url).await.into_result(Operation::LoadPage)?;
            next = next_link(&page).map(str::to_string);
            pages.push(page);
        }
        Ok(pages)
    }

    fn resource_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid resource path '{path}': {e}")))
    }

    async fn run(
        &self,
        operation: Operation,
        url: Url,
        query: Vec<(String, String)>,
    ) -> RetryOutcome<Value> {
        execute_with_retry(&self.policy, &self.tracker, operation, |attempt| {
            let url = url.clone();
            let query = query.clone();
            async move {
                let request = FhirRequest {
                    operation,
                    url,
                    query,
                    access_token: self.tokens.access_token().await,
                    request_id: self.tracker.request_id().to_string(),
                    attempt,
                };
                self.transport.execute(&request).await
            }
        })
        .await
    }
}
