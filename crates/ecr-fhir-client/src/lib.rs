//! FHIR data access for case reporting.
//!
//! Every call made through [`RetryableFhirClient`] is an idempotent GET run
//! under a [`RetryPolicy`]. Failures that carry an HTTP status surface as
//! [`RetryableError`]; connection failures pass through uncoded. When the
//! policy gives up the caller receives [`RetryOutcome::Exhausted`], never an
//! empty result.

pub mod client;
pub mod error;
pub mod policy;
pub mod retry;
pub mod search;
pub mod tracker;
pub mod transport;

pub use client::{RetryableFhirClient, StaticToken, TokenProvider};
pub use error::{ClientError, Operation, Result, RetryableError};
pub use policy::RetryPolicy;
pub use retry::{RetryOutcome, execute_with_retry};
pub use search::{SearchCriteria, next_link};
pub use tracker::RequestTracker;
pub use transport::{FhirRequest, FhirTransport, HttpTransport, REQUEST_ID_HEADER};
