//! Electronic case reporting engine.
//!
//! [`EcrEngine`] consumes encounter events, keeps one
//! [`PatientExecutionState`](ecr_core::PatientExecutionState) per session and
//! drives the configured action graph: trigger matching, report creation,
//! periodic updates, close-out, validation and submission.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod loader;
pub mod observability;
pub mod reports;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use context::EngineContext;
pub use engine::EcrEngine;
pub use error::{EngineError, Result};
pub use event::{EcrEvent, EventKind};
pub use loader::{ClinicalDataLoader, FhirDataLoader, SessionTokenProvider};
pub use reports::{
    BasicReportValidator, EicrDocument, LogOnlySubmitter, ReportGenerator, ReportKind,
    ReportSubmitter, ReportValidator, RestReportSubmitter, SubmissionReceipt,
    SummaryReportGenerator, ValidationOutcome,
};
pub use store::{ExecutionStateStore, InMemoryStateStore};
