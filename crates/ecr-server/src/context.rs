use std::sync::Arc;

use ecr_core::{ActionGraph, TriggerMatcher};

use crate::loader::ClinicalDataLoader;
use crate::reports::{
    BasicReportValidator, LogOnlySubmitter, ReportGenerator, ReportSubmitter, ReportValidator,
    SummaryReportGenerator,
};
use crate::store::{ExecutionStateStore, InMemoryStateStore};

/// Collaborators shared by every session the engine runs.
#[derive(Clone)]
pub struct EngineContext {
    pub graph: Arc<ActionGraph>,
    pub matcher: Arc<TriggerMatcher>,
    pub store: Arc<dyn ExecutionStateStore>,
    pub loader: Arc<dyn ClinicalDataLoader>,
    pub generator: Arc<dyn ReportGenerator>,
    pub validator: Arc<dyn ReportValidator>,
    pub submitter: Arc<dyn ReportSubmitter>,
}

impl EngineContext {
    /// Context with in-memory state and the default report collaborators.
    pub fn new(
        graph: ActionGraph,
        matcher: TriggerMatcher,
        loader: Arc<dyn ClinicalDataLoader>,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            matcher: Arc::new(matcher),
            store: Arc::new(InMemoryStateStore::new()),
            loader,
            generator: Arc::new(SummaryReportGenerator),
            validator: Arc::new(BasicReportValidator),
            submitter: Arc::new(LogOnlySubmitter),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ExecutionStateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn ReportGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ReportValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn ReportSubmitter>) -> Self {
        self.submitter = submitter;
        self
    }
}
