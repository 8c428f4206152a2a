//! Actions, conditions and the action graph.
//!
//! An [`Action`] is one step of the reporting pipeline. It becomes eligible
//! when every precondition holds, every temporal relation to another action is
//! satisfied and it still has work to do for the session. The [`ActionGraph`]
//! owns the configured actions, validates references and orders them so that
//! an action is always considered after the actions it depends on.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::job::JobStatus;
use crate::state::PatientExecutionState;

/// Closed set of pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    MatchTrigger,
    CreateEicr,
    PeriodicUpdateEicr,
    CloseOutEicr,
    ValidateEicr,
    SubmitEicr,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::MatchTrigger,
        ActionKind::CreateEicr,
        ActionKind::PeriodicUpdateEicr,
        ActionKind::CloseOutEicr,
        ActionKind::ValidateEicr,
        ActionKind::SubmitEicr,
    ];

    /// Identifier used for this kind in the default graph.
    pub fn default_id(self) -> &'static str {
        match self {
            ActionKind::MatchTrigger => "match-trigger",
            ActionKind::CreateEicr => "create-eicr",
            ActionKind::PeriodicUpdateEicr => "periodic-update-eicr",
            ActionKind::CloseOutEicr => "close-out-eicr",
            ActionKind::ValidateEicr => "validate-eicr",
            ActionKind::SubmitEicr => "submit-eicr",
        }
    }

    /// Stage name as shown in execution-state summaries.
    pub fn stage_name(self) -> &'static str {
        match self {
            ActionKind::MatchTrigger => "matchTrigger",
            ActionKind::CreateEicr => "createEicr",
            ActionKind::PeriodicUpdateEicr => "periodicUpdate",
            ActionKind::CloseOutEicr => "closeOutEicr",
            ActionKind::ValidateEicr => "validateEicr",
            ActionKind::SubmitEicr => "submitEicr",
        }
    }

    /// Whether executing this kind needs a fresh clinical data snapshot.
    pub fn needs_clinical_data(self) -> bool {
        matches!(
            self,
            ActionKind::MatchTrigger
                | ActionKind::CreateEicr
                | ActionKind::PeriodicUpdateEicr
                | ActionKind::CloseOutEicr
        )
    }

    /// Whether this kind produces a report document.
    pub fn produces_document(self) -> bool {
        matches!(
            self,
            ActionKind::CreateEicr | ActionKind::PeriodicUpdateEicr | ActionKind::CloseOutEicr
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_id())
    }
}

/// Precondition evaluated against the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Condition {
    /// The encounter has not been closed.
    EncounterActive,
    /// The encounter-close event arrived.
    EncounterClosed,
    /// Trigger matching completed with at least one matched code.
    TriggerMatched,
}

impl Condition {
    pub fn evaluate(&self, state: &PatientExecutionState) -> bool {
        match self {
            Condition::EncounterActive => !state.encounter_closed,
            Condition::EncounterClosed => state.encounter_closed,
            Condition::TriggerMatched => state.trigger_matched(),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Condition::EncounterActive => "encounter is active",
            Condition::EncounterClosed => "encounter is closed",
            Condition::TriggerMatched => "trigger codes matched",
        }
    }
}

/// Temporal relation between an action and one it depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemporalRelation {
    /// This action may only run while the related one has not started.
    BeforeStart,
    /// The related action must have started.
    AfterStart,
    /// The related action must have completed.
    AfterEnd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedAction {
    pub action_id: String,
    pub relation: TemporalRelation,
}

impl RelatedAction {
    pub fn new(action_id: impl Into<String>, relation: TemporalRelation) -> Self {
        Self {
            action_id: action_id.into(),
            relation,
        }
    }

    /// Checks the relation given the related action's current status.
    pub fn is_satisfied(&self, related: JobStatus) -> bool {
        match self.relation {
            TemporalRelation::BeforeStart => related == JobStatus::NotStarted,
            TemporalRelation::AfterStart => related != JobStatus::NotStarted,
            TemporalRelation::AfterEnd => related == JobStatus::Completed,
        }
    }

    /// True when the relation can never be satisfied again.
    pub fn is_violated(&self, related: JobStatus) -> bool {
        match self.relation {
            TemporalRelation::BeforeStart => related != JobStatus::NotStarted,
            TemporalRelation::AfterStart => false,
            TemporalRelation::AfterEnd => related == JobStatus::Failed,
        }
    }

    fn describe(&self) -> String {
        let relation = match self.relation {
            TemporalRelation::BeforeStart => "before start of",
            TemporalRelation::AfterStart => "after start of",
            TemporalRelation::AfterEnd => "after end of",
        };
        format!("{relation} {}", self.action_id)
    }
}

/// Recurrence for timed actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingSchedule {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Stop after this many firings. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_repetitions: Option<u32>,
}

impl TimingSchedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_repetitions: None,
        }
    }
}

/// Data an action reads, e.g. the resource types queried before matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionData {
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ActionData {
    pub fn resource(data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub kind: ActionKind,
    #[serde(default)]
    pub preconditions: Vec<Condition>,
    #[serde(default)]
    pub related_actions: Vec<RelatedAction>,
    /// Recurrences for timed actions; each runs its own timer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timing: Vec<TimingSchedule>,
    #[serde(default)]
    pub trigger_data: Vec<ActionData>,
}

impl Action {
    pub fn new(id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            preconditions: Vec::new(),
            related_actions: Vec::new(),
            timing: Vec::new(),
            trigger_data: Vec::new(),
        }
    }

    pub fn with_precondition(mut self, condition: Condition) -> Self {
        self.preconditions.push(condition);
        self
    }

    pub fn with_timing(mut self, timing: TimingSchedule) -> Self {
        self.timing.push(timing);
        self
    }

    pub fn add_related_action(&mut self, action_id: impl Into<String>, relation: TemporalRelation) {
        self.related_actions.push(RelatedAction::new(action_id, relation));
    }

    pub fn add_trigger_data(&mut self, data: ActionData) {
        self.trigger_data.push(data);
    }

    pub fn preconditions_hold(&self, state: &PatientExecutionState) -> bool {
        self.preconditions.iter().all(|c| c.evaluate(state))
    }

    /// All related actions are in the state the relation requires.
    pub fn relations_hold(&self, ctx: &EvaluationContext<'_>) -> bool {
        self.related_actions
            .iter()
            .all(|r| r.is_satisfied(ctx.status_of(&r.action_id)))
    }

    pub fn relations_violated(&self, ctx: &EvaluationContext<'_>) -> bool {
        self.related_actions
            .iter()
            .any(|r| r.is_violated(ctx.status_of(&r.action_id)))
    }

    /// Whether the session still has work for this action.
    pub fn has_pending_work(&self, state: &PatientExecutionState) -> bool {
        match self.kind {
            ActionKind::PeriodicUpdateEicr => {
                state.periodic_update_job_status == JobStatus::NotStarted
            }
            ActionKind::ValidateEicr => !state.documents_awaiting_validation().is_empty(),
            ActionKind::SubmitEicr => !state.documents_awaiting_submission().is_empty(),
            kind => state.stage_job_status(kind) == JobStatus::NotStarted,
        }
    }

    /// Preconditions and relations hold right now. Timed firings use this
    /// check on its own; initial dispatch also requires pending work.
    pub fn conditions_met(&self, ctx: &EvaluationContext<'_>) -> bool {
        self.preconditions_hold(ctx.state) && self.relations_hold(ctx)
    }

    pub fn is_eligible(&self, ctx: &EvaluationContext<'_>) -> bool {
        self.has_pending_work(ctx.state) && self.conditions_met(ctx)
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        parts.extend(self.preconditions.iter().map(|c| c.describe().to_string()));
        parts.extend(self.related_actions.iter().map(RelatedAction::describe));
        parts.extend(self.timing.iter().map(|timing| {
            format!(
                "every {}",
                humantime_serde::re::humantime::format_duration(timing.interval)
            )
        }));
        if parts.is_empty() {
            format!("{} ({})", self.id, self.kind)
        } else {
            format!("{} ({}) when {}", self.id, self.kind, parts.join(", "))
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Validated, topologically ordered set of actions.
#[derive(Debug, Clone)]
pub struct ActionGraph {
    actions: Vec<Action>,
    index: HashMap<String, usize>,
}

impl ActionGraph {
    pub fn new(actions: Vec<Action>) -> Result<Self> {
        let mut index = HashMap::with_capacity(actions.len());
        let mut kinds: HashMap<ActionKind, &str> = HashMap::with_capacity(actions.len());
        for (i, action) in actions.iter().enumerate() {
            if index.insert(action.id.clone(), i).is_some() {
                return Err(CoreError::DuplicateAction(action.id.clone()));
            }
            // Execution state keeps one status slot per kind.
            if let Some(first) = kinds.insert(action.kind, &action.id) {
                return Err(CoreError::DuplicateActionKind {
                    kind: action.kind.to_string(),
                    first: first.to_string(),
                    second: action.id.clone(),
                });
            }
        }

        for action in &actions {
            for related in &action.related_actions {
                if !index.contains_key(&related.action_id) {
                    return Err(CoreError::unknown_action(related.action_id.clone()));
                }
            }
            if action.timing.iter().any(|t| t.interval.is_zero()) {
                return Err(CoreError::invalid_schedule(
                    action.id.clone(),
                    "interval must be greater than zero",
                ));
            }
            if !action.timing.is_empty() && action.kind != ActionKind::PeriodicUpdateEicr {
                return Err(CoreError::invalid_schedule(
                    action.id.clone(),
                    "only periodic updates can be timed",
                ));
            }
        }

        let order = topological_order(&actions, &index)?;
        let mut slots: Vec<Option<Action>> = actions.into_iter().map(Some).collect();
        let actions: Vec<Action> = order.into_iter().filter_map(|i| slots[i].take()).collect();
        let index = actions
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.clone(), i))
            .collect();

        Ok(Self { actions, index })
    }

    /// The standard reporting pipeline.
    pub fn eicr_default(periodic_interval: Duration, resource_types: &[String]) -> Result<Self> {
        let match_id = ActionKind::MatchTrigger.default_id();
        let create_id = ActionKind::CreateEicr.default_id();
        let close_id = ActionKind::CloseOutEicr.default_id();

        let mut matcher = Action::new(match_id, ActionKind::MatchTrigger);
        for resource_type in resource_types {
            matcher.add_trigger_data(ActionData::resource(resource_type.clone()));
        }

        let mut create = Action::new(create_id, ActionKind::CreateEicr)
            .with_precondition(Condition::TriggerMatched);
        create.add_related_action(match_id, TemporalRelation::AfterEnd);

        let mut periodic = Action::new(
            ActionKind::PeriodicUpdateEicr.default_id(),
            ActionKind::PeriodicUpdateEicr,
        )
        .with_precondition(Condition::EncounterActive)
        .with_precondition(Condition::TriggerMatched)
        .with_timing(TimingSchedule::every(periodic_interval));
        periodic.add_related_action(create_id, TemporalRelation::AfterEnd);
        periodic.add_related_action(close_id, TemporalRelation::BeforeStart);

        let mut close_out = Action::new(close_id, ActionKind::CloseOutEicr)
            .with_precondition(Condition::EncounterClosed)
            .with_precondition(Condition::TriggerMatched);
        close_out.add_related_action(create_id, TemporalRelation::AfterEnd);

        let mut validate = Action::new(ActionKind::ValidateEicr.default_id(), ActionKind::ValidateEicr);
        validate.add_related_action(create_id, TemporalRelation::AfterEnd);

        let mut submit = Action::new(ActionKind::SubmitEicr.default_id(), ActionKind::SubmitEicr);
        submit.add_related_action(ActionKind::ValidateEicr.default_id(), TemporalRelation::AfterStart);

        Self::new(vec![matcher, create, periodic, close_out, validate, submit])
    }

    /// Actions in dependency order.
    pub fn ordered(&self) -> &[Action] {
        &self.actions
    }

    pub fn get(&self, action_id: &str) -> Option<&Action> {
        self.index.get(action_id).map(|&i| &self.actions[i])
    }

    pub fn by_kind(&self, kind: ActionKind) -> Option<&Action> {
        self.actions.iter().find(|a| a.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Kahn's algorithm, always picking the lowest declared index among ready
/// nodes so the order is stable.
fn topological_order(actions: &[Action], index: &HashMap<String, usize>) -> Result<Vec<usize>> {
    let n = actions.len();
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];

    for (i, action) in actions.iter().enumerate() {
        for related in &action.related_actions {
            let j = index[&related.action_id];
            let (from, to) = match related.relation {
                TemporalRelation::BeforeStart => (i, j),
                TemporalRelation::AfterStart | TemporalRelation::AfterEnd => (j, i),
            };
            edges[from].push(to);
            in_degree[to] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &to in &edges[next] {
            in_degree[to] -= 1;
            if in_degree[to] == 0 {
                ready.insert(to);
            }
        }
    }

    if order.len() != n {
        let stuck: Vec<&str> = (0..n)
            .filter(|i| in_degree[*i] > 0)
            .map(|i| actions[i].id.as_str())
            .collect();
        return Err(CoreError::CyclicDependency(stuck.join(", ")));
    }
    Ok(order)
}

/// Read-only view used for eligibility checks.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub state: &'a PatientExecutionState,
    pub graph: &'a ActionGraph,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(state: &'a PatientExecutionState, graph: &'a ActionGraph) -> Self {
        Self { state, graph }
    }

    /// Status of the stage owned by `action_id`. Unknown ids read as not started.
    pub fn status_of(&self, action_id: &str) -> JobStatus {
        self.graph
            .get(action_id)
            .map(|a| self.state.stage_job_status(a.kind))
            .unwrap_or_default()
    }

    /// Actions eligible to run now, in dependency order.
    pub fn eligible_actions(&self) -> Vec<&'a Action> {
        self.graph
            .ordered()
            .iter()
            .filter(|a| a.is_eligible(self))
            .collect()
    }
}
