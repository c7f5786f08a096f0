//! The per-workflow record threaded through every stage.

use super::{
    ContextView, ErrorRecord, ErrorSeverity, HistoryEntry, ProgressSnapshot, TransitionOutcome,
};
use crate::core::{DataMap, RevisionRequest, SelectionType, Stage, StageOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// All data a workflow needs to be inspected or resumed.
///
/// Only the execution engine mutates a context; processors see a
/// [`ContextView`] and observers see a [`ProgressSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    workflow_id: Uuid,
    current_stage: Stage,
    inputs: DataMap,
    #[serde(default)]
    stage_outputs: BTreeMap<Stage, DataMap>,
    #[serde(default)]
    selections: BTreeMap<SelectionType, Value>,
    #[serde(default)]
    revision_requests: Vec<RevisionRequest>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    #[serde(default)]
    errors: Vec<ErrorRecord>,
    progress: u8,
    #[serde(default)]
    waiting_for_input: bool,
    #[serde(default)]
    revision_count_by_stage: BTreeMap<Stage, u32>,
    #[serde(default)]
    needs_more_research: BTreeSet<Stage>,
    #[serde(default)]
    active_faults: BTreeSet<Stage>,
    #[serde(default)]
    email_distribution: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowContext {
    /// Creates a fresh context at `INITIALIZED` with a new workflow id.
    #[must_use]
    pub fn new(inputs: DataMap, email_distribution: bool) -> Self {
        Self::with_id(Uuid::new_v4(), inputs, email_distribution)
    }

    /// Creates a fresh context with a caller-chosen workflow id.
    #[must_use]
    pub fn with_id(workflow_id: Uuid, inputs: DataMap, email_distribution: bool) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            current_stage: Stage::Initialized,
            inputs,
            stage_outputs: BTreeMap::new(),
            selections: BTreeMap::new(),
            revision_requests: Vec::new(),
            history: Vec::new(),
            errors: Vec::new(),
            progress: 0,
            waiting_for_input: false,
            revision_count_by_stage: BTreeMap::new(),
            needs_more_research: BTreeSet::new(),
            active_faults: BTreeSet::new(),
            email_distribution,
            created_at: now,
            updated_at: now,
        }
    }

    /// Seeds a stage output, e.g. when building fixtures.
    #[must_use]
    pub fn with_stage_output(mut self, stage: Stage, data: DataMap) -> Self {
        self.stage_outputs.insert(stage, data);
        self
    }

    /// Seeds a selection.
    #[must_use]
    pub fn with_selection(mut self, kind: SelectionType, value: Value) -> Self {
        self.selections.insert(kind, value);
        self
    }

    /// Places the context at `stage`.
    #[must_use]
    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.set_stage(stage);
        self
    }

    // ---- read access ----

    /// The immutable workflow id.
    #[must_use]
    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// The stage the engine will run next (or the terminal stage).
    #[must_use]
    pub fn current_stage(&self) -> Stage {
        self.current_stage
    }

    /// The original request parameters.
    #[must_use]
    pub fn inputs(&self) -> &DataMap {
        &self.inputs
    }

    /// Last output per stage.
    #[must_use]
    pub fn stage_outputs(&self) -> &BTreeMap<Stage, DataMap> {
        &self.stage_outputs
    }

    /// Last output of one stage.
    #[must_use]
    pub fn stage_output(&self, stage: Stage) -> Option<&DataMap> {
        self.stage_outputs.get(&stage)
    }

    /// A single field of a stage's output.
    #[must_use]
    pub fn output_value(&self, stage: Stage, key: &str) -> Option<&Value> {
        self.stage_outputs.get(&stage).and_then(|data| data.get(key))
    }

    /// Externally supplied choices.
    #[must_use]
    pub fn selections(&self) -> &BTreeMap<SelectionType, Value> {
        &self.selections
    }

    /// The choice recorded for `kind`.
    #[must_use]
    pub fn selection(&self, kind: SelectionType) -> Option<&Value> {
        self.selections.get(&kind)
    }

    /// Pending revision requests, oldest first.
    #[must_use]
    pub fn revision_requests(&self) -> &[RevisionRequest] {
        &self.revision_requests
    }

    /// Transition records, oldest first.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Error log, oldest first.
    #[must_use]
    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Progress percentage.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// True while suspended pending a selection.
    #[must_use]
    pub fn waiting_for_input(&self) -> bool {
        self.waiting_for_input
    }

    /// Per-stage revision counters.
    #[must_use]
    pub fn revision_count_by_stage(&self) -> &BTreeMap<Stage, u32> {
        &self.revision_count_by_stage
    }

    /// How often `stage` has been re-entered through a backward edge.
    #[must_use]
    pub fn revision_count(&self, stage: Stage) -> u32 {
        self.revision_count_by_stage.get(&stage).copied().unwrap_or(0)
    }

    /// True when the last run of `stage` asked for more research.
    #[must_use]
    pub fn needs_more_research(&self, stage: Stage) -> bool {
        self.needs_more_research.contains(&stage)
    }

    /// True when a processor reported a fatal issue that has not been cleared.
    #[must_use]
    pub fn has_active_fault(&self) -> bool {
        !self.active_faults.is_empty()
    }

    /// Stages with an uncleared fatal issue.
    #[must_use]
    pub fn active_faults(&self) -> &BTreeSet<Stage> {
        &self.active_faults
    }

    /// Whether export is followed by email distribution.
    #[must_use]
    pub fn email_distribution(&self) -> bool {
        self.email_distribution
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last mutation.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The selection the workflow is currently suspended on.
    #[must_use]
    pub fn expected_selection(&self) -> Option<SelectionType> {
        if self.waiting_for_input {
            self.current_stage.selection_type()
        } else {
            None
        }
    }

    /// Builds the read-only view handed to the processor of `current_stage`.
    #[must_use]
    pub fn view(&self) -> ContextView {
        ContextView::new(self)
    }

    /// Builds the observer snapshot.
    #[must_use]
    pub fn snapshot(&self, paused: bool) -> ProgressSnapshot {
        ProgressSnapshot {
            workflow_id: self.workflow_id,
            current_stage: self.current_stage,
            progress: self.progress,
            waiting_for_input: self.waiting_for_input,
            expected_selection: self.expected_selection(),
            paused,
            errors: self.errors.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Assembles the chosen options and generated content into one plan document.
    #[must_use]
    pub fn final_plan(&self) -> Value {
        let selection = |kind| self.selection(kind).cloned().unwrap_or(Value::Null);
        let output = |stage| {
            self.stage_output(stage)
                .map(|data| Value::Object(data.clone().into_iter().collect()))
                .unwrap_or(Value::Null)
        };

        json!({
            "workflow_id": self.workflow_id.to_string(),
            "status": self.current_stage.as_str(),
            "progress": self.progress,
            "event_type": self.inputs.get("event_type").cloned().unwrap_or(Value::Null),
            "inputs": Value::Object(self.inputs.clone().into_iter().collect()),
            "idea": selection(SelectionType::Idea),
            "location": selection(SelectionType::Location),
            "vendor": selection(SelectionType::Vendor),
            "schedule": {
                "approval": selection(SelectionType::Schedule),
                "plan": output(Stage::SchedulePlanning),
            },
            "invitation": output(Stage::InvitationCreation),
            "review": output(Stage::ReviewPhase),
            "export": output(Stage::ExportPreparation),
            "email_distribution": self.email_distribution,
        })
    }

    // ---- engine-side mutation ----

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Moves to `stage` and derives progress from the fixed table.
    pub(crate) fn set_stage(&mut self, stage: Stage) {
        self.current_stage = stage;
        if let Some(progress) = stage.progress() {
            self.progress = progress;
        }
        self.touch();
    }

    pub(crate) fn set_waiting(&mut self, waiting: bool) {
        self.waiting_for_input = waiting;
        self.touch();
    }

    /// Merges a successful processor output for `stage`.
    ///
    /// Clears the stage's transient flags first, then re-derives them from
    /// the new output.
    pub(crate) fn merge_output(&mut self, stage: Stage, output: &StageOutput, min_valid_results: usize) {
        self.active_faults.remove(&stage);
        self.needs_more_research.remove(&stage);

        self.stage_outputs.insert(stage, output.data.clone());

        let too_few = output
            .result_count
            .is_some_and(|count| count < min_valid_results);
        if stage.is_research() && (output.needs_more_research || too_few) {
            self.needs_more_research.insert(stage);
        }

        for issue in &output.issues {
            let severity = if issue.fatal {
                self.active_faults.insert(stage);
                ErrorSeverity::Fatal
            } else {
                ErrorSeverity::Recoverable
            };
            self.errors.push(ErrorRecord::new(stage, issue.message.clone(), severity));
        }

        self.revision_requests.extend(output.revision_requests.iter().cloned());
        self.touch();
    }

    pub(crate) fn record_error(&mut self, stage: Stage, message: impl Into<String>, severity: ErrorSeverity) {
        self.errors.push(ErrorRecord::new(stage, message, severity));
        self.touch();
    }

    pub(crate) fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        self.touch();
    }

    pub(crate) fn insert_selection(&mut self, kind: SelectionType, value: Value) {
        self.selections.insert(kind, value);
        self.touch();
    }

    pub(crate) fn increment_revision(&mut self, stage: Stage) -> u32 {
        let count = self.revision_count_by_stage.entry(stage).or_insert(0);
        *count += 1;
        let count = *count;
        self.touch();
        count
    }

    /// Removes and returns the oldest pending revision request.
    pub(crate) fn take_revision_request(&mut self) -> Option<RevisionRequest> {
        if self.revision_requests.is_empty() {
            None
        } else {
            self.touch();
            Some(self.revision_requests.remove(0))
        }
    }

    pub(crate) fn clear_revision_requests(&mut self) {
        self.revision_requests.clear();
        self.touch();
    }

    /// Discards everything produced after `to` and records the rollback.
    ///
    /// Progress is recomputed from `to`, which may lower it.
    pub(crate) fn rollback_to(&mut self, from: Stage, to: Stage) {
        let dropped: Vec<Stage> = self
            .stage_outputs
            .keys()
            .copied()
            .filter(|stage| *stage > to)
            .collect();
        for stage in &dropped {
            self.stage_outputs.remove(stage);
        }
        self.selections.retain(|kind, _| kind.stage() <= to);
        self.needs_more_research.retain(|stage| *stage <= to);
        self.active_faults.retain(|stage| *stage <= to);

        let dropped_names: Vec<Value> = dropped.iter().map(|stage| json!(stage.as_str())).collect();
        self.history.push(
            HistoryEntry::new(from, TransitionOutcome::RolledBack)
                .with_next_stage(to)
                .add_data("discarded_outputs", Value::Array(dropped_names)),
        );
        if let Some(progress) = to.progress() {
            self.progress = progress;
        }
        self.touch();
    }

    /// Rebuilds the context from its original inputs, keeping the id.
    pub(crate) fn reset(&mut self) {
        *self = Self::with_id(self.workflow_id, self.inputs.clone(), self.email_distribution);
    }
}
