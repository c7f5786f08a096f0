//! Read-only context view handed to stage processors.

use super::WorkflowContext;
use crate::core::{DataMap, RevisionRequest, SelectionType, Stage};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// An owned, read-only copy of the context fields a processor may consult.
///
/// Processors run off the engine's control path, so they receive a copy
/// rather than a borrow; nothing they do to it reaches the workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextView {
    workflow_id: Uuid,
    stage: Stage,
    inputs: DataMap,
    stage_outputs: BTreeMap<Stage, DataMap>,
    selections: BTreeMap<SelectionType, Value>,
    revision_requests: Vec<RevisionRequest>,
    revision_count: u32,
    email_distribution: bool,
}

impl ContextView {
    pub(super) fn new(ctx: &WorkflowContext) -> Self {
        let stage = ctx.current_stage();
        Self {
            workflow_id: ctx.workflow_id(),
            stage,
            inputs: ctx.inputs().clone(),
            stage_outputs: ctx.stage_outputs().clone(),
            selections: ctx.selections().clone(),
            revision_requests: ctx.revision_requests().to_vec(),
            revision_count: ctx.revision_count(stage),
            email_distribution: ctx.email_distribution(),
        }
    }

    /// The workflow id.
    #[must_use]
    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// The stage being executed.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The original request parameters.
    #[must_use]
    pub fn inputs(&self) -> &DataMap {
        &self.inputs
    }

    /// A single request parameter.
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    /// The last output of `stage`.
    #[must_use]
    pub fn output(&self, stage: Stage) -> Option<&DataMap> {
        self.stage_outputs.get(&stage)
    }

    /// A single field of a stage's output.
    #[must_use]
    pub fn output_value(&self, stage: Stage, key: &str) -> Option<&Value> {
        self.stage_outputs.get(&stage).and_then(|data| data.get(key))
    }

    /// The choice recorded for `kind`.
    #[must_use]
    pub fn selection(&self, kind: SelectionType) -> Option<&Value> {
        self.selections.get(&kind)
    }

    /// Pending revision requests, oldest first.
    #[must_use]
    pub fn pending_revisions(&self) -> &[RevisionRequest] {
        &self.revision_requests
    }

    /// How often the current stage has been re-entered.
    #[must_use]
    pub fn revision_count(&self) -> u32 {
        self.revision_count
    }

    /// Whether the plan will be emailed.
    #[must_use]
    pub fn email_distribution(&self) -> bool {
        self.email_distribution
    }
}
