//! Error types for the planflow engine.
//!
//! One struct per failure class callers may need to tell apart, gathered
//! under [`PlanflowError`].

use crate::core::{SelectionType, Stage};
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PlanflowError>;

/// The main error type for planflow operations.
#[derive(Debug, Error)]
pub enum PlanflowError {
    /// A stage processor failed past its retry budget.
    #[error("{0}")]
    StageExecution(#[from] StageExecutionError),

    /// A selection did not match what the workflow is waiting for.
    #[error("{0}")]
    SelectionMismatch(#[from] SelectionMismatchError),

    /// A selection arrived while the workflow was not suspended.
    #[error("{0}")]
    WorkflowNotWaiting(#[from] WorkflowNotWaitingError),

    /// A backward edge would exceed the revision bound.
    #[error("{0}")]
    RevisionLimit(#[from] RevisionLimitExceeded),

    /// The checkpoint store failed.
    #[error("{0}")]
    CheckpointIo(#[from] CheckpointIoError),

    /// An unknown workflow or session id.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// A control action that is illegal in the workflow's current state.
    #[error("Cannot {action} workflow at {stage}: {reason}")]
    InvalidControl {
        /// The rejected action.
        action: String,
        /// Where the workflow was.
        stage: Stage,
        /// Why the action was rejected.
        reason: String,
    },

    /// Misconfiguration or invalid input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PlanflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl PlanflowError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an invalid control error.
    #[must_use]
    pub fn invalid_control(action: impl Into<String>, stage: Stage, reason: impl Into<String>) -> Self {
        Self::InvalidControl {
            action: action.into(),
            stage,
            reason: reason.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        match self {
            Self::StageExecution(err) => err.to_dict(),
            Self::SelectionMismatch(err) => err.to_dict(),
            Self::WorkflowNotWaiting(err) => err.to_dict(),
            Self::RevisionLimit(err) => err.to_dict(),
            Self::CheckpointIo(err) => err.to_dict(),
            Self::NotFound(err) => err.to_dict(),
            Self::InvalidControl { action, stage, reason } => {
                let mut map = base_dict("InvalidControl", self);
                map.insert("action".to_string(), json!(action));
                map.insert("stage".to_string(), json!(stage.as_str()));
                map.insert("reason".to_string(), json!(reason));
                map
            }
            Self::Validation(_) => base_dict("ValidationError", self),
            Self::Serialization(_) => base_dict("SerializationError", self),
        }
    }
}

fn base_dict(kind: &str, err: &impl std::fmt::Display) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("type".to_string(), json!(kind));
    map.insert("message".to_string(), json!(err.to_string()));
    map
}

/// A stage processor raised or returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage {stage} failed: {message}")]
pub struct StageExecutionError {
    /// The failing stage.
    pub stage: Stage,
    /// The cause.
    pub message: String,
    /// Whether the failure was classified transient.
    pub retryable: bool,
    /// Whether the failure was a timeout.
    pub timed_out: bool,
}

impl StageExecutionError {
    /// Creates a fatal stage error.
    #[must_use]
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            retryable: false,
            timed_out: false,
        }
    }

    /// Sets whether the error is retryable.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Creates the retryable error recorded when a processor exceeds its deadline.
    #[must_use]
    pub fn timeout(stage: Stage, limit: std::time::Duration) -> Self {
        Self {
            stage,
            message: format!("timed out after {}ms", limit.as_millis()),
            retryable: true,
            timed_out: true,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = base_dict("StageExecutionError", self);
        map.insert("stage".to_string(), json!(self.stage.as_str()));
        map.insert("retryable".to_string(), json!(self.retryable));
        map.insert("timed_out".to_string(), json!(self.timed_out));
        map
    }
}

/// External input does not match the stage awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Workflow {workflow_id} is waiting for '{expected}', got '{received}'")]
pub struct SelectionMismatchError {
    /// The workflow.
    pub workflow_id: Uuid,
    /// What the suspended stage expects.
    pub expected: SelectionType,
    /// What was submitted.
    pub received: String,
}

impl SelectionMismatchError {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = base_dict("SelectionMismatchError", self);
        map.insert("workflow_id".to_string(), json!(self.workflow_id.to_string()));
        map.insert("expected".to_string(), json!(self.expected.as_str()));
        map.insert("received".to_string(), json!(self.received));
        map
    }
}

/// A selection was submitted while the workflow was not suspended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Workflow {workflow_id} is not waiting for input (stage {stage})")]
pub struct WorkflowNotWaitingError {
    /// The workflow.
    pub workflow_id: Uuid,
    /// Where the workflow is.
    pub stage: Stage,
}

impl WorkflowNotWaitingError {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = base_dict("WorkflowNotWaitingError", self);
        map.insert("workflow_id".to_string(), json!(self.workflow_id.to_string()));
        map.insert("stage".to_string(), json!(self.stage.as_str()));
        map
    }
}

/// A stage's revision count would exceed the configured bound.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Revision limit exceeded for {stage}: {count} > {limit}")]
pub struct RevisionLimitExceeded {
    /// The stage being re-entered.
    pub stage: Stage,
    /// The count the transition would have produced.
    pub count: u32,
    /// The configured bound.
    pub limit: u32,
}

impl RevisionLimitExceeded {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = base_dict("RevisionLimitExceeded", self);
        map.insert("stage".to_string(), json!(self.stage.as_str()));
        map.insert("count".to_string(), json!(self.count));
        map.insert("limit".to_string(), json!(self.limit));
        map
    }
}

/// The persistence layer failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Checkpoint {operation} failed for {workflow_id}: {message}")]
pub struct CheckpointIoError {
    /// The workflow whose checkpoint was touched.
    pub workflow_id: Uuid,
    /// `save`, `load`, `delete` or `list`.
    pub operation: String,
    /// The underlying cause.
    pub message: String,
}

impl CheckpointIoError {
    /// Creates a new checkpoint error.
    #[must_use]
    pub fn new(workflow_id: Uuid, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            workflow_id,
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = base_dict("CheckpointIOError", self);
        map.insert("workflow_id".to_string(), json!(self.workflow_id.to_string()));
        map.insert("operation".to_string(), json!(self.operation));
        map
    }
}

/// An unknown workflow or session id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} not found: {id}")]
pub struct NotFoundError {
    /// What was looked up (`session`, `checkpoint`).
    pub kind: &'static str,
    /// The missing id.
    pub id: Uuid,
}

impl NotFoundError {
    /// Creates a missing-session error.
    #[must_use]
    pub fn session(id: Uuid) -> Self {
        Self { kind: "session", id }
    }

    /// Creates a missing-checkpoint error.
    #[must_use]
    pub fn checkpoint(id: Uuid) -> Self {
        Self {
            kind: "checkpoint",
            id,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = base_dict("NotFoundError", self);
        map.insert("kind".to_string(), json!(self.kind));
        map.insert("id".to_string(), json!(self.id.to_string()));
        map
    }
}
