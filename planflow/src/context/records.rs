//! Append-only records kept on a workflow context.

use crate::core::{DataMap, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// How a history entry's stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// The stage ran and the workflow moved on.
    Completed,
    /// A backward edge discarded later stage outputs.
    RolledBack,
    /// The stage failed and the workflow went to `ERROR`.
    Failed,
    /// The workflow was cancelled.
    Cancelled,
}

/// One transition record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The stage the record concerns.
    pub stage: Stage,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
    /// How the stage ended.
    pub outcome: TransitionOutcome,
    /// Where the workflow went next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<Stage>,
    /// Which attempt produced the outcome, starting at 1.
    #[serde(default)]
    pub attempt: u32,
    /// Wall-clock time spent in the processor.
    #[serde(default)]
    pub duration_ms: u64,
    /// Extra payload.
    #[serde(default, skip_serializing_if = "DataMap::is_empty")]
    pub data: DataMap,
}

impl HistoryEntry {
    /// Creates a new entry stamped with the current time.
    #[must_use]
    pub fn new(stage: Stage, outcome: TransitionOutcome) -> Self {
        Self {
            stage,
            timestamp: Utc::now(),
            outcome,
            next_stage: None,
            attempt: 1,
            duration_ms: 0,
            data: DataMap::new(),
        }
    }

    /// Sets the destination stage.
    #[must_use]
    pub fn with_next_stage(mut self, next_stage: Stage) -> Self {
        self.next_stage = Some(next_stage);
        self
    }

    /// Sets attempt number and duration.
    #[must_use]
    pub fn with_timing(mut self, attempt: u32, duration_ms: u64) -> Self {
        self.attempt = attempt;
        self.duration_ms = duration_ms;
        self
    }

    /// Adds a data field.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Whether an error stopped the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Execution continued (retried, or a non-fatal issue).
    Recoverable,
    /// The workflow was routed to `ERROR`.
    Fatal,
}

/// One entry of the context's error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The stage that produced the error.
    pub stage: Stage,
    /// What went wrong.
    pub message: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Whether it stopped the workflow.
    pub severity: ErrorSeverity,
}

impl ErrorRecord {
    /// Creates a new error record stamped with the current time.
    #[must_use]
    pub fn new(stage: Stage, message: impl Into<String>, severity: ErrorSeverity) -> Self {
        Self {
            stage,
            message: message.into(),
            timestamp: Utc::now(),
            severity,
        }
    }

    /// Returns true for fatal errors.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity == ErrorSeverity::Fatal
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("stage".to_string(), json!(self.stage.as_str()));
        map.insert("message".to_string(), json!(self.message));
        map.insert("timestamp".to_string(), json!(self.timestamp.to_rfc3339()));
        map.insert("fatal".to_string(), json!(self.is_fatal()));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_entry_builders() {
        let entry = HistoryEntry::new(Stage::IdeaGeneration, TransitionOutcome::Completed)
            .with_next_stage(Stage::IdeaSelection)
            .with_timing(2, 15)
            .add_data("results", json!(4));

        assert_eq!(entry.next_stage, Some(Stage::IdeaSelection));
        assert_eq!(entry.attempt, 2);
        assert_eq!(entry.duration_ms, 15);
        assert_eq!(entry.data.get("results"), Some(&json!(4)));
    }

    #[test]
    fn test_error_record_to_dict() {
        let record = ErrorRecord::new(Stage::ReviewPhase, "score missing", ErrorSeverity::Fatal);
        let dict = record.to_dict();
        assert_eq!(dict.get("stage"), Some(&json!("REVIEW_PHASE")));
        assert_eq!(dict.get("fatal"), Some(&json!(true)));
    }

    #[test]
    fn test_outcome_serialize() {
        let json = serde_json::to_string(&TransitionOutcome::RolledBack).unwrap();
        assert_eq!(json, r#""rolled_back""#);
    }
}
