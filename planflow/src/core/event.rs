//! Transition events emitted while a workflow runs.

use super::{DataMap, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Event type names.
pub mod event_types {
    /// A stage processor is about to run.
    pub const STAGE_STARTED: &str = "workflow.stage_started";
    /// A stage processor returned successfully.
    pub const STAGE_COMPLETED: &str = "workflow.stage_completed";
    /// `current_stage` moved.
    pub const TRANSITION: &str = "workflow.transition";
    /// The workflow is waiting for a selection.
    pub const SUSPENDED: &str = "workflow.suspended";
    /// A failed stage is about to be retried.
    pub const RETRYING: &str = "workflow.retrying";
    /// A backward edge discarded later stage outputs.
    pub const ROLLED_BACK: &str = "workflow.rolled_back";
    /// The workflow reached `COMPLETED`.
    pub const COMPLETED: &str = "workflow.completed";
    /// The workflow reached `ERROR`.
    pub const FAILED: &str = "workflow.failed";
    /// The workflow reached `CANCELLED`.
    pub const CANCELLED: &str = "workflow.cancelled";
    /// The engine stopped at a boundary because of a pause request.
    pub const PAUSED: &str = "workflow.paused";
}

/// An observable step in a workflow's life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// One of the [`event_types`] names.
    #[serde(rename = "type")]
    pub event_type: String,

    /// The workflow the event belongs to.
    pub workflow_id: Uuid,

    /// The stage the event concerns.
    pub stage: Stage,

    /// Where the workflow is heading, for transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<Stage>,

    /// Progress at emission time.
    pub progress: u8,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Extra payload.
    #[serde(default, skip_serializing_if = "DataMap::is_empty")]
    pub data: DataMap,
}

impl TransitionEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, workflow_id: Uuid, stage: Stage, progress: u8) -> Self {
        Self {
            event_type: event_type.into(),
            workflow_id,
            stage,
            next_stage: None,
            progress,
            timestamp: Utc::now(),
            data: DataMap::new(),
        }
    }

    /// Sets the destination stage.
    #[must_use]
    pub fn with_next_stage(mut self, next_stage: Stage) -> Self {
        self.next_stage = Some(next_stage);
        self
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns true for the events that end a workflow.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            event_types::COMPLETED | event_types::FAILED | event_types::CANCELLED
        )
    }

    /// Converts the event to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), Value::from(self.event_type.as_str()));
        map.insert("workflow_id".to_string(), Value::from(self.workflow_id.to_string()));
        map.insert("stage".to_string(), Value::from(self.stage.as_str()));
        if let Some(next) = self.next_stage {
            map.insert("next_stage".to_string(), Value::from(next.as_str()));
        }
        map.insert("progress".to_string(), Value::from(self.progress));
        map.insert("timestamp".to_string(), Value::from(self.timestamp.to_rfc3339()));
        if !self.data.is_empty() {
            map.insert(
                "data".to_string(),
                Value::Object(self.data.clone().into_iter().collect()),
            );
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transition_event_to_dict() {
        let id = Uuid::new_v4();
        let event = TransitionEvent::new(event_types::TRANSITION, id, Stage::IdeaGeneration, 10)
            .with_next_stage(Stage::IdeaSelection)
            .add_data("attempt", json!(1));

        let dict = event.to_dict();
        assert_eq!(dict.get("type"), Some(&json!("workflow.transition")));
        assert_eq!(dict.get("next_stage"), Some(&json!("IDEA_SELECTION")));
        assert_eq!(dict.get("workflow_id"), Some(&json!(id.to_string())));
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_terminal_events() {
        let id = Uuid::new_v4();
        assert!(TransitionEvent::new(event_types::FAILED, id, Stage::Error, 0).is_terminal());
        assert!(TransitionEvent::new(event_types::CANCELLED, id, Stage::Cancelled, 0).is_terminal());
        assert!(!TransitionEvent::new(event_types::PAUSED, id, Stage::IdeaGeneration, 10).is_terminal());
    }
}
