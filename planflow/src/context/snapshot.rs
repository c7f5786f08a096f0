//! Observer-facing progress snapshots.

use super::ErrorRecord;
use crate::core::{SelectionType, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Best-effort, last-known status of a workflow.
///
/// Published after every engine step so status queries never wait on an
/// in-flight stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// The workflow id.
    pub workflow_id: Uuid,
    /// Current stage.
    pub current_stage: Stage,
    /// Progress percentage.
    pub progress: u8,
    /// True while suspended pending a selection.
    pub waiting_for_input: bool,
    /// The selection being waited for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_selection: Option<SelectionType>,
    /// True while a pause request is in effect.
    #[serde(default)]
    pub paused: bool,
    /// Error log.
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    /// Time of the last context mutation.
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Returns true once the workflow can no longer progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.current_stage.is_terminal()
    }

    /// Converts the snapshot to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("workflow_id".to_string(), json!(self.workflow_id.to_string()));
        map.insert("current_stage".to_string(), json!(self.current_stage.as_str()));
        map.insert("progress".to_string(), json!(self.progress));
        map.insert("waiting_for_input".to_string(), json!(self.waiting_for_input));
        if let Some(kind) = self.expected_selection {
            map.insert("expected_selection".to_string(), json!(kind.as_str()));
        }
        map.insert("paused".to_string(), json!(self.paused));
        map.insert(
            "errors".to_string(),
            Value::Array(
                self.errors
                    .iter()
                    .map(|err| Value::Object(err.to_dict().into_iter().collect()))
                    .collect(),
            ),
        );
        map.insert("updated_at".to_string(), json!(self.updated_at.to_rfc3339()));
        map
    }
}
