//! The result a stage processor hands back to the engine.

use super::Stage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Ordered key/value payload used for stage outputs, inputs and selections.
///
/// Ordered maps keep serialized contexts byte-stable, which the checkpoint
/// digest depends on.
pub type DataMap = BTreeMap<String, Value>;

/// How a stage processor invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    /// Output is merged and routing continues.
    Ok,
    /// The stage needs an external selection before routing.
    NeedsInput,
    /// The processor failed.
    Fail,
}

impl OutputStatus {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NeedsInput => "needs_input",
            Self::Fail => "fail",
        }
    }
}

/// A pending instruction to redo an earlier stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRequest {
    /// The stage whose content should be regenerated.
    pub target: Stage,
    /// Why the reviewer asked for the revision.
    pub reason: String,
}

impl RevisionRequest {
    /// Creates a new revision request.
    #[must_use]
    pub fn new(target: Stage, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
        }
    }
}

/// A problem a processor noticed in its own result.
///
/// Non-fatal issues are recorded and execution continues; a fatal issue
/// routes the workflow to `ERROR` ahead of any other routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageIssue {
    /// Human readable description.
    pub message: String,
    /// Whether the issue stops the workflow.
    pub fatal: bool,
}

/// The output of one stage processor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// How the invocation ended.
    pub status: OutputStatus,

    /// Data merged into `stage_outputs` under the stage's key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: DataMap,

    /// Error message (for failed invocations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Whether the failure is transient.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,

    /// Explicit request to re-run a research stage.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_more_research: bool,

    /// Number of usable results produced, compared against the
    /// research-sufficiency threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_count: Option<usize>,

    /// Revision requests to queue for `HANDLE_REVISIONS`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revision_requests: Vec<RevisionRequest>,

    /// Problems found in the output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<StageIssue>,
}

impl Default for StageOutput {
    fn default() -> Self {
        Self::ok_empty()
    }
}

impl StageOutput {
    fn with_status(status: OutputStatus) -> Self {
        Self {
            status,
            data: DataMap::new(),
            error: None,
            retryable: false,
            needs_more_research: false,
            result_count: None,
            revision_requests: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// Creates a successful output with data.
    #[must_use]
    pub fn ok(data: DataMap) -> Self {
        Self {
            data,
            ..Self::with_status(OutputStatus::Ok)
        }
    }

    /// Creates a successful output with no data.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self::with_status(OutputStatus::Ok)
    }

    /// Creates a successful output with a single value.
    #[must_use]
    pub fn ok_value(key: impl Into<String>, value: Value) -> Self {
        Self::ok_empty().add_data(key, value)
    }

    /// Signals that the stage cannot proceed without an external selection.
    #[must_use]
    pub fn needs_input() -> Self {
        Self::with_status(OutputStatus::NeedsInput)
    }

    /// Creates a fatal failure output.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(OutputStatus::Fail)
        }
    }

    /// Creates a retryable failure output.
    #[must_use]
    pub fn fail_retryable(error: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::fail(error)
        }
    }

    /// Adds a single data entry.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Flags that the research stage should run again.
    #[must_use]
    pub fn with_needs_more_research(mut self, needs_more_research: bool) -> Self {
        self.needs_more_research = needs_more_research;
        self
    }

    /// Records how many usable results the stage produced.
    #[must_use]
    pub fn with_result_count(mut self, count: usize) -> Self {
        self.result_count = Some(count);
        self
    }

    /// Queues a revision request.
    #[must_use]
    pub fn with_revision_request(mut self, target: Stage, reason: impl Into<String>) -> Self {
        self.revision_requests.push(RevisionRequest::new(target, reason));
        self
    }

    /// Records a problem found in the output.
    #[must_use]
    pub fn with_issue(mut self, message: impl Into<String>, fatal: bool) -> Self {
        self.issues.push(StageIssue {
            message: message.into(),
            fatal,
        });
        self
    }

    /// Returns true for `Ok` outputs.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == OutputStatus::Ok
    }

    /// Returns true for `Fail` outputs.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == OutputStatus::Fail
    }

    /// Returns true if any recorded issue is fatal.
    #[must_use]
    pub fn has_fatal_issue(&self) -> bool {
        self.issues.iter().any(|issue| issue.fatal)
    }

    /// Converts the output to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("status".to_string(), Value::from(self.status.as_str()));
        if !self.data.is_empty() {
            map.insert(
                "data".to_string(),
                Value::Object(self.data.clone().into_iter().collect()),
            );
        }
        if let Some(ref error) = self.error {
            map.insert("error".to_string(), Value::from(error.as_str()));
            map.insert("retryable".to_string(), Value::from(self.retryable));
        }
        if let Some(count) = self.result_count {
            map.insert("result_count".to_string(), Value::from(count));
        }
        if !self.issues.is_empty() {
            map.insert(
                "issues".to_string(),
                Value::from(
                    self.issues
                        .iter()
                        .map(|issue| issue.message.clone())
                        .collect::<Vec<_>>(),
                ),
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
    fn test_ok_value() {
        let output = StageOutput::ok_value("ideas", json!(["a", "b"]));
        assert!(output.is_ok());
        assert_eq!(output.data.get("ideas"), Some(&json!(["a", "b"])));
        assert!(!output.retryable);
    }

    #[test]
    fn test_fail_variants() {
        let fatal = StageOutput::fail("boom");
        assert!(fatal.is_failure());
        assert!(!fatal.retryable);

        let transient = StageOutput::fail_retryable("rate limited");
        assert!(transient.is_failure());
        assert!(transient.retryable);
        assert_eq!(transient.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_builders() {
        let output = StageOutput::ok_empty()
            .with_result_count(2)
            .with_needs_more_research(true)
            .with_revision_request(Stage::SchedulePlanning, "too tight")
            .with_issue("minor", false);

        assert_eq!(output.result_count, Some(2));
        assert!(output.needs_more_research);
        assert_eq!(output.revision_requests[0].target, Stage::SchedulePlanning);
        assert!(!output.has_fatal_issue());
        assert!(output.with_issue("broken", true).has_fatal_issue());
    }

    #[test]
    fn test_to_dict() {
        let dict = StageOutput::fail_retryable("timeout").to_dict();
        assert_eq!(dict.get("status"), Some(&json!("fail")));
        assert_eq!(dict.get("retryable"), Some(&json!(true)));
        assert!(!dict.contains_key("data"));
    }

    #[test]
    fn test_serialize_skips_defaults() {
        let json = serde_json::to_value(StageOutput::needs_input()).unwrap();
        assert_eq!(json, json!({"status": "needs_input"}));
    }
}
