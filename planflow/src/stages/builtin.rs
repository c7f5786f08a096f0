//! Processors for the stages the engine can run without external content.

use super::StageProcessor;
use crate::context::ContextView;
use crate::core::{SelectionType, StageOutput};
use async_trait::async_trait;
use serde_json::{json, Value};

const BUDGET_RANGE: (f64, f64) = (0.0, 1_000_000.0);
const GUEST_RANGE: (f64, f64) = (1.0, 10_000.0);
const DURATION_RANGE: (f64, f64) = (0.5, 168.0);

/// Validates the request at `INITIALIZED`.
///
/// `event_type` is required; `budget`, `guests` (or `estimated_guests`) and
/// `duration_hours` are range-checked when present. Violations are fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitializeProcessor;

impl InitializeProcessor {
    /// Returns every validation problem found in `view`'s inputs.
    #[must_use]
    pub fn violations(view: &ContextView) -> Vec<String> {
        let mut problems = Vec::new();

        match view.input("event_type").and_then(Value::as_str) {
            Some(kind) if !kind.trim().is_empty() => {}
            _ => problems.push("event_type must be a non-empty string".to_string()),
        }

        let guests = view.input("guests").or_else(|| view.input("estimated_guests"));
        for (field, value, range) in [
            ("budget", view.input("budget"), BUDGET_RANGE),
            ("guests", guests, GUEST_RANGE),
            ("duration_hours", view.input("duration_hours"), DURATION_RANGE),
        ] {
            if let Some(problem) = check_range(field, value, range) {
                problems.push(problem);
            }
        }

        problems
    }
}

fn check_range(field: &str, value: Option<&Value>, (min, max): (f64, f64)) -> Option<String> {
    let value = value?;
    match value.as_f64() {
        Some(number) if (min..=max).contains(&number) => None,
        Some(number) => Some(format!("{field} must be between {min} and {max}, got {number}")),
        None => Some(format!("{field} must be a number, got {value}")),
    }
}

#[async_trait]
impl StageProcessor for InitializeProcessor {
    fn name(&self) -> &str {
        "initialize"
    }

    async fn process(&self, view: &ContextView) -> StageOutput {
        let problems = Self::violations(view);
        if !problems.is_empty() {
            return StageOutput::fail(format!("invalid request: {}", problems.join("; ")));
        }

        StageOutput::ok_value("validated", json!(true))
            .add_data("event_type", view.input("event_type").cloned().unwrap_or(Value::Null))
            .add_data("email_distribution", json!(view.email_distribution()))
    }
}

/// Holds a selection stage until the matching choice exists.
#[derive(Debug, Clone, Copy)]
pub struct SelectionGate {
    kind: SelectionType,
}

impl SelectionGate {
    /// Creates a gate for `kind`.
    #[must_use]
    pub fn new(kind: SelectionType) -> Self {
        Self { kind }
    }

    /// The selection this gate waits for.
    #[must_use]
    pub fn kind(&self) -> SelectionType {
        self.kind
    }
}

#[async_trait]
impl StageProcessor for SelectionGate {
    fn name(&self) -> &str {
        match self.kind {
            SelectionType::Idea => "idea_selection_gate",
            SelectionType::Location => "location_selection_gate",
            SelectionType::Vendor => "vendor_selection_gate",
            SelectionType::Schedule => "schedule_approval_gate",
        }
    }

    async fn process(&self, view: &ContextView) -> StageOutput {
        match view.selection(self.kind) {
            Some(choice) => StageOutput::ok_value("selected", choice.clone()),
            None => StageOutput::needs_input(),
        }
    }
}

/// Reports which pending revision will be dispatched next.
///
/// The dispatch itself is a routing decision; this processor only records it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevisionHandler;

#[async_trait]
impl StageProcessor for RevisionHandler {
    fn name(&self) -> &str {
        "revision_handler"
    }

    async fn process(&self, view: &ContextView) -> StageOutput {
        let pending = view.pending_revisions();
        let output = StageOutput::ok_value("pending", json!(pending.len()));
        match pending.first() {
            Some(request) => output
                .add_data("next_target", json!(request.target.as_str()))
                .add_data("reason", json!(request.reason)),
            None => output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkflowContext;
    use crate::core::{DataMap, OutputStatus, Stage};

    fn view_with(inputs: Value) -> ContextView {
        let map: DataMap = serde_json::from_value(inputs).unwrap();
        WorkflowContext::new(map, false).view()
    }

    #[tokio::test]
    async fn test_initialize_accepts_valid_request() {
        let view = view_with(json!({"event_type": "birthday_party", "budget": 5000, "guests": 25}));
        let output = InitializeProcessor.process(&view).await;
        assert!(output.is_ok());
        assert_eq!(output.data.get("validated"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_initialize_rejects_out_of_range() {
        let view = view_with(json!({"event_type": "gala", "budget": 2_000_000, "guests": 0}));
        let output = InitializeProcessor.process(&view).await;
        assert!(output.is_failure());
        assert!(!output.retryable);

        let problems = InitializeProcessor::violations(&view);
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_initialize_requires_event_type() {
        let view = view_with(json!({"event_type": "  "}));
        assert_eq!(InitializeProcessor::violations(&view).len(), 1);

        let view = view_with(json!({"event_type": "wedding", "duration_hours": "long"}));
        assert!(InitializeProcessor::violations(&view)[0].contains("must be a number"));
    }

    #[test]
    fn test_initialize_accepts_estimated_guests_alias() {
        let view = view_with(json!({"event_type": "wedding", "estimated_guests": 20_000}));
        assert!(InitializeProcessor::violations(&view)[0].starts_with("guests"));
    }

    #[tokio::test]
    async fn test_selection_gate() {
        let gate = SelectionGate::new(SelectionType::Location);
        let ctx = WorkflowContext::new(DataMap::new(), false).at_stage(Stage::LocationSelection);
        assert_eq!(gate.process(&ctx.view()).await.status, OutputStatus::NeedsInput);

        let ctx = ctx.with_selection(SelectionType::Location, json!("Beach Club"));
        let output = gate.process(&ctx.view()).await;
        assert!(output.is_ok());
        assert_eq!(output.data.get("selected"), Some(&json!("Beach Club")));
    }

    #[tokio::test]
    async fn test_revision_handler_reports_queue_head() {
        let mut ctx = WorkflowContext::new(DataMap::new(), false).at_stage(Stage::HandleRevisions);
        ctx.merge_output(
            Stage::ReviewPhase,
            &StageOutput::ok_empty().with_revision_request(Stage::SchedulePlanning, "too long"),
            3,
        );

        let output = RevisionHandler.process(&ctx.view()).await;
        assert_eq!(output.data.get("pending"), Some(&json!(1)));
        assert_eq!(output.data.get("next_target"), Some(&json!("SCHEDULE_PLANNING")));
    }
}
