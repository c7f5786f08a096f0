//! Span constructors shared by the engine and sessions.

use crate::core::Stage;
use tracing::{info_span, Span};
use uuid::Uuid;

/// The span one engine step runs in.
#[must_use]
pub fn workflow_span(workflow_id: Uuid, stage: Stage) -> Span {
    info_span!("workflow.step", workflow_id = %workflow_id, stage = %stage)
}

/// The span one processor attempt runs in.
#[must_use]
pub fn stage_span(stage: Stage, processor: &str, attempt: u32) -> Span {
    info_span!("workflow.stage", stage = %stage, processor, attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_build_without_subscriber() {
        let span = workflow_span(Uuid::new_v4(), Stage::ReviewPhase);
        let _guard = span.enter();
        let _inner = stage_span(Stage::ReviewPhase, "review", 1).entered();
    }
}
