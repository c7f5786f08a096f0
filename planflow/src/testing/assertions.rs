//! Test assertions for workflow state.

use crate::context::{TransitionOutcome, WorkflowContext};
use crate::core::Stage;

/// Asserts that the workflow sits at `expected`.
pub fn assert_stage(ctx: &WorkflowContext, expected: Stage) {
    assert_eq!(
        ctx.current_stage(),
        expected,
        "Expected stage {expected}, got {} (errors: {:?})",
        ctx.current_stage(),
        ctx.errors()
    );
}

/// Asserts that the workflow reached `COMPLETED` at 100%.
pub fn assert_completed(ctx: &WorkflowContext) {
    assert_stage(ctx, Stage::Completed);
    assert_eq!(ctx.progress(), 100, "Completed workflow must report 100%");
}

/// Asserts that the workflow failed and recorded at least one fatal error.
pub fn assert_failed(ctx: &WorkflowContext) {
    assert_stage(ctx, Stage::Error);
    assert!(
        ctx.errors().iter().any(crate::context::ErrorRecord::is_fatal),
        "Failed workflow must record a fatal error, got {:?}",
        ctx.errors()
    );
}

/// Asserts that the workflow is suspended at `stage`.
pub fn assert_waiting_at(ctx: &WorkflowContext, stage: Stage) {
    assert_stage(ctx, stage);
    assert!(ctx.waiting_for_input(), "Expected workflow to wait for input at {stage}");
}

/// Asserts that history holds exactly `count` completed entries for `stage`.
pub fn assert_completed_times(ctx: &WorkflowContext, stage: Stage, count: usize) {
    let actual = ctx
        .history()
        .iter()
        .filter(|entry| entry.stage == stage && entry.outcome == TransitionOutcome::Completed)
        .count();
    assert_eq!(actual, count, "Expected {stage} to complete {count} time(s), got {actual}");
}

/// Asserts that progress never decreased except across rollbacks.
pub fn assert_progress_monotonic(progress: &[u8], rollbacks: usize) {
    let decreases = progress.windows(2).filter(|pair| pair[1] < pair[0]).count();
    assert!(
        decreases <= rollbacks,
        "Progress decreased {decreases} time(s) with only {rollbacks} rollback(s): {progress:?}"
    );
}
