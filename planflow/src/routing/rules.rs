//! Per-stage decision functions of the event-plan pipeline.
//!
//! Each function inspects the context after its stage ran and names a
//! [`Branch`]; the transition table turns that into a stage.

use super::{Branch, RouteFailure, RoutingConfig};
use crate::context::WorkflowContext;
use crate::core::Stage;
use serde_json::Value;

/// Signature shared by all decision functions.
pub type DecisionFn = fn(Stage, &WorkflowContext, &RoutingConfig) -> Result<Branch, RouteFailure>;

/// Review verdict that passes the quality gate (with a sufficient score).
pub const APPROVED: &str = "approved";
/// Review verdict that sends specific stages back for revision.
pub const NEEDS_REVISION: &str = "needs_revision";
/// Review verdict that restarts content generation.
pub const NEEDS_MAJOR_CHANGES: &str = "needs_major_changes";

/// Always advances.
pub fn advance(_stage: Stage, _ctx: &WorkflowContext, _config: &RoutingConfig) -> Result<Branch, RouteFailure> {
    Ok(Branch::Advance)
}

/// Research stages loop while their results are insufficient.
pub fn research(stage: Stage, ctx: &WorkflowContext, _config: &RoutingConfig) -> Result<Branch, RouteFailure> {
    if ctx.needs_more_research(stage) {
        Ok(Branch::Repeat)
    } else {
        Ok(Branch::Advance)
    }
}

/// Selection stages advance only once their selection exists.
pub fn selection(stage: Stage, ctx: &WorkflowContext, _config: &RoutingConfig) -> Result<Branch, RouteFailure> {
    let kind = stage
        .selection_type()
        .ok_or_else(|| RouteFailure::unroutable(stage, "not a selection stage"))?;
    if ctx.selection(kind).is_some() {
        Ok(Branch::Advance)
    } else {
        Ok(Branch::AwaitInput)
    }
}

/// The quality gate over the assembled plan.
///
/// A score equal to the threshold passes. An approval below the threshold
/// is treated as a revision request.
pub fn review(stage: Stage, ctx: &WorkflowContext, config: &RoutingConfig) -> Result<Branch, RouteFailure> {
    let status = ctx
        .output_value(stage, "approval_status")
        .and_then(Value::as_str)
        .ok_or_else(|| RouteFailure::unroutable(stage, "review produced no approval_status"))?;

    match status {
        APPROVED => {
            let score = ctx
                .output_value(stage, "quality_score")
                .and_then(Value::as_f64)
                .ok_or_else(|| RouteFailure::unroutable(stage, "approved review has no quality_score"))?;
            if score >= config.quality_threshold {
                Ok(Branch::Advance)
            } else {
                Ok(Branch::Revise)
            }
        }
        NEEDS_REVISION => Ok(Branch::Revise),
        NEEDS_MAJOR_CHANGES => Ok(Branch::MajorChanges),
        other => Err(RouteFailure::unroutable(
            stage,
            format!("unknown approval_status '{other}'"),
        )),
    }
}

/// Dispatches the oldest pending revision request, or returns to review.
pub fn handle_revisions(
    _stage: Stage,
    ctx: &WorkflowContext,
    _config: &RoutingConfig,
) -> Result<Branch, RouteFailure> {
    if ctx.revision_requests().is_empty() {
        Ok(Branch::Advance)
    } else {
        Ok(Branch::Revise)
    }
}

/// Export continues to email distribution only when it is enabled.
pub fn export(_stage: Stage, ctx: &WorkflowContext, _config: &RoutingConfig) -> Result<Branch, RouteFailure> {
    if ctx.email_distribution() {
        Ok(Branch::Advance)
    } else {
        Ok(Branch::Skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataMap, SelectionType};
    use serde_json::json;

    fn review_ctx(status: &str, score: f64) -> WorkflowContext {
        let mut data = DataMap::new();
        data.insert("approval_status".to_string(), json!(status));
        data.insert("quality_score".to_string(), json!(score));
        WorkflowContext::new(DataMap::new(), false)
            .with_stage_output(Stage::ReviewPhase, data)
            .at_stage(Stage::ReviewPhase)
    }

    #[test]
    fn test_review_threshold_boundary() {
        let config = RoutingConfig::default();
        let branch = review(Stage::ReviewPhase, &review_ctx(APPROVED, 8.0), &config).unwrap();
        assert_eq!(branch, Branch::Advance);

        let branch = review(Stage::ReviewPhase, &review_ctx(APPROVED, 7.99), &config).unwrap();
        assert_eq!(branch, Branch::Revise);
    }

    #[test]
    fn test_review_statuses() {
        let config = RoutingConfig::default();
        assert_eq!(
            review(Stage::ReviewPhase, &review_ctx(NEEDS_REVISION, 6.0), &config),
            Ok(Branch::Revise)
        );
        assert_eq!(
            review(Stage::ReviewPhase, &review_ctx(NEEDS_MAJOR_CHANGES, 2.0), &config),
            Ok(Branch::MajorChanges)
        );
        assert!(review(Stage::ReviewPhase, &review_ctx("meh", 9.0), &config).is_err());
    }

    #[test]
    fn test_review_missing_output_is_unroutable() {
        let ctx = WorkflowContext::new(DataMap::new(), false).at_stage(Stage::ReviewPhase);
        let err = review(Stage::ReviewPhase, &ctx, &RoutingConfig::default()).unwrap_err();
        assert!(matches!(err, RouteFailure::Unroutable { .. }));
    }

    #[test]
    fn test_selection_rule() {
        let config = RoutingConfig::default();
        let ctx = WorkflowContext::new(DataMap::new(), false).at_stage(Stage::IdeaSelection);
        assert_eq!(selection(Stage::IdeaSelection, &ctx, &config), Ok(Branch::AwaitInput));

        let ctx = ctx.with_selection(SelectionType::Idea, json!("Tropical Bash"));
        assert_eq!(selection(Stage::IdeaSelection, &ctx, &config), Ok(Branch::Advance));
    }

    #[test]
    fn test_export_rule() {
        let config = RoutingConfig::default();
        let ctx = WorkflowContext::new(DataMap::new(), false);
        assert_eq!(export(Stage::ExportPreparation, &ctx, &config), Ok(Branch::Skip));

        let ctx = WorkflowContext::new(DataMap::new(), true);
        assert_eq!(export(Stage::ExportPreparation, &ctx, &config), Ok(Branch::Advance));
    }
}
