//! The explicit `(stage, branch) -> stage` transition table.

use super::rules::{self, DecisionFn};
use super::{Branch, RouteDecision, RouteFailure};
use crate::context::WorkflowContext;
use crate::core::Stage;
use crate::errors::{PlanflowError, Result, RevisionLimitExceeded};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The router's tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Maximum re-entries per stage through backward edges.
    pub max_revisions: u32,
    /// Minimum review score that counts as a pass (inclusive).
    pub quality_threshold: f64,
    /// Research stages with fewer results than this re-run.
    pub min_valid_results: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        crate::config::EngineConfig::default().routing()
    }
}

/// Routes a workflow from its current stage.
///
/// Every non-terminal stage has one decision function; the branch it returns
/// is looked up in the transition table. Backward edges are bounded by the
/// per-stage revision count, which is what guarantees termination.
#[derive(Clone)]
pub struct RouterTable {
    config: RoutingConfig,
    decisions: BTreeMap<Stage, DecisionFn>,
    transitions: BTreeMap<(Stage, Branch), Stage>,
}

impl std::fmt::Debug for RouterTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterTable")
            .field("config", &self.config)
            .field("stages", &self.decisions.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions)
            .finish()
    }
}

impl Default for RouterTable {
    fn default() -> Self {
        Self::new(RoutingConfig::default())
    }
}

impl RouterTable {
    /// Builds the event-plan routing table.
    #[must_use]
    pub fn new(config: RoutingConfig) -> Self {
        use Stage::{
            Completed, EmailDistribution, ExportPreparation, HandleRevisions, IdeaGeneration,
            IdeaSelection, Initialized, InvitationCreation, LocationResearch, LocationSelection,
            ReviewPhase, ScheduleApproval, SchedulePlanning, VendorResearch, VendorSelection,
        };

        let mut table = Self::empty(config)
            .with_decision(Initialized, rules::advance)
            .with_decision(SchedulePlanning, rules::advance)
            .with_decision(InvitationCreation, rules::advance)
            .with_decision(EmailDistribution, rules::advance)
            .with_decision(ReviewPhase, rules::review)
            .with_decision(HandleRevisions, rules::handle_revisions)
            .with_decision(ExportPreparation, rules::export);

        for stage in [IdeaGeneration, LocationResearch, VendorResearch] {
            table = table
                .with_decision(stage, rules::research)
                .with_transition(stage, Branch::Repeat, stage);
        }
        for stage in [IdeaSelection, LocationSelection, VendorSelection, ScheduleApproval] {
            table = table.with_decision(stage, rules::selection);
        }

        let chain = [
            Initialized,
            IdeaGeneration,
            IdeaSelection,
            LocationResearch,
            LocationSelection,
            VendorResearch,
            VendorSelection,
            SchedulePlanning,
            ScheduleApproval,
            InvitationCreation,
            ReviewPhase,
        ];
        for pair in chain.windows(2) {
            table = table.with_transition(pair[0], Branch::Advance, pair[1]);
        }

        table
            .with_transition(ReviewPhase, Branch::Advance, ExportPreparation)
            .with_transition(ReviewPhase, Branch::Revise, HandleRevisions)
            .with_transition(ReviewPhase, Branch::MajorChanges, IdeaGeneration)
            .with_transition(HandleRevisions, Branch::Advance, ReviewPhase)
            .with_transition(ExportPreparation, Branch::Advance, EmailDistribution)
            .with_transition(ExportPreparation, Branch::Skip, Completed)
            .with_transition(EmailDistribution, Branch::Advance, Completed)
    }

    /// Creates a table with no stages.
    #[must_use]
    pub fn empty(config: RoutingConfig) -> Self {
        Self {
            config,
            decisions: BTreeMap::new(),
            transitions: BTreeMap::new(),
        }
    }

    /// Sets the decision function of `stage`.
    #[must_use]
    pub fn with_decision(mut self, stage: Stage, decision: DecisionFn) -> Self {
        self.decisions.insert(stage, decision);
        self
    }

    /// Adds a static edge.
    #[must_use]
    pub fn with_transition(mut self, from: Stage, branch: Branch, to: Stage) -> Self {
        self.transitions.insert((from, branch), to);
        self
    }

    /// The router's tuning parameters.
    #[must_use]
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Returns true if `stage` has a decision function.
    #[must_use]
    pub fn routes(&self, stage: Stage) -> bool {
        self.decisions.contains_key(&stage)
    }

    /// Stages with a decision function, in pipeline order.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.decisions.keys().copied()
    }

    /// Static edges, ordered by source stage.
    pub fn edges(&self) -> impl Iterator<Item = (Stage, Branch, Stage)> + '_ {
        self.transitions.iter().map(|(&(from, branch), &to)| (from, branch, to))
    }

    /// Returns true for edges that re-enter a stage that is not later in the pipeline.
    #[must_use]
    pub fn is_backward(from: Stage, to: Stage) -> bool {
        to <= from
    }

    /// Decides where the workflow goes from its current stage.
    ///
    /// Fatal issues take precedence over every rule.
    #[must_use]
    pub fn decide(&self, ctx: &WorkflowContext) -> RouteDecision {
        let stage = ctx.current_stage();

        if let Some(&faulty) = ctx.active_faults().iter().next() {
            return RouteDecision::Fail(RouteFailure::StageFault { stage: faulty });
        }

        let Some(decision) = self.decisions.get(&stage) else {
            return RouteDecision::Fail(RouteFailure::unroutable(stage, "no decision function"));
        };

        let branch = match decision(stage, ctx, &self.config) {
            Ok(branch) => branch,
            Err(failure) => return RouteDecision::Fail(failure),
        };
        if branch == Branch::AwaitInput {
            return RouteDecision::Suspend;
        }

        let target = match self.resolve(stage, branch, ctx) {
            Ok(target) => target,
            Err(failure) => return RouteDecision::Fail(failure),
        };

        if Self::is_backward(stage, target) {
            let count = ctx.revision_count(target) + 1;
            if count > self.config.max_revisions {
                return RouteDecision::Fail(RouteFailure::RevisionLimit(RevisionLimitExceeded {
                    stage: target,
                    count,
                    limit: self.config.max_revisions,
                }));
            }
        }

        RouteDecision::Continue(target)
    }

    fn resolve(&self, stage: Stage, branch: Branch, ctx: &WorkflowContext) -> std::result::Result<Stage, RouteFailure> {
        // Revision targets depend on the queue head, not on the table.
        if stage == Stage::HandleRevisions && branch == Branch::Revise {
            let request = ctx
                .revision_requests()
                .first()
                .ok_or_else(|| RouteFailure::unroutable(stage, "no pending revision request"))?;
            return match request.target.generation_step() {
                Some(target) if target < stage => Ok(target),
                _ => Err(RouteFailure::unroutable(
                    stage,
                    format!("{} is not a revisable stage", request.target),
                )),
            };
        }

        self.transitions
            .get(&(stage, branch))
            .copied()
            .ok_or_else(|| RouteFailure::unroutable(stage, format!("no edge for branch '{branch}'")))
    }

    /// Checks that every edge starts at a routed stage and ends at a routed
    /// or terminal stage, and that terminal stages have no decision function.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first offending stage.
    pub fn validate(&self) -> Result<()> {
        if let Some(stage) = self.stages().find(Stage::is_terminal) {
            return Err(PlanflowError::validation(format!(
                "terminal stage {stage} must not be routed"
            )));
        }
        for (from, branch, to) in self.edges() {
            if !self.routes(from) {
                return Err(PlanflowError::validation(format!(
                    "edge {from} --{branch}--> {to} starts at an unrouted stage"
                )));
            }
            if !to.is_terminal() && !self.routes(to) {
                return Err(PlanflowError::validation(format!(
                    "edge {from} --{branch}--> {to} ends at an unrouted stage"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataMap, SelectionType, StageOutput};
    use serde_json::json;

    fn ctx_at(stage: Stage) -> WorkflowContext {
        WorkflowContext::new(DataMap::new(), false).at_stage(stage)
    }

    fn review_output(status: &str, score: f64) -> DataMap {
        let mut data = DataMap::new();
        data.insert("approval_status".to_string(), json!(status));
        data.insert("quality_score".to_string(), json!(score));
        data
    }

    #[test]
    fn test_default_table_is_valid() {
        let table = RouterTable::default();
        assert!(table.validate().is_ok());
        for stage in Stage::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(table.routes(*stage), "{stage} has no route");
        }
    }

    #[test]
    fn test_validate_rejects_dangling_edge() {
        let table = RouterTable::empty(RoutingConfig::default())
            .with_decision(Stage::Initialized, rules::advance)
            .with_transition(Stage::Initialized, Branch::Advance, Stage::IdeaGeneration);
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_forward_chain() {
        let table = RouterTable::default();
        let ctx = ctx_at(Stage::Initialized);
        assert_eq!(table.decide(&ctx), RouteDecision::Continue(Stage::IdeaGeneration));

        let ctx = ctx_at(Stage::IdeaGeneration);
        assert_eq!(table.decide(&ctx), RouteDecision::Continue(Stage::IdeaSelection));
    }

    #[test]
    fn test_selection_suspends_until_chosen() {
        let table = RouterTable::default();
        let ctx = ctx_at(Stage::IdeaSelection);
        assert_eq!(table.decide(&ctx), RouteDecision::Suspend);

        let ctx = ctx.with_selection(SelectionType::Idea, json!("Tropical Bash"));
        assert_eq!(table.decide(&ctx), RouteDecision::Continue(Stage::LocationResearch));
    }

    #[test]
    fn test_research_repeat_is_bounded() {
        let table = RouterTable::default();
        let mut ctx = ctx_at(Stage::VendorResearch);
        ctx.merge_output(Stage::VendorResearch, &StageOutput::ok_empty().with_result_count(1), 3);
        assert_eq!(table.decide(&ctx), RouteDecision::Continue(Stage::VendorResearch));

        ctx.increment_revision(Stage::VendorResearch);
        ctx.increment_revision(Stage::VendorResearch);
        match table.decide(&ctx) {
            RouteDecision::Fail(RouteFailure::RevisionLimit(err)) => {
                assert_eq!(err.stage, Stage::VendorResearch);
                assert_eq!(err.count, 3);
                assert_eq!(err.limit, 2);
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn test_review_routes() {
        let table = RouterTable::default();
        let approved = ctx_at(Stage::ReviewPhase).with_stage_output(Stage::ReviewPhase, review_output("approved", 8.0));
        assert_eq!(table.decide(&approved), RouteDecision::Continue(Stage::ExportPreparation));

        let revise = ctx_at(Stage::ReviewPhase).with_stage_output(Stage::ReviewPhase, review_output("needs_revision", 6.0));
        assert_eq!(table.decide(&revise), RouteDecision::Continue(Stage::HandleRevisions));

        let major = ctx_at(Stage::ReviewPhase)
            .with_stage_output(Stage::ReviewPhase, review_output("needs_major_changes", 3.0));
        assert_eq!(table.decide(&major), RouteDecision::Continue(Stage::IdeaGeneration));
    }

    #[test]
    fn test_fault_has_precedence() {
        let table = RouterTable::default();
        let mut ctx = ctx_at(Stage::ReviewPhase);
        let output = StageOutput::ok(review_output("approved", 9.5)).with_issue("plan is empty", true);
        ctx.merge_output(Stage::ReviewPhase, &output, 3);

        assert_eq!(
            table.decide(&ctx),
            RouteDecision::Fail(RouteFailure::StageFault { stage: Stage::ReviewPhase })
        );
    }

    #[test]
    fn test_handle_revisions_targets_generation_step() {
        let table = RouterTable::default();
        let mut ctx = ctx_at(Stage::HandleRevisions);
        let output = StageOutput::ok_empty().with_revision_request(Stage::VendorSelection, "over budget");
        ctx.merge_output(Stage::ReviewPhase, &output, 3);

        assert_eq!(table.decide(&ctx), RouteDecision::Continue(Stage::VendorResearch));
    }

    #[test]
    fn test_handle_revisions_rejects_unrevisable_target() {
        let table = RouterTable::default();
        let mut ctx = ctx_at(Stage::HandleRevisions);
        let output = StageOutput::ok_empty().with_revision_request(Stage::ExportPreparation, "bad");
        ctx.merge_output(Stage::ReviewPhase, &output, 3);

        assert!(matches!(
            table.decide(&ctx),
            RouteDecision::Fail(RouteFailure::Unroutable { .. })
        ));
    }

    #[test]
    fn test_empty_queue_returns_to_review() {
        let table = RouterTable::default();
        let ctx = ctx_at(Stage::HandleRevisions);
        assert_eq!(table.decide(&ctx), RouteDecision::Continue(Stage::ReviewPhase));
    }

    #[test]
    fn test_export_email_branch() {
        let table = RouterTable::default();
        assert_eq!(
            table.decide(&ctx_at(Stage::ExportPreparation)),
            RouteDecision::Continue(Stage::Completed)
        );

        let ctx = WorkflowContext::new(DataMap::new(), true).at_stage(Stage::ExportPreparation);
        assert_eq!(table.decide(&ctx), RouteDecision::Continue(Stage::EmailDistribution));
    }

    #[test]
    fn test_terminal_stage_is_unroutable() {
        let table = RouterTable::default();
        assert!(matches!(
            table.decide(&ctx_at(Stage::Completed)),
            RouteDecision::Fail(RouteFailure::Unroutable { .. })
        ));
    }
}
