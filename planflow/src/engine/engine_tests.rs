//! Engine tests driving whole workflows through in-memory collaborators.

use super::*;
use crate::checkpoint::{CheckpointStore, MockCheckpointStore};
use crate::context::{ErrorSeverity, TransitionOutcome};
use crate::core::{event_types, SelectionType, Stage, StageOutput};
use crate::errors::{CheckpointIoError, PlanflowError};
use crate::routing::rules;
use crate::stages::StageProcessor;
use crate::testing::{
    assert_completed, assert_completed_times, assert_failed, assert_progress_monotonic,
    assert_stage, assert_waiting_at, fast_config, review_output, sample_inputs, sample_selection,
    FailingProcessor, ScriptedProcessor, SlowProcessor, WorkflowHarness,
};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Runs the engine, answering every suspension with a sample selection.
async fn drive(engine: &mut ExecutionEngine) -> RunOutcome {
    for _ in 0..32 {
        match engine.run().await.unwrap() {
            RunOutcome::Suspended(kind) => engine
                .submit_selection(kind.as_str(), sample_selection(kind))
                .await
                .unwrap(),
            outcome => return outcome,
        }
    }
    panic!("workflow did not halt");
}

fn harness_with(stage: Stage, processor: Arc<dyn StageProcessor>) -> WorkflowHarness {
    WorkflowHarness::with_processors(vec![(stage, processor)], fast_config()).unwrap()
}

fn transition_progress(harness: &WorkflowHarness) -> Vec<u8> {
    harness
        .sink
        .events_of_type(event_types::TRANSITION)
        .iter()
        .map(|event| event.progress)
        .collect()
}

#[tokio::test]
async fn test_happy_path_suspends_at_each_selection() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut engine = harness.engine(false);

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Suspended(SelectionType::Idea));
    assert_waiting_at(engine.context(), Stage::IdeaSelection);
    assert_completed_times(engine.context(), Stage::IdeaGeneration, 1);
    assert_completed_times(engine.context(), Stage::IdeaSelection, 0);
    assert_eq!(engine.context().progress(), 15);

    engine
        .submit_selection("idea", json!({"title": "Tropical Bash"}))
        .await
        .unwrap();
    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Suspended(SelectionType::Location));
    assert_completed_times(engine.context(), Stage::IdeaGeneration, 1);
    assert_completed_times(engine.context(), Stage::IdeaSelection, 1);

    let outcome = drive(&mut engine).await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_completed(engine.context());
    assert_completed_times(engine.context(), Stage::EmailDistribution, 0);
    assert_progress_monotonic(&transition_progress(&harness), 0);

    let stored = harness.store.load(engine.workflow_id()).await.unwrap();
    assert_eq!(&stored, engine.context());
    assert_eq!(harness.sink.events_of_type(event_types::COMPLETED).len(), 1);
}

#[tokio::test]
async fn test_email_distribution_runs_when_enabled() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut engine = harness.engine(true);

    assert_eq!(drive(&mut engine).await, RunOutcome::Completed);
    assert_completed_times(engine.context(), Stage::EmailDistribution, 1);
    let plan = engine.context().final_plan();
    assert_eq!(plan["email_distribution"], json!(true));
    assert_eq!(plan["idea"], sample_selection(SelectionType::Idea));
}

#[tokio::test]
async fn test_targeted_revision_rolls_back_to_schedule() {
    let review = ScriptedProcessor::new(
        "review",
        vec![
            review_output(rules::NEEDS_REVISION, 6.0)
                .with_revision_request(Stage::SchedulePlanning, "timeline too tight"),
            review_output(rules::APPROVED, 9.0),
        ],
    );
    let harness = harness_with(Stage::ReviewPhase, Arc::new(review));
    let mut engine = harness.engine(false);

    assert_eq!(drive(&mut engine).await, RunOutcome::Completed);

    let ctx = engine.context();
    assert_completed(ctx);
    assert_eq!(ctx.revision_count(Stage::SchedulePlanning), 1);
    assert_completed_times(ctx, Stage::SchedulePlanning, 2);
    assert_completed_times(ctx, Stage::ScheduleApproval, 2);
    assert_completed_times(ctx, Stage::IdeaGeneration, 1);
    assert!(ctx.revision_requests().is_empty());

    let rollback = ctx
        .history()
        .iter()
        .find(|entry| entry.outcome == TransitionOutcome::RolledBack)
        .unwrap();
    assert_eq!(rollback.stage, Stage::HandleRevisions);
    assert_eq!(rollback.next_stage, Some(Stage::SchedulePlanning));

    assert_eq!(harness.sink.events_of_type(event_types::ROLLED_BACK).len(), 1);
    assert_progress_monotonic(&transition_progress(&harness), 1);
}

#[tokio::test]
async fn test_low_score_approval_is_sent_for_revision() {
    let review = ScriptedProcessor::new(
        "review",
        vec![
            review_output(rules::APPROVED, 7.5)
                .with_revision_request(Stage::InvitationCreation, "tone"),
            review_output(rules::APPROVED, 8.0),
        ],
    );
    let harness = harness_with(Stage::ReviewPhase, Arc::new(review));
    let mut engine = harness.engine(false);

    assert_eq!(drive(&mut engine).await, RunOutcome::Completed);
    assert_eq!(engine.context().revision_count(Stage::InvitationCreation), 1);
    assert_completed_times(engine.context(), Stage::ReviewPhase, 2);
}

#[tokio::test]
async fn test_major_changes_exhaust_revision_limit() {
    let review = ScriptedProcessor::repeating("review", review_output(rules::NEEDS_MAJOR_CHANGES, 3.0));
    let harness = harness_with(Stage::ReviewPhase, Arc::new(review));
    let mut engine = harness.engine(false);

    assert_eq!(drive(&mut engine).await, RunOutcome::Failed);

    let ctx = engine.context();
    assert_failed(ctx);
    assert_eq!(ctx.revision_count(Stage::IdeaGeneration), 2);
    assert_completed_times(ctx, Stage::IdeaGeneration, 3);
    assert!(ctx
        .errors()
        .iter()
        .any(|record| record.message.contains("Revision limit exceeded")));
    assert_eq!(harness.sink.events_of_type(event_types::FAILED).len(), 1);
}

#[tokio::test]
async fn test_insufficient_research_loop_terminates() {
    let research = Arc::new(ScriptedProcessor::repeating(
        "venues",
        StageOutput::ok_value("venues", json!(["only one"])).with_result_count(1),
    ));
    let harness = harness_with(Stage::LocationResearch, research.clone());
    let mut engine = harness.engine(false);

    assert_eq!(drive(&mut engine).await, RunOutcome::Failed);
    assert_eq!(research.call_count(), 3);
    assert_eq!(engine.context().revision_count(Stage::LocationResearch), 2);

    let counts: Vec<u32> = research.calls().iter().map(|call| call.revision_count).collect();
    assert_eq!(counts, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_research_recovers_after_repeat() {
    let research = Arc::new(ScriptedProcessor::new(
        "vendors",
        vec![
            StageOutput::ok_value("packages", json!(["A"])).with_needs_more_research(true),
            StageOutput::ok_value("packages", json!(["A", "B", "C"])).with_result_count(3),
        ],
    ));
    let harness = harness_with(Stage::VendorResearch, research.clone());
    let mut engine = harness.engine(false);

    assert_eq!(drive(&mut engine).await, RunOutcome::Completed);
    assert_eq!(research.call_count(), 2);
    assert!(!engine.context().needs_more_research(Stage::VendorResearch));
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let ideas = Arc::new(ScriptedProcessor::new(
        "ideas",
        vec![
            StageOutput::fail_retryable("rate limited"),
            crate::testing::default_output(Stage::IdeaGeneration),
        ],
    ));
    let harness = harness_with(Stage::IdeaGeneration, ideas.clone());
    let mut engine = harness.engine(false);

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Suspended(SelectionType::Idea));
    assert_eq!(ideas.call_count(), 2);

    let ctx = engine.context();
    assert_eq!(ctx.errors().len(), 1);
    assert_eq!(ctx.errors()[0].severity, ErrorSeverity::Recoverable);
    let entry = ctx
        .history()
        .iter()
        .find(|entry| entry.stage == Stage::IdeaGeneration)
        .unwrap();
    assert_eq!(entry.attempt, 2);
    assert_eq!(harness.sink.events_of_type(event_types::RETRYING).len(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_fail_workflow() {
    let ideas = Arc::new(FailingProcessor::retryable("ideas", "rate limited"));
    let harness = harness_with(Stage::IdeaGeneration, ideas.clone());
    let mut engine = harness.engine(false);

    assert_eq!(engine.run().await.unwrap(), RunOutcome::Failed);
    assert_eq!(ideas.call_count(), 2);
    assert_failed(engine.context());

    let last = engine.context().history().last().unwrap();
    assert_eq!(last.outcome, TransitionOutcome::Failed);
    assert_eq!(last.stage, Stage::IdeaGeneration);
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let ideas = Arc::new(FailingProcessor::new("ideas", "invalid prompt"));
    let harness = harness_with(Stage::IdeaGeneration, ideas.clone());
    let mut engine = harness.engine(false);

    assert_eq!(engine.run().await.unwrap(), RunOutcome::Failed);
    assert_eq!(ideas.call_count(), 1);
    assert!(engine.context().errors()[0].message.contains("invalid prompt"));
}

#[tokio::test]
async fn test_invalid_request_fails_at_initialization() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut inputs = sample_inputs();
    inputs.insert("guests".to_string(), json!(0));
    let mut engine = harness.engine_for(crate::context::WorkflowContext::new(inputs, false));

    assert_eq!(engine.run().await.unwrap(), RunOutcome::Failed);
    assert_eq!(engine.context().history().len(), 1);
    assert!(engine.context().errors()[0].message.contains("guests"));
}

#[tokio::test]
async fn test_processor_timeout_is_a_failure() {
    let slow: Arc<dyn StageProcessor> = Arc::new(SlowProcessor::new(
        "slow",
        Duration::from_millis(500),
        StageOutput::ok_empty(),
    ));
    let config = fast_config()
        .with_stage_timeout(Duration::from_millis(20))
        .with_retry(RetryPolicy::none());
    let harness = WorkflowHarness::with_processors(vec![(Stage::SchedulePlanning, slow)], config).unwrap();
    let mut engine = harness.engine(false);

    assert_eq!(drive(&mut engine).await, RunOutcome::Failed);
    assert_stage(engine.context(), Stage::Error);
    let last = engine.context().errors().last().unwrap();
    assert_eq!(last.stage, Stage::SchedulePlanning);
    assert!(last.message.contains("timed out"));
}

#[tokio::test]
async fn test_needs_input_outside_selection_stage_fails() {
    let invitation = Arc::new(ScriptedProcessor::repeating("invitation", StageOutput::needs_input()));
    let harness = harness_with(Stage::InvitationCreation, invitation);
    let mut engine = harness.engine(false);

    assert_eq!(drive(&mut engine).await, RunOutcome::Failed);
    assert_eq!(engine.context().errors().last().unwrap().stage, Stage::InvitationCreation);
}

#[tokio::test]
async fn test_fatal_issue_routes_to_error() {
    let invitation = Arc::new(ScriptedProcessor::repeating(
        "invitation",
        StageOutput::ok_value("invitation", json!("")).with_issue("empty invitation", true),
    ));
    let harness = harness_with(Stage::InvitationCreation, invitation);
    let mut engine = harness.engine(false);

    assert_eq!(drive(&mut engine).await, RunOutcome::Failed);
    let messages: Vec<&str> = engine
        .context()
        .errors()
        .iter()
        .map(|record| record.message.as_str())
        .collect();
    assert!(messages.contains(&"empty invitation"));
    assert!(messages.iter().any(|m| m.contains("fatal issue")));
}

#[tokio::test]
async fn test_checkpoint_failure_does_not_advance() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut store = MockCheckpointStore::new();
    store.expect_save().returning(|id, _| {
        Err(CheckpointIoError::new(id, "save", "disk full").into())
    });

    let ctx = crate::context::WorkflowContext::new(sample_inputs(), false);
    let mut engine = ExecutionEngine::new(ctx, Arc::clone(&harness.definition), Arc::new(store));

    let err = engine.step().await.unwrap_err();
    assert!(matches!(err, PlanflowError::CheckpointIo(_)));
    assert_stage(engine.context(), Stage::Initialized);
    assert!(engine.context().history().is_empty());
    assert_eq!(engine.context().errors().len(), 1);
    assert!(engine.snapshot().errors[0].message.contains("disk full"));
}

#[tokio::test]
async fn test_cancel_while_waiting_for_vendor() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut engine = harness.engine(false);

    let mut outcome = engine.run().await.unwrap();
    while outcome != RunOutcome::Suspended(SelectionType::Vendor) {
        let RunOutcome::Suspended(kind) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        engine.submit_selection(kind.as_str(), sample_selection(kind)).await.unwrap();
        outcome = engine.run().await.unwrap();
    }

    assert_eq!(engine.cancel_now("user").await.unwrap(), RunOutcome::Cancelled);
    assert_stage(engine.context(), Stage::Cancelled);
    let last = engine.context().history().last().unwrap();
    assert_eq!(last.stage, Stage::VendorSelection);
    assert_eq!(last.outcome, TransitionOutcome::Cancelled);

    let stored = harness.store.load(engine.workflow_id()).await.unwrap();
    assert_eq!(stored.current_stage(), Stage::Cancelled);

    assert_eq!(engine.run().await.unwrap(), RunOutcome::Cancelled);
    assert!(engine.cancel_now("again").await.is_err());
}

#[tokio::test]
async fn test_cancel_discards_in_flight_output() {
    let slow = Arc::new(SlowProcessor::new(
        "ideas",
        Duration::from_millis(100),
        crate::testing::default_output(Stage::IdeaGeneration),
    ));
    let harness = harness_with(Stage::IdeaGeneration, slow);
    let mut engine = harness.engine(false);
    let control = Arc::clone(engine.control());

    let task = tokio::spawn(async move {
        let outcome = engine.run().await;
        (engine, outcome)
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    control.cancel("user");

    let (engine, outcome) = task.await.unwrap();
    assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
    assert!(engine.context().stage_output(Stage::IdeaGeneration).is_none());
    assert_eq!(engine.context().history().last().unwrap().stage, Stage::IdeaGeneration);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut engine = harness.engine(false);

    engine.control().pause();
    assert_eq!(engine.run().await.unwrap(), RunOutcome::Paused);
    assert_stage(engine.context(), Stage::Initialized);
    assert!(engine.snapshot().paused);

    engine.control().resume();
    assert_eq!(engine.run().await.unwrap(), RunOutcome::Suspended(SelectionType::Idea));
    assert!(!engine.snapshot().paused);
}

#[tokio::test]
async fn test_stream_yields_each_step() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut engine = harness.engine(false);

    let steps: Vec<StepOutcome> = {
        let stream = engine.stream();
        futures::pin_mut!(stream);
        let mut steps = Vec::new();
        while let Some(step) = stream.next().await {
            steps.push(step.unwrap());
        }
        steps
    };

    assert_eq!(
        steps,
        vec![
            StepOutcome::Advanced {
                from: Stage::Initialized,
                to: Stage::IdeaGeneration
            },
            StepOutcome::Advanced {
                from: Stage::IdeaGeneration,
                to: Stage::IdeaSelection
            },
            StepOutcome::Halted(RunOutcome::Suspended(SelectionType::Idea)),
        ]
    );
    assert_eq!(
        harness.sink.event_types()[..3].to_vec(),
        vec![
            event_types::STAGE_STARTED.to_string(),
            event_types::STAGE_COMPLETED.to_string(),
            event_types::TRANSITION.to_string(),
        ]
    );
}

#[tokio::test]
async fn test_streaming_and_batch_reach_same_state() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut batch = harness.engine(false);
    let mut streaming = harness.engine(false);

    let batch_outcome = batch.run().await.unwrap();
    let streaming_outcome = streaming.run_streaming().await.unwrap();

    assert_eq!(batch_outcome, streaming_outcome);
    assert_eq!(batch.context().current_stage(), streaming.context().current_stage());
    assert_eq!(batch.context().stage_outputs(), streaming.context().stage_outputs());
}

#[tokio::test]
async fn test_selection_validation_leaves_context_untouched() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut engine = harness.engine(false);

    let err = engine.submit_selection("idea", json!("x")).await.unwrap_err();
    assert!(matches!(err, PlanflowError::WorkflowNotWaiting(_)));

    engine.run().await.unwrap();
    let before = engine.context().clone();

    let err = engine.submit_selection("vendor", json!("B")).await.unwrap_err();
    assert!(matches!(err, PlanflowError::SelectionMismatch(_)));
    let err = engine.submit_selection("banana", json!("B")).await.unwrap_err();
    assert!(matches!(err, PlanflowError::SelectionMismatch(_)));
    assert_eq!(engine.context(), &before);

    engine.submit_selection("idea", json!("Tropical Bash")).await.unwrap();
    assert!(!engine.context().waiting_for_input());
    assert_eq!(
        engine.context().selection(SelectionType::Idea),
        Some(&json!("Tropical Bash"))
    );
}

#[tokio::test]
async fn test_resume_from_checkpoint() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut engine = harness.engine(false);
    engine.run().await.unwrap();
    let id = engine.workflow_id();
    drop(engine);

    let restored = harness.store.load(id).await.unwrap();
    let mut engine = harness.engine_for(restored);
    assert_waiting_at(engine.context(), Stage::IdeaSelection);

    assert_eq!(drive(&mut engine).await, RunOutcome::Completed);
    assert_completed_times(engine.context(), Stage::IdeaGeneration, 1);
}

#[tokio::test]
async fn test_restart_keeps_identity() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut engine = harness.engine(false);
    engine.run().await.unwrap();
    let id = engine.workflow_id();

    engine.restart().await.unwrap();

    assert_eq!(engine.workflow_id(), id);
    assert_stage(engine.context(), Stage::Initialized);
    assert!(engine.context().history().is_empty());
    assert_eq!(engine.context().inputs(), &sample_inputs());
    assert_eq!(
        harness.store.load(id).await.unwrap().current_stage(),
        Stage::Initialized
    );
}

#[tokio::test]
async fn test_terminal_step_is_a_no_op() {
    let harness = WorkflowHarness::standard().unwrap();
    let mut engine = harness.engine(false);
    assert_eq!(drive(&mut engine).await, RunOutcome::Completed);
    let events = harness.sink.len();

    assert_eq!(
        engine.step().await.unwrap(),
        StepOutcome::Halted(RunOutcome::Completed)
    );
    assert_eq!(harness.sink.len(), events);
}
