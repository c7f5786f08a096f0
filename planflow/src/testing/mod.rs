//! Testing utilities for planflow workflows.
//!
//! This module provides:
//! - Mock processors
//! - Fixtures and an in-memory engine harness
//! - Assertions over workflow state

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_completed, assert_completed_times, assert_failed, assert_progress_monotonic,
    assert_stage, assert_waiting_at,
};
pub use fixtures::{
    default_output, fast_config, fixture_registry, priced_context, review_output, sample_inputs,
    sample_prices, sample_selection, WorkflowHarness,
};
pub use mocks::{FailingProcessor, RecordedCall, ScriptedProcessor, SlowProcessor, StaticProcessor};
