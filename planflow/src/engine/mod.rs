//! Workflow execution.
//!
//! A [`WorkflowDefinition`] bundles the stage registry, router and config.
//! An [`ExecutionEngine`] runs one workflow against it, checkpointing after
//! every transition and observing [`ControlToken`] requests between stages.

mod control;
mod definition;
mod executor;
mod retry;

#[cfg(test)]
mod engine_tests;

pub use control::ControlToken;
pub use definition::WorkflowDefinition;
pub use executor::{ExecutionEngine, RunOutcome, StepOutcome};
pub use retry::{BackoffStrategy, JitterStrategy, RetryPolicy};
