//! Mock processors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use crate::context::ContextView;
use crate::core::StageOutput;
use crate::stages::StageProcessor;

/// What a processor saw when it was called.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The stage the view was built for.
    pub stage: crate::core::Stage,
    /// The stage's revision count at the time of the call.
    pub revision_count: u32,
    /// Number of pending revision requests.
    pub pending_revisions: usize,
}

/// A processor that replays a script of outputs.
///
/// Once the script is exhausted the last output repeats.
#[derive(Debug)]
pub struct ScriptedProcessor {
    name: String,
    script: Mutex<VecDeque<StageOutput>>,
    last: Mutex<StageOutput>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProcessor {
    /// Creates a processor that returns `outputs` in order.
    #[must_use]
    pub fn new(name: impl Into<String>, outputs: Vec<StageOutput>) -> Self {
        let last = outputs.last().cloned().unwrap_or_else(StageOutput::ok_empty);
        Self {
            name: name.into(),
            script: Mutex::new(outputs.into()),
            last: Mutex::new(last),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a processor that always returns `output`.
    #[must_use]
    pub fn repeating(name: impl Into<String>, output: StageOutput) -> Self {
        Self::new(name, vec![output])
    }

    /// Appends outputs to the script.
    pub fn push(&self, output: StageOutput) {
        self.script.lock().push_back(output);
    }

    /// Returns the number of times the processor was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns what each call saw.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StageProcessor for ScriptedProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, view: &ContextView) -> StageOutput {
        self.calls.lock().push(RecordedCall {
            stage: view.stage(),
            revision_count: view.revision_count(),
            pending_revisions: view.pending_revisions().len(),
        });
        match self.script.lock().pop_front() {
            Some(output) => {
                *self.last.lock() = output.clone();
                output
            }
            None => self.last.lock().clone(),
        }
    }
}

/// A processor that always fails.
#[derive(Debug)]
pub struct FailingProcessor {
    name: String,
    error: String,
    retryable: bool,
    calls: Mutex<usize>,
}

impl FailingProcessor {
    /// Creates a processor with a fatal failure.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            retryable: false,
            calls: Mutex::new(0),
        }
    }

    /// Creates a processor with a transient failure.
    #[must_use]
    pub fn retryable(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::new(name, error)
        }
    }

    /// Returns the number of times the processor was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl StageProcessor for FailingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _view: &ContextView) -> StageOutput {
        *self.calls.lock() += 1;
        if self.retryable {
            StageOutput::fail_retryable(&self.error)
        } else {
            StageOutput::fail(&self.error)
        }
    }
}

/// A processor that answers every call with the same output.
///
/// Unlike [`ScriptedProcessor`] it keeps no call log, so it suits
/// long-lived registries and benchmarks.
#[derive(Debug, Clone)]
pub struct StaticProcessor {
    name: String,
    output: StageOutput,
}

impl StaticProcessor {
    /// Creates a processor that always returns `output`.
    #[must_use]
    pub fn new(name: impl Into<String>, output: StageOutput) -> Self {
        Self {
            name: name.into(),
            output,
        }
    }
}

#[async_trait]
impl StageProcessor for StaticProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _view: &ContextView) -> StageOutput {
        self.output.clone()
    }
}

/// A processor that sleeps before answering.
#[derive(Debug)]
pub struct SlowProcessor {
    name: String,
    delay: Duration,
    output: StageOutput,
}

impl SlowProcessor {
    /// Creates a processor that returns `output` after `delay`.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration, output: StageOutput) -> Self {
        Self {
            name: name.into(),
            delay,
            output,
        }
    }

    /// Creates a slow processor with an empty success output.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms), StageOutput::ok_empty())
    }
}

#[async_trait]
impl StageProcessor for SlowProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _view: &ContextView) -> StageOutput {
        tokio::time::sleep(self.delay).await;
        self.output.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkflowContext;
    use crate::core::{OutputStatus, Stage};
    use crate::testing::sample_inputs;

    fn view() -> ContextView {
        WorkflowContext::new(sample_inputs(), false)
            .at_stage(Stage::IdeaGeneration)
            .view()
    }

    #[tokio::test]
    async fn test_scripted_processor_repeats_last() {
        let processor = ScriptedProcessor::new(
            "ideas",
            vec![StageOutput::fail_retryable("busy"), StageOutput::ok_empty()],
        );
        let view = view();

        assert!(processor.process(&view).await.is_failure());
        assert!(processor.process(&view).await.is_ok());
        assert!(processor.process(&view).await.is_ok());
        assert_eq!(processor.call_count(), 3);
        assert_eq!(processor.calls()[0].stage, Stage::IdeaGeneration);
    }

    #[tokio::test]
    async fn test_failing_processor() {
        let processor = FailingProcessor::retryable("ideas", "rate limited");
        let output = processor.process(&view()).await;
        assert_eq!(output.status, OutputStatus::Fail);
        assert!(output.retryable);
        assert_eq!(processor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_static_processor() {
        let processor = StaticProcessor::new("fixed", StageOutput::fail("always"));
        assert_eq!(processor.name(), "fixed");
        assert!(processor.process(&view()).await.is_failure());
        assert!(processor.process(&view()).await.is_failure());
    }

    #[tokio::test]
    async fn test_slow_processor() {
        let processor = SlowProcessor::with_delay_ms("slow", 10);
        let start = std::time::Instant::now();
        let output = processor.process(&view()).await;
        assert!(output.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
