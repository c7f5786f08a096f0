//! Stage processors and the registry binding them to stages.
//!
//! A processor is the opaque collaborator that produces a stage's content.
//! The engine treats every processor uniformly through [`StageProcessor`].

mod builtin;
mod registry;

pub use builtin::{InitializeProcessor, RevisionHandler, SelectionGate};
pub use registry::{StageRegistration, StageRegistry, READABLE_FIELDS, WRITABLE_FIELDS};

use crate::context::ContextView;
use crate::core::StageOutput;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for stage processors.
///
/// Processors receive a read-only view of the context and must not keep it
/// after returning. Re-invoking a processor after a transient failure must
/// be safe.
#[async_trait]
pub trait StageProcessor: Send + Sync + Debug {
    /// Returns the name of the processor.
    fn name(&self) -> &str;

    /// Produces the stage's output.
    ///
    /// # Arguments
    ///
    /// * `view` - The context fields visible to the stage
    ///
    /// # Returns
    ///
    /// Data to merge, a request for external input, or a failure.
    async fn process(&self, view: &ContextView) -> StageOutput;
}

/// A simple function-based processor.
pub struct FnProcessor<F>
where
    F: Fn(&ContextView) -> StageOutput + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&ContextView) -> StageOutput + Send + Sync,
{
    /// Creates a new function-based processor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnProcessor<F>
where
    F: Fn(&ContextView) -> StageOutput + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProcessor")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> StageProcessor for FnProcessor<F>
where
    F: Fn(&ContextView) -> StageOutput + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, view: &ContextView) -> StageOutput {
        (self.func)(view)
    }
}
