//! Binds stages to processors and declares their context access.

use super::{InitializeProcessor, RevisionHandler, SelectionGate, StageProcessor};
use crate::core::{SelectionType, Stage};
use crate::errors::{PlanflowError, Result};
use crate::routing::RouterTable;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Context fields a processor can see through its view.
pub const READABLE_FIELDS: [&str; 6] = [
    "inputs",
    "stage_outputs",
    "selections",
    "revision_requests",
    "revision_count_by_stage",
    "email_distribution",
];

/// Context fields a processor output can change. Selections are only ever
/// written by an external actor.
pub const WRITABLE_FIELDS: [&str; 2] = ["stage_outputs", "revision_requests"];

/// One stage's processor plus its declared reads and writes.
#[derive(Debug, Clone)]
pub struct StageRegistration {
    stage: Stage,
    processor: Arc<dyn StageProcessor>,
    reads: Vec<String>,
    writes: Vec<String>,
    retryable: bool,
}

impl StageRegistration {
    /// Creates a registration; failures are retryable unless configured otherwise.
    #[must_use]
    pub fn new(stage: Stage, processor: Arc<dyn StageProcessor>) -> Self {
        Self {
            stage,
            processor,
            reads: Vec::new(),
            writes: Vec::new(),
            retryable: true,
        }
    }

    /// Declares the context fields the processor reads.
    #[must_use]
    pub fn reads<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Declares the context fields the processor writes.
    #[must_use]
    pub fn writes<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Sets whether transient failures of this stage may be retried.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// The registered stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The processor.
    #[must_use]
    pub fn processor(&self) -> &Arc<dyn StageProcessor> {
        &self.processor
    }

    /// Declared reads.
    #[must_use]
    pub fn declared_reads(&self) -> &[String] {
        &self.reads
    }

    /// Declared writes.
    #[must_use]
    pub fn declared_writes(&self) -> &[String] {
        &self.writes
    }

    /// Whether transient failures may be retried.
    #[must_use]
    pub fn retryable(&self) -> bool {
        self.retryable
    }
}

/// Stage -> processor bindings.
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    entries: BTreeMap<Stage, StageRegistration>,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the processors that need no external content:
    /// request validation, the four selection gates and revision dispatch.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut entries = BTreeMap::new();
        let mut put = |registration: StageRegistration| {
            entries.insert(registration.stage(), registration);
        };

        put(StageRegistration::new(Stage::Initialized, Arc::new(InitializeProcessor))
            .reads(["inputs"])
            .with_retryable(false));
        for kind in SelectionType::ALL {
            put(StageRegistration::new(kind.stage(), Arc::new(SelectionGate::new(kind)))
                .reads(["selections"]));
        }
        put(StageRegistration::new(Stage::HandleRevisions, Arc::new(RevisionHandler))
            .reads(["revision_requests"]));

        Self { entries }
    }

    /// Registers a processor.
    ///
    /// # Errors
    ///
    /// Returns a validation error for terminal stages and for stages that
    /// are already registered.
    pub fn register(&mut self, registration: StageRegistration) -> Result<()> {
        let stage = registration.stage();
        if stage.is_terminal() {
            return Err(PlanflowError::validation(format!(
                "cannot register a processor for terminal stage {stage}"
            )));
        }
        if self.entries.contains_key(&stage) {
            return Err(PlanflowError::validation(format!(
                "stage {stage} is already registered"
            )));
        }
        self.entries.insert(stage, registration);
        Ok(())
    }

    /// Registers `processor` for `stage` with default settings.
    ///
    /// # Errors
    ///
    /// Same as [`StageRegistry::register`].
    pub fn register_processor(&mut self, stage: Stage, processor: Arc<dyn StageProcessor>) -> Result<()> {
        self.register(StageRegistration::new(stage, processor))
    }

    /// Replaces (or adds) the registration for a stage.
    pub fn replace(&mut self, registration: StageRegistration) -> Option<StageRegistration> {
        self.entries.insert(registration.stage(), registration)
    }

    /// Returns the registration for `stage`.
    #[must_use]
    pub fn get(&self, stage: Stage) -> Option<&StageRegistration> {
        self.entries.get(&stage)
    }

    /// Returns true if `stage` has a processor.
    #[must_use]
    pub fn contains(&self, stage: Stage) -> bool {
        self.entries.contains_key(&stage)
    }

    /// Registered stages in pipeline order.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.entries.keys().copied()
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks that the registry and router cover exactly the same stages
    /// and that every declared read and write names a field processors can
    /// reach.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing missing processors, unrouted
    /// registrations or undeclarable fields.
    pub fn validate(&self, router: &RouterTable) -> Result<()> {
        for registration in self.entries.values() {
            let stage = registration.stage();
            if let Some(field) = registration.reads.iter().find(|f| !READABLE_FIELDS.contains(&f.as_str())) {
                return Err(PlanflowError::validation(format!(
                    "stage {stage} declares a read of unknown field '{field}'"
                )));
            }
            if let Some(field) = registration.writes.iter().find(|f| !WRITABLE_FIELDS.contains(&f.as_str())) {
                return Err(PlanflowError::validation(format!(
                    "stage {stage} declares a write to '{field}', which processors cannot change"
                )));
            }
        }

        let missing: Vec<String> = router
            .stages()
            .filter(|stage| !self.contains(*stage))
            .map(|stage| stage.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PlanflowError::validation(format!(
                "no processor registered for: {}",
                missing.join(", ")
            )));
        }

        let unrouted: Vec<String> = self
            .stages()
            .filter(|stage| !router.routes(*stage))
            .map(|stage| stage.to_string())
            .collect();
        if !unrouted.is_empty() {
            return Err(PlanflowError::validation(format!(
                "processors registered for unrouted stages: {}",
                unrouted.join(", ")
            )));
        }

        Ok(())
    }
}
