//! Test fixtures: a fully populated registry, sample requests and a harness
//! that wires an engine to in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use super::StaticProcessor;
use crate::checkpoint::InMemoryCheckpointStore;
use crate::config::EngineConfig;
use crate::context::WorkflowContext;
use crate::core::{DataMap, SelectionType, Stage, StageOutput};
use crate::engine::{ExecutionEngine, RetryPolicy, WorkflowDefinition};
use crate::errors::Result;
use crate::events::CollectingEventSink;
use crate::routing::rules;
use crate::stages::{StageProcessor, StageRegistration, StageRegistry};

/// A birthday party for 25 guests with a 5000 budget.
#[must_use]
pub fn sample_inputs() -> DataMap {
    let mut inputs = DataMap::new();
    inputs.insert("event_type".to_string(), json!("birthday_party"));
    inputs.insert("budget".to_string(), json!(5000));
    inputs.insert("guests".to_string(), json!(25));
    inputs
}

/// Default limits with short timeouts and near-zero retry delays.
#[must_use]
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_stage_timeout(Duration::from_secs(2))
        .with_retry(RetryPolicy::new().with_base_delay_ms(1).with_max_delay_ms(5))
}

/// A review verdict output.
#[must_use]
pub fn review_output(status: &str, score: f64) -> StageOutput {
    StageOutput::ok_empty()
        .add_data("approval_status", json!(status))
        .add_data("quality_score", json!(score))
}

/// One valid value per selection kind.
#[must_use]
pub fn sample_selection(kind: SelectionType) -> Value {
    match kind {
        SelectionType::Idea => json!({"title": "Tropical Bash"}),
        SelectionType::Location => json!({"name": "Harbour Loft"}),
        SelectionType::Vendor => json!({"package": "B"}),
        SelectionType::Schedule => json!(true),
    }
}

/// The happy-path output of every content-producing stage.
#[must_use]
pub fn default_output(stage: Stage) -> StageOutput {
    match stage {
        Stage::IdeaGeneration => StageOutput::ok_value(
            "ideas",
            json!(["Tropical Bash", "Retro Arcade", "Garden Picnic"]),
        )
        .with_result_count(3),
        Stage::LocationResearch => StageOutput::ok_value(
            "venues",
            json!(["Harbour Loft", "Oak Hall", "Rooftop 9"]),
        )
        .with_result_count(3),
        Stage::VendorResearch => {
            StageOutput::ok_value("packages", json!(["A", "B", "C"])).with_result_count(3)
        }
        Stage::SchedulePlanning => StageOutput::ok_value(
            "timeline",
            json!([{"time": "18:00", "item": "Doors open"}]),
        ),
        Stage::InvitationCreation => StageOutput::ok_value("invitation", json!("You're invited!")),
        Stage::ReviewPhase => review_output(rules::APPROVED, 9.0),
        Stage::ExportPreparation => StageOutput::ok_value("artifacts", json!(["plan.pdf"])),
        Stage::EmailDistribution => StageOutput::ok_value("sent", json!(1)),
        _ => StageOutput::ok_empty(),
    }
}

/// `count` full-precision prices spread over many magnitudes, reproducible
/// from `seed`.
#[must_use]
pub fn sample_prices(seed: u64, count: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let magnitude = 10f64.powi(rng.gen_range(-150..150));
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            sign * rng.gen::<f64>() * magnitude
        })
        .collect()
}

/// A context parked at vendor selection whose research output and selection
/// carry `prices` verbatim.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn priced_context(prices: &[f64]) -> WorkflowContext {
    let mut research = DataMap::new();
    research.insert("prices".to_string(), json!(prices));
    research.insert(
        "average".to_string(),
        json!(prices.iter().sum::<f64>() / prices.len().max(1) as f64),
    );
    WorkflowContext::new(sample_inputs(), false)
        .with_stage_output(Stage::VendorResearch, research)
        .with_selection(SelectionType::Vendor, json!({"package": "B", "price": prices.first()}))
        .at_stage(Stage::VendorSelection)
}

/// Built-in processors plus happy-path scripted processors for every
/// content-producing stage.
#[must_use]
pub fn fixture_registry() -> StageRegistry {
    let mut registry = StageRegistry::with_builtins();
    for stage in [
        Stage::IdeaGeneration,
        Stage::LocationResearch,
        Stage::VendorResearch,
        Stage::SchedulePlanning,
        Stage::InvitationCreation,
        Stage::ReviewPhase,
        Stage::ExportPreparation,
        Stage::EmailDistribution,
    ] {
        let processor = StaticProcessor::new(stage.as_str().to_lowercase(), default_output(stage));
        registry.replace(
            StageRegistration::new(stage, Arc::new(processor))
                .reads(["inputs", "selections"])
                .writes(["stage_outputs"]),
        );
    }
    registry
}

/// An engine wired to an in-memory store and a collecting sink.
#[derive(Debug, Clone)]
pub struct WorkflowHarness {
    /// The shared definition.
    pub definition: Arc<WorkflowDefinition>,
    /// Checkpoints written by engines built from this harness.
    pub store: Arc<InMemoryCheckpointStore>,
    /// Events emitted by engines built from this harness.
    pub sink: Arc<CollectingEventSink>,
}

impl WorkflowHarness {
    /// Creates a harness over `registry` and `config`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the definition is inconsistent.
    pub fn new(registry: StageRegistry, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            definition: Arc::new(WorkflowDefinition::new(registry, config)?),
            store: Arc::new(InMemoryCheckpointStore::new()),
            sink: Arc::new(CollectingEventSink::new()),
        })
    }

    /// The fixture registry under [`fast_config`].
    ///
    /// # Errors
    ///
    /// Never fails for the fixture registry; kept fallible for symmetry with
    /// [`WorkflowHarness::new`].
    pub fn standard() -> Result<Self> {
        Self::new(fixture_registry(), fast_config())
    }

    /// The fixture registry with some processors swapped out.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the definition is inconsistent.
    pub fn with_processors(overrides: Vec<(Stage, Arc<dyn StageProcessor>)>, config: EngineConfig) -> Result<Self> {
        let mut registry = fixture_registry();
        for (stage, processor) in overrides {
            registry.replace(StageRegistration::new(stage, processor));
        }
        Self::new(registry, config)
    }

    /// An engine over a fresh context built from [`sample_inputs`].
    #[must_use]
    pub fn engine(&self, email_distribution: bool) -> ExecutionEngine {
        self.engine_for(WorkflowContext::new(sample_inputs(), email_distribution))
    }

    /// An engine over `context`.
    #[must_use]
    pub fn engine_for(&self, context: WorkflowContext) -> ExecutionEngine {
        ExecutionEngine::new(context, Arc::clone(&self.definition), self.store.clone())
            .with_sink(self.sink.clone())
    }
}
