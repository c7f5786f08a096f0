//! A validated registry + router + config bundle shared by engines.

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::routing::RouterTable;
use crate::stages::StageRegistry;

/// Everything an engine needs besides the context itself.
///
/// Construction validates that the registry and router agree, so an engine
/// never meets a routed stage without a processor.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    registry: StageRegistry,
    router: RouterTable,
    config: EngineConfig,
}

impl WorkflowDefinition {
    /// Builds the event-plan router from `config` and validates the bundle.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad config or a registry that does
    /// not cover the routed stages.
    pub fn new(registry: StageRegistry, config: EngineConfig) -> Result<Self> {
        let router = RouterTable::new(config.routing());
        Self::with_router(registry, router, config)
    }

    /// Validates a bundle with a caller-supplied router.
    ///
    /// # Errors
    ///
    /// Same as [`WorkflowDefinition::new`], plus router table errors.
    pub fn with_router(registry: StageRegistry, router: RouterTable, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        router.validate()?;
        registry.validate(&router)?;
        Ok(Self {
            registry,
            router,
            config,
        })
    }

    /// The stage registry.
    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// The router table.
    #[must_use]
    pub fn router(&self) -> &RouterTable {
        &self.router
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
