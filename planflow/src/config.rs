//! Engine and session configuration.

use crate::engine::RetryPolicy;
use crate::errors::{PlanflowError, Result};
use crate::routing::RoutingConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable names read by [`EngineConfig::from_env`].
pub mod env_vars {
    /// Revision bound per stage.
    pub const MAX_REVISIONS: &str = "PLANFLOW_MAX_REVISIONS";
    /// Review pass threshold.
    pub const QUALITY_THRESHOLD: &str = "PLANFLOW_QUALITY_THRESHOLD";
    /// Research sufficiency threshold.
    pub const MIN_VALID_RESULTS: &str = "PLANFLOW_MIN_VALID_RESULTS";
    /// Per-invocation processor deadline.
    pub const STAGE_TIMEOUT_SECS: &str = "PLANFLOW_STAGE_TIMEOUT_SECS";
    /// Retry budget per stage.
    pub const MAX_RETRIES: &str = "PLANFLOW_MAX_RETRIES";
    /// Default email distribution flag.
    pub const ENABLE_EMAIL: &str = "PLANFLOW_ENABLE_EMAIL";
}

/// Tuning knobs for one workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum re-entries per stage through backward edges.
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
    /// Minimum review score that counts as a pass (inclusive).
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    /// Research stages with fewer results than this re-run.
    #[serde(default = "default_min_valid_results")]
    pub min_valid_results: usize,
    /// Maximum processor run time in milliseconds.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    /// Retry behavior for transient failures.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Whether new workflows email the finished plan.
    #[serde(default)]
    pub email_distribution: bool,
}

fn default_max_revisions() -> u32 {
    2
}

fn default_quality_threshold() -> f64 {
    8.0
}

fn default_min_valid_results() -> usize {
    3
}

fn default_stage_timeout_ms() -> u64 {
    60_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            quality_threshold: default_quality_threshold(),
            min_valid_results: default_min_valid_results(),
            stage_timeout_ms: default_stage_timeout_ms(),
            retry: RetryPolicy::default(),
            email_distribution: false,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads defaults overlaid with `PLANFLOW_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a variable is set but unparseable, or
    /// if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads defaults overlaid with values from `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`EngineConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = parse_var(&lookup, env_vars::MAX_REVISIONS)? {
            config.max_revisions = value;
        }
        if let Some(value) = parse_var(&lookup, env_vars::QUALITY_THRESHOLD)? {
            config.quality_threshold = value;
        }
        if let Some(value) = parse_var(&lookup, env_vars::MIN_VALID_RESULTS)? {
            config.min_valid_results = value;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, env_vars::STAGE_TIMEOUT_SECS)? {
            config.stage_timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(value) = parse_var(&lookup, env_vars::MAX_RETRIES)? {
            config.retry.max_retries = value;
        }
        if let Some(raw) = lookup(env_vars::ENABLE_EMAIL) {
            config.email_distribution = parse_flag(env_vars::ENABLE_EMAIL, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the revision bound.
    #[must_use]
    pub fn with_max_revisions(mut self, max_revisions: u32) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    /// Sets the review pass threshold.
    #[must_use]
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    /// Sets the research sufficiency threshold.
    #[must_use]
    pub fn with_min_valid_results(mut self, min: usize) -> Self {
        self.min_valid_results = min;
        self
    }

    /// Sets the processor deadline.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the default email distribution flag.
    #[must_use]
    pub fn with_email_distribution(mut self, enabled: bool) -> Self {
        self.email_distribution = enabled;
        self
    }

    /// The processor deadline.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// The subset of settings the router consults.
    #[must_use]
    pub fn routing(&self) -> RoutingConfig {
        RoutingConfig {
            max_revisions: self.max_revisions,
            quality_threshold: self.quality_threshold,
            min_valid_results: self.min_valid_results,
        }
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if !self.quality_threshold.is_finite() || self.quality_threshold < 0.0 {
            return Err(PlanflowError::validation(format!(
                "quality_threshold must be a non-negative number, got {}",
                self.quality_threshold
            )));
        }
        if self.stage_timeout_ms == 0 {
            return Err(PlanflowError::validation("stage_timeout must be greater than zero"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(PlanflowError::validation(
                "retry max_delay_ms must not be below base_delay_ms",
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|err| PlanflowError::validation(format!("{key}={raw:?}: {err}")))
        })
        .transpose()
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(PlanflowError::validation(format!("{key}={raw:?}: expected a boolean"))),
    }
}

/// Settings for a [`SessionManager`](crate::session::SessionManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session is purged from memory, in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Configuration shared by every engine the manager creates.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            engine: EngineConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle TTL.
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl_secs = ttl.as_secs();
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// The idle TTL.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_revisions, 2);
        assert!((config.quality_threshold - 8.0).abs() < f64::EPSILON);
        assert_eq!(config.min_valid_results, 3);
        assert_eq!(config.stage_timeout(), Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 1);
        assert!(!config.email_distribution);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            (env_vars::MAX_REVISIONS, "4"),
            (env_vars::QUALITY_THRESHOLD, "7.5"),
            (env_vars::STAGE_TIMEOUT_SECS, "5"),
            (env_vars::MAX_RETRIES, "3"),
            (env_vars::ENABLE_EMAIL, "true"),
        ]))
        .unwrap();

        assert_eq!(config.max_revisions, 4);
        assert!((config.quality_threshold - 7.5).abs() < f64::EPSILON);
        assert_eq!(config.stage_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.email_distribution);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(lookup(&[(env_vars::MAX_REVISIONS, "lots")])).unwrap_err();
        assert!(matches!(err, PlanflowError::Validation(_)));
        assert!(err.to_string().contains(env_vars::MAX_REVISIONS));

        let err = EngineConfig::from_lookup(lookup(&[(env_vars::ENABLE_EMAIL, "maybe")])).unwrap_err();
        assert!(matches!(err, PlanflowError::Validation(_)));
    }

    #[test]
    fn test_validate() {
        assert!(EngineConfig::new().with_quality_threshold(f64::NAN).validate().is_err());
        assert!(EngineConfig::new().with_quality_threshold(-1.0).validate().is_err());
        assert!(EngineConfig::new().with_stage_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_revisions": 5}"#).unwrap();
        assert_eq!(config.max_revisions, 5);
        assert_eq!(config.min_valid_results, 3);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.session_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.engine, EngineConfig::default());
    }
}
