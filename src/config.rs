//! Orchestrator configuration
//!
//! All tunables are plain serde structs with documented defaults. Durations
//! are stored as millisecond integers and exposed through `Duration`
//! accessors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A value is outside its permitted range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// An environment override could not be parsed
    #[error("Cannot parse {key}={value}")]
    Unparsable {
        /// Environment variable name
        key: String,
        /// Raw value
        value: String,
    },

    /// Malformed configuration document
    #[error("Malformed configuration: {0}")]
    Malformed(String),
}

/// Top-level orchestrator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Pacing between automated actions
    pub pacing: PacingConfig,

    /// Failure recovery policy
    pub healing: HealingConfig,

    /// Action queue settings
    pub queue: QueueConfig,

    /// Content generation settings
    pub generation: GenerationConfig,
}

/// Largest accepted pacing bound: one day
pub const MAX_PACING_DELAY_MS: u64 = 86_400_000;

/// Shape of the pacing distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingDistribution {
    /// Uniform between the bounds
    Uniform,
    /// Log-normal centred between the bounds, clamped into them
    LogNormal,
}

/// Pacing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Lower bound of the inter-action delay in milliseconds
    pub min_delay_ms: u64,

    /// Upper bound of the inter-action delay in milliseconds
    pub max_delay_ms: u64,

    /// Distribution the delay is drawn from
    pub distribution: PacingDistribution,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 4_000,
            distribution: PacingDistribution::Uniform,
        }
    }
}

impl PacingConfig {
    /// Lower delay bound
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    /// Upper delay bound
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check the bounds are ordered and no larger than [`MAX_PACING_DELAY_MS`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_delay_ms > MAX_PACING_DELAY_MS {
            return Err(ConfigError::InvalidValue {
                field: "pacing.max_delay_ms",
                reason: format!(
                    "{} exceeds the {MAX_PACING_DELAY_MS} ms ceiling",
                    self.max_delay_ms
                ),
            });
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "pacing.min_delay_ms",
                reason: format!(
                    "{} exceeds max_delay_ms {}",
                    self.min_delay_ms, self.max_delay_ms
                ),
            });
        }
        Ok(())
    }
}

/// Healing (retry/recovery) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Maximum execution attempts per action, first attempt included
    pub max_attempts: u32,

    /// Initial backoff before the first retry in milliseconds
    pub base_backoff_ms: u64,

    /// Backoff multiplier applied per attempt
    pub backoff_multiplier: f64,

    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl HealingConfig {
    /// Initial backoff
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    /// Backoff ceiling
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Check attempts and multiplier are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "healing.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "healing.backoff_multiplier",
                reason: format!("{} is below 1.0", self.backoff_multiplier),
            });
        }
        Ok(())
    }
}

/// Action queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Upper bound on a single executor call in milliseconds
    pub execution_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            execution_timeout_ms: 60_000,
        }
    }
}

impl QueueConfig {
    /// Executor call timeout
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Check the timeout is non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.execution_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Content generation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Retries after a failed generation before the target errors out
    pub retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { retries: 1 }
    }
}

impl OrchestratorConfig {
    /// Parse a JSON document, filling omitted fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `ORCHESTRATOR_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "ORCHESTRATOR_PACING_MIN_MS")? {
            config.pacing.min_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "ORCHESTRATOR_PACING_MAX_MS")? {
            config.pacing.max_delay_ms = v;
        }
        if let Some(raw) = lookup("ORCHESTRATOR_PACING_DISTRIBUTION") {
            config.pacing.distribution = match raw.trim().to_ascii_lowercase().as_str() {
                "uniform" => PacingDistribution::Uniform,
                "log_normal" | "lognormal" => PacingDistribution::LogNormal,
                _ => {
                    return Err(ConfigError::Unparsable {
                        key: "ORCHESTRATOR_PACING_DISTRIBUTION".to_string(),
                        value: raw,
                    })
                }
            };
        }
        if let Some(v) = parse_var(&lookup, "ORCHESTRATOR_MAX_ATTEMPTS")? {
            config.healing.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "ORCHESTRATOR_BACKOFF_BASE_MS")? {
            config.healing.base_backoff_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "ORCHESTRATOR_BACKOFF_MULTIPLIER")? {
            config.healing.backoff_multiplier = v;
        }
        if let Some(v) = parse_var(&lookup, "ORCHESTRATOR_BACKOFF_MAX_MS")? {
            config.healing.max_backoff_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "ORCHESTRATOR_EXECUTION_TIMEOUT_MS")? {
            config.queue.execution_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "ORCHESTRATOR_GENERATION_RETRIES")? {
            config.generation.retries = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pacing.validate()?;
        self.healing.validate()?;
        self.queue.validate()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Unparsable {
                key: key.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_documented_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.healing.max_attempts, 3);
        assert_eq!(config.healing.base_backoff(), Duration::from_millis(500));
        assert_eq!(config.pacing.min_delay(), Duration::from_secs(1));
        assert_eq!(config.pacing.max_delay(), Duration::from_secs(4));
        assert_eq!(config.generation.retries, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = OrchestratorConfig::from_json_str(
            r#"{"pacing": {"min_delay_ms": 10, "max_delay_ms": 20, "distribution": "log_normal"}}"#,
        )
        .unwrap();

        assert_eq!(config.pacing.min_delay_ms, 10);
        assert_eq!(config.pacing.distribution, PacingDistribution::LogNormal);
        assert_eq!(config.healing, HealingConfig::default());
    }

    #[test]
    fn test_inverted_pacing_bounds_rejected() {
        let result = OrchestratorConfig::from_json_str(
            r#"{"pacing": {"min_delay_ms": 50, "max_delay_ms": 20}}"#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "pacing.min_delay_ms", .. })
        ));
    }

    #[test]
    fn test_pacing_ceiling_enforced() {
        let config = PacingConfig {
            min_delay_ms: 0,
            max_delay_ms: u64::MAX,
            distribution: PacingDistribution::LogNormal,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "pacing.max_delay_ms", .. })
        ));

        let at_ceiling = PacingConfig {
            min_delay_ms: MAX_PACING_DELAY_MS,
            max_delay_ms: MAX_PACING_DELAY_MS,
            ..PacingConfig::default()
        };
        assert!(at_ceiling.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = OrchestratorConfig::default();
        config.healing.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ORCHESTRATOR_MAX_ATTEMPTS", "5"),
            ("ORCHESTRATOR_PACING_MIN_MS", "0"),
            ("ORCHESTRATOR_PACING_MAX_MS", "250"),
            ("ORCHESTRATOR_PACING_DISTRIBUTION", "lognormal"),
        ]
        .into_iter()
        .collect();

        let config =
            OrchestratorConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.healing.max_attempts, 5);
        assert_eq!(config.pacing.max_delay_ms, 250);
        assert_eq!(config.pacing.distribution, PacingDistribution::LogNormal);
    }

    #[test]
    fn test_env_garbage_rejected() {
        let err = OrchestratorConfig::from_lookup(|k| {
            (k == "ORCHESTRATOR_MAX_ATTEMPTS").then(|| "three".to_string())
        })
        .unwrap_err();

        assert_eq!(
            err,
            ConfigError::Unparsable {
                key: "ORCHESTRATOR_MAX_ATTEMPTS".to_string(),
                value: "three".to_string(),
            }
        );
    }
}
