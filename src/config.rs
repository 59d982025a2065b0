//! Configuration System
//!
//! Layered configuration for the lifecycle manager: built-in defaults, an optional TOML
//! file, then `QUERYKEEP_*` environment variables (nested keys separated by `__`,
//! e.g. `QUERYKEEP_EVICTION__GRACE_PERIOD_MS=5000`).

use crate::error::ConfigurationError;
use crate::logging::LoggingConfig;
use crate::usage::DEFAULT_GRACE_PERIOD;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "QUERYKEEP";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LifecycleConfig {
    /// Delayed eviction of unused queries
    #[serde(default)]
    pub eviction: EvictionConfig,

    /// Context update bus
    #[serde(default)]
    pub events: EventConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Time an identity may stay unused before its context is evicted
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_grace_period_ms() -> u64 {
    DEFAULT_GRACE_PERIOD.as_millis() as u64
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl EvictionConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    /// Buffered updates per receiver before slow receivers start lagging
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl LifecycleConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut errors = Vec::new();

        if self.eviction.grace_period_ms == 0 {
            errors.push("eviction.grace_period_ms must be greater than zero".to_string());
        }
        if self.events.channel_capacity == 0 {
            errors.push("events.channel_capacity must be greater than zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "text") {
            errors.push(format!(
                "logging.format must be 'json' or 'text', got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid(errors.join("; ")))
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigurationError> {
        toml::to_string_pretty(self).map_err(|e| ConfigurationError::Invalid(e.to_string()))
    }
}

/// Loads [`LifecycleConfig`] from its layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then the optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<LifecycleConfig, ConfigurationError> {
        let mut builder = builder_with_defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        Self::finish(builder)
    }

    /// Defaults, then a TOML document, then environment overrides.
    pub fn from_toml_str(source: &str) -> Result<LifecycleConfig, ConfigurationError> {
        let builder = builder_with_defaults()?.add_source(File::from_str(source, FileFormat::Toml));
        Self::finish(builder)
    }

    fn finish(
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<LifecycleConfig, ConfigurationError> {
        let config: LifecycleConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

fn builder_with_defaults(
) -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigurationError> {
    Ok(Config::builder()
        .set_default("eviction.grace_period_ms", default_grace_period_ms())?
        .set_default("events.channel_capacity", default_channel_capacity() as u64)?)
}
