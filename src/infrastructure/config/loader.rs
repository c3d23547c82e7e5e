use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid max_requested_count: {0}. Must be at least 1")]
    InvalidMaxRequestedCount(u32),

    #[error("Invalid {name}: {value}. Must be between 0 and 1")]
    InvalidRate { name: &'static str, value: f64 },

    #[error(
        "Invalid canary thresholds: partial_apply_threshold ({0}) \
         must not exceed full_apply_threshold ({1})"
    )]
    InvalidApplyThresholds(f64, f64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then `.rulesmith/config.yaml` (written by `init`), then the
    /// untracked `.rulesmith/local.yaml`, then `RULESMITH_*` variables with
    /// `__` separating nested keys.
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("could not read rulesmith configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".rulesmith/config.yaml"))
            .merge(Yaml::file(".rulesmith/local.yaml"))
            .merge(Env::prefixed("RULESMITH_").split("__"))
    }

    /// Like [`ConfigLoader::load`] with an explicit file in place of the project files.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("RULESMITH_").split("__"))
            .extract()
            .with_context(|| format!("could not read config file {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if !["json", "pretty"].contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.batch.max_requested_count == 0 {
            return Err(ConfigError::InvalidMaxRequestedCount(
                config.batch.max_requested_count,
            ));
        }
        if config.batch.stale_after_minutes <= 0 {
            return Err(ConfigError::ValidationFailed(
                "batch.stale_after_minutes must be positive".to_string(),
            ));
        }

        let rates = [
            ("canary.fixed_ratio", config.canary.fixed_ratio),
            ("canary.auto_accept_threshold", config.canary.auto_accept_threshold),
            ("canary.full_apply_threshold", config.canary.full_apply_threshold),
            ("canary.partial_apply_threshold", config.canary.partial_apply_threshold),
            ("quality_gate.min_auto_accepted_rate", config.quality_gate.min_auto_accepted_rate),
            ("quality_gate.max_fallback_rate", config.quality_gate.max_fallback_rate),
            ("quality_gate.max_needs_review_rate", config.quality_gate.max_needs_review_rate),
            ("proposals.min_confidence", config.proposals.min_confidence),
            ("proposals.degrade_min_confidence", config.proposals.degrade_min_confidence),
        ];
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidRate { name, value });
            }
        }

        if config.canary.partial_apply_threshold > config.canary.full_apply_threshold {
            return Err(ConfigError::InvalidApplyThresholds(
                config.canary.partial_apply_threshold,
                config.canary.full_apply_threshold,
            ));
        }

        if config.rules.path.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("rules.path cannot be empty".to_string()));
        }

        Ok(())
    }
}
