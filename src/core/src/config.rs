//! Configuration management.
//!
//! Values come from an optional file plus `GATEKEEPER__`-prefixed
//! environment variables, e.g. `GATEKEEPER__CACHE__TTL=30s` or
//! `GATEKEEPER__LOGGING__LEVEL=debug`.

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::telemetry::LoggingConfig;

const ENV_PREFIX: &str = "GATEKEEPER";

/// Main engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Decision cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX).separator("__")
}
