//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `PRODUCT_EVENTS` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use product_event_pipeline::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//!
//! println!("Consuming {}", config.pipeline.topic);
//! # Ok::<(), product_event_pipeline::config::ConfigError>(())
//! ```

mod database;
mod error;
mod invoker;
mod pipeline;
mod redis;
mod retry;
mod telemetry;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use invoker::InvokerConfig;
pub use pipeline::PipelineConfig;
pub use redis::RedisConfig;
pub use retry::RetryConfig;
pub use telemetry::TelemetryConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration (idempotency ledger)
    pub database: DatabaseConfig,

    /// Redis configuration (stream broker)
    pub redis: RedisConfig,

    /// Topic, group and polling
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Retry / dead-letter policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Collaborator called once per event
    pub invoker: InvokerConfig,

    /// Log output
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `PRODUCT_EVENTS` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `PRODUCT_EVENTS__PIPELINE__PARTITIONS=6` -> `pipeline.partitions = 6`
    /// - `PRODUCT_EVENTS__DATABASE__URL=...` -> `database.url = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing
    /// - Values cannot be parsed into expected types
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("PRODUCT_EVENTS")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for the first invalid section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.redis.validate()?;
        self.pipeline.validate()?;
        self.retry.validate()?;
        self.invoker.validate()?;
        self.telemetry.validate()?;
        Ok(())
    }
}
