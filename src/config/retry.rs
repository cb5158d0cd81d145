//! Retry / dead-letter policy configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::application::pipeline::RetryPolicy;

/// Retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per record, the first included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed pause between attempts, in milliseconds
    #[serde(default)]
    pub backoff_ms: u64,

    /// Retry failures classified as not retryable too
    #[serde(default)]
    pub retry_not_retryable: bool,
}

impl RetryConfig {
    /// Get backoff as Duration
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Policy object handed to the recoverer
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff(),
            retry_not_retryable: self.retry_not_retryable,
        }
    }

    /// Validate retry configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidMaxAttempts);
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: 0,
            retry_not_retryable: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
