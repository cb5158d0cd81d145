//! Side-effect invoker configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::invoker::HttpInvokerConfig;

/// Collaborator endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InvokerConfig {
    /// URL receiving one POST per processed event
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl InvokerConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// HTTP invoker settings derived from this section
    pub fn http(&self) -> HttpInvokerConfig {
        HttpInvokerConfig::new(self.endpoint.clone()).with_timeout(self.timeout())
    }

    /// Validate invoker configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.endpoint.is_empty() {
            return Err(ValidationError::MissingRequired("INVOKER_ENDPOINT"));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ValidationError::InvalidInvokerEndpoint);
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("invoker.timeout_secs"));
        }
        Ok(())
    }
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    5
}
