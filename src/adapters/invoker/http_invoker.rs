//! HTTP implementation of the SideEffectInvoker port.
//!
//! Sends each envelope as a JSON POST to a single collaborator endpoint.
//! The response body is only read on failure, for the error message.
//!
//! # Configuration
//!
//! ```ignore
//! let config = HttpInvokerConfig::new("http://localhost:8082/notifications")
//!     .with_timeout(Duration::from_secs(5));
//!
//! let invoker = HttpInvoker::new(config)?;
//! ```

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::domain::foundation::EventEnvelope;
use crate::domain::pipeline::InvocationError;
use crate::ports::SideEffectInvoker;

/// Header carrying the message id, so the collaborator can deduplicate.
pub const MESSAGE_ID_HEADER: &str = "x-message-id";

/// Longest error body kept in an `InvocationError`.
const MAX_ERROR_BODY: usize = 512;

/// Configuration for the HTTP invoker.
#[derive(Debug, Clone)]
pub struct HttpInvokerConfig {
    /// Collaborator URL receiving the POST.
    pub endpoint: String,
    /// Bound on the whole request, connect included.
    pub timeout: Duration,
}

impl HttpInvokerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// reqwest-backed invoker.
pub struct HttpInvoker {
    config: HttpInvokerConfig,
    client: Client,
}

impl HttpInvoker {
    /// Builds the invoker and its HTTP client.
    pub fn new(config: HttpInvokerConfig) -> Result<Self, InvocationError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| InvocationError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn map_send_error(&self, e: reqwest::Error) -> InvocationError {
        if e.is_timeout() {
            InvocationError::Timeout {
                timeout_ms: self.config.timeout.as_millis() as u64,
            }
        } else if e.is_connect() {
            InvocationError::Connectivity(format!("Connection failed: {}", e))
        } else if e.is_request() {
            InvocationError::Connectivity(e.to_string())
        } else {
            InvocationError::Other(e.to_string())
        }
    }
}

/// Maps a non-success status to the invocation taxonomy.
fn status_error(status: StatusCode, body: String) -> InvocationError {
    let mut body = body;
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    if status.is_server_error() {
        InvocationError::ServerError {
            status: status.as_u16(),
            body,
        }
    } else {
        InvocationError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl SideEffectInvoker for HttpInvoker {
    async fn invoke(&self, envelope: &EventEnvelope) -> Result<(), InvocationError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header(MESSAGE_ID_HEADER, envelope.message_id.as_str())
            .json(envelope)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(
            message_id = %envelope.message_id,
            status = status.as_u16(),
            "Collaborator returned failure status"
        );
        Err(status_error(status, body))
    }
}
