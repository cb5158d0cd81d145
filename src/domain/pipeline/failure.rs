//! Failure taxonomy for one processing attempt.

use thiserror::Error;

use crate::domain::foundation::MessageId;

/// Errors raised by the idempotency ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A record for this message id already exists (unique constraint).
    #[error("Processed-event record already exists for message {message_id}")]
    DuplicateKey { message_id: MessageId },

    /// The store could not be reached (pool timeout, I/O, closed connection).
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// Any other storage failure.
    #[error("Ledger storage error: {0}")]
    Storage(String),
}

/// Errors raised by the side-effect invoker.
///
/// Variants carry enough to separate "could not reach the collaborator"
/// from "the collaborator answered with a failure".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    /// Connection refused, DNS failure, reset, or similar.
    #[error("Unable to reach collaborator: {0}")]
    Connectivity(String),

    /// The call did not complete within the configured bound.
    #[error("Collaborator call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The collaborator answered with a 5xx status.
    #[error("Collaborator server error {status}: {body}")]
    ServerError { status: u16, body: String },

    /// The collaborator answered with a non-success, non-5xx status.
    #[error("Collaborator rejected request with {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Anything not covered above.
    #[error("Collaborator call failed: {0}")]
    Other(String),
}

/// Why a processing attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

/// Whether re-invoking the orchestrator could change the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Retryability {
    Retryable,
    NotRetryable,
}

impl Retryability {
    /// Stable label used in logs and dead-letter headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Retryability::Retryable => "retryable",
            Retryability::NotRetryable => "not_retryable",
        }
    }

    /// Parses the label written by [`Retryability::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "retryable" => Some(Retryability::Retryable),
            "not_retryable" => Some(Retryability::NotRetryable),
            _ => None,
        }
    }
}

impl std::fmt::Display for Retryability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised to the transport, already classified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{retryability} failure: {cause}")]
pub struct ConsumeFailure {
    pub retryability: Retryability,
    pub cause: FailureCause,
}

impl ConsumeFailure {
    pub fn is_retryable(&self) -> bool {
        self.retryability == Retryability::Retryable
    }
}
