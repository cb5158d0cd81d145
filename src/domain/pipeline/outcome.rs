//! Result of one processing attempt and the states it passes through.

use std::fmt;

use super::classifier::classify;
use super::failure::{ConsumeFailure, FailureCause, Retryability};
use crate::domain::foundation::{MessageId, Timestamp};

/// Persisted proof that a message's side effect was performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEventRecord {
    /// Surrogate id assigned by the ledger.
    pub id: i64,
    pub message_id: MessageId,
    /// Entity the side effect was performed for (audit only).
    pub entity_id: String,
    pub processed_at: Timestamp,
}

/// States a delivery moves through inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Received,
    Checked,
    Invoked,
    Recorded,
    Done,
    AlreadyProcessed,
    Failed,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingState::Received => "received",
            ProcessingState::Checked => "checked",
            ProcessingState::Invoked => "invoked",
            ProcessingState::Recorded => "recorded",
            ProcessingState::Done => "done",
            ProcessingState::AlreadyProcessed => "already_processed",
            ProcessingState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tagged result of one processing attempt. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    AlreadyProcessed,
    Succeeded,
    FailedRetryable(FailureCause),
    FailedPermanent(FailureCause),
}

/// Successful terminal outcomes, as seen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    AlreadyProcessed,
}

impl Outcome {
    /// Builds the failure outcome for a cause using [`classify`].
    pub fn failed(cause: impl Into<FailureCause>) -> Self {
        let cause = cause.into();
        match classify(&cause) {
            Retryability::Retryable => Outcome::FailedRetryable(cause),
            Retryability::NotRetryable => Outcome::FailedPermanent(cause),
        }
    }

    /// Splits the outcome into what the transport acknowledges and what it must recover.
    pub fn into_result(self) -> Result<Completion, ConsumeFailure> {
        match self {
            Outcome::Succeeded => Ok(Completion::Succeeded),
            Outcome::AlreadyProcessed => Ok(Completion::AlreadyProcessed),
            Outcome::FailedRetryable(cause) => Err(ConsumeFailure {
                retryability: Retryability::Retryable,
                cause,
            }),
            Outcome::FailedPermanent(cause) => Err(ConsumeFailure {
                retryability: Retryability::NotRetryable,
                cause,
            }),
        }
    }
}
