//! DeadLetterRecoverer - Retry and dead-letter policy around a handler.
//!
//! Runs a handler against one consumed record until it resolves:
//! - Success or already processed: done, the caller may commit the offset
//! - Failure: re-invoked immediately while `RetryPolicy` allows it
//! - Exhausted: the original envelope goes to the dead-letter sink
//!
//! Entries that never decoded into an envelope skip the handler and are
//! parked directly.
//!
//! If the dead-letter publish fails the record is NOT resolved and the
//! caller must leave its offset uncommitted.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::foundation::{MessageId, Timestamp};
use crate::domain::pipeline::{Completion, ConsumeFailure, Retryability};
use crate::ports::{
    ConsumedRecord, DeadLetter, DeadLetterSink, DeliveryReceipt, EventHandler, PublishError,
    UndecodableRecord,
};

/// How many times a failing record is attempted before dead-lettering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first delivery included.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
    /// Also retry failures classified NotRetryable.
    pub retry_not_retryable: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::ZERO,
            retry_not_retryable: false,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt follows `attempts_made` failed ones.
    pub fn should_retry(&self, failure: &ConsumeFailure, attempts_made: u32) -> bool {
        let eligible = failure.is_retryable() || self.retry_not_retryable;
        eligible && attempts_made < self.max_attempts.max(1)
    }
}

/// How a consumed record was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The handler succeeded or found the message already processed.
    Completed { completion: Completion, attempts: u32 },
    /// The envelope was parked on the dead-letter channel.
    DeadLettered { receipt: DeliveryReceipt, attempts: u32 },
}

impl Resolution {
    pub fn attempts(&self) -> u32 {
        match self {
            Resolution::Completed { attempts, .. } | Resolution::DeadLettered { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// The record could not be resolved and must be redelivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    #[error("Failed to dead-letter message {message_id} after {attempts} attempts: {source}")]
    DeadLetterFailed {
        message_id: MessageId,
        attempts: u32,
        #[source]
        source: PublishError,
    },

    #[error("Failed to dead-letter undecodable entry {topic}/{partition}@{offset}: {source}")]
    UndecodableNotParked {
        topic: String,
        partition: u32,
        offset: u64,
        #[source]
        source: PublishError,
    },
}

/// Applies a `RetryPolicy` and parks exhausted records in a `DeadLetterSink`.
pub struct DeadLetterRecoverer {
    policy: RetryPolicy,
    sink: Arc<dyn DeadLetterSink>,
}

impl DeadLetterRecoverer {
    pub fn new(policy: RetryPolicy, sink: Arc<dyn DeadLetterSink>) -> Self {
        Self { policy, sink }
    }

    /// Drives `handler` over `consumed` until the record is resolved.
    pub async fn process(
        &self,
        handler: &dyn EventHandler,
        consumed: &ConsumedRecord,
    ) -> Result<Resolution, RecoveryError> {
        let envelope = &consumed.record.envelope;
        let mut attempts = 0;

        let failure = loop {
            attempts += 1;
            let failure = match handler.handle(envelope).await.into_result() {
                Ok(completion) => return Ok(Resolution::Completed { completion, attempts }),
                Err(failure) => failure,
            };

            if !self.policy.should_retry(&failure, attempts) {
                break failure;
            }

            tracing::warn!(
                handler = handler.name(),
                message_id = %envelope.message_id,
                partition = consumed.partition,
                offset = consumed.offset,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                error = %failure,
                "Retrying failed record"
            );
            if !self.policy.backoff.is_zero() {
                tokio::time::sleep(self.policy.backoff).await;
            }
        };

        let dead_letter = DeadLetter {
            envelope: envelope.clone(),
            cause: failure.cause.to_string(),
            classification: failure.retryability,
            attempts,
            source_topic: consumed.topic.clone(),
            source_partition: consumed.partition,
            source_offset: consumed.offset,
            failed_at: Timestamp::now(),
        };

        match self.sink.send(&dead_letter).await {
            Ok(receipt) => {
                tracing::error!(
                    handler = handler.name(),
                    message_id = %envelope.message_id,
                    partition = consumed.partition,
                    offset = consumed.offset,
                    attempt = attempts,
                    classification = %failure.retryability,
                    dlt_topic = %receipt.topic,
                    dlt_offset = receipt.offset,
                    error = %failure.cause,
                    "Record dead-lettered"
                );
                Ok(Resolution::DeadLettered { receipt, attempts })
            }
            Err(source) => {
                tracing::error!(
                    message_id = %envelope.message_id,
                    partition = consumed.partition,
                    offset = consumed.offset,
                    error = %source,
                    "Dead-letter publish failed; record stays uncommitted"
                );
                Err(RecoveryError::DeadLetterFailed {
                    message_id: envelope.message_id.clone(),
                    attempts,
                    source,
                })
            }
        }
    }

    /// Parks an entry whose body never decoded. Retrying cannot fix it.
    pub async fn park_undecodable(
        &self,
        entry: &UndecodableRecord,
    ) -> Result<Resolution, RecoveryError> {
        match self.sink.send_undecodable(entry).await {
            Ok(receipt) => {
                tracing::error!(
                    topic = %entry.topic,
                    partition = entry.partition,
                    offset = entry.offset,
                    classification = %Retryability::NotRetryable,
                    dlt_topic = %receipt.topic,
                    dlt_offset = receipt.offset,
                    error = %entry.reason,
                    "Undecodable entry dead-lettered"
                );
                Ok(Resolution::DeadLettered {
                    receipt,
                    attempts: 0,
                })
            }
            Err(source) => {
                tracing::error!(
                    topic = %entry.topic,
                    partition = entry.partition,
                    offset = entry.offset,
                    error = %source,
                    "Dead-letter publish failed; entry stays uncommitted"
                );
                Err(RecoveryError::UndecodableNotParked {
                    topic: entry.topic.clone(),
                    partition: entry.partition,
                    offset: entry.offset,
                    source,
                })
            }
        }
    }
}
