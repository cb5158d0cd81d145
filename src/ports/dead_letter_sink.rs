//! DeadLetterSink port - Where unrecoverable envelopes are parked.
//!
//! A dead letter carries the original envelope byte-for-byte plus the
//! failure metadata needed for offline inspection and replay. On the broker
//! the metadata travels as `dlt-*` headers so the envelope itself stays
//! untouched.
//!
//! An entry that never decoded into an envelope is parked as its raw body
//! with the same headers, classified `not_retryable` with zero attempts.

use async_trait::async_trait;

use super::message_broker::{
    BrokerRecord, ConsumedRecord, DeliveryReceipt, Headers, PublishError, UndecodableRecord,
};
use crate::domain::foundation::{EventEnvelope, Timestamp};
use crate::domain::pipeline::Retryability;

pub const HEADER_CAUSE: &str = "dlt-cause";
pub const HEADER_CLASSIFICATION: &str = "dlt-classification";
pub const HEADER_ATTEMPTS: &str = "dlt-attempts";
pub const HEADER_SOURCE_TOPIC: &str = "dlt-source-topic";
pub const HEADER_SOURCE_PARTITION: &str = "dlt-source-partition";
pub const HEADER_SOURCE_OFFSET: &str = "dlt-source-offset";
pub const HEADER_FAILED_AT: &str = "dlt-failed-at";

/// An envelope that exhausted its recovery policy.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    /// The original envelope, unmodified.
    pub envelope: EventEnvelope,
    /// Display form of the last failure.
    pub cause: String,
    pub classification: Retryability,
    /// Processing attempts actually made.
    pub attempts: u32,
    pub source_topic: String,
    pub source_partition: u32,
    pub source_offset: u64,
    pub failed_at: Timestamp,
}

impl DeadLetter {
    /// Encodes as a broker record: envelope unchanged, metadata in headers.
    pub fn to_record(&self) -> BrokerRecord {
        let mut record = BrokerRecord::new(self.envelope.clone());
        record.headers = metadata_headers(
            &self.cause,
            self.classification,
            self.attempts,
            (self.source_topic.as_str(), self.source_partition, self.source_offset),
            &self.failed_at,
        );
        record
    }

    /// Decodes a record read from a dead-letter topic.
    ///
    /// Returns `None` if any `dlt-*` header is missing or unparseable.
    pub fn from_consumed(consumed: &ConsumedRecord) -> Option<Self> {
        let record = &consumed.record;
        Some(Self {
            envelope: record.envelope.clone(),
            cause: record.header(HEADER_CAUSE)?.to_string(),
            classification: Retryability::parse(record.header(HEADER_CLASSIFICATION)?)?,
            attempts: record.header(HEADER_ATTEMPTS)?.parse().ok()?,
            source_topic: record.header(HEADER_SOURCE_TOPIC)?.to_string(),
            source_partition: record.header(HEADER_SOURCE_PARTITION)?.parse().ok()?,
            source_offset: record.header(HEADER_SOURCE_OFFSET)?.parse().ok()?,
            failed_at: Timestamp::parse_rfc3339(record.header(HEADER_FAILED_AT)?)?,
        })
    }
}

fn metadata_headers(
    cause: &str,
    classification: Retryability,
    attempts: u32,
    (topic, partition, offset): (&str, u32, u64),
    failed_at: &Timestamp,
) -> Headers {
    Headers::from([
        (HEADER_CAUSE.to_string(), cause.to_string()),
        (HEADER_CLASSIFICATION.to_string(), classification.as_str().to_string()),
        (HEADER_ATTEMPTS.to_string(), attempts.to_string()),
        (HEADER_SOURCE_TOPIC.to_string(), topic.to_string()),
        (HEADER_SOURCE_PARTITION.to_string(), partition.to_string()),
        (HEADER_SOURCE_OFFSET.to_string(), offset.to_string()),
        (HEADER_FAILED_AT.to_string(), failed_at.to_rfc3339()),
    ])
}

/// Headers for parking an undecodable entry: its own headers plus `dlt-*`.
pub fn undecodable_headers(entry: &UndecodableRecord, failed_at: &Timestamp) -> Headers {
    let mut headers = entry.headers.clone();
    headers.extend(metadata_headers(
        &entry.reason,
        Retryability::NotRetryable,
        0,
        (entry.topic.as_str(), entry.partition, entry.offset),
        failed_at,
    ));
    headers
}

/// Port for publishing dead letters.
///
/// A returned error means the dead letter was NOT persisted; the caller must
/// not acknowledge the original record.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, dead_letter: &DeadLetter) -> Result<DeliveryReceipt, PublishError>;

    /// Parks an entry that could not be decoded, body unchanged.
    async fn send_undecodable(
        &self,
        entry: &UndecodableRecord,
    ) -> Result<DeliveryReceipt, PublishError>;
}
