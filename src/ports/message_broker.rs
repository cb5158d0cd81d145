//! MessageBroker port - Interface to the partitioned message transport.
//!
//! The broker owns topics, partitions and per-group committed offsets. The
//! pipeline only needs four operations from it: a synchronous send, the
//! partition count, an ordered poll of one partition, and an offset commit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::foundation::EventEnvelope;

/// String headers carried next to an envelope.
pub type Headers = BTreeMap<String, String>;

/// One record as written to a topic: the envelope plus headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerRecord {
    pub envelope: EventEnvelope,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: Headers,
}

impl BrokerRecord {
    pub fn new(envelope: EventEnvelope) -> Self {
        Self {
            envelope,
            headers: Headers::new(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Where the broker persisted a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// A record read back from a partition, with its coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub record: BrokerRecord,
}

/// A partition entry whose body does not decode into a `BrokerRecord`.
///
/// Keeps the raw body so it can be parked verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub body: String,
    pub headers: Headers,
    /// Why decoding failed.
    pub reason: String,
}

/// One entry returned by `poll`.
#[derive(Debug, Clone, PartialEq)]
pub enum Polled {
    Record(ConsumedRecord),
    Undecodable(UndecodableRecord),
}

impl Polled {
    pub fn offset(&self) -> u64 {
        match self {
            Polled::Record(consumed) => consumed.offset,
            Polled::Undecodable(entry) => entry.offset,
        }
    }

    pub fn into_record(self) -> Option<ConsumedRecord> {
        match self {
            Polled::Record(consumed) => Some(consumed),
            Polled::Undecodable(_) => None,
        }
    }
}

/// Decodes a stored body, or explains why it cannot be.
pub fn decode_entry(
    topic: &str,
    partition: u32,
    offset: u64,
    body: &str,
    headers: Headers,
) -> Polled {
    match serde_json::from_str::<BrokerRecord>(body) {
        Ok(record) => Polled::Record(ConsumedRecord {
            topic: topic.to_string(),
            partition,
            offset,
            record,
        }),
        Err(e) => Polled::Undecodable(UndecodableRecord {
            topic: topic.to_string(),
            partition,
            offset,
            body: body.to_string(),
            headers,
            reason: e.to_string(),
        }),
    }
}

/// The broker did not confirm persistence of a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker rejected record for topic '{topic}': {reason}")]
    Rejected { topic: String, reason: String },

    #[error("Failed to encode record: {0}")]
    Encoding(String),
}

/// Consumer-side transport failures (poll/commit).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("Partition {partition} out of range for topic '{topic}'")]
    UnknownPartition { topic: String, partition: u32 },

    #[error("Corrupt entry in {topic}/{partition}: {reason}")]
    CorruptEntry {
        topic: String,
        partition: u32,
        reason: String,
    },
}

/// Port for the partitioned message transport.
///
/// Implementations must ensure:
/// - `send` returns only after the broker persisted the record
/// - The partition is chosen from `envelope.partition_key` deterministically,
///   so records with one key keep their relative order
/// - `poll` returns entries of one partition in offset order, starting at the
///   group's committed offset. An entry whose body does not decode is
///   returned as `Polled::Undecodable`, never as a failed poll
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Appends a record and waits for acknowledgement.
    async fn send(&self, topic: &str, record: BrokerRecord) -> Result<DeliveryReceipt, PublishError>;

    /// Appends a body that is not a `BrokerRecord`, unchanged, to `partition`
    /// (modulo the topic's partition count).
    async fn send_raw(
        &self,
        topic: &str,
        partition: u32,
        body: &str,
        headers: &Headers,
    ) -> Result<DeliveryReceipt, PublishError>;

    /// Number of partitions of a topic.
    async fn partition_count(&self, topic: &str) -> Result<u32, TransportError>;

    /// Reads up to `max` entries from the group's committed offset.
    async fn poll(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
        max: usize,
    ) -> Result<Vec<Polled>, TransportError>;

    /// Advances the group's committed offset to `next_offset`.
    async fn commit(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
        next_offset: u64,
    ) -> Result<(), TransportError>;
}
