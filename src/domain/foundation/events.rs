//! Event infrastructure for publishing and consuming domain events.
//!
//! This module provides the core types for the pipeline's wire format:
//! - `MessageId` - Unique identifier assigned at publish time (idempotency key)
//! - `EventEnvelope` - Transport wrapper for domain events
//! - `DomainEvent` - Trait that all published domain events implement

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

use super::{DomainError, ErrorCode, Timestamp};

// ============================================
// DomainEvent Trait
// ============================================

/// Trait that all published domain events must implement.
///
/// Provides routing (`event_type`) and the id of the entity the event is
/// about. The entity id is recorded in the idempotency ledger for audit and
/// is the default partition key.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync {
    /// Returns the event type string (e.g., "product.created.v1").
    fn event_type(&self) -> &'static str;

    /// Returns the id of the domain entity this event describes.
    fn entity_id(&self) -> String;
}

/// Unique identifier for a published message (used for deduplication).
///
/// Uses a String internally so ids minted by other producers (ULID, Kafka
/// header values, etc.) can be carried unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a new random MessageId using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a MessageId from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport envelope for domain events.
///
/// Created once by the producer and never modified afterwards: redeliveries,
/// retries and dead-lettering all carry the same envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique id assigned at publish time; the idempotency key.
    pub message_id: MessageId,

    /// Routing key determining the partition (ordering scope).
    pub partition_key: String,

    /// Event type for routing (e.g., "product.created.v1").
    pub event_type: String,

    /// When the event was published.
    pub occurred_at: Timestamp,

    /// Event-specific payload as JSON.
    pub payload: JsonValue,
}

impl EventEnvelope {
    /// Wraps a domain event in a new envelope with a fresh `MessageId`.
    pub fn from_event<E: DomainEvent>(
        event: &E,
        partition_key: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let payload = serde_json::to_value(event).map_err(|e| {
            DomainError::new(
                ErrorCode::SerializationFailed,
                format!("Failed to serialize {}: {}", event.event_type(), e),
            )
        })?;

        Ok(Self {
            message_id: MessageId::new(),
            partition_key: partition_key.into(),
            event_type: event.event_type().to_string(),
            occurred_at: Timestamp::now(),
            payload,
        })
    }

    /// Deserialize payload to a specific event type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DomainError::new(
                ErrorCode::MalformedPayload,
                format!("Payload of {} is not a valid {}: {}", self.message_id, self.event_type, e),
            )
        })
    }

    /// Encodes the envelope for the wire.
    pub fn to_json(&self) -> Result<String, DomainError> {
        serde_json::to_string(self).map_err(|e| {
            DomainError::new(ErrorCode::SerializationFailed, format!("Failed to encode envelope: {}", e))
        })
    }

    /// Decodes an envelope read from the wire.
    pub fn from_json(raw: &str) -> Result<Self, DomainError> {
        serde_json::from_str(raw).map_err(|e| {
            DomainError::new(ErrorCode::MalformedPayload, format!("Failed to decode envelope: {}", e))
        })
    }
}

/// Chooses the partition for a key.
///
/// FNV-1a over the key bytes, so the same key always maps to the same
/// partition regardless of which broker adapter or process computes it.
pub fn partition_for(partition_key: &str, partitions: u32) -> u32 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    if partitions <= 1 {
        return 0;
    }

    let hash = partition_key
        .as_bytes()
        .iter()
        .fold(FNV_OFFSET, |acc, byte| (acc ^ u64::from(*byte)).wrapping_mul(FNV_PRIME));

    (hash % u64::from(partitions)) as u32
}

#[cfg(test)]
impl EventEnvelope {
    /// Creates a test fixture EventEnvelope for use in tests.
    pub fn test_fixture(message_id: &str, partition_key: &str) -> Self {
        Self {
            message_id: MessageId::from_string(message_id),
            partition_key: partition_key.to_string(),
            event_type: "test.event.v1".to_string(),
            occurred_at: Timestamp::now(),
            payload: serde_json::json!({ "entity_id": partition_key }),
        }
    }
}
