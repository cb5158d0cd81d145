//! EventProducer - Publishes domain events with a fresh message id.

use std::sync::Arc;

use crate::domain::foundation::{DomainEvent, EventEnvelope};
use crate::ports::{BrokerRecord, DeliveryReceipt, MessageBroker, PublishError};

/// Wraps events in envelopes and sends them to one topic.
///
/// Makes exactly one send attempt per call and waits for the broker's
/// acknowledgement. Retrying a failed publish is up to the caller.
pub struct EventProducer {
    broker: Arc<dyn MessageBroker>,
    topic: String,
}

impl EventProducer {
    pub fn new(broker: Arc<dyn MessageBroker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    /// Publishes `event` keyed by `partition_key`.
    pub async fn publish<E: DomainEvent>(
        &self,
        event: &E,
        partition_key: &str,
    ) -> Result<DeliveryReceipt, PublishError> {
        let envelope = EventEnvelope::from_event(event, partition_key)
            .map_err(|e| PublishError::Encoding(e.message))?;
        let message_id = envelope.message_id.clone();

        match self.broker.send(&self.topic, BrokerRecord::new(envelope)).await {
            Ok(receipt) => {
                tracing::info!(
                    message_id = %message_id,
                    event_type = event.event_type(),
                    topic = %receipt.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Event published"
                );
                Ok(receipt)
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message_id,
                    event_type = event.event_type(),
                    topic = %self.topic,
                    error = %e,
                    "Event publish failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::InMemoryBroker;
    use crate::application::pipeline::testing::FixtureEvent;
    use crate::domain::foundation::partition_for;

    const TOPIC: &str = "product-created-events-topic";

    fn event(entity_id: &str) -> FixtureEvent {
        FixtureEvent {
            entity_id: entity_id.to_string(),
        }
    }

    #[tokio::test]
    async fn publish_returns_delivery_coordinates() {
        let broker = Arc::new(InMemoryBroker::new(3));
        let producer = EventProducer::new(broker.clone(), TOPIC);

        let first = producer.publish(&event("P1"), "P1").await.unwrap();
        let second = producer.publish(&event("P1"), "P1").await.unwrap();

        assert_eq!(first.topic, TOPIC);
        assert_eq!(first.partition, partition_for("P1", 3));
        assert_eq!(second.partition, first.partition);
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn every_publish_gets_a_fresh_message_id() {
        let broker = Arc::new(InMemoryBroker::new(1));
        let producer = EventProducer::new(broker.clone(), TOPIC);

        producer.publish(&event("P1"), "P1").await.unwrap();
        producer.publish(&event("P1"), "P1").await.unwrap();

        let records = broker.records(TOPIC);
        assert_eq!(records.len(), 2);
        assert_ne!(
            records[0].record.envelope.message_id,
            records[1].record.envelope.message_id
        );
        assert_eq!(records[0].record.envelope.event_type, "test.event.v1");
    }

    #[tokio::test]
    async fn broker_outage_is_a_publish_error() {
        let broker = Arc::new(InMemoryBroker::new(1));
        broker.set_available(false);
        let producer = EventProducer::new(broker.clone(), TOPIC);

        let result = producer.publish(&event("P1"), "P1").await;

        assert!(matches!(result, Err(PublishError::Unavailable(_))));
        broker.set_available(true);
        assert!(broker.records(TOPIC).is_empty());
    }
}
