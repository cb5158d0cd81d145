//! DeadLetterSink that republishes to a dead-letter topic on the same broker.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::foundation::Timestamp;
use crate::ports::{
    undecodable_headers, DeadLetter, DeadLetterSink, DeliveryReceipt, MessageBroker, PublishError,
    UndecodableRecord,
};

/// Publishes dead letters to `<source topic><suffix>`.
///
/// The envelope keeps its partition key, so dead letters for one entity stay
/// ordered on the dead-letter topic too.
pub struct BrokerDeadLetterSink {
    broker: Arc<dyn MessageBroker>,
    suffix: String,
}

impl BrokerDeadLetterSink {
    pub fn new(broker: Arc<dyn MessageBroker>, suffix: impl Into<String>) -> Self {
        Self {
            broker,
            suffix: suffix.into(),
        }
    }

    /// Name of the dead-letter topic for a source topic.
    pub fn topic_for(&self, source_topic: &str) -> String {
        format!("{}{}", source_topic, self.suffix)
    }
}

#[async_trait]
impl DeadLetterSink for BrokerDeadLetterSink {
    async fn send(&self, dead_letter: &DeadLetter) -> Result<DeliveryReceipt, PublishError> {
        let topic = self.topic_for(&dead_letter.source_topic);
        self.broker.send(&topic, dead_letter.to_record()).await
    }

    /// Undecodable entries have no partition key; they keep their source partition.
    async fn send_undecodable(
        &self,
        entry: &UndecodableRecord,
    ) -> Result<DeliveryReceipt, PublishError> {
        let topic = self.topic_for(&entry.topic);
        let headers = undecodable_headers(entry, &Timestamp::now());
        self.broker
            .send_raw(&topic, entry.partition, &entry.body, &headers)
            .await
    }
}
