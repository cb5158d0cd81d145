//! In-memory partitioned broker for tests and local runs.
//!
//! Provides deterministic, synchronous delivery with the same contract as the
//! Redis adapter: keyed partitioning, per-partition offsets, and committed
//! offsets per consumer group.
//!
//! Not for production: nothing survives the process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::domain::foundation::partition_for;
use crate::ports::{
    decode_entry, BrokerRecord, ConsumedRecord, DeliveryReceipt, Headers, MessageBroker, Polled,
    PublishError, TransportError, UndecodableRecord,
};

type OffsetKey = (String, String, u32);

/// One slot of a partition log.
#[derive(Clone)]
enum Entry {
    Record(BrokerRecord),
    Raw { body: String, headers: Headers },
}

impl Entry {
    fn to_polled(&self, topic: &str, partition: u32, offset: u64) -> Polled {
        match self {
            Entry::Record(record) => Polled::Record(ConsumedRecord {
                topic: topic.to_string(),
                partition,
                offset,
                record: record.clone(),
            }),
            Entry::Raw { body, headers } => {
                decode_entry(topic, partition, offset, body, headers.clone())
            }
        }
    }
}

/// In-memory broker.
///
/// Features:
/// - Topics auto-created on first use with the default partition count
/// - Availability switch to simulate broker outages
/// - Raw entries via `send_raw`, to exercise undecodable input
/// - Record capture for assertions
///
/// # Example
///
/// ```ignore
/// let broker = Arc::new(InMemoryBroker::new(3));
/// let receipt = broker.send("orders", BrokerRecord::new(envelope)).await?;
/// assert_eq!(broker.records("orders").len(), 1);
/// ```
pub struct InMemoryBroker {
    default_partitions: u32,
    topics: RwLock<HashMap<String, Vec<Vec<Entry>>>>,
    committed: RwLock<HashMap<OffsetKey, u64>>,
    available: AtomicBool,
}

impl InMemoryBroker {
    /// Creates an empty broker; new topics get `default_partitions` partitions.
    pub fn new(default_partitions: u32) -> Self {
        Self {
            default_partitions: default_partitions.max(1),
            topics: RwLock::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Creates a topic with an explicit partition count. No-op if it exists.
    pub fn create_topic(&self, topic: &str, partitions: u32) -> Result<(), TransportError> {
        let mut topics = self.topics.write().map_err(|_| poisoned())?;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize]);
        Ok(())
    }

    /// Simulates the broker going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    // === Test Helpers ===

    /// Returns every entry of a topic, partition by partition.
    fn entries(&self, topic: &str) -> Vec<Polled> {
        let Ok(topics) = self.topics.read() else {
            return Vec::new();
        };
        topics
            .get(topic)
            .map(|partitions| {
                partitions
                    .iter()
                    .enumerate()
                    .flat_map(|(partition, log)| {
                        log.iter().enumerate().map(move |(offset, entry)| {
                            entry.to_polled(topic, partition as u32, offset as u64)
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every decodable record of a topic, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<ConsumedRecord> {
        self.entries(topic)
            .into_iter()
            .filter_map(Polled::into_record)
            .collect()
    }

    /// Returns every entry of a topic that does not decode as a record.
    pub fn undecodable(&self, topic: &str) -> Vec<UndecodableRecord> {
        self.entries(topic)
            .into_iter()
            .filter_map(|polled| match polled {
                Polled::Undecodable(entry) => Some(entry),
                Polled::Record(_) => None,
            })
            .collect()
    }

    /// Returns the committed offset of a group, if any.
    pub fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> Option<u64> {
        self.committed
            .read()
            .ok()?
            .get(&(topic.to_string(), group.to_string(), partition))
            .copied()
    }

    fn ensure_available(&self) -> Result<(), String> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("in-memory broker is offline".to_string())
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

fn poisoned() -> TransportError {
    TransportError::Unavailable("in-memory broker lock poisoned".to_string())
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn send(&self, topic: &str, record: BrokerRecord) -> Result<DeliveryReceipt, PublishError> {
        self.ensure_available().map_err(PublishError::Unavailable)?;

        let mut topics = self
            .topics
            .write()
            .map_err(|_| PublishError::Unavailable("in-memory broker lock poisoned".to_string()))?;
        let partitions = topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.default_partitions as usize]);

        let partition = partition_for(&record.envelope.partition_key, partitions.len() as u32);
        let log = &mut partitions[partition as usize];
        let offset = log.len() as u64;
        log.push(Entry::Record(record));

        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    async fn send_raw(
        &self,
        topic: &str,
        partition: u32,
        body: &str,
        headers: &Headers,
    ) -> Result<DeliveryReceipt, PublishError> {
        self.ensure_available().map_err(PublishError::Unavailable)?;

        let mut topics = self
            .topics
            .write()
            .map_err(|_| PublishError::Unavailable("in-memory broker lock poisoned".to_string()))?;
        let partitions = topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.default_partitions as usize]);

        let partition = partition % partitions.len() as u32;
        let log = &mut partitions[partition as usize];
        let offset = log.len() as u64;
        log.push(Entry::Raw {
            body: body.to_string(),
            headers: headers.clone(),
        });

        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    async fn partition_count(&self, topic: &str) -> Result<u32, TransportError> {
        self.ensure_available().map_err(TransportError::Unavailable)?;
        self.create_topic(topic, self.default_partitions)?;

        let topics = self.topics.read().map_err(|_| poisoned())?;
        topics
            .get(topic)
            .map(|partitions| partitions.len() as u32)
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))
    }

    async fn poll(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
        max: usize,
    ) -> Result<Vec<Polled>, TransportError> {
        self.ensure_available().map_err(TransportError::Unavailable)?;

        let start = self.committed_offset(topic, group, partition).unwrap_or(0);
        let topics = self.topics.read().map_err(|_| poisoned())?;
        let Some(partitions) = topics.get(topic) else {
            return Ok(Vec::new());
        };
        let log = partitions
            .get(partition as usize)
            .ok_or_else(|| TransportError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })?;

        Ok(log
            .iter()
            .enumerate()
            .skip(start as usize)
            .take(max)
            .map(|(offset, entry)| entry.to_polled(topic, partition, offset as u64))
            .collect())
    }

    async fn commit(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
        next_offset: u64,
    ) -> Result<(), TransportError> {
        self.ensure_available().map_err(TransportError::Unavailable)?;

        let mut committed = self.committed.write().map_err(|_| poisoned())?;
        committed.insert(
            (topic.to_string(), group.to_string(), partition),
            next_offset,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::EventEnvelope;

    fn record(message_id: &str, key: &str) -> BrokerRecord {
        BrokerRecord::new(EventEnvelope::test_fixture(message_id, key))
    }

    #[tokio::test]
    async fn send_returns_coordinates_and_stores_record() {
        let broker = InMemoryBroker::new(3);

        let receipt = broker.send("products", record("M1", "P1")).await.unwrap();

        assert_eq!(receipt.topic, "products");
        assert!(receipt.partition < 3);
        assert_eq!(receipt.offset, 0);
        assert_eq!(broker.records("products").len(), 1);
    }

    #[tokio::test]
    async fn same_key_lands_on_same_partition_in_order() {
        let broker = InMemoryBroker::new(3);

        let first = broker.send("products", record("M1", "P1")).await.unwrap();
        let second = broker.send("products", record("M2", "P1")).await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn send_fails_while_offline() {
        let broker = InMemoryBroker::new(1);
        broker.set_available(false);

        let result = broker.send("products", record("M1", "P1")).await;

        assert!(matches!(result, Err(PublishError::Unavailable(_))));
        broker.set_available(true);
        assert!(broker.records("products").is_empty());
    }

    #[tokio::test]
    async fn poll_starts_from_committed_offset() {
        let broker = InMemoryBroker::new(1);
        for id in ["M1", "M2", "M3"] {
            broker.send("products", record(id, "P1")).await.unwrap();
        }

        broker.commit("products", "g", 0, 2).await.unwrap();
        let polled = broker.poll("products", "g", 0, 10).await.unwrap();

        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].offset(), 2);
        let consumed = polled[0].clone().into_record().unwrap();
        assert_eq!(consumed.record.envelope.message_id.as_str(), "M3");
    }

    #[tokio::test]
    async fn raw_entry_polls_as_undecodable_between_records() {
        let broker = InMemoryBroker::new(1);
        broker.send("products", record("M1", "P1")).await.unwrap();
        let receipt = broker
            .send_raw("products", 0, "{not json", &Headers::new())
            .await
            .unwrap();
        broker.send("products", record("M3", "P1")).await.unwrap();

        let polled = broker.poll("products", "g", 0, 10).await.unwrap();

        assert_eq!(receipt.offset, 1);
        assert_eq!(polled.len(), 3);
        assert!(matches!(&polled[1], Polled::Undecodable(e) if e.body == "{not json"));
        assert_eq!(broker.records("products").len(), 2);
        assert_eq!(broker.undecodable("products").len(), 1);
    }

    #[tokio::test]
    async fn groups_track_offsets_independently() {
        let broker = InMemoryBroker::new(1);
        broker.send("products", record("M1", "P1")).await.unwrap();

        broker.commit("products", "a", 0, 1).await.unwrap();

        assert!(broker.poll("products", "a", 0, 10).await.unwrap().is_empty());
        assert_eq!(broker.poll("products", "b", 0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partition_count_creates_topic_with_default() {
        let broker = InMemoryBroker::new(3);
        broker.create_topic("explicit", 5).unwrap();

        assert_eq!(broker.partition_count("fresh").await.unwrap(), 3);
        assert_eq!(broker.partition_count("explicit").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn poll_rejects_unknown_partition() {
        let broker = InMemoryBroker::new(2);
        broker.create_topic("products", 2).unwrap();

        let result = broker.poll("products", "g", 7, 1).await;

        assert!(matches!(result, Err(TransportError::UnknownPartition { .. })));
    }
}
