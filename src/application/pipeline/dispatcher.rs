//! ConsumerDispatcher - Binds handlers to (topic, group) pairs and runs them.
//!
//! ## Usage
//!
//! ```ignore
//! let mut dispatcher = ConsumerDispatcher::new(broker, recoverer, DispatcherConfig::default());
//! dispatcher.register("product-created-events-topic", "notifications", Arc::new(orchestrator));
//!
//! let (tx, rx) = tokio::sync::watch::channel(false);
//! dispatcher.run(rx).await?;
//! ```
//!
//! ## Ordering
//!
//! One worker task per (registration, partition). A worker handles its
//! partition's records strictly in offset order and commits `offset + 1`
//! only once the recoverer resolved the record. An entry that does not
//! decode is dead-lettered as-is and committed past. An unresolved record
//! stops the batch, so it is polled again from the committed offset.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::ports::{EventHandler, MessageBroker, Polled, TransportError};

use super::recoverer::{DeadLetterRecoverer, RecoveryError};

/// Polling settings shared by all workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Most records fetched per poll.
    pub poll_batch_size: usize,
    /// Pause after an empty or failed poll.
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_batch_size: 32,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Why a worker stopped its current batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

#[derive(Clone)]
struct Registration {
    topic: String,
    group: String,
    handler: Arc<dyn EventHandler>,
}

/// Explicit handler registry plus the consume loop.
pub struct ConsumerDispatcher {
    broker: Arc<dyn MessageBroker>,
    recoverer: Arc<DeadLetterRecoverer>,
    config: DispatcherConfig,
    registrations: Vec<Registration>,
}

impl ConsumerDispatcher {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        recoverer: Arc<DeadLetterRecoverer>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            broker,
            recoverer,
            config,
            registrations: Vec::new(),
        }
    }

    /// Binds `handler` to every partition of `topic` under consumer `group`.
    pub fn register(
        &mut self,
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        self.registrations.push(Registration {
            topic: topic.into(),
            group: group.into(),
            handler,
        });
        self
    }

    async fn workers(&self) -> Result<Vec<PartitionWorker>, TransportError> {
        let mut workers = Vec::new();
        for registration in &self.registrations {
            let partitions = self.broker.partition_count(&registration.topic).await?;
            for partition in 0..partitions {
                workers.push(PartitionWorker {
                    broker: Arc::clone(&self.broker),
                    recoverer: Arc::clone(&self.recoverer),
                    registration: registration.clone(),
                    partition,
                    config: self.config.clone(),
                });
            }
        }
        Ok(workers)
    }

    /// Runs every worker until `shutdown` turns true or its sender is dropped.
    ///
    /// Each worker finishes the record in hand before stopping.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        let workers = self.workers().await?;
        tracing::info!(
            registrations = self.registrations.len(),
            workers = workers.len(),
            "Starting consumer dispatcher"
        );

        let handles: Vec<_> = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run(shutdown.clone())))
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Partition worker terminated abnormally");
            }
        }

        tracing::info!("Consumer dispatcher stopped");
        Ok(())
    }

    /// Polls one batch from every registered partition, in turn.
    ///
    /// Returns the number of records resolved and committed.
    pub async fn poll_once(&self) -> Result<usize, DispatchError> {
        let (_tx, idle) = watch::channel(false);
        let mut resolved = 0;
        for worker in self.workers().await? {
            resolved += worker.poll_batch(&idle).await?;
        }
        Ok(resolved)
    }
}

struct PartitionWorker {
    broker: Arc<dyn MessageBroker>,
    recoverer: Arc<DeadLetterRecoverer>,
    registration: Registration,
    partition: u32,
    config: DispatcherConfig,
}

impl PartitionWorker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let topic = &self.registration.topic;
        let group = &self.registration.group;
        tracing::debug!(topic = %topic, group = %group, partition = self.partition, "Partition worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.poll_batch(&shutdown).await {
                Ok(resolved) => resolved == 0,
                Err(e) => {
                    tracing::warn!(
                        topic = %topic,
                        group = %group,
                        partition = self.partition,
                        error = %e,
                        "Poll cycle failed; backing off"
                    );
                    true
                }
            };

            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        tracing::debug!(topic = %topic, group = %group, partition = self.partition, "Partition worker stopped");
    }

    async fn poll_batch(&self, shutdown: &watch::Receiver<bool>) -> Result<usize, DispatchError> {
        let Registration {
            topic,
            group,
            handler,
        } = &self.registration;

        let batch = self
            .broker
            .poll(topic, group, self.partition, self.config.poll_batch_size)
            .await?;

        let mut resolved = 0;
        for entry in batch {
            let resolution = match &entry {
                Polled::Record(consumed) => {
                    self.recoverer.process(handler.as_ref(), consumed).await?
                }
                Polled::Undecodable(undecodable) => {
                    self.recoverer.park_undecodable(undecodable).await?
                }
            };
            let offset = entry.offset();
            self.broker
                .commit(topic, group, self.partition, offset + 1)
                .await?;
            resolved += 1;

            tracing::debug!(
                handler = handler.name(),
                partition = self.partition,
                offset,
                attempt = resolution.attempts(),
                "Offset committed"
            );

            if *shutdown.borrow() {
                break;
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::{BrokerDeadLetterSink, InMemoryBroker};
    use crate::adapters::ledger::InMemoryLedger;
    use crate::application::pipeline::testing::{FixtureEvent, ScriptedInvoker};
    use crate::application::pipeline::{ConsumerOrchestrator, RetryPolicy};
    use crate::domain::foundation::EventEnvelope;
    use crate::domain::pipeline::InvocationError;
    use crate::ports::{
        BrokerRecord, ConsumedRecord, DeadLetter, DeadLetterSink, DeliveryReceipt, Headers,
        PublishError, UndecodableRecord, HEADER_CLASSIFICATION, HEADER_SOURCE_OFFSET,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TOPIC: &str = "product-created-events-topic";
    const GROUP: &str = "notifications";

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        ledger: Arc<InMemoryLedger>,
        invoker: Arc<ScriptedInvoker>,
        dispatcher: ConsumerDispatcher,
    }

    fn fixture(invoker: ScriptedInvoker) -> Fixture {
        let broker = Arc::new(InMemoryBroker::new(3));
        let ledger = Arc::new(InMemoryLedger::new());
        let invoker = Arc::new(invoker);
        let sink = Arc::new(BrokerDeadLetterSink::new(broker.clone(), "-dlt"));
        let recoverer = Arc::new(DeadLetterRecoverer::new(RetryPolicy::default(), sink));
        let handler = Arc::new(ConsumerOrchestrator::<FixtureEvent>::new(
            ledger.clone(),
            invoker.clone(),
            "test",
        ));

        let mut dispatcher = ConsumerDispatcher::new(
            broker.clone(),
            recoverer,
            DispatcherConfig {
                poll_batch_size: 10,
                poll_interval: Duration::from_millis(5),
            },
        );
        dispatcher.register(TOPIC, GROUP, handler);

        Fixture {
            broker,
            ledger,
            invoker,
            dispatcher,
        }
    }

    async fn publish(broker: &InMemoryBroker, message_id: &str, key: &str) {
        broker
            .send(TOPIC, BrokerRecord::new(EventEnvelope::test_fixture(message_id, key)))
            .await
            .unwrap();
    }

    fn total_committed(broker: &InMemoryBroker) -> u64 {
        (0..3)
            .map(|p| broker.committed_offset(TOPIC, GROUP, p).unwrap_or(0))
            .sum()
    }

    #[tokio::test]
    async fn poll_once_processes_and_commits_every_partition() {
        let f = fixture(ScriptedInvoker::succeeding());
        for (id, key) in [("M1", "P1"), ("M2", "P2"), ("M3", "P3"), ("M4", "P4")] {
            publish(&f.broker, id, key).await;
        }

        let resolved = f.dispatcher.poll_once().await.unwrap();

        assert_eq!(resolved, 4);
        assert_eq!(f.ledger.len(), 4);
        assert_eq!(total_committed(&f.broker), 4);
        assert_eq!(f.dispatcher.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dead_lettered_records_are_committed() {
        let f = fixture(ScriptedInvoker::always(InvocationError::Timeout { timeout_ms: 1 }));
        publish(&f.broker, "M1", "P1").await;

        assert_eq!(f.dispatcher.poll_once().await.unwrap(), 1);

        assert_eq!(f.invoker.calls(), 3);
        assert_eq!(total_committed(&f.broker), 1);
        let parked = f.broker.records(&format!("{}-dlt", TOPIC));
        assert_eq!(DeadLetter::from_consumed(&parked[0]).unwrap().attempts, 3);
    }

    /// Sink that refuses the first `refusals` dead letters.
    struct RefusingSink {
        refusals: AtomicUsize,
        inner: BrokerDeadLetterSink,
    }

    #[async_trait]
    impl DeadLetterSink for RefusingSink {
        async fn send(&self, dead_letter: &DeadLetter) -> Result<DeliveryReceipt, PublishError> {
            let refuse = self
                .refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refuse {
                return Err(PublishError::Unavailable("dead-letter topic offline".to_string()));
            }
            self.inner.send(dead_letter).await
        }

        async fn send_undecodable(
            &self,
            entry: &UndecodableRecord,
        ) -> Result<DeliveryReceipt, PublishError> {
            self.inner.send_undecodable(entry).await
        }
    }

    #[tokio::test]
    async fn failed_dead_letter_publish_leaves_offset_uncommitted() {
        let broker = Arc::new(InMemoryBroker::new(3));
        let sink = Arc::new(RefusingSink {
            refusals: AtomicUsize::new(1),
            inner: BrokerDeadLetterSink::new(broker.clone(), "-dlt"),
        });
        let invoker = Arc::new(ScriptedInvoker::always(InvocationError::Rejected {
            status: 400,
            body: String::new(),
        }));
        let handler = Arc::new(ConsumerOrchestrator::<FixtureEvent>::new(
            Arc::new(InMemoryLedger::new()),
            invoker.clone(),
            "test",
        ));
        let mut dispatcher = ConsumerDispatcher::new(
            broker.clone(),
            Arc::new(DeadLetterRecoverer::new(RetryPolicy::default(), sink)),
            DispatcherConfig::default(),
        );
        dispatcher.register(TOPIC, GROUP, handler);
        publish(&broker, "M1", "P1").await;
        let partition = broker.records(TOPIC)[0].partition;

        let err = dispatcher.poll_once().await.unwrap_err();

        assert!(matches!(err, DispatchError::Recovery(_)));
        assert_eq!(broker.committed_offset(TOPIC, GROUP, partition), None);

        // Redelivered on the next poll, then parked and committed.
        assert_eq!(dispatcher.poll_once().await.unwrap(), 1);
        assert_eq!(invoker.calls(), 2);
        assert_eq!(broker.committed_offset(TOPIC, GROUP, partition), Some(1));
        assert_eq!(broker.records(&format!("{}-dlt", TOPIC)).len(), 1);
    }

    /// Broker whose entry at one offset fails to decode, the way a foreign
    /// writer's body would on Redis.
    struct CorruptingBroker {
        inner: InMemoryBroker,
        corrupt_offset: u64,
    }

    #[async_trait]
    impl MessageBroker for CorruptingBroker {
        async fn send(
            &self,
            topic: &str,
            record: BrokerRecord,
        ) -> Result<DeliveryReceipt, PublishError> {
            self.inner.send(topic, record).await
        }

        async fn send_raw(
            &self,
            topic: &str,
            partition: u32,
            body: &str,
            headers: &Headers,
        ) -> Result<DeliveryReceipt, PublishError> {
            self.inner.send_raw(topic, partition, body, headers).await
        }

        async fn partition_count(&self, topic: &str) -> Result<u32, TransportError> {
            self.inner.partition_count(topic).await
        }

        async fn poll(
            &self,
            topic: &str,
            group: &str,
            partition: u32,
            max: usize,
        ) -> Result<Vec<Polled>, TransportError> {
            let polled = self.inner.poll(topic, group, partition, max).await?;
            Ok(polled
                .into_iter()
                .map(|entry| match entry {
                    Polled::Record(ConsumedRecord {
                        topic,
                        partition,
                        offset,
                        ..
                    }) if topic == TOPIC && offset == self.corrupt_offset => {
                        Polled::Undecodable(UndecodableRecord {
                            topic,
                            partition,
                            offset,
                            body: "{\"envelope\": truncated".to_string(),
                            headers: Headers::new(),
                            reason: "EOF while parsing an object".to_string(),
                        })
                    }
                    other => other,
                })
                .collect())
        }

        async fn commit(
            &self,
            topic: &str,
            group: &str,
            partition: u32,
            next_offset: u64,
        ) -> Result<(), TransportError> {
            self.inner.commit(topic, group, partition, next_offset).await
        }
    }

    #[tokio::test]
    async fn undecodable_entry_is_dead_lettered_and_partition_keeps_moving() {
        let broker = Arc::new(CorruptingBroker {
            inner: InMemoryBroker::new(1),
            corrupt_offset: 1,
        });
        let ledger = Arc::new(InMemoryLedger::new());
        let invoker = Arc::new(ScriptedInvoker::succeeding());
        let sink = Arc::new(BrokerDeadLetterSink::new(broker.clone(), "-dlt"));
        let handler = Arc::new(ConsumerOrchestrator::<FixtureEvent>::new(
            ledger.clone(),
            invoker.clone(),
            "test",
        ));
        let mut dispatcher = ConsumerDispatcher::new(
            broker.clone(),
            Arc::new(DeadLetterRecoverer::new(RetryPolicy::default(), sink)),
            DispatcherConfig::default(),
        );
        dispatcher.register(TOPIC, GROUP, handler);
        for id in ["M0", "M1", "M2"] {
            broker
                .send(TOPIC, BrokerRecord::new(EventEnvelope::test_fixture(id, "P1")))
                .await
                .unwrap();
        }

        assert_eq!(dispatcher.poll_once().await.unwrap(), 3);

        assert_eq!(invoker.calls(), 2);
        let recorded: Vec<_> = ledger
            .records()
            .into_iter()
            .map(|r| r.message_id.as_str().to_string())
            .collect();
        assert_eq!(recorded, vec!["M0", "M2"]);
        assert_eq!(broker.inner.committed_offset(TOPIC, GROUP, 0), Some(3));

        let parked = broker.inner.undecodable(&format!("{}-dlt", TOPIC));
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].body, "{\"envelope\": truncated");
        assert_eq!(
            parked[0].headers.get(HEADER_CLASSIFICATION).map(String::as_str),
            Some("not_retryable")
        );
        assert_eq!(
            parked[0].headers.get(HEADER_SOURCE_OFFSET).map(String::as_str),
            Some("1")
        );
        assert_eq!(dispatcher.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_consumes_until_shutdown() {
        let f = fixture(ScriptedInvoker::succeeding());
        publish(&f.broker, "M1", "P1").await;
        publish(&f.broker, "M2", "P2").await;

        let (tx, rx) = watch::channel(false);
        let dispatcher = Arc::new(f.dispatcher);
        let running = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.run(rx).await })
        };

        for _ in 0..200 {
            if total_committed(&f.broker) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        running.await.unwrap().unwrap();

        assert_eq!(total_committed(&f.broker), 2);
        assert_eq!(f.ledger.len(), 2);
    }
}
