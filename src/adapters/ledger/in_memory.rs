//! In-memory idempotency ledger for tests and local runs.
//!
//! Behaves like a unique index under read-committed isolation:
//! - Lookups see committed records plus the transaction's own inserts
//! - Inserting a committed message id fails with `DuplicateKey`
//! - Inserting a message id another open transaction already inserted waits
//!   until that transaction ends: `DuplicateKey` if it committed, success
//!   if it rolled back
//! - Dropping an uncommitted transaction releases its reservations

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::domain::foundation::{MessageId, Timestamp};
use crate::domain::pipeline::{LedgerError, ProcessedEventRecord};
use crate::ports::{IdempotencyLedger, LedgerTransaction};

#[derive(Default)]
struct LedgerState {
    committed: HashMap<MessageId, ProcessedEventRecord>,
    /// Ids inserted by open transactions. The receiver closes when the
    /// holder commits or rolls back.
    reserved: HashMap<MessageId, watch::Receiver<()>>,
    next_id: i64,
}

/// In-memory ledger.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store becoming unreachable (`false`) or recovering.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    // === Test Helpers ===

    /// Committed records, ordered by surrogate id.
    pub fn records(&self) -> Vec<ProcessedEventRecord> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut records: Vec<_> = state.committed.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.committed.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> LedgerError {
    LedgerError::Storage("in-memory ledger lock poisoned".to_string())
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("in-memory ledger is offline".to_string()));
        }
        Ok(Box::new(InMemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            holds: Vec::new(),
        }))
    }
}

struct InMemoryTransaction {
    state: Arc<Mutex<LedgerState>>,
    staged: Vec<ProcessedEventRecord>,
    /// Dropping a sender wakes every insert waiting on that id.
    holds: Vec<watch::Sender<()>>,
}

/// What an insert found under the lock.
enum Claim {
    Reserved(ProcessedEventRecord, watch::Sender<()>),
    HeldBy(watch::Receiver<()>),
}

impl InMemoryTransaction {
    fn release(&mut self) {
        if self.staged.is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            for record in self.staged.drain(..) {
                state.reserved.remove(&record.message_id);
            }
        }
        self.holds.clear();
    }

    fn claim(&self, message_id: &MessageId, entity_id: &str) -> Result<Claim, LedgerError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        if state.committed.contains_key(message_id) {
            return Err(LedgerError::DuplicateKey {
                message_id: message_id.clone(),
            });
        }
        if let Some(holder) = state.reserved.get(message_id) {
            return Ok(Claim::HeldBy(holder.clone()));
        }

        state.next_id += 1;
        let record = ProcessedEventRecord {
            id: state.next_id,
            message_id: message_id.clone(),
            entity_id: entity_id.to_string(),
            processed_at: Timestamp::now(),
        };
        let (hold, waiters) = watch::channel(());
        state.reserved.insert(message_id.clone(), waiters);
        Ok(Claim::Reserved(record, hold))
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lookup(
        &mut self,
        message_id: &MessageId,
    ) -> Result<Option<ProcessedEventRecord>, LedgerError> {
        if let Some(own) = self.staged.iter().find(|r| &r.message_id == message_id) {
            return Ok(Some(own.clone()));
        }
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(state.committed.get(message_id).cloned())
    }

    async fn insert(
        &mut self,
        message_id: &MessageId,
        entity_id: &str,
    ) -> Result<ProcessedEventRecord, LedgerError> {
        if self.staged.iter().any(|r| &r.message_id == message_id) {
            return Err(LedgerError::DuplicateKey {
                message_id: message_id.clone(),
            });
        }

        loop {
            match self.claim(message_id, entity_id)? {
                Claim::Reserved(record, hold) => {
                    self.staged.push(record.clone());
                    self.holds.push(hold);
                    return Ok(record);
                }
                Claim::HeldBy(mut holder) => {
                    // Errors once the holder's sender is dropped, even if that
                    // already happened.
                    while holder.changed().await.is_ok() {}
                }
            }
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        {
            let mut state = self.state.lock().map_err(|_| poisoned())?;
            for record in self.staged.drain(..) {
                state.reserved.remove(&record.message_id);
                state.committed.insert(record.message_id.clone(), record);
            }
        }
        self.holds.clear();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), LedgerError> {
        self.release();
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MessageId {
        MessageId::from_string(s)
    }

    #[tokio::test]
    async fn lookup_returns_none_for_unknown_message() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin().await.unwrap();

        assert_eq!(tx.lookup(&id("M1")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn committed_insert_is_visible_to_later_transactions() {
        let ledger = InMemoryLedger::new();

        let mut tx = ledger.begin().await.unwrap();
        let inserted = tx.insert(&id("M1"), "P1").await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = ledger.begin().await.unwrap();
        let found = tx.lookup(&id("M1")).await.unwrap().unwrap();
        assert_eq!(found, inserted);
        assert_eq!(found.entity_id, "P1");
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn uncommitted_insert_is_invisible_to_other_transactions() {
        let ledger = InMemoryLedger::new();

        let mut writer = ledger.begin().await.unwrap();
        writer.insert(&id("M1"), "P1").await.unwrap();
        assert!(writer.lookup(&id("M1")).await.unwrap().is_some());

        let mut reader = ledger.begin().await.unwrap();
        assert!(reader.lookup(&id("M1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_fails_instead_of_overwriting() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin().await.unwrap();
        tx.insert(&id("M1"), "P1").await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = ledger.begin().await.unwrap();
        let err = tx.insert(&id("M1"), "P-other").await.unwrap_err();

        assert_eq!(err, LedgerError::DuplicateKey { message_id: id("M1") });
        assert_eq!(ledger.records()[0].entity_id, "P1");
    }

    #[tokio::test]
    async fn conflicting_insert_waits_and_fails_when_holder_commits() {
        let ledger = InMemoryLedger::new();
        let mut holder = ledger.begin().await.unwrap();
        holder.insert(&id("M2"), "P2").await.unwrap();

        let mut waiter = ledger.begin().await.unwrap();
        let waiting = tokio::spawn(async move { waiter.insert(&id("M2"), "P2").await });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        holder.commit().await.unwrap();
        let err = waiting.await.unwrap().unwrap_err();

        assert_eq!(err, LedgerError::DuplicateKey { message_id: id("M2") });
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn conflicting_insert_succeeds_when_holder_rolls_back() {
        let ledger = InMemoryLedger::new();
        let mut holder = ledger.begin().await.unwrap();
        holder.insert(&id("M2"), "P-first").await.unwrap();

        let mut waiter = ledger.begin().await.unwrap();
        let waiting = tokio::spawn(async move {
            let record = waiter.insert(&id("M2"), "P-second").await.unwrap();
            waiter.commit().await.unwrap();
            record
        });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        holder.rollback().await.unwrap();
        let record = waiting.await.unwrap();

        let records = ledger.records();
        assert_eq!(records, vec![record]);
        assert_eq!(records[0].entity_id, "P-second");
    }

    #[tokio::test]
    async fn same_transaction_cannot_insert_twice() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin().await.unwrap();
        tx.insert(&id("M1"), "P1").await.unwrap();

        let err = tx.insert(&id("M1"), "P1").await.unwrap_err();

        assert!(matches!(err, LedgerError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn rollback_and_drop_release_the_key() {
        let ledger = InMemoryLedger::new();

        let mut tx = ledger.begin().await.unwrap();
        tx.insert(&id("M1"), "P1").await.unwrap();
        tx.rollback().await.unwrap();

        {
            let mut tx = ledger.begin().await.unwrap();
            tx.insert(&id("M1"), "P1").await.unwrap();
        }

        let mut tx = ledger.begin().await.unwrap();
        tx.insert(&id("M1"), "P1").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn offline_ledger_reports_unavailable() {
        let ledger = InMemoryLedger::new();
        ledger.set_available(false);

        assert!(matches!(
            ledger.begin().await,
            Err(LedgerError::Unavailable(_))
        ));
    }
}
