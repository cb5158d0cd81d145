//! IdempotencyLedger port - Persisted record of already-processed messages.
//!
//! The ledger is the only shared mutable resource in the consumer. Its
//! unique constraint on `message_id` is what stops a message from being
//! recorded twice; no in-process lock stands in for it.
//!
//! ## Why a Transaction Object
//!
//! The orchestrator needs "look up, then insert" to run inside one storage
//! transaction, while keeping the outbound side-effect call *outside* any
//! open transaction. Exposing `begin()` lets the caller decide exactly which
//! operations share a scope.

use async_trait::async_trait;

use crate::domain::foundation::MessageId;
use crate::domain::pipeline::{LedgerError, ProcessedEventRecord};

/// Port for the idempotency ledger.
///
/// # Example
///
/// ```ignore
/// let mut tx = ledger.begin().await?;
/// if tx.lookup(&message_id).await?.is_none() {
///     tx.insert(&message_id, "P1").await?;
/// }
/// tx.commit().await?;
/// ```
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Opens a new transaction scope.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError>;
}

/// One open transaction against the ledger.
///
/// Dropping a transaction without calling `commit` rolls it back.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Finds the record for a message id. No side effects.
    async fn lookup(
        &mut self,
        message_id: &MessageId,
    ) -> Result<Option<ProcessedEventRecord>, LedgerError>;

    /// Inserts a record.
    ///
    /// Fails with `LedgerError::DuplicateKey` if the message id already has
    /// a record. If a concurrent transaction inserted the same id and is
    /// still open, waits for it: `DuplicateKey` if it commits, success if it
    /// rolls back. Never overwrites.
    async fn insert(
        &mut self,
        message_id: &MessageId,
        entity_id: &str,
    ) -> Result<ProcessedEventRecord, LedgerError>;

    /// Makes the transaction's inserts durable.
    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    /// Discards the transaction's inserts.
    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}
