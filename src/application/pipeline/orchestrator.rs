//! ConsumerOrchestrator - Idempotent processing of one delivered envelope.
//!
//! ## State Machine
//!
//! ```text
//! Received -> Checked -> Invoked -> Recorded -> Done
//!                |                      |
//!                +-> AlreadyProcessed <-+  (record found / duplicate key)
//! ```
//!
//! Any failure ends the attempt in `Failed` with a classified `Outcome`.
//!
//! ## Transaction Scopes
//!
//! 1. Check scope: `lookup` in its own short transaction
//! 2. No transaction is open while the side effect runs
//! 3. Record scope: `lookup` again, `insert`, `commit`
//!
//! Two deliveries of one message can both pass the check before either
//! records. Both then invoke the side effect; the ledger's unique constraint
//! lets exactly one insert through and the other resolves to
//! `AlreadyProcessed`. The collaborator must tolerate that repeat.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::domain::foundation::{DomainEvent, EventEnvelope, MessageId};
use crate::domain::pipeline::{
    FailureCause, LedgerError, Outcome, ProcessedEventRecord, ProcessingState,
};
use crate::ports::{EventHandler, IdempotencyLedger, SideEffectInvoker};

/// Result of the record scope.
enum RecordStep {
    Recorded(ProcessedEventRecord),
    /// Another delivery recorded the message first.
    Lost,
}

/// EventHandler that runs the idempotent consume state machine for `E`.
///
/// `E` only decides how the entity id is read from the payload; everything
/// else is independent of the event type.
pub struct ConsumerOrchestrator<E: DomainEvent> {
    ledger: Arc<dyn IdempotencyLedger>,
    invoker: Arc<dyn SideEffectInvoker>,
    name: &'static str,
    _event: PhantomData<fn() -> E>,
}

impl<E: DomainEvent> ConsumerOrchestrator<E> {
    pub fn new(
        ledger: Arc<dyn IdempotencyLedger>,
        invoker: Arc<dyn SideEffectInvoker>,
        name: &'static str,
    ) -> Self {
        Self {
            ledger,
            invoker,
            name,
            _event: PhantomData,
        }
    }

    async fn is_processed(&self, message_id: &MessageId) -> Result<bool, LedgerError> {
        let mut tx = self.ledger.begin().await?;
        let found = tx.lookup(message_id).await?;
        tx.commit().await?;
        Ok(found.is_some())
    }

    async fn record(
        &self,
        message_id: &MessageId,
        entity_id: &str,
    ) -> Result<RecordStep, LedgerError> {
        let mut tx = self.ledger.begin().await?;

        if tx.lookup(message_id).await?.is_some() {
            tx.rollback().await?;
            return Ok(RecordStep::Lost);
        }

        let record = match tx.insert(message_id, entity_id).await {
            Ok(record) => record,
            Err(LedgerError::DuplicateKey { .. }) => return Ok(RecordStep::Lost),
            Err(e) => return Err(e),
        };

        match tx.commit().await {
            Ok(()) => Ok(RecordStep::Recorded(record)),
            Err(LedgerError::DuplicateKey { .. }) => Ok(RecordStep::Lost),
            Err(e) => Err(e),
        }
    }

    fn fail(&self, envelope: &EventEnvelope, from: ProcessingState, cause: FailureCause) -> Outcome {
        let outcome = Outcome::failed(cause);
        if let Outcome::FailedRetryable(cause) | Outcome::FailedPermanent(cause) = &outcome {
            tracing::warn!(
                handler = self.name,
                message_id = %envelope.message_id,
                from = %from,
                state = %ProcessingState::Failed,
                retryable = matches!(outcome, Outcome::FailedRetryable(_)),
                error = %cause,
                "Processing attempt failed"
            );
        }
        outcome
    }
}

#[async_trait]
impl<E: DomainEvent + 'static> EventHandler for ConsumerOrchestrator<E> {
    async fn handle(&self, envelope: &EventEnvelope) -> Outcome {
        let message_id = &envelope.message_id;
        tracing::debug!(
            handler = self.name,
            message_id = %message_id,
            event_type = %envelope.event_type,
            state = %ProcessingState::Received,
            "Envelope received"
        );

        let event: E = match envelope.payload_as() {
            Ok(event) => event,
            Err(e) => {
                return self.fail(
                    envelope,
                    ProcessingState::Received,
                    FailureCause::MalformedPayload(e.message),
                )
            }
        };
        let entity_id = event.entity_id();

        match self.is_processed(message_id).await {
            Ok(true) => {
                tracing::info!(
                    handler = self.name,
                    message_id = %message_id,
                    state = %ProcessingState::AlreadyProcessed,
                    "Skipping already processed message"
                );
                return Outcome::AlreadyProcessed;
            }
            Ok(false) => {}
            Err(e) => return self.fail(envelope, ProcessingState::Received, e.into()),
        }
        tracing::debug!(message_id = %message_id, state = %ProcessingState::Checked, "Not yet processed");

        if let Err(e) = self.invoker.invoke(envelope).await {
            return self.fail(envelope, ProcessingState::Checked, e.into());
        }
        tracing::debug!(message_id = %message_id, state = %ProcessingState::Invoked, "Side effect completed");

        match self.record(message_id, &entity_id).await {
            Ok(RecordStep::Recorded(record)) => {
                tracing::debug!(
                    message_id = %message_id,
                    record_id = record.id,
                    state = %ProcessingState::Recorded,
                    "Ledger record committed"
                );
                tracing::info!(
                    handler = self.name,
                    message_id = %message_id,
                    entity_id = %record.entity_id,
                    record_id = record.id,
                    state = %ProcessingState::Done,
                    "Message processed"
                );
                Outcome::Succeeded
            }
            Ok(RecordStep::Lost) => {
                tracing::warn!(
                    handler = self.name,
                    message_id = %message_id,
                    state = %ProcessingState::AlreadyProcessed,
                    "Concurrent delivery recorded this message first; side effect ran twice"
                );
                Outcome::AlreadyProcessed
            }
            Err(e) => self.fail(envelope, ProcessingState::Invoked, e.into()),
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
