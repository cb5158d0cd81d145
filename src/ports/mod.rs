//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the pipeline and the outside world. Adapters implement these ports.
//!
//! ## Consumer Ports
//!
//! - `EventHandler` - Handler bound to a (topic, group) pair
//! - `IdempotencyLedger` / `LedgerTransaction` - Dedup ledger with explicit transactions
//! - `SideEffectInvoker` - The outbound call performed per event
//! - `DeadLetterSink` - Destination for unrecoverable envelopes
//!
//! ## Transport Ports
//!
//! - `MessageBroker` - Partitioned topics with synchronous send and committed offsets

mod dead_letter_sink;
mod event_handler;
mod idempotency_ledger;
mod message_broker;
mod side_effect_invoker;

pub use dead_letter_sink::{
    undecodable_headers, DeadLetter, DeadLetterSink, HEADER_ATTEMPTS, HEADER_CAUSE, HEADER_CLASSIFICATION,
    HEADER_FAILED_AT, HEADER_SOURCE_OFFSET, HEADER_SOURCE_PARTITION, HEADER_SOURCE_TOPIC,
};
pub use event_handler::EventHandler;
pub use idempotency_ledger::{IdempotencyLedger, LedgerTransaction};
pub use message_broker::{
    decode_entry, BrokerRecord, ConsumedRecord, DeliveryReceipt, Headers, MessageBroker, Polled,
    PublishError, TransportError, UndecodableRecord,
};
pub use side_effect_invoker::SideEffectInvoker;
