//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the pipeline to external systems:
//! - `events` - Brokers (in-memory, Redis Streams) and the dead-letter sink
//! - `ledger` - Idempotency ledgers (in-memory, PostgreSQL)
//! - `invoker` - Side-effect invokers (HTTP)

pub mod events;
pub mod invoker;
pub mod ledger;

pub use events::{BrokerDeadLetterSink, InMemoryBroker, RedisStreamBroker};
pub use invoker::{HttpInvoker, HttpInvokerConfig};
pub use ledger::{InMemoryLedger, PostgresLedger};
