//! Idempotency ledger adapters.
//!
//! - `InMemoryLedger` - Process-local ledger for tests and local runs
//! - `PostgresLedger` - `processed_events` table with a unique `message_id`

mod in_memory;
mod postgres;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;
