//! PostgreSQL implementation of the IdempotencyLedger port.
//!
//! Persists processed-event records to `processed_events`, whose unique
//! index on `message_id` is the only guard against recording a message twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::domain::foundation::{MessageId, Timestamp};
use crate::domain::pipeline::{LedgerError, ProcessedEventRecord};
use crate::ports::{IdempotencyLedger, LedgerTransaction};

/// PostgreSQL implementation of IdempotencyLedger.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgresLedger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled migrations.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to run migrations: {}", e)))
    }
}

#[async_trait]
impl IdempotencyLedger for PostgresLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(e, "begin transaction"))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

/// Open transaction. sqlx rolls back on drop if neither commit nor rollback ran.
struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PostgresTransaction {
    async fn lookup(
        &mut self,
        message_id: &MessageId,
    ) -> Result<Option<ProcessedEventRecord>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, message_id, entity_id, processed_at
            FROM processed_events
            WHERE message_id = $1
            "#,
        )
        .bind(message_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error(e, "look up processed event"))?;

        row.map(row_to_record).transpose()
    }

    async fn insert(
        &mut self,
        message_id: &MessageId,
        entity_id: &str,
    ) -> Result<ProcessedEventRecord, LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (message_id, entity_id)
            VALUES ($1, $2)
            RETURNING id, message_id, entity_id, processed_at
            "#,
        )
        .bind(message_id.as_str())
        .bind(entity_id)
        .fetch_one(&mut *self.tx)
        .await;

        match result {
            Ok(row) => row_to_record(row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(LedgerError::DuplicateKey {
                    message_id: message_id.clone(),
                })
            }
            Err(e) => Err(map_sqlx_error(e, "insert processed event")),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error(e, "commit transaction"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error(e, "roll back transaction"))
    }
}

fn row_to_record(row: PgRow) -> Result<ProcessedEventRecord, LedgerError> {
    let decode = |e: sqlx::Error| LedgerError::Storage(format!("Failed to decode processed event: {}", e));

    let processed_at: DateTime<Utc> = row.try_get("processed_at").map_err(decode)?;
    Ok(ProcessedEventRecord {
        id: row.try_get("id").map_err(decode)?,
        message_id: MessageId::from_string(row.try_get::<String, _>("message_id").map_err(decode)?),
        entity_id: row.try_get("entity_id").map_err(decode)?,
        processed_at: Timestamp::from_datetime(processed_at),
    })
}

/// Connection-level failures become `Unavailable` so they are retried.
fn map_sqlx_error(e: sqlx::Error, action: &str) -> LedgerError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            LedgerError::Unavailable(format!("Failed to {}: {}", action, e))
        }
        other => LedgerError::Storage(format!("Failed to {}: {}", action, other)),
    }
}
