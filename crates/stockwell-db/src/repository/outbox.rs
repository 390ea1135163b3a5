//! # Event Outbox Repository
//!
//! Committed transition events, queued for an external publisher.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ORCHESTRATOR TRANSACTION (e.g., mark_paid)                             │
//! │                                                                         │
//! │  1. UPDATE sales SET lock_seq = lock_seq + 1 ...                        │
//! │  2. INSERT INTO stock_ledger ...                                        │
//! │  3. UPDATE sales SET status = 'paid' ...                                │
//! │  4. INSERT INTO event_outbox (event_type, aggregate_id, payload)        │
//! │                                                                         │
//! │  COMMIT ← the event exists iff the state change exists                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PUBLISHER (outside this crate)                                         │
//! │  1. get_pending(limit)                                                  │
//! │  2. deliver → mark_published(id)  |  fail → mark_failed(id, error)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rejections (over-refund, insufficient stock, invalid state) roll back
//! and are never queued here; they only reach the [`EventSink`].
//!
//! [`EventSink`]: stockwell_core::events::EventSink

use chrono::{Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use stockwell_core::events::StockEvent;
use stockwell_core::OutboxEntry;

const OUTBOX_COLUMNS: &str = "id, event_type, aggregate_id, payload, attempts, last_error, created_at, published_at";

/// Repository for event outbox operations.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Queues an event on `conn`, inside the caller's transaction.
    pub async fn append_in(conn: &mut SqliteConnection, event: &StockEvent) -> DbResult<OutboxEntry> {
        let entry = OutboxEntry {
            id: Uuid::new_v4().to_string(),
            event_type: event.event_type().to_string(),
            aggregate_id: event.aggregate_id().to_string(),
            payload: serde_json::to_string(event)?,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            published_at: None,
        };

        debug!(event_type = %entry.event_type, aggregate_id = %entry.aggregate_id, "Queuing event");

        sqlx::query(
            r#"
            INSERT INTO event_outbox (
                id, event_type, aggregate_id, payload,
                attempts, last_error, created_at, published_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.event_type)
        .bind(&entry.aggregate_id)
        .bind(&entry.payload)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.created_at)
        .bind(entry.published_at)
        .execute(conn)
        .await?;

        Ok(entry)
    }

    /// Unpublished entries, oldest first.
    pub async fn get_pending(&self, limit: u32) -> DbResult<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM event_outbox WHERE published_at IS NULL ORDER BY rowid LIMIT ?1"
        );
        let entries = sqlx::query_as::<_, OutboxEntry>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// All entries of a sale, refund or batch, in insertion order.
    pub async fn for_aggregate(&self, aggregate_id: &str) -> DbResult<Vec<OutboxEntry>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM event_outbox WHERE aggregate_id = ?1 ORDER BY rowid");
        let entries = sqlx::query_as::<_, OutboxEntry>(&sql)
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Decodes an entry's payload back into the event.
    pub fn decode(entry: &OutboxEntry) -> DbResult<StockEvent> {
        Ok(serde_json::from_str(&entry.payload)?)
    }

    /// Marks an entry as delivered.
    pub async fn mark_published(&self, id: &str) -> DbResult<()> {
        sqlx::query("UPDATE event_outbox SET published_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Records a delivery failure.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query("UPDATE event_outbox SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Counts unpublished entries.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_outbox WHERE published_at IS NULL")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Deletes entries published more than `days_old` days ago.
    ///
    /// Returns the number of deleted entries.
    pub async fn cleanup_published(&self, days_old: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_old));

        let result = sqlx::query("DELETE FROM event_outbox WHERE published_at IS NOT NULL AND published_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
