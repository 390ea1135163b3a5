//! # Stock Ledger
//!
//! The append-only movement log. Every stock change is one row; nothing is
//! ever updated or deleted (the schema triggers reject both).
//!
//! ## Movements
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  kind        quantity   reference_id   sale_line_id   written by        │
//! │  ─────────   ────────   ────────────   ────────────   ───────────────   │
//! │  in          +q         receipt ref    NULL           receive()         │
//! │  sale_out    −q         sale_id        line id        mark_paid         │
//! │  refund_in   +q         refund_id      line id        refund            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `sale_line_id` on SALE_OUT rows is the batch attribution the restock
//! planner reads back when a line is refunded.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::outbox::OutboxRepository;
use stockwell_core::events::StockEvent;
use stockwell_core::ledger::{check_running_balance, refund_within_sale, LedgerViolation, StockSummary};
use stockwell_core::refund::ConsumedBatch;
use stockwell_core::validation::validate_receipt_quantity;
use stockwell_core::{CoreError, LedgerKind, StockLedgerEntry};

const ENTRY_COLUMNS: &str = "id, batch_id, quantity, kind, reference_id, sale_line_id, created_at";

/// Units a sale moved for one product, from the ledger's point of view.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SaleMovement {
    pub product_id: String,
    /// |Σ SALE_OUT|
    pub sold: i64,
    /// Σ REFUND_IN
    pub refunded: i64,
}

impl SaleMovement {
    /// Refunds never exceed what the sale took out.
    pub fn is_within_bounds(&self) -> bool {
        refund_within_sale(self.sold, self.refunded)
    }
}

/// A committed receipt: the IN entry and the event recorded with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedStock {
    pub entry: StockLedgerEntry,
    pub event: StockEvent,
}

/// Repository over `stock_ledger`.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    /// Creates a new StockLedger.
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    /// Records goods received into a batch (an IN entry).
    ///
    /// The entry and its `stock_received` outbox event commit together. The
    /// insert is the transaction's first statement.
    ///
    /// ## Errors
    /// * `BatchNotFound` - no batch has this id
    /// * `Validation` - quantity outside `1..=MAX_RECEIPT_QUANTITY`
    pub async fn receive(&self, batch_id: &str, quantity: i64, reference: &str) -> DbResult<ReceivedStock> {
        validate_receipt_quantity(quantity).map_err(CoreError::from)?;

        let mut tx = self.pool.begin().await?;

        let entry = Self::append_in(&mut tx, batch_id, quantity, LedgerKind::In, reference, None)
            .await
            .map_err(|e| match e {
                DbError::ForeignKeyViolation { .. } => DbError::Domain(CoreError::BatchNotFound(batch_id.to_string())),
                other => other,
            })?;

        let product_id: String = sqlx::query_scalar("SELECT product_id FROM batches WHERE id = ?1")
            .bind(batch_id)
            .fetch_one(&mut *tx)
            .await?;

        let event = StockEvent::StockReceived {
            batch_id: batch_id.to_string(),
            product_id,
            quantity,
        };
        OutboxRepository::append_in(&mut tx, &event).await?;

        tx.commit().await?;

        info!(batch_id = %batch_id, quantity, "Stock received");
        Ok(ReceivedStock { entry, event })
    }

    /// Entries of a batch in ledger order.
    pub async fn entries_for_batch(&self, batch_id: &str) -> DbResult<Vec<StockLedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM stock_ledger WHERE batch_id = ?1 ORDER BY id");
        let entries = sqlx::query_as::<_, StockLedgerEntry>(&sql)
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Entries written for a sale, refund or receipt reference.
    pub async fn entries_for_reference(&self, reference_id: &str) -> DbResult<Vec<StockLedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM stock_ledger WHERE reference_id = ?1 ORDER BY id");
        let entries = sqlx::query_as::<_, StockLedgerEntry>(&sql)
            .bind(reference_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Entries attributed to one sale line (its SALE_OUT and REFUND_IN rows).
    pub async fn entries_for_sale_line(&self, sale_line_id: &str) -> DbResult<Vec<StockLedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM stock_ledger WHERE sale_line_id = ?1 ORDER BY id");
        let entries = sqlx::query_as::<_, StockLedgerEntry>(&sql)
            .bind(sale_line_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Total number of ledger rows.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_ledger")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Replays a batch's entries and returns its on-hand.
    ///
    /// ## Errors
    /// * `LedgerInvariant` - a prefix went negative or an entry has the
    ///   wrong sign for its kind
    pub async fn audit_batch(&self, batch_id: &str) -> DbResult<i64> {
        let entries = self.entries_for_batch(batch_id).await?;
        check_running_balance(batch_id, &entries).map_err(|violation| {
            warn!(batch_id = %batch_id, %violation, "Ledger audit failed");
            DbError::LedgerInvariant(violation.to_string())
        })
    }

    /// Audits every batch and returns the violations found.
    pub async fn audit_all(&self) -> DbResult<Vec<LedgerViolation>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM stock_ledger ORDER BY batch_id, id");
        let entries = sqlx::query_as::<_, StockLedgerEntry>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let mut violations = Vec::new();
        for chunk in entries.chunk_by(|a, b| a.batch_id == b.batch_id) {
            if let Err(v) = check_running_balance(&chunk[0].batch_id, chunk) {
                violations.push(v);
            }
        }

        debug!(entries = entries.len(), violations = violations.len(), "Ledger audit complete");
        Ok(violations)
    }

    /// Movement totals of a product across all its batches.
    pub async fn product_summary(&self, product_id: &str) -> DbResult<StockSummary> {
        let summary = sqlx::query_as::<_, StockSummary>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN l.kind = 'in' THEN l.quantity ELSE 0 END), 0) AS received,
                COALESCE(-SUM(CASE WHEN l.kind = 'sale_out' THEN l.quantity ELSE 0 END), 0) AS sold,
                COALESCE(SUM(CASE WHEN l.kind = 'refund_in' THEN l.quantity ELSE 0 END), 0) AS refunded,
                COALESCE(SUM(l.quantity), 0) AS on_hand
            FROM stock_ledger l
            JOIN batches b ON b.id = l.batch_id
            WHERE b.product_id = ?1
            "#,
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(summary)
    }

    /// Per-product units a sale took out and got back.
    pub async fn sale_movements(&self, sale_id: &str) -> DbResult<Vec<SaleMovement>> {
        let movements = sqlx::query_as::<_, SaleMovement>(
            r#"
            SELECT
                sl.product_id AS product_id,
                COALESCE(-SUM(CASE WHEN l.kind = 'sale_out' THEN l.quantity ELSE 0 END), 0) AS sold,
                COALESCE(SUM(CASE WHEN l.kind = 'refund_in' THEN l.quantity ELSE 0 END), 0) AS refunded
            FROM stock_ledger l
            JOIN sale_lines sl ON sl.id = l.sale_line_id
            WHERE sl.sale_id = ?1
            GROUP BY sl.product_id
            ORDER BY sl.product_id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    // =========================================================================
    // Connection-scoped operations
    // =========================================================================

    /// Appends one entry on `conn` and returns it.
    ///
    /// The storage CHECK rejects a sign that does not match `kind`, and the
    /// no-negative trigger rejects an entry that would overdraw the batch.
    pub async fn append_in(
        conn: &mut SqliteConnection,
        batch_id: &str,
        quantity: i64,
        kind: LedgerKind,
        reference_id: &str,
        sale_line_id: Option<&str>,
    ) -> DbResult<StockLedgerEntry> {
        let created_at = Utc::now();

        debug!(batch_id = %batch_id, quantity, kind = kind.as_str(), reference_id = %reference_id, "Appending ledger entry");

        let result = sqlx::query(
            r#"
            INSERT INTO stock_ledger (batch_id, quantity, kind, reference_id, sale_line_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(batch_id)
        .bind(quantity)
        .bind(kind)
        .bind(reference_id)
        .bind(sale_line_id)
        .bind(created_at)
        .execute(conn)
        .await?;

        Ok(StockLedgerEntry {
            id: result.last_insert_rowid(),
            batch_id: batch_id.to_string(),
            quantity,
            kind,
            reference_id: reference_id.to_string(),
            sale_line_id: sale_line_id.map(str::to_string),
            created_at,
        })
    }

    /// Batches a sale line consumed, in allocation order, with what earlier
    /// refunds already returned to each.
    pub async fn consumed_by_line_in(conn: &mut SqliteConnection, sale_line_id: &str) -> DbResult<Vec<ConsumedBatch>> {
        let consumed = sqlx::query_as::<_, ConsumedBatch>(
            r#"
            SELECT
                batch_id,
                -SUM(CASE WHEN kind = 'sale_out' THEN quantity ELSE 0 END) AS consumed,
                SUM(CASE WHEN kind = 'refund_in' THEN quantity ELSE 0 END) AS returned
            FROM stock_ledger
            WHERE sale_line_id = ?1
            GROUP BY batch_id
            HAVING SUM(CASE WHEN kind = 'sale_out' THEN 1 ELSE 0 END) > 0
            ORDER BY MIN(id)
            "#,
        )
        .bind(sale_line_id)
        .fetch_all(conn)
        .await?;

        Ok(consumed)
    }
}
