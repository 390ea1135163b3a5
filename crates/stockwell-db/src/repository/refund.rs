//! # Refund Repository
//!
//! Refund headers and lines. Both tables are insert-only: a refund row is
//! written once, inside the refund transaction, and never changed.
//!
//! ## Idempotency Storage
//! ```text
//! sale_refunds: UNIQUE (sale_id, idempotency_key) WHERE idempotency_key IS NOT NULL
//!
//!   (S1, "r1")  ✓
//!   (S1, "r1")  ✗ UniqueViolation  → caller returns the stored refund
//!   (S2, "r1")  ✓ keys are scoped per sale
//!   (S1, NULL)  ✓ any number: a missing key never deduplicates
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::debug;

use crate::error::DbResult;
use stockwell_core::{RefundableLine, SaleRefund, SaleRefundLine};

const REFUND_COLUMNS: &str = "id, sale_id, idempotency_key, status, total_refunded_cents, created_at";

const REFUND_LINE_COLUMNS: &str = "id, refund_id, sale_line_id, qty_refunded, amount_cents, created_at";

/// Repository for refund database operations.
#[derive(Debug, Clone)]
pub struct RefundRepository {
    pool: SqlitePool,
}

impl RefundRepository {
    /// Creates a new RefundRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RefundRepository { pool }
    }

    /// Gets a refund by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<SaleRefund>> {
        let sql = format!("SELECT {REFUND_COLUMNS} FROM sale_refunds WHERE id = ?1");
        let refund = sqlx::query_as::<_, SaleRefund>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(refund)
    }

    /// Looks up the refund stored under (sale, key).
    pub async fn find_by_key(&self, sale_id: &str, key: &str) -> DbResult<Option<SaleRefund>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_key_in(&mut conn, sale_id, key).await
    }

    /// Lines of a refund.
    pub async fn get_lines(&self, refund_id: &str) -> DbResult<Vec<SaleRefundLine>> {
        let mut conn = self.pool.acquire().await?;
        Self::lines_in(&mut conn, refund_id).await
    }

    /// Refunds of a sale, oldest first.
    pub async fn refunds_for_sale(&self, sale_id: &str) -> DbResult<Vec<SaleRefund>> {
        let sql = format!("SELECT {REFUND_COLUMNS} FROM sale_refunds WHERE sale_id = ?1 ORDER BY rowid");
        let refunds = sqlx::query_as::<_, SaleRefund>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(refunds)
    }

    /// Sold, refunded and remaining units per line of a sale.
    pub async fn refundable_quantities(&self, sale_id: &str) -> DbResult<Vec<RefundableLine>> {
        let lines = sqlx::query_as::<_, RefundableLine>(
            r#"
            SELECT
                sl.id AS sale_line_id,
                sl.product_id AS product_id,
                sl.quantity AS sold,
                COALESCE((
                    SELECT SUM(rl.qty_refunded)
                    FROM sale_refund_lines rl
                    WHERE rl.sale_line_id = sl.id
                ), 0) AS refunded
            FROM sale_lines sl
            WHERE sl.sale_id = ?1
            ORDER BY sl.position
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Counts refunds of a sale.
    pub async fn count_for_sale(&self, sale_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sale_refunds WHERE sale_id = ?1")
            .bind(sale_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Connection-scoped operations
    // =========================================================================

    /// Looks up (sale, key) on `conn`.
    pub async fn find_by_key_in(conn: &mut SqliteConnection, sale_id: &str, key: &str) -> DbResult<Option<SaleRefund>> {
        let sql = format!("SELECT {REFUND_COLUMNS} FROM sale_refunds WHERE sale_id = ?1 AND idempotency_key = ?2");
        let refund = sqlx::query_as::<_, SaleRefund>(&sql)
            .bind(sale_id)
            .bind(key)
            .fetch_optional(conn)
            .await?;

        Ok(refund)
    }

    /// Reads a refund's lines on `conn`.
    pub async fn lines_in(conn: &mut SqliteConnection, refund_id: &str) -> DbResult<Vec<SaleRefundLine>> {
        let sql = format!("SELECT {REFUND_LINE_COLUMNS} FROM sale_refund_lines WHERE refund_id = ?1 ORDER BY rowid");
        let lines = sqlx::query_as::<_, SaleRefundLine>(&sql)
            .bind(refund_id)
            .fetch_all(conn)
            .await?;

        Ok(lines)
    }

    /// Units already refunded per sale line of a sale.
    pub async fn refunded_per_line_in(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT rl.sale_line_id, SUM(rl.qty_refunded)
            FROM sale_refund_lines rl
            JOIN sale_refunds r ON r.id = rl.refund_id
            WHERE r.sale_id = ?1
            GROUP BY rl.sale_line_id
            "#,
        )
        .bind(sale_id)
        .fetch_all(conn)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Inserts a refund header on `conn`.
    ///
    /// A duplicate (sale, key) surfaces as `DbError::UniqueViolation`.
    pub async fn insert_in(conn: &mut SqliteConnection, refund: &SaleRefund) -> DbResult<()> {
        debug!(id = %refund.id, sale_id = %refund.sale_id, total = refund.total_refunded_cents, "Inserting refund");

        sqlx::query(
            r#"
            INSERT INTO sale_refunds (id, sale_id, idempotency_key, status, total_refunded_cents, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&refund.id)
        .bind(&refund.sale_id)
        .bind(&refund.idempotency_key)
        .bind(refund.status)
        .bind(refund.total_refunded_cents)
        .bind(refund.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Inserts a refund line on `conn`.
    pub async fn insert_line_in(conn: &mut SqliteConnection, line: &SaleRefundLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sale_refund_lines (id, refund_id, sale_line_id, qty_refunded, amount_cents, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&line.id)
        .bind(&line.refund_id)
        .bind(&line.sale_line_id)
        .bind(line.qty_refunded)
        .bind(line.amount_cents)
        .bind(line.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::test_support::{memory_db, paid_sale_fixture};
    use chrono::Utc;
    use stockwell_core::RefundStatus;

    fn refund(id: &str, sale_id: &str, key: Option<&str>) -> SaleRefund {
        SaleRefund {
            id: id.to_string(),
            sale_id: sale_id.to_string(),
            idempotency_key: key.map(str::to_string),
            status: RefundStatus::Created,
            total_refunded_cents: 500,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_key_unique_per_sale_only_when_present() {
        let db = memory_db().await;
        let fixture = paid_sale_fixture(&db, 10, 500).await;
        let sale_id = fixture.sale_id.as_str();

        let mut conn = db.pool().acquire().await.unwrap();
        RefundRepository::insert_in(&mut conn, &refund("r-1", sale_id, Some("k1"))).await.unwrap();
        RefundRepository::insert_in(&mut conn, &refund("r-2", sale_id, None)).await.unwrap();
        RefundRepository::insert_in(&mut conn, &refund("r-3", sale_id, None)).await.unwrap();

        let err = RefundRepository::insert_in(&mut conn, &refund("r-4", sale_id, Some("k1")))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        drop(conn);

        let found = db.refunds().find_by_key(sale_id, "k1").await.unwrap().unwrap();
        assert_eq!(found.id, "r-1");
        assert!(db.refunds().find_by_key(sale_id, "k2").await.unwrap().is_none());
        assert_eq!(db.refunds().count_for_sale(sale_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_refund_rows_are_immutable() {
        let db = memory_db().await;
        let fixture = paid_sale_fixture(&db, 10, 500).await;

        let mut conn = db.pool().acquire().await.unwrap();
        RefundRepository::insert_in(&mut conn, &refund("r-1", &fixture.sale_id, None)).await.unwrap();

        let err = sqlx::query("UPDATE sale_refunds SET total_refunded_cents = 0")
            .execute(&mut *conn)
            .await
            .map_err(DbError::from)
            .unwrap_err();
        assert!(matches!(err, DbError::LedgerInvariant(_)));
    }

    #[tokio::test]
    async fn test_refundable_quantities_without_refunds() {
        let db = memory_db().await;
        let fixture = paid_sale_fixture(&db, 10, 500).await;

        let lines = db.refunds().refundable_quantities(&fixture.sale_id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].sale_line_id, fixture.line_id);
        assert_eq!(lines[0].sold, 10);
        assert_eq!(lines[0].refunded, 0);
        assert_eq!(lines[0].remaining(), 10);
    }
}
