//! # Sale Repository
//!
//! Database operations for sales and sale lines.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE DRAFT (calling workflow)                                     │
//! │     └── create_draft() → Sale { status: Draft } + lines, one tx         │
//! │                                                                         │
//! │  2. PAY (SaleTransactionOrchestrator)                                   │
//! │     └── lock_in() → consume stock → set_status_in(Paid)                 │
//! │                                                                         │
//! │  3. REFUND, any number of times (RefundTransactionOrchestrator)         │
//! │     └── lock_in() → refund rows + restock → set_status_in(Refunded)     │
//! │                              only once everything sold came back        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lines are immutable after creation: pricing is fixed before payment.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use crate::repository::product::ProductRepository;
use stockwell_core::validation::validate_new_sale;
use stockwell_core::{CoreError, Money, NewSale, Sale, SaleLine, SaleStatus};

const SALE_COLUMNS: &str =
    "id, legal_entity, currency, status, total_cents, created_at, updated_at, paid_at, refunded_at";

const LINE_COLUMNS: &str =
    "id, sale_id, product_id, position, quantity, unit_price_cents, discount_cents, line_total_cents, created_at";

/// A sale with its lines in position order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDetail {
    pub sale: Sale,
    pub lines: Vec<SaleLine>,
}

impl SaleDetail {
    /// Units sold across all lines.
    pub fn units(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Creates a DRAFT sale with its lines.
    ///
    /// ## What This Does
    /// 1. Validates header and lines, computing each line total
    /// 2. Inserts the sale header (the transaction's first statement, so the
    ///    write lock is taken before any read)
    /// 3. Checks each product exists and inserts its line
    ///
    /// No stock moves until the sale is marked paid.
    pub async fn create_draft(&self, input: &NewSale) -> DbResult<SaleDetail> {
        let line_totals = validate_new_sale(input).map_err(CoreError::from)?;
        let total: Money = line_totals.iter().copied().sum();
        let now = Utc::now();

        let sale = Sale {
            id: generate_sale_id(),
            legal_entity: input.legal_entity.trim().to_string(),
            currency: input.currency.clone(),
            status: SaleStatus::Draft,
            total_cents: total.cents(),
            created_at: now,
            updated_at: now,
            paid_at: None,
            refunded_at: None,
        };

        let mut tx = self.pool.begin().await?;

        debug!(id = %sale.id, lines = input.lines.len(), total = %total, "Creating draft sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, legal_entity, currency, status, total_cents,
                created_at, updated_at, paid_at, refunded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.legal_entity)
        .bind(&sale.currency)
        .bind(sale.status)
        .bind(sale.total_cents)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .bind(sale.paid_at)
        .bind(sale.refunded_at)
        .execute(&mut *tx)
        .await?;

        let mut lines = Vec::with_capacity(input.lines.len());
        for (position, (line, line_total)) in input.lines.iter().zip(line_totals).enumerate() {
            if ProductRepository::fetch(&mut tx, &line.product_id).await?.is_none() {
                return Err(CoreError::ProductNotFound(line.product_id.clone()).into());
            }

            let row = SaleLine {
                id: generate_sale_line_id(),
                sale_id: sale.id.clone(),
                product_id: line.product_id.clone(),
                position: position as i64,
                quantity: line.quantity,
                unit_price_cents: line.unit_price.cents(),
                discount_cents: line.discount.cents(),
                line_total_cents: line_total.cents(),
                created_at: now,
            };

            sqlx::query(
                r#"
                INSERT INTO sale_lines (
                    id, sale_id, product_id, position, quantity,
                    unit_price_cents, discount_cents, line_total_cents, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&row.id)
            .bind(&row.sale_id)
            .bind(&row.product_id)
            .bind(row.position)
            .bind(row.quantity)
            .bind(row.unit_price_cents)
            .bind(row.discount_cents)
            .bind(row.line_total_cents)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await?;

            lines.push(row);
        }

        tx.commit().await?;

        Ok(SaleDetail { sale, lines })
    }

    /// Gets a sale by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_in(&mut conn, id).await
    }

    /// Gets a sale or fails with `SaleNotFound`.
    pub async fn require(&self, id: &str) -> DbResult<Sale> {
        self.get(id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(id.to_string()).into())
    }

    /// Gets the lines of a sale in position order.
    pub async fn get_lines(&self, sale_id: &str) -> DbResult<Vec<SaleLine>> {
        let mut conn = self.pool.acquire().await?;
        Self::lines_in(&mut conn, sale_id).await
    }

    /// Gets a sale with its lines, or fails with `SaleNotFound`.
    pub async fn get_detail(&self, id: &str) -> DbResult<SaleDetail> {
        let mut conn = self.pool.acquire().await?;
        let sale = Self::fetch_in(&mut conn, id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(id.to_string()))?;
        let lines = Self::lines_in(&mut conn, id).await?;
        Ok(SaleDetail { sale, lines })
    }

    /// Counts sales in a status.
    pub async fn count_by_status(&self, status: SaleStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales WHERE status = ?1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Connection-scoped operations
    // =========================================================================

    /// Claims the sale row; must be the first statement of the transaction.
    ///
    /// SQLite takes the database write lock here, so every later read in
    /// the transaction sees a view no other writer can change until commit.
    /// A concurrent caller blocks on this statement for up to the busy
    /// timeout.
    pub async fn lock_in(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE sales SET lock_seq = lock_seq + 1 WHERE id = ?1")
            .bind(sale_id)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::SaleNotFound(sale_id.to_string()).into());
        }

        Ok(())
    }

    /// Reads a sale on `conn`.
    pub async fn fetch_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;

        Ok(sale)
    }

    /// Reads a sale's lines on `conn`.
    pub async fn lines_in(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleLine>> {
        let sql = format!("SELECT {LINE_COLUMNS} FROM sale_lines WHERE sale_id = ?1 ORDER BY position");
        let lines = sqlx::query_as::<_, SaleLine>(&sql)
            .bind(sale_id)
            .fetch_all(conn)
            .await?;

        Ok(lines)
    }

    /// Moves a sale to `status`, stamping `paid_at` / `refunded_at`.
    ///
    /// The transition itself is decided by `stockwell_core::sale_state`;
    /// this only writes it.
    pub async fn set_status_in(conn: &mut SqliteConnection, sale_id: &str, status: SaleStatus) -> DbResult<()> {
        let now = Utc::now();

        let sql = match status {
            SaleStatus::Draft => "UPDATE sales SET status = ?2, updated_at = ?3 WHERE id = ?1",
            SaleStatus::Paid => "UPDATE sales SET status = ?2, updated_at = ?3, paid_at = ?3 WHERE id = ?1",
            SaleStatus::Refunded => {
                "UPDATE sales SET status = ?2, updated_at = ?3, refunded_at = ?3 WHERE id = ?1"
            }
        };

        let result = sqlx::query(sql)
            .bind(sale_id)
            .bind(status)
            .bind(now)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::SaleNotFound(sale_id.to_string()).into());
        }

        debug!(sale_id = %sale_id, status = %status, "Sale status updated");
        Ok(())
    }
}

/// Generates a new sale ID.
pub fn generate_sale_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a new sale line ID.
pub fn generate_sale_line_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::test_support::{memory_db, product, sale_line};

    #[tokio::test]
    async fn test_create_draft_computes_totals() {
        let db = memory_db().await;
        let a = product(&db, "AMOX").await;
        let b = product(&db, "GAUZE").await;

        let mut discounted = sale_line(&b.id, 3, 334);
        discounted.discount = Money::from_cents(2);

        let detail = db
            .sales()
            .create_draft(&NewSale {
                legal_entity: "Clinic North".to_string(),
                currency: "EUR".to_string(),
                lines: vec![sale_line(&a.id, 10, 500), discounted],
            })
            .await
            .unwrap();

        assert_eq!(detail.sale.status, SaleStatus::Draft);
        assert_eq!(detail.lines[0].line_total_cents, 5000);
        assert_eq!(detail.lines[1].line_total_cents, 1000);
        assert_eq!(detail.sale.total(), Money::from_cents(6000));
        assert_eq!(detail.units(), 13);

        let stored = db.sales().get_detail(&detail.sale.id).await.unwrap();
        assert_eq!(stored.lines.len(), 2);
        assert_eq!(stored.lines[1].position, 1);
        assert_eq!(stored.sale.total_cents, 6000);
        assert!(stored.sale.paid_at.is_none());
    }

    #[tokio::test]
    async fn test_create_draft_validates() {
        let db = memory_db().await;
        let a = product(&db, "AMOX").await;

        let err = db
            .sales()
            .create_draft(&NewSale {
                legal_entity: "Clinic North".to_string(),
                currency: "eur".to_string(),
                lines: vec![sale_line(&a.id, 1, 100)],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));

        let err = db
            .sales()
            .create_draft(&NewSale {
                legal_entity: "Clinic North".to_string(),
                currency: "EUR".to_string(),
                lines: vec![sale_line("ghost", 1, 100)],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ProductNotFound(_))));
        assert_eq!(db.sales().count_by_status(SaleStatus::Draft).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_draft_unknown_later_product_writes_nothing() {
        let db = memory_db().await;
        let a = product(&db, "AMOX").await;

        let err = db
            .sales()
            .create_draft(&NewSale {
                legal_entity: "Clinic North".to_string(),
                currency: "EUR".to_string(),
                lines: vec![sale_line(&a.id, 1, 100), sale_line("ghost", 1, 100)],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ProductNotFound(_))));
        assert_eq!(db.sales().count_by_status(SaleStatus::Draft).await.unwrap(), 0);

        let lines: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sale_lines")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(lines, 0);
    }

    #[tokio::test]
    async fn test_create_draft_rejects_overflowing_price() {
        let db = memory_db().await;
        let a = product(&db, "AMOX").await;

        let err = db
            .sales()
            .create_draft(&NewSale {
                legal_entity: "Clinic North".to_string(),
                currency: "EUR".to_string(),
                lines: vec![sale_line(&a.id, 3, i64::MAX / 2)],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_lock_unknown_sale() {
        let db = memory_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        assert!(matches!(
            SaleRepository::lock_in(&mut conn, "ghost").await,
            Err(DbError::Domain(CoreError::SaleNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_require_missing_sale() {
        let db = memory_db().await;
        assert!(db.sales().get("ghost").await.unwrap().is_none());
        assert!(matches!(
            db.sales().require("ghost").await,
            Err(DbError::Domain(CoreError::SaleNotFound(_)))
        ));
    }
}
