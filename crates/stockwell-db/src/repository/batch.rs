//! # Batch Repository
//!
//! The batch catalog: lots of a product with their derived on-hand.
//!
//! ## On-hand Read Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  batches b  LEFT JOIN  stock_ledger l ON l.batch_id = b.id              │
//! │                                                                         │
//! │  on_hand(b) = COALESCE(SUM(l.quantity), 0)                              │
//! │                                                                         │
//! │  ORDER BY expiry_date IS NULL, expiry_date, seq      (FEFO order)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No quantity is ever stored on the batch row. The `*_in` associated
//! functions take a connection so orchestrators can read the catalog inside
//! their transaction, after the sale claim.

use chrono::{NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::product::ProductRepository;
use stockwell_core::validation::validate_new_batch;
use stockwell_core::{Batch, BatchWithStock, CoreError, NewBatch};

const BATCH_COLUMNS: &str = "id, product_id, lot_code, expiry_date, is_returns, seq, created_at";

const BATCH_WITH_STOCK: &str = r#"
    SELECT
        b.id, b.product_id, b.lot_code, b.expiry_date, b.is_returns, b.seq, b.created_at,
        COALESCE(SUM(l.quantity), 0) AS on_hand
    FROM batches b
    LEFT JOIN stock_ledger l ON l.batch_id = b.id
"#;

const FEFO_ORDER: &str = "ORDER BY b.expiry_date IS NULL, b.expiry_date, b.seq";

/// Repository for batches and on-hand queries.
#[derive(Debug, Clone)]
pub struct BatchRepository {
    pool: SqlitePool,
}

impl BatchRepository {
    /// Creates a new BatchRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BatchRepository { pool }
    }

    /// Validates and inserts a batch of an existing product.
    ///
    /// ## Errors
    /// * `Domain(ProductNotFound)` - unknown product
    /// * `Domain(Validation)` - bad lot code
    /// * `UniqueViolation` - lot code already used for this product
    pub async fn create(&self, input: &NewBatch) -> DbResult<Batch> {
        validate_new_batch(input).map_err(CoreError::from)?;

        let mut conn = self.pool.acquire().await?;
        if ProductRepository::fetch(&mut conn, &input.product_id).await?.is_none() {
            return Err(CoreError::ProductNotFound(input.product_id.clone()).into());
        }

        Self::insert_in(&mut conn, &input.product_id, input.lot_code.trim(), input.expiry_date, false)
            .await
            .map_err(|e| match e {
                DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                    field,
                    value: input.lot_code.clone(),
                },
                other => other,
            })
    }

    /// Gets a batch by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Batch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1");
        let batch = sqlx::query_as::<_, Batch>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(batch)
    }

    /// Gets a batch with its on-hand, or fails with `BatchNotFound`.
    pub async fn get_with_stock(&self, id: &str) -> DbResult<BatchWithStock> {
        let sql = format!("{BATCH_WITH_STOCK} WHERE b.id = ?1 GROUP BY b.seq");
        sqlx::query_as::<_, BatchWithStock>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::BatchNotFound(id.to_string()).into())
    }

    /// All batches of a product, FEFO-ordered, including empty ones.
    pub async fn list_for_product(&self, product_id: &str) -> DbResult<Vec<BatchWithStock>> {
        let sql = format!("{BATCH_WITH_STOCK} WHERE b.product_id = ?1 GROUP BY b.seq {FEFO_ORDER}");
        let batches = sqlx::query_as::<_, BatchWithStock>(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(batches)
    }

    /// Batches of a product with on-hand > 0, FEFO-ordered.
    pub async fn available_for_product(&self, product_id: &str) -> DbResult<Vec<BatchWithStock>> {
        let mut conn = self.pool.acquire().await?;
        Self::available_in(&mut conn, product_id).await
    }

    /// On-hand of one batch (0 for a batch without entries).
    pub async fn on_hand(&self, batch_id: &str) -> DbResult<i64> {
        let on_hand: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(quantity), 0) FROM stock_ledger WHERE batch_id = ?1")
                .bind(batch_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(on_hand)
    }

    /// Total on-hand of a product across its batches.
    pub async fn product_on_hand(&self, product_id: &str) -> DbResult<i64> {
        let on_hand: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(l.quantity), 0)
            FROM stock_ledger l
            JOIN batches b ON b.id = l.batch_id
            WHERE b.product_id = ?1
            "#,
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(on_hand)
    }

    /// Returns the product's returns batch, creating it on first use.
    pub async fn find_or_create_returns_batch(&self, product_id: &str, lot_code: &str) -> DbResult<Batch> {
        let mut tx = self.pool.begin().await?;
        let batch = Self::returns_batch_in(&mut tx, product_id, lot_code).await?;
        tx.commit().await?;
        Ok(batch)
    }

    // =========================================================================
    // Connection-scoped operations
    // =========================================================================

    /// FEFO-ordered batches with stock, read on `conn`.
    pub async fn available_in(conn: &mut SqliteConnection, product_id: &str) -> DbResult<Vec<BatchWithStock>> {
        let sql = format!(
            "{BATCH_WITH_STOCK} WHERE b.product_id = ?1 GROUP BY b.seq HAVING COALESCE(SUM(l.quantity), 0) > 0 {FEFO_ORDER}"
        );
        let batches = sqlx::query_as::<_, BatchWithStock>(&sql)
            .bind(product_id)
            .fetch_all(conn)
            .await?;

        Ok(batches)
    }

    /// Finds or creates the returns batch on `conn`.
    ///
    /// Only rows flagged `is_returns` qualify, so a user lot that happens to
    /// share the code is never picked. The insert goes first: on a pool
    /// transaction that takes the write lock before anything is read.
    /// Returns batches carry no expiry, so FEFO drains them last.
    pub async fn returns_batch_in(conn: &mut SqliteConnection, product_id: &str, lot_code: &str) -> DbResult<Batch> {
        let result = sqlx::query(
            r#"
            INSERT INTO batches (id, product_id, lot_code, expiry_date, is_returns, created_at)
            VALUES (?1, ?2, ?3, NULL, 1, ?4)
            ON CONFLICT (product_id, lot_code, is_returns) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(product_id)
        .bind(lot_code)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            debug!(product_id = %product_id, lot_code = %lot_code, "Created returns batch");
        }

        let sql =
            format!("SELECT {BATCH_COLUMNS} FROM batches WHERE product_id = ?1 AND lot_code = ?2 AND is_returns = 1");
        let batch = sqlx::query_as::<_, Batch>(&sql)
            .bind(product_id)
            .bind(lot_code)
            .fetch_one(conn)
            .await?;

        Ok(batch)
    }

    async fn insert_in(
        conn: &mut SqliteConnection,
        product_id: &str,
        lot_code: &str,
        expiry_date: Option<NaiveDate>,
        is_returns: bool,
    ) -> DbResult<Batch> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        debug!(id = %id, product_id = %product_id, lot_code = %lot_code, "Inserting batch");

        let result = sqlx::query(
            r#"
            INSERT INTO batches (id, product_id, lot_code, expiry_date, is_returns, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&id)
        .bind(product_id)
        .bind(lot_code)
        .bind(expiry_date)
        .bind(is_returns)
        .bind(created_at)
        .execute(conn)
        .await?;

        Ok(Batch {
            id,
            product_id: product_id.to_string(),
            lot_code: lot_code.to_string(),
            expiry_date,
            is_returns,
            seq: result.last_insert_rowid(),
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{batch, date, memory_db, product};

    #[tokio::test]
    async fn test_available_batches_in_fefo_order() {
        let db = memory_db().await;
        let p = product(&db, "SALINE").await;

        let forever = batch(&db, &p.id, "NOEXP", None).await;
        let late = batch(&db, &p.id, "L-LATE", date(2026, 6, 1)).await;
        let early = batch(&db, &p.id, "L-EARLY", date(2025, 1, 1)).await;
        let empty = batch(&db, &p.id, "L-EMPTY", date(2024, 1, 1)).await;

        for b in [&forever, &late, &early] {
            db.ledger().receive(&b.id, 2, "PO-1").await.unwrap();
        }

        let available = db.batches().available_for_product(&p.id).await.unwrap();
        let order: Vec<&str> = available.iter().map(|b| b.batch.id.as_str()).collect();
        assert_eq!(order, vec![early.id.as_str(), late.id.as_str(), forever.id.as_str()]);
        assert!(available.iter().all(|b| b.on_hand == 2));

        let all = db.batches().list_for_product(&p.id).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].batch.id, empty.id);
        assert_eq!(all[0].on_hand, 0);

        assert_eq!(db.batches().product_on_hand(&p.id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let db = memory_db().await;
        let p = product(&db, "SALINE").await;
        let first = batch(&db, &p.id, "A", None).await;
        let second = batch(&db, &p.id, "B", None).await;
        assert!(second.seq > first.seq);

        let stored = db.batches().get(&second.id).await.unwrap().unwrap();
        assert_eq!(stored, second);
    }

    #[tokio::test]
    async fn test_lot_code_unique_per_product() {
        let db = memory_db().await;
        let p = product(&db, "SALINE").await;
        let q = product(&db, "GAUZE").await;
        batch(&db, &p.id, "LOT-1", None).await;
        batch(&db, &q.id, "LOT-1", None).await;

        let err = db
            .batches()
            .create(&NewBatch {
                product_id: p.id.clone(),
                lot_code: "LOT-1".to_string(),
                expiry_date: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_unknown_product_or_batch() {
        let db = memory_db().await;
        let err = db
            .batches()
            .create(&NewBatch {
                product_id: "ghost".to_string(),
                lot_code: "L".to_string(),
                expiry_date: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ProductNotFound(_))));

        assert!(matches!(
            db.batches().get_with_stock("ghost").await,
            Err(DbError::Domain(CoreError::BatchNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_returns_batch_created_once() {
        let db = memory_db().await;
        let p = product(&db, "SALINE").await;

        let first = db.batches().find_or_create_returns_batch(&p.id, "RETURNS").await.unwrap();
        let again = db.batches().find_or_create_returns_batch(&p.id, "RETURNS").await.unwrap();

        assert_eq!(first.id, again.id);
        assert!(first.is_returns);
        assert!(first.expiry_date.is_none());
        assert_eq!(db.batches().on_hand(&first.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_returns_batch_ignores_user_lot_with_same_code() {
        let db = memory_db().await;
        let p = product(&db, "SALINE").await;
        let user_lot = batch(&db, &p.id, "RETURNS", date(2020, 1, 1)).await;
        assert!(!user_lot.is_returns);

        let returns = db.batches().find_or_create_returns_batch(&p.id, "RETURNS").await.unwrap();
        assert_ne!(returns.id, user_lot.id);
        assert!(returns.is_returns);
        assert!(returns.expiry_date.is_none());

        let again = db.batches().find_or_create_returns_batch(&p.id, "RETURNS").await.unwrap();
        assert_eq!(again.id, returns.id);
        assert_eq!(db.batches().list_for_product(&p.id).await.unwrap().len(), 2);
    }
}
