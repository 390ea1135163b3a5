//! # Product Repository
//!
//! Database operations for the product catalog.
//!
//! Products are referenced by batches; once any batch of a product has a
//! ledger entry the product row is frozen by the `trg_products_immutable`
//! trigger, and [`ProductRepository::update_details`] fails with
//! [`DbError::LedgerInvariant`].

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use stockwell_core::validation::validate_new_product;
use stockwell_core::{CoreError, NewProduct, Product};

const PRODUCT_COLUMNS: &str = "id, sku, name, unit, track_stock, created_at";

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let product = db.products().create(&NewProduct { .. }).await?;
/// let same = db.products().get_by_sku("AMOX-500").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Validates and inserts a product.
    ///
    /// ## Errors
    /// * `Domain(Validation)` - bad sku / name / unit
    /// * `UniqueViolation` - sku already exists
    pub async fn create(&self, input: &NewProduct) -> DbResult<Product> {
        validate_new_product(input).map_err(CoreError::from)?;

        let product = Product {
            id: generate_product_id(),
            sku: input.sku.trim().to_string(),
            name: input.name.trim().to_string(),
            unit: input.unit.trim().to_string(),
            track_stock: input.track_stock,
            created_at: Utc::now(),
        };

        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, unit, track_stock, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.unit)
        .bind(product.track_stock)
        .bind(product.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: product.sku.clone(),
            },
            other => other,
        })?;

        Ok(product)
    }

    /// Gets a product by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    /// Gets a product by SKU.
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Gets a product or fails with `ProductNotFound`.
    pub async fn require(&self, id: &str) -> DbResult<Product> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(id.to_string()).into())
    }

    /// Renames a product or changes its unit.
    ///
    /// Rejected by storage once the product has stock history.
    pub async fn update_details(&self, id: &str, name: &str, unit: &str) -> DbResult<()> {
        debug!(id = %id, "Updating product details");

        let result = sqlx::query("UPDATE products SET name = ?2, unit = ?3 WHERE id = ?1")
            .bind(id)
            .bind(name.trim())
            .bind(unit.trim())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ProductNotFound(id.to_string()).into());
        }

        Ok(())
    }

    /// Lists all products by SKU.
    pub async fn list(&self) -> DbResult<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY sku");
        let products = sqlx::query_as::<_, Product>(&sql).fetch_all(&self.pool).await?;
        Ok(products)
    }

    /// Counts products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Reads a product on an existing connection or transaction.
    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;

        Ok(product)
    }
}

/// Helper to generate a new product ID.
pub fn generate_product_id() -> String {
    Uuid::new_v4().to_string()
}
