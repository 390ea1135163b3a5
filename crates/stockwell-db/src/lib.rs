//! # stockwell-db: Ledger Storage and Transaction Engine
//!
//! SQLite persistence for the clinic stock ledger, sales and refunds, and
//! the orchestrators that move all three inside one transaction.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockwell Data Flow                              │
//! │                                                                         │
//! │  Sale workflow (payment approved / refund approved)                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockwell-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  StockEngine  │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │  (engine/)    │───►│ ledger, sale, │    │  (embedded)  │  │   │
//! │  │   │               │    │ refund, batch │    │              │  │   │
//! │  │   │ mark_paid     │    │ product,      │    │ 001_initial  │  │   │
//! │  │   │ refund        │    │ outbox        │    │ 002_outbox   │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │                                                     │   │
//! │  │           ▼                                                     │   │
//! │  │   stockwell-core: FEFO, refund planning, state machine          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SQLite (WAL), triggers guard the append-only ledger            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//! - [`engine`] - `mark_paid` / `refund` orchestrators
//! - [`config`] - `stockwell.toml` loading
//! - [`telemetry`] - Tracing setup and the logging event sink
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockwell_db::{Database, StockEngine, StockSettings};
//! use stockwell_core::RefundLineRequest;
//!
//! let db = Database::in_memory().await?;
//! let engine = StockEngine::new(db, StockSettings::default());
//!
//! engine.mark_paid(&sale_id).await?;
//! let receipt = engine
//!     .refund(&sale_id, &[RefundLineRequest::new(&line_id, 4)], Some("r1"))
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{StockSettings, StockwellConfig};
pub use engine::{
    IdempotencyGuard, RefundReceipt, RefundTransactionOrchestrator, SaleTransactionOrchestrator, StockEngine,
};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use telemetry::{init_tracing, TracingSink};

// Repository re-exports for convenience
pub use repository::batch::BatchRepository;
pub use repository::ledger::{ReceivedStock, SaleMovement, StockLedger};
pub use repository::outbox::OutboxRepository;
pub use repository::product::ProductRepository;
pub use repository::refund::RefundRepository;
pub use repository::sale::{SaleDetail, SaleRepository};

// =============================================================================
// Test Fixtures
// =============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use stockwell_core::events::RecordingSink;
    use stockwell_core::{Batch, Money, NewBatch, NewProduct, NewSale, NewSaleLine, Product};

    use crate::config::StockSettings;
    use crate::engine::StockEngine;
    use crate::pool::Database;
    use crate::repository::sale::SaleDetail;

    pub async fn memory_db() -> Database {
        Database::in_memory().await.unwrap()
    }

    pub fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    pub fn product_input(sku: &str, track_stock: bool) -> NewProduct {
        NewProduct {
            sku: sku.to_string(),
            name: format!("{sku} item"),
            unit: "unit".to_string(),
            track_stock,
        }
    }

    pub async fn product(db: &Database, sku: &str) -> Product {
        db.products().create(&product_input(sku, true)).await.unwrap()
    }

    pub async fn product_untracked(db: &Database, sku: &str) -> Product {
        db.products().create(&product_input(sku, false)).await.unwrap()
    }

    pub async fn batch(db: &Database, product_id: &str, lot: &str, expiry: Option<NaiveDate>) -> Batch {
        db.batches()
            .create(&NewBatch {
                product_id: product_id.to_string(),
                lot_code: lot.to_string(),
                expiry_date: expiry,
            })
            .await
            .unwrap()
    }

    pub fn sale_line(product_id: &str, quantity: i64, unit_price_cents: i64) -> NewSaleLine {
        NewSaleLine {
            product_id: product_id.to_string(),
            quantity,
            unit_price: Money::from_cents(unit_price_cents),
            discount: Money::zero(),
        }
    }

    /// Draft sale with one line per (product, qty, unit price in cents).
    pub async fn draft_sale(db: &Database, lines: &[(&str, i64, i64)]) -> SaleDetail {
        db.sales()
            .create_draft(&NewSale {
                legal_entity: "Clinic North".to_string(),
                currency: "EUR".to_string(),
                lines: lines.iter().map(|(p, q, price)| sale_line(p, *q, *price)).collect(),
            })
            .await
            .unwrap()
    }

    pub fn recording_engine(db: &Database) -> (StockEngine, Arc<RecordingSink>) {
        recording_engine_with(db, StockSettings::default())
    }

    pub fn recording_engine_with(db: &Database, settings: StockSettings) -> (StockEngine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let engine = StockEngine::with_sink(db.clone(), settings, sink.clone());
        (engine, sink)
    }

    pub struct PaidSaleFixture {
        pub sale_id: String,
        pub line_id: String,
        pub product_id: String,
        pub batch_id: String,
    }

    /// One batch of 100 units; a PAID sale of `quantity` from it.
    pub async fn paid_sale_fixture(db: &Database, quantity: i64, unit_price_cents: i64) -> PaidSaleFixture {
        let p = product(db, "FIXTURE").await;
        let b = batch(db, &p.id, "FIX-1", date(2030, 1, 1)).await;
        db.ledger().receive(&b.id, 100, "PO-FIXTURE").await.unwrap();

        let detail = draft_sale(db, &[(&p.id, quantity, unit_price_cents)]).await;
        let (engine, _sink) = recording_engine(db);
        engine.mark_paid(&detail.sale.id).await.unwrap();

        PaidSaleFixture {
            sale_id: detail.sale.id.clone(),
            line_id: detail.lines[0].id.clone(),
            product_id: p.id,
            batch_id: b.id,
        }
    }
}
