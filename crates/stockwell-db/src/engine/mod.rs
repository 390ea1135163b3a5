//! # Stock Engine
//!
//! Transactional entry points for the sale workflow.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          StockEngine                                    │
//! │                                                                         │
//! │   receive(batch, qty)      mark_paid(sale)        refund(sale, lines,   │
//! │        │                        │                        key)           │
//! │        ▼                        ▼                        │              │
//! │   StockLedger::receive   SaleTransaction          RefundTransaction     │
//! │                          Orchestrator             Orchestrator          │
//! │                                 │                        │              │
//! │                                 └──────────┬─────────────┘              │
//! │                                            ▼                            │
//! │                     one SQLite transaction per call:                    │
//! │                     claim sale → read → guard → write → outbox          │
//! │                                            │                            │
//! │                                            ▼                            │
//! │                                EventSink (after commit)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Authorization, HTTP mapping and the rest of the sale workflow sit above
//! this type; they call it once payment or a refund has been approved.

pub mod idempotency;
pub mod refund_tx;
pub mod sale_tx;

use std::sync::Arc;

use tracing::info;

use crate::config::{StockSettings, StockwellConfig};
use crate::error::DbResult;
use crate::pool::Database;
use crate::telemetry::TracingSink;
use stockwell_core::events::EventSink;
use stockwell_core::validation::validate_unreserved_lot_code;
use stockwell_core::{Batch, CoreError, NewBatch, RefundLineRequest, Sale, StockLedgerEntry};

pub use idempotency::IdempotencyGuard;
pub use refund_tx::{RefundReceipt, RefundTransactionOrchestrator};
pub use sale_tx::SaleTransactionOrchestrator;

/// Facade over the two orchestrators and stock receipt.
#[derive(Clone)]
pub struct StockEngine {
    db: Database,
    settings: StockSettings,
    sink: Arc<dyn EventSink>,
    sales: SaleTransactionOrchestrator,
    refunds: RefundTransactionOrchestrator,
}

impl StockEngine {
    /// Engine that reports events through tracing.
    pub fn new(db: Database, settings: StockSettings) -> Self {
        Self::with_sink(db, settings, Arc::new(TracingSink))
    }

    pub fn with_sink(db: Database, settings: StockSettings, sink: Arc<dyn EventSink>) -> Self {
        let sales = SaleTransactionOrchestrator::new(db.clone(), Arc::clone(&sink));
        let refunds = RefundTransactionOrchestrator::new(db.clone(), settings.clone(), Arc::clone(&sink));

        StockEngine {
            db,
            settings,
            sink,
            sales,
            refunds,
        }
    }

    /// Connects using a loaded config file.
    pub async fn from_config(config: &StockwellConfig) -> DbResult<Self> {
        config.validate()?;
        let db = Database::new(config.to_db_config()).await?;
        info!(
            restock_policy = %config.stock.restock_policy,
            returns_lot = %config.stock.returns_lot_code,
            "Stock engine ready"
        );
        Ok(Self::new(db, config.stock.clone()))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &StockSettings {
        &self.settings
    }

    /// Creates a user batch. The configured returns lot code is reserved
    /// for the per-product returns batch and is refused here.
    pub async fn create_batch(&self, input: &NewBatch) -> DbResult<Batch> {
        validate_unreserved_lot_code(&input.lot_code, &self.settings.returns_lot_code).map_err(CoreError::from)?;
        self.db.batches().create(input).await
    }

    /// Books received goods into a batch.
    pub async fn receive(&self, batch_id: &str, quantity: i64, reference: &str) -> DbResult<StockLedgerEntry> {
        let received = self.db.ledger().receive(batch_id, quantity, reference).await?;
        self.sink.emit(&received.event);
        Ok(received.entry)
    }

    /// See [`SaleTransactionOrchestrator::mark_paid`].
    pub async fn mark_paid(&self, sale_id: &str) -> DbResult<Sale> {
        self.sales.mark_paid(sale_id).await
    }

    /// See [`RefundTransactionOrchestrator::refund`].
    pub async fn refund(
        &self,
        sale_id: &str,
        lines: &[RefundLineRequest],
        idempotency_key: Option<&str>,
    ) -> DbResult<RefundReceipt> {
        self.refunds.refund(sale_id, lines, idempotency_key).await
    }
}
