//! # Sale Transaction Orchestrator
//!
//! DRAFT → PAID, consuming stock exactly once.
//!
//! ## mark_paid
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │  ├── claim sale (UPDATE lock_seq)            ✗ SaleNotFound             │
//! │  ├── guard DRAFT → PAID                      ✗ InvalidSaleState         │
//! │  ├── for each stock-tracked line:                                       │
//! │  │     ├── read FEFO catalog (inside the tx)                            │
//! │  │     ├── allocate                          ✗ InsufficientStock        │
//! │  │     └── SALE_OUT −q per (batch, q), attributed to the line           │
//! │  ├── status = PAID, paid_at                                             │
//! │  └── outbox: stock_consumed × n, sale_paid                              │
//! │  COMMIT ──► sink                                                        │
//! │                                                                         │
//! │  Any ✗ ──► ROLLBACK: status stays DRAFT, zero ledger rows               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use sqlx::{Sqlite, Transaction};
use tracing::{info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::batch::BatchRepository;
use crate::repository::ledger::StockLedger;
use crate::repository::outbox::OutboxRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::SaleRepository;
use stockwell_core::events::{EventSink, StockEvent};
use stockwell_core::fefo::{self, BatchStock};
use stockwell_core::sale_state::{transition, SaleCommand};
use stockwell_core::{CoreError, LedgerKind, Sale};

/// Drives the sale state machine and the FEFO consumption on payment.
#[derive(Clone)]
pub struct SaleTransactionOrchestrator {
    db: Database,
    sink: Arc<dyn EventSink>,
}

impl SaleTransactionOrchestrator {
    pub fn new(db: Database, sink: Arc<dyn EventSink>) -> Self {
        SaleTransactionOrchestrator { db, sink }
    }

    /// Marks a DRAFT sale paid and consumes its stock.
    ///
    /// ## Errors
    /// * `Domain(SaleNotFound)` - unknown sale
    /// * `Domain(InvalidSaleState)` - sale is already PAID or REFUNDED
    /// * `Domain(InsufficientStock)` - a line cannot be covered; nothing is written
    pub async fn mark_paid(&self, sale_id: &str) -> DbResult<Sale> {
        let mut tx = self.db.pool().begin().await?;

        SaleRepository::lock_in(&mut tx, sale_id).await?;

        let sale = SaleRepository::fetch_in(&mut tx, sale_id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()))?;

        let next = match transition(sale_id, sale.status, SaleCommand::MarkPaid) {
            Ok(next) => next,
            Err(err) => {
                let event = StockEvent::InvalidState {
                    sale_id: sale_id.to_string(),
                    status: sale.status,
                    operation: "mark_paid".to_string(),
                };
                return Err(self.reject(tx, event, err).await);
            }
        };

        let lines = SaleRepository::lines_in(&mut tx, sale_id).await?;
        let mut events = Vec::new();

        for line in &lines {
            let product = ProductRepository::fetch(&mut tx, &line.product_id)
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(line.product_id.clone()))?;

            if !product.track_stock {
                continue;
            }

            // Reads this transaction's own SALE_OUT rows, so two lines of the
            // same product never allocate the same units.
            let catalog = BatchRepository::available_in(&mut tx, &line.product_id).await?;
            let stock: Vec<BatchStock> = catalog.iter().map(BatchStock::from).collect();

            let picks = match fefo::allocate(&line.product_id, &stock, line.quantity) {
                Ok(picks) => picks,
                Err(err @ CoreError::InsufficientStock { .. }) => {
                    let event = StockEvent::InsufficientStock {
                        sale_id: sale_id.to_string(),
                        product_id: line.product_id.clone(),
                        available: fefo::available(&stock),
                        requested: line.quantity,
                    };
                    return Err(self.reject(tx, event, err).await);
                }
                Err(err) => return Err(err.into()),
            };

            for pick in picks {
                StockLedger::append_in(
                    &mut tx,
                    &pick.batch_id,
                    -pick.quantity,
                    LedgerKind::SaleOut,
                    sale_id,
                    Some(&line.id),
                )
                .await?;

                events.push(StockEvent::StockConsumed {
                    sale_id: sale_id.to_string(),
                    sale_line_id: line.id.clone(),
                    product_id: line.product_id.clone(),
                    batch_id: pick.batch_id,
                    quantity: pick.quantity,
                });
            }
        }

        SaleRepository::set_status_in(&mut tx, sale_id, next).await?;

        events.push(StockEvent::SalePaid {
            sale_id: sale_id.to_string(),
            line_count: lines.len(),
            units: lines.iter().map(|l| l.quantity).sum(),
            total_cents: sale.total_cents,
        });

        for event in &events {
            OutboxRepository::append_in(&mut tx, event).await?;
        }

        let paid = SaleRepository::fetch_in(&mut tx, sale_id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()))?;

        tx.commit().await?;

        info!(sale_id = %sale_id, lines = lines.len(), total = %paid.total(), "Sale paid");

        for event in &events {
            self.sink.emit(event);
        }

        Ok(paid)
    }

    /// Rolls back, reports the rejection, and returns the error.
    async fn reject(&self, tx: Transaction<'static, Sqlite>, event: StockEvent, err: CoreError) -> DbError {
        if let Err(rollback_err) = tx.rollback().await {
            warn!(error = %rollback_err, "Rollback failed; the connection will discard the transaction");
        }

        warn!(event_type = event.event_type(), aggregate_id = event.aggregate_id(), error = %err, "Sale request rejected");
        self.sink.emit(&event);
        err.into()
    }
}
