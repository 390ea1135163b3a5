//! # Refund Transaction Orchestrator
//!
//! Full and partial refunds of PAID sales with restock.
//!
//! ## refund
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  key lookup (pool)  ─── hit ──► replay                                  │
//! │  BEGIN                                                                  │
//! │  ├── claim sale                              ✗ SaleNotFound             │
//! │  ├── key lookup (tx) ─── hit ──► ROLLBACK, replay                       │
//! │  ├── guard PAID / REFUNDED                   ✗ InvalidSaleState         │
//! │  ├── read prior refunded per line (inside the tx)                       │
//! │  ├── plan: every line checked first          ✗ OverRefund               │
//! │  ├── INSERT refund header ─── UNIQUE ──► ROLLBACK, replay               │
//! │  ├── for each line:                                                     │
//! │  │     ├── INSERT refund line                                           │
//! │  │     └── REFUND_IN +q: original batches, remainder to returns batch   │
//! │  ├── status = REFUNDED when every unit is back                          │
//! │  └── outbox: refund_created, stock_restored × n                         │
//! │  COMMIT ──► sink                                                        │
//! │                                                                         │
//! │  Any ✗ or storage failure ──► ROLLBACK: no refund rows, no ledger rows  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::idempotency::IdempotencyGuard;
use crate::config::StockSettings;
use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::batch::BatchRepository;
use crate::repository::ledger::StockLedger;
use crate::repository::outbox::OutboxRepository;
use crate::repository::product::ProductRepository;
use crate::repository::refund::RefundRepository;
use crate::repository::sale::SaleRepository;
use stockwell_core::events::{EventSink, StockEvent};
use stockwell_core::refund::{plan_refund, plan_restock, RefundPlanLine};
use stockwell_core::sale_state::{ensure_refundable, transition, SaleCommand};
use stockwell_core::{
    CoreError, LedgerKind, Product, RefundLineRequest, RefundStatus, SaleRefund, SaleRefundLine,
};

/// Outcome of a refund call.
#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
    pub refund: SaleRefund,
    pub lines: Vec<SaleRefundLine>,
    /// True when the idempotency key matched an earlier refund and nothing
    /// was written.
    pub replayed: bool,
}

/// Creates refunds and puts refunded units back on the shelf.
#[derive(Clone)]
pub struct RefundTransactionOrchestrator {
    db: Database,
    settings: StockSettings,
    sink: Arc<dyn EventSink>,
}

impl RefundTransactionOrchestrator {
    pub fn new(db: Database, settings: StockSettings, sink: Arc<dyn EventSink>) -> Self {
        RefundTransactionOrchestrator { db, settings, sink }
    }

    /// Refunds `request` against a sale.
    ///
    /// With `idempotency_key`, a retry returns the refund created by the
    /// first call (`replayed = true`) and writes nothing.
    ///
    /// ## Errors
    /// * `Domain(SaleNotFound)` / `Domain(SaleLineNotFound)`
    /// * `Domain(InvalidSaleState)` - sale is DRAFT
    /// * `Domain(OverRefund)` - a line would exceed its sold quantity
    /// * `Domain(Validation)` - empty request, non-positive or duplicate lines, bad key
    pub async fn refund(
        &self,
        sale_id: &str,
        request: &[RefundLineRequest],
        idempotency_key: Option<&str>,
    ) -> DbResult<RefundReceipt> {
        IdempotencyGuard::check_key(idempotency_key)?;

        let existing = {
            let mut conn = self.db.pool().acquire().await?;
            IdempotencyGuard::lookup(&mut conn, sale_id, idempotency_key).await?
        };
        if let Some(existing) = existing {
            return self.replay(existing, request).await;
        }

        let mut tx = self.db.pool().begin().await?;

        SaleRepository::lock_in(&mut tx, sale_id).await?;

        // A retry with the same key may have committed while we waited for
        // the claim.
        if let Some(existing) = IdempotencyGuard::lookup(&mut tx, sale_id, idempotency_key).await? {
            tx.rollback().await?;
            return self.replay(existing, request).await;
        }

        let sale = SaleRepository::fetch_in(&mut tx, sale_id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()))?;

        if let Err(err) = ensure_refundable(sale_id, sale.status) {
            let event = StockEvent::InvalidState {
                sale_id: sale_id.to_string(),
                status: sale.status,
                operation: "refund".to_string(),
            };
            return Err(self.reject(tx, Some(event), err).await);
        }

        let sale_lines = SaleRepository::lines_in(&mut tx, sale_id).await?;
        let prior = RefundRepository::refunded_per_line_in(&mut tx, sale_id).await?;

        let plan = match plan_refund(sale_id, &sale_lines, &prior, request) {
            Ok(plan) => plan,
            Err(err) => {
                let event = match &err {
                    CoreError::OverRefund {
                        sale_line_id,
                        sold,
                        already_refunded,
                        requested,
                    } => Some(StockEvent::OverRefundBlocked {
                        sale_id: sale_id.to_string(),
                        sale_line_id: sale_line_id.clone(),
                        sold: *sold,
                        already_refunded: *already_refunded,
                        requested: *requested,
                    }),
                    _ => None,
                };
                return Err(self.reject(tx, event, err).await);
            }
        };

        let next = transition(sale_id, sale.status, SaleCommand::Refund {
            fully_refunded: plan.fully_refunded,
        })?;

        let now = Utc::now();
        let refund = SaleRefund {
            id: generate_refund_id(),
            sale_id: sale_id.to_string(),
            idempotency_key: idempotency_key.map(str::to_string),
            status: RefundStatus::Created,
            total_refunded_cents: plan.total.cents(),
            created_at: now,
        };

        if let Err(err) = RefundRepository::insert_in(&mut tx, &refund).await {
            if let (true, Some(key)) = (IdempotencyGuard::is_duplicate_key(&err), idempotency_key) {
                tx.rollback().await?;
                let existing = self
                    .db
                    .refunds()
                    .find_by_key(sale_id, key)
                    .await?
                    .ok_or_else(|| DbError::Internal(format!("refund for key '{key}' vanished after conflict")))?;
                return self.replay(existing, request).await;
            }
            return Err(err);
        }

        let mut products: HashMap<String, Product> = HashMap::new();
        let mut lines = Vec::with_capacity(plan.lines.len());
        let mut restored = Vec::new();

        for planned in &plan.lines {
            let line = SaleRefundLine {
                id: generate_refund_line_id(),
                refund_id: refund.id.clone(),
                sale_line_id: planned.sale_line_id.clone(),
                qty_refunded: planned.quantity,
                amount_cents: planned.amount.cents(),
                created_at: now,
            };
            RefundRepository::insert_line_in(&mut tx, &line).await?;
            lines.push(line);

            if !products.contains_key(&planned.product_id) {
                let product = ProductRepository::fetch(&mut tx, &planned.product_id)
                    .await?
                    .ok_or_else(|| CoreError::ProductNotFound(planned.product_id.clone()))?;
                products.insert(planned.product_id.clone(), product);
            }

            let tracked = products
                .get(&planned.product_id)
                .map(|p| p.track_stock)
                .unwrap_or(false);
            if tracked {
                restored.extend(self.restock_line(&mut tx, &refund.id, planned).await?);
            }
        }

        if next != sale.status {
            SaleRepository::set_status_in(&mut tx, sale_id, next).await?;
        }

        let mut events = Vec::with_capacity(restored.len() + 1);
        events.push(StockEvent::RefundCreated {
            refund_id: refund.id.clone(),
            sale_id: sale_id.to_string(),
            line_count: lines.len(),
            units: lines.iter().map(|l| l.qty_refunded).sum(),
            total_refunded_cents: refund.total_refunded_cents,
            sale_status: next,
        });
        events.extend(restored);

        for event in &events {
            OutboxRepository::append_in(&mut tx, event).await?;
        }

        tx.commit().await?;

        info!(
            refund_id = %refund.id,
            sale_id = %sale_id,
            total = %refund.total_refunded(),
            status = %next,
            "Refund created"
        );

        for event in &events {
            self.sink.emit(event);
        }

        Ok(RefundReceipt {
            refund,
            lines,
            replayed: false,
        })
    }

    /// Credits one refunded line back to stock, returning the restore events.
    async fn restock_line(
        &self,
        conn: &mut SqliteConnection,
        refund_id: &str,
        planned: &RefundPlanLine,
    ) -> DbResult<Vec<StockEvent>> {
        let consumed = StockLedger::consumed_by_line_in(conn, &planned.sale_line_id).await?;
        let restock = plan_restock(self.settings.restock_policy, &consumed, planned.quantity);

        let mut credits: Vec<(String, i64)> = restock
            .credits
            .into_iter()
            .map(|c| (c.batch_id, c.quantity))
            .collect();

        if restock.unattributed > 0 {
            let returns =
                BatchRepository::returns_batch_in(conn, &planned.product_id, &self.settings.returns_lot_code).await?;
            debug!(
                sale_line_id = %planned.sale_line_id,
                batch_id = %returns.id,
                quantity = restock.unattributed,
                "Restocking into returns batch"
            );
            credits.push((returns.id, restock.unattributed));
        }

        let mut events = Vec::with_capacity(credits.len());
        for (batch_id, quantity) in credits {
            StockLedger::append_in(
                conn,
                &batch_id,
                quantity,
                LedgerKind::RefundIn,
                refund_id,
                Some(&planned.sale_line_id),
            )
            .await?;

            events.push(StockEvent::StockRestored {
                refund_id: refund_id.to_string(),
                sale_line_id: planned.sale_line_id.clone(),
                batch_id,
                quantity,
            });
        }

        Ok(events)
    }

    /// Answers a retried request with the stored refund.
    async fn replay(&self, existing: SaleRefund, request: &[RefundLineRequest]) -> DbResult<RefundReceipt> {
        let lines = self.db.refunds().get_lines(&existing.id).await?;
        let request_matches = IdempotencyGuard::request_matches(request, &lines);

        if request_matches {
            debug!(refund_id = %existing.id, sale_id = %existing.sale_id, "Idempotent refund replayed");
        } else {
            warn!(
                refund_id = %existing.id,
                sale_id = %existing.sale_id,
                "Idempotency key reused with different lines; returning the stored refund"
            );
        }

        self.sink.emit(&StockEvent::IdempotentReplay {
            sale_id: existing.sale_id.clone(),
            refund_id: existing.id.clone(),
            request_matches,
        });

        Ok(RefundReceipt {
            refund: existing,
            lines,
            replayed: true,
        })
    }

    async fn reject(&self, tx: Transaction<'static, Sqlite>, event: Option<StockEvent>, err: CoreError) -> DbError {
        if let Err(rollback_err) = tx.rollback().await {
            warn!(error = %rollback_err, "Rollback failed; the connection will discard the transaction");
        }

        warn!(error = %err, "Refund request rejected");
        if let Some(event) = event {
            self.sink.emit(&event);
        }
        err.into()
    }
}

fn generate_refund_id() -> String {
    format!("ref-{}", Uuid::new_v4())
}

fn generate_refund_line_id() -> String {
    format!("rfl-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        batch, date, draft_sale, memory_db, paid_sale_fixture, product, product_untracked, recording_engine,
        recording_engine_with,
    };
    use stockwell_core::refund::RestockPolicy;
    use stockwell_core::SaleStatus;

    #[tokio::test]
    async fn test_partial_refund_then_over_refund() {
        let db = memory_db().await;
        let (engine, sink) = recording_engine(&db);
        let f = paid_sale_fixture(&db, 10, 500).await;

        let receipt = engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 4)], Some("r1"))
            .await
            .unwrap();
        assert!(!receipt.replayed);
        assert_eq!(receipt.refund.total_refunded_cents, 2000);
        assert_eq!(receipt.lines.len(), 1);
        assert_eq!(receipt.lines[0].qty_refunded, 4);
        assert_eq!(db.sales().require(&f.sale_id).await.unwrap().status, SaleStatus::Paid);
        assert_eq!(db.batches().on_hand(&f.batch_id).await.unwrap(), 94);

        let err = engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 7)], None)
            .await
            .unwrap_err();
        match err {
            DbError::Domain(CoreError::OverRefund {
                sold,
                already_refunded,
                requested,
                ..
            }) => {
                assert_eq!((sold, already_refunded, requested), (10, 4, 7));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(db.refunds().count_for_sale(&f.sale_id).await.unwrap(), 1);
        assert_eq!(db.batches().on_hand(&f.batch_id).await.unwrap(), 94);
        assert_eq!(sink.of_type("over_refund_blocked").len(), 1);
    }

    #[tokio::test]
    async fn test_huge_quantity_after_partial_refund_is_over_refund() {
        let db = memory_db().await;
        let (engine, sink) = recording_engine(&db);
        let f = paid_sale_fixture(&db, 10, 500).await;

        engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 4)], None)
            .await
            .unwrap();

        let err = engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, i64::MAX)], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::OverRefund { already_refunded: 4, requested: i64::MAX, .. })
        ));
        assert_eq!(sink.of_type("over_refund_blocked").len(), 1);

        let refundable = db.refunds().refundable_quantities(&f.sale_id).await.unwrap();
        assert_eq!((refundable[0].refunded, refundable[0].remaining()), (4, 6));
        assert_eq!(db.batches().on_hand(&f.batch_id).await.unwrap(), 94);
    }

    #[tokio::test]
    async fn test_same_key_creates_at_most_one_refund() {
        let db = memory_db().await;
        let (engine, sink) = recording_engine(&db);
        let f = paid_sale_fixture(&db, 10, 500).await;
        let request = [RefundLineRequest::new(&f.line_id, 4)];

        let first = engine.refund(&f.sale_id, &request, Some("r1")).await.unwrap();
        let second = engine.refund(&f.sale_id, &request, Some("r1")).await.unwrap();

        assert!(second.replayed);
        assert_eq!(first.refund.id, second.refund.id);
        assert_eq!(second.lines.len(), 1);
        assert_eq!(db.refunds().count_for_sale(&f.sale_id).await.unwrap(), 1);
        assert_eq!(db.ledger().entries_for_reference(&first.refund.id).await.unwrap().len(), 1);
        assert_eq!(db.batches().on_hand(&f.batch_id).await.unwrap(), 94);

        let replays = sink.of_type("idempotent_replay");
        assert_eq!(replays.len(), 1);
        assert!(matches!(replays[0], StockEvent::IdempotentReplay { request_matches: true, .. }));
    }

    #[tokio::test]
    async fn test_key_reuse_with_different_lines_returns_stored_refund() {
        let db = memory_db().await;
        let (engine, sink) = recording_engine(&db);
        let f = paid_sale_fixture(&db, 10, 500).await;

        let first = engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 2)], Some("r1"))
            .await
            .unwrap();
        let retry = engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 5)], Some("r1"))
            .await
            .unwrap();

        assert!(retry.replayed);
        assert_eq!(retry.refund.id, first.refund.id);
        assert_eq!(retry.lines[0].qty_refunded, 2);
        assert!(matches!(
            sink.of_type("idempotent_replay")[0],
            StockEvent::IdempotentReplay { request_matches: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_keyless_requests_never_deduplicate() {
        let db = memory_db().await;
        let (engine, _sink) = recording_engine(&db);
        let f = paid_sale_fixture(&db, 10, 500).await;
        let request = [RefundLineRequest::new(&f.line_id, 1)];

        let a = engine.refund(&f.sale_id, &request, None).await.unwrap();
        let b = engine.refund(&f.sale_id, &request, None).await.unwrap();

        assert_ne!(a.refund.id, b.refund.id);
        assert_eq!(db.refunds().count_for_sale(&f.sale_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_full_refund_marks_sale_refunded() {
        let db = memory_db().await;
        let (engine, sink) = recording_engine(&db);
        let f = paid_sale_fixture(&db, 10, 500).await;

        engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 6)], Some("a"))
            .await
            .unwrap();
        let last = engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 4)], Some("b"))
            .await
            .unwrap();

        assert_eq!(last.refund.total_refunded_cents, 2000);
        let sale = db.sales().require(&f.sale_id).await.unwrap();
        assert_eq!(sale.status, SaleStatus::Refunded);
        assert!(sale.refunded_at.is_some());
        assert_eq!(db.batches().on_hand(&f.batch_id).await.unwrap(), 100);

        assert!(matches!(
            sink.of_type("refund_created").last(),
            Some(StockEvent::RefundCreated { sale_status: SaleStatus::Refunded, .. })
        ));

        let err = engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 1)], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::OverRefund { .. })));
    }

    #[tokio::test]
    async fn test_refund_of_draft_sale_rejected() {
        let db = memory_db().await;
        let (engine, sink) = recording_engine(&db);
        let p = product(&db, "AMOX").await;
        let detail = draft_sale(&db, &[(&p.id, 1, 100)]).await;

        let err = engine
            .refund(&detail.sale.id, &[RefundLineRequest::new(&detail.lines[0].id, 1)], Some("k"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::Domain(CoreError::InvalidSaleState { current: SaleStatus::Draft, .. })
        ));
        assert_eq!(db.refunds().count_for_sale(&detail.sale.id).await.unwrap(), 0);
        assert_eq!(sink.of_type("invalid_state").len(), 1);
    }

    #[tokio::test]
    async fn test_multi_line_over_refund_is_atomic() {
        let db = memory_db().await;
        let (engine, _sink) = recording_engine(&db);
        let p = product(&db, "AMOX").await;
        let q = product(&db, "IBU").await;
        let bp = batch(&db, &p.id, "P1", date(2026, 1, 1)).await;
        let bq = batch(&db, &q.id, "Q1", date(2026, 1, 1)).await;
        db.ledger().receive(&bp.id, 10, "PO").await.unwrap();
        db.ledger().receive(&bq.id, 10, "PO").await.unwrap();

        let detail = draft_sale(&db, &[(&p.id, 3, 100), (&q.id, 2, 100)]).await;
        engine.mark_paid(&detail.sale.id).await.unwrap();
        let rows_before = db.ledger().count().await.unwrap();

        let err = engine
            .refund(
                &detail.sale.id,
                &[
                    RefundLineRequest::new(&detail.lines[0].id, 3),
                    RefundLineRequest::new(&detail.lines[1].id, 3),
                ],
                Some("k"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::OverRefund { .. })));

        assert_eq!(db.ledger().count().await.unwrap(), rows_before);
        assert_eq!(db.refunds().count_for_sale(&detail.sale.id).await.unwrap(), 0);
        assert_eq!(db.batches().on_hand(&bp.id).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_unknown_sale_line_rejected() {
        let db = memory_db().await;
        let (engine, _sink) = recording_engine(&db);
        let f = paid_sale_fixture(&db, 10, 500).await;

        let err = engine
            .refund(&f.sale_id, &[RefundLineRequest::new("not-a-line", 1)], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::SaleLineNotFound { .. })));
    }

    #[tokio::test]
    async fn test_restock_goes_back_to_consumed_batches() {
        let db = memory_db().await;
        let (engine, _sink) = recording_engine(&db);
        let p = product(&db, "AMOX").await;
        let b1 = batch(&db, &p.id, "B1", date(2025, 1, 1)).await;
        let b2 = batch(&db, &p.id, "B2", date(2025, 2, 1)).await;
        db.ledger().receive(&b1.id, 3, "PO").await.unwrap();
        db.ledger().receive(&b2.id, 10, "PO").await.unwrap();

        let detail = draft_sale(&db, &[(&p.id, 5, 500)]).await;
        engine.mark_paid(&detail.sale.id).await.unwrap();
        let line_id = detail.lines[0].id.clone();

        // Last batch drawn from is refilled first.
        let receipt = engine
            .refund(&detail.sale.id, &[RefundLineRequest::new(&line_id, 3)], None)
            .await
            .unwrap();
        let credits = db.ledger().entries_for_reference(&receipt.refund.id).await.unwrap();
        let credits: Vec<(String, i64)> = credits.into_iter().map(|e| (e.batch_id, e.quantity)).collect();
        assert_eq!(credits, vec![(b2.id.clone(), 2), (b1.id.clone(), 1)]);

        assert_eq!(db.batches().on_hand(&b1.id).await.unwrap(), 1);
        assert_eq!(db.batches().on_hand(&b2.id).await.unwrap(), 10);

        let movements = db.ledger().sale_movements(&detail.sale.id).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!((movements[0].sold, movements[0].refunded), (5, 3));
        assert!(movements[0].is_within_bounds());
        assert!(db.ledger().audit_all().await.unwrap().is_empty());

        let summary = db.ledger().product_summary(&p.id).await.unwrap();
        assert!(summary.is_conserved());
        assert_eq!(summary.on_hand, 11);
    }

    #[tokio::test]
    async fn test_returns_batch_policy() {
        let db = memory_db().await;
        let settings = StockSettings {
            restock_policy: RestockPolicy::ReturnsBatch,
            returns_lot_code: "RET".to_string(),
        };
        let (engine, sink) = recording_engine_with(&db, settings);
        let f = paid_sale_fixture(&db, 10, 500).await;

        engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 2)], None)
            .await
            .unwrap();
        engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 1)], None)
            .await
            .unwrap();

        assert_eq!(db.batches().on_hand(&f.batch_id).await.unwrap(), 90);

        let batches = db.batches().list_for_product(&f.product_id).await.unwrap();
        let returns: Vec<_> = batches.iter().filter(|b| b.batch.is_returns).collect();
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0].batch.lot_code, "RET");
        assert_eq!(returns[0].on_hand, 3);
        assert_eq!(sink.of_type("stock_restored").len(), 2);
    }

    #[tokio::test]
    async fn test_returns_policy_skips_user_lot_with_returns_code() {
        let db = memory_db().await;
        let settings = StockSettings {
            restock_policy: RestockPolicy::ReturnsBatch,
            returns_lot_code: "RETURNS".to_string(),
        };
        let (engine, _sink) = recording_engine_with(&db, settings);
        let f = paid_sale_fixture(&db, 5, 500).await;
        let user_lot = batch(&db, &f.product_id, "RETURNS", date(2020, 1, 1)).await;

        let receipt = engine
            .refund(&f.sale_id, &[RefundLineRequest::new(&f.line_id, 2)], None)
            .await
            .unwrap();

        let credits = db.ledger().entries_for_reference(&receipt.refund.id).await.unwrap();
        assert_eq!(credits.len(), 1);
        assert_ne!(credits[0].batch_id, user_lot.id);

        let credited = db.batches().get(&credits[0].batch_id).await.unwrap().unwrap();
        assert!(credited.is_returns);
        assert!(credited.expiry_date.is_none());
        assert_eq!(db.batches().on_hand(&credited.id).await.unwrap(), 2);
        assert_eq!(db.batches().on_hand(&user_lot.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_untracked_line_refunds_money_only() {
        let db = memory_db().await;
        let (engine, sink) = recording_engine(&db);
        let service = product_untracked(&db, "CONSULT").await;
        let detail = draft_sale(&db, &[(&service.id, 1, 4500)]).await;
        engine.mark_paid(&detail.sale.id).await.unwrap();

        let receipt = engine
            .refund(&detail.sale.id, &[RefundLineRequest::new(&detail.lines[0].id, 1)], None)
            .await
            .unwrap();

        assert_eq!(receipt.refund.total_refunded_cents, 4500);
        assert_eq!(db.ledger().count().await.unwrap(), 0);
        assert!(sink.of_type("stock_restored").is_empty());
        assert_eq!(db.sales().require(&detail.sale.id).await.unwrap().status, SaleStatus::Refunded);
    }

    #[tokio::test]
    async fn test_storage_failure_on_second_line_leaves_no_ghosts() {
        let db = memory_db().await;
        let (engine, sink) = recording_engine(&db);
        let p = product(&db, "AMOX").await;
        let q = product(&db, "IBU").await;
        let bp = batch(&db, &p.id, "P1", date(2026, 1, 1)).await;
        let bq = batch(&db, &q.id, "Q1", date(2026, 1, 1)).await;
        db.ledger().receive(&bp.id, 10, "PO").await.unwrap();
        db.ledger().receive(&bq.id, 10, "PO").await.unwrap();

        let detail = draft_sale(&db, &[(&p.id, 3, 100), (&q.id, 2, 100)]).await;
        engine.mark_paid(&detail.sale.id).await.unwrap();
        let second_line = detail.lines[1].id.clone();
        let request = [
            RefundLineRequest::new(&detail.lines[0].id, 3),
            RefundLineRequest::new(&second_line, 2),
        ];

        let trigger = format!(
            r#"
            CREATE TRIGGER trg_test_fail_restock
            BEFORE INSERT ON stock_ledger
            WHEN NEW.kind = 'refund_in' AND NEW.sale_line_id = '{second_line}'
            BEGIN
                SELECT RAISE(ABORT, 'injected restock failure');
            END
            "#
        );
        sqlx::query(&trigger).execute(db.pool()).await.unwrap();
        let rows_before = db.ledger().count().await.unwrap();

        let err = engine.refund(&detail.sale.id, &request, Some("r1")).await.unwrap_err();
        assert!(matches!(err, DbError::QueryFailed(_)));

        assert_eq!(db.refunds().count_for_sale(&detail.sale.id).await.unwrap(), 0);
        assert!(db.refunds().find_by_key(&detail.sale.id, "r1").await.unwrap().is_none());
        assert_eq!(db.ledger().count().await.unwrap(), rows_before);
        assert_eq!(db.batches().on_hand(&bp.id).await.unwrap(), 7);
        assert_eq!(db.sales().require(&detail.sale.id).await.unwrap().status, SaleStatus::Paid);
        assert!(sink.of_type("refund_created").is_empty());
        assert_eq!(db.outbox().count_pending().await.unwrap(), 5);

        sqlx::query("DROP TRIGGER trg_test_fail_restock")
            .execute(db.pool())
            .await
            .unwrap();

        let receipt = engine.refund(&detail.sale.id, &request, Some("r1")).await.unwrap();
        assert!(!receipt.replayed);
        assert_eq!(db.batches().on_hand(&bp.id).await.unwrap(), 10);
        assert_eq!(db.batches().on_hand(&bq.id).await.unwrap(), 10);
        assert_eq!(db.sales().require(&detail.sale.id).await.unwrap().status, SaleStatus::Refunded);
    }
}
