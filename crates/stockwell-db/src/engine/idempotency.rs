//! # Idempotency Guard
//!
//! At-most-once refund creation per (sale, idempotency key).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  refund(sale, lines, key)                                               │
//! │                                                                         │
//! │  ① lookup(pool, sale, key) ─── hit ──► replay stored refund            │
//! │  ② BEGIN; claim sale                                                    │
//! │  ③ lookup(tx, sale, key)   ─── hit ──► ROLLBACK, replay                 │
//! │     (a concurrent retry committed between ① and ②)                      │
//! │  ④ INSERT sale_refunds ... ─── UNIQUE ──► ROLLBACK, replay              │
//! │     (storage backstop: the partial unique index)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A missing key disables all three checks: every keyless request creates
//! a new refund.

use sqlx::SqliteConnection;
use std::collections::BTreeMap;

use crate::error::{DbError, DbResult};
use crate::repository::refund::RefundRepository;
use stockwell_core::validation::validate_idempotency_key;
use stockwell_core::{CoreError, RefundLineRequest, SaleRefund, SaleRefundLine};

/// Lookup-before-write plus unique-violation recovery.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdempotencyGuard;

impl IdempotencyGuard {
    /// Validates a client key; `None` passes through.
    pub fn check_key(key: Option<&str>) -> DbResult<()> {
        if let Some(key) = key {
            validate_idempotency_key(key).map_err(CoreError::from)?;
        }
        Ok(())
    }

    /// The refund already stored under (sale, key), if any.
    pub async fn lookup(conn: &mut SqliteConnection, sale_id: &str, key: Option<&str>) -> DbResult<Option<SaleRefund>> {
        match key {
            Some(key) => RefundRepository::find_by_key_in(conn, sale_id, key).await,
            None => Ok(None),
        }
    }

    /// Whether `err` is the partial unique index rejecting a duplicate key.
    pub fn is_duplicate_key(err: &DbError) -> bool {
        matches!(err, DbError::UniqueViolation { field, .. } if field.contains("idempotency_key"))
    }

    /// Whether a retried request asks for exactly what the stored refund holds.
    ///
    /// A mismatch is still answered with the stored refund; it is only
    /// reported on the replay event.
    pub fn request_matches(request: &[RefundLineRequest], stored: &[SaleRefundLine]) -> bool {
        let mut requested: BTreeMap<&str, i64> = BTreeMap::new();
        for line in request {
            *requested.entry(line.sale_line_id.as_str()).or_default() += line.quantity;
        }

        let stored: BTreeMap<&str, i64> = stored
            .iter()
            .map(|l| (l.sale_line_id.as_str(), l.qty_refunded))
            .collect();

        requested == stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stored(line: &str, qty: i64) -> SaleRefundLine {
        SaleRefundLine {
            id: format!("rl-{line}"),
            refund_id: "r1".to_string(),
            sale_line_id: line.to_string(),
            qty_refunded: qty,
            amount_cents: qty * 100,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_request_matches_ignores_order() {
        let request = vec![RefundLineRequest::new("l2", 1), RefundLineRequest::new("l1", 4)];
        let lines = vec![stored("l1", 4), stored("l2", 1)];
        assert!(IdempotencyGuard::request_matches(&request, &lines));
    }

    #[test]
    fn test_request_mismatch_detected() {
        let lines = vec![stored("l1", 4)];
        assert!(!IdempotencyGuard::request_matches(&[RefundLineRequest::new("l1", 5)], &lines));
        assert!(!IdempotencyGuard::request_matches(
            &[RefundLineRequest::new("l1", 4), RefundLineRequest::new("l2", 1)],
            &lines
        ));
    }

    #[test]
    fn test_duplicate_key_detection() {
        let dup = DbError::duplicate("sale_refunds.sale_id, sale_refunds.idempotency_key", "unknown");
        assert!(IdempotencyGuard::is_duplicate_key(&dup));
        assert!(!IdempotencyGuard::is_duplicate_key(&DbError::duplicate("products.sku", "A")));
    }

    #[test]
    fn test_key_validation() {
        assert!(IdempotencyGuard::check_key(None).is_ok());
        assert!(IdempotencyGuard::check_key(Some("r1")).is_ok());
        assert!(IdempotencyGuard::check_key(Some("  ")).is_err());
    }
}
