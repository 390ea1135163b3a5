//! # Ledger Invariants
//!
//! Pure checks over stock ledger entries, used by the audit and summary
//! operations of the database layer and by tests.
//!
//! ```text
//! on_hand(batch) = Σ quantity of its entries
//!
//! ① every prefix (ordered by id) of a batch's entries sums to ≥ 0
//! ② Σ quantity == Σ IN − |Σ SALE_OUT| + Σ REFUND_IN   (conservation)
//! ③ per (sale, product): Σ REFUND_IN ≤ |Σ SALE_OUT|
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{LedgerKind, StockLedgerEntry};

/// A broken ledger invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerViolation {
    /// The running balance of a batch went negative.
    #[error("batch {batch_id} goes negative ({balance}) at ledger entry {entry_id}")]
    NegativeBalance {
        batch_id: String,
        entry_id: i64,
        balance: i64,
    },

    /// An entry's sign does not match its kind.
    #[error("ledger entry {entry_id} has quantity {quantity} for kind {kind:?}")]
    WrongSign {
        entry_id: i64,
        kind: LedgerKind,
        quantity: i64,
    },

    /// Entries of several batches were passed to a single-batch check.
    #[error("ledger entry {entry_id} belongs to batch {found}, expected {expected}")]
    ForeignBatch {
        entry_id: i64,
        expected: String,
        found: String,
    },
}

/// Replays a batch's entries in id order and returns the final on-hand.
///
/// ## Example
/// ```rust
/// use stockwell_core::ledger::check_running_balance;
///
/// let on_hand = check_running_balance("B1", &[]).unwrap();
/// assert_eq!(on_hand, 0);
/// ```
pub fn check_running_balance(batch_id: &str, entries: &[StockLedgerEntry]) -> Result<i64, LedgerViolation> {
    let mut ordered: Vec<&StockLedgerEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.id);

    let mut balance = 0i64;
    for entry in ordered {
        if entry.batch_id != batch_id {
            return Err(LedgerViolation::ForeignBatch {
                entry_id: entry.id,
                expected: batch_id.to_string(),
                found: entry.batch_id.clone(),
            });
        }

        let sign_ok = if entry.kind.is_inbound() {
            entry.quantity > 0
        } else {
            entry.quantity < 0
        };
        if !sign_ok {
            return Err(LedgerViolation::WrongSign {
                entry_id: entry.id,
                kind: entry.kind,
                quantity: entry.quantity,
            });
        }

        balance += entry.quantity;
        if balance < 0 {
            return Err(LedgerViolation::NegativeBalance {
                batch_id: batch_id.to_string(),
                entry_id: entry.id,
                balance,
            });
        }
    }

    Ok(balance)
}

/// Movement totals of a product (or batch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockSummary {
    /// Σ IN (positive).
    pub received: i64,
    /// |Σ SALE_OUT| (positive).
    pub sold: i64,
    /// Σ REFUND_IN (positive).
    pub refunded: i64,
    /// Signed sum of all entries.
    pub on_hand: i64,
}

impl StockSummary {
    /// Folds entries into totals.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a StockLedgerEntry>) -> Self {
        entries.into_iter().fold(StockSummary::default(), |mut acc, e| {
            match e.kind {
                LedgerKind::In => acc.received += e.quantity,
                LedgerKind::SaleOut => acc.sold += -e.quantity,
                LedgerKind::RefundIn => acc.refunded += e.quantity,
            }
            acc.on_hand += e.quantity;
            acc
        })
    }

    /// Conservation: on-hand equals received − sold + refunded.
    pub fn is_conserved(&self) -> bool {
        self.on_hand == self.received - self.sold + self.refunded
    }
}

/// Invariant ③ for one (sale, product) pair.
pub fn refund_within_sale(sold_out: i64, refunded_in: i64) -> bool {
    refunded_in.abs() <= sold_out.abs()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(id: i64, batch: &str, kind: LedgerKind, quantity: i64) -> StockLedgerEntry {
        StockLedgerEntry {
            id,
            batch_id: batch.to_string(),
            quantity,
            kind,
            reference_id: "ref".to_string(),
            sale_line_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_running_balance_ok() {
        let entries = vec![
            entry(1, "B1", LedgerKind::In, 10),
            entry(2, "B1", LedgerKind::SaleOut, -4),
            entry(3, "B1", LedgerKind::RefundIn, 1),
        ];
        assert_eq!(check_running_balance("B1", &entries).unwrap(), 7);
    }

    #[test]
    fn test_negative_prefix_detected_regardless_of_input_order() {
        let entries = vec![
            entry(2, "B1", LedgerKind::In, 10),
            entry(1, "B1", LedgerKind::SaleOut, -4),
        ];
        assert!(matches!(
            check_running_balance("B1", &entries),
            Err(LedgerViolation::NegativeBalance { entry_id: 1, balance: -4, .. })
        ));
    }

    #[test]
    fn test_wrong_sign_detected() {
        let entries = vec![entry(1, "B1", LedgerKind::RefundIn, -1)];
        assert!(matches!(
            check_running_balance("B1", &entries),
            Err(LedgerViolation::WrongSign { .. })
        ));
    }

    #[test]
    fn test_foreign_batch_detected() {
        let entries = vec![entry(1, "B2", LedgerKind::In, 1)];
        assert!(matches!(
            check_running_balance("B1", &entries),
            Err(LedgerViolation::ForeignBatch { .. })
        ));
    }

    #[test]
    fn test_summary_conservation() {
        let entries = vec![
            entry(1, "B1", LedgerKind::In, 10),
            entry(2, "B2", LedgerKind::In, 5),
            entry(3, "B1", LedgerKind::SaleOut, -8),
            entry(4, "B2", LedgerKind::RefundIn, 3),
        ];
        let summary = StockSummary::from_entries(&entries);
        assert_eq!(summary.received, 15);
        assert_eq!(summary.sold, 8);
        assert_eq!(summary.refunded, 3);
        assert_eq!(summary.on_hand, 10);
        assert!(summary.is_conserved());
    }

    #[test]
    fn test_refund_bound() {
        assert!(refund_within_sale(-10, 10));
        assert!(!refund_within_sale(-10, 11));
    }
}
