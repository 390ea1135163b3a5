//! # FEFO Allocation
//!
//! First-Expire-First-Out selection of the batches a sale line consumes.
//!
//! ## Algorithm
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  allocate(product P, needed = 5)                                        │
//! │                                                                         │
//! │  1. Keep batches with on_hand > 0                                       │
//! │  2. Order: expiry ascending, no-expiry last, then creation sequence     │
//! │                                                                         │
//! │       B1  exp 2025-01-01  on_hand 3   ──► take 3   (remaining 2)        │
//! │       B2  exp 2025-02-01  on_hand 10  ──► take 2   (remaining 0) STOP   │
//! │       B3  no expiry       on_hand 4       untouched                     │
//! │                                                                         │
//! │  3. Σ on_hand < needed?  →  InsufficientStock, nothing allocated        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The function is pure: the caller reads the batch snapshot inside its
//! transaction and writes the ledger entries for the returned picks.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::BatchWithStock;

/// The slice of a batch the allocator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStock {
    pub batch_id: String,
    pub expiry_date: Option<NaiveDate>,
    /// Creation sequence, oldest first among equal expiries.
    pub seq: i64,
    pub on_hand: i64,
}

impl BatchStock {
    pub fn new(
        batch_id: impl Into<String>,
        expiry_date: Option<NaiveDate>,
        seq: i64,
        on_hand: i64,
    ) -> Self {
        BatchStock {
            batch_id: batch_id.into(),
            expiry_date,
            seq,
            on_hand,
        }
    }
}

impl From<&BatchWithStock> for BatchStock {
    fn from(b: &BatchWithStock) -> Self {
        BatchStock {
            batch_id: b.batch.id.clone(),
            expiry_date: b.batch.expiry_date,
            seq: b.batch.seq,
            on_hand: b.on_hand,
        }
    }
}

/// Quantity taken from one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub batch_id: String,
    pub quantity: i64,
}

/// FEFO ordering: soonest expiry first, no expiry last, then oldest batch.
pub fn fefo_cmp(a: &BatchStock, b: &BatchStock) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(a.seq.cmp(&b.seq))
}

/// Total on-hand across batches with positive stock.
pub fn available(batches: &[BatchStock]) -> i64 {
    batches.iter().map(|b| b.on_hand.max(0)).sum()
}

/// Selects the batches to deplete for `needed` units of `product_id`.
///
/// ## Returns
/// * `Ok(picks)` - ordered (batch, quantity) pairs summing to `needed`
/// * `Err(InsufficientStock)` - total on-hand is below `needed`
/// * `Err(Validation)` - `needed` is not positive
pub fn allocate(product_id: &str, batches: &[BatchStock], needed: i64) -> CoreResult<Vec<Allocation>> {
    if needed <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        }
        .into());
    }

    let mut candidates: Vec<&BatchStock> = batches.iter().filter(|b| b.on_hand > 0).collect();

    let total = available(batches);
    if total < needed {
        return Err(CoreError::InsufficientStock {
            product_id: product_id.to_string(),
            available: total,
            requested: needed,
        });
    }

    candidates.sort_by(|a, b| fefo_cmp(a, b));

    let mut remaining = needed;
    let mut picks = Vec::new();

    for batch in candidates {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.on_hand);
        picks.push(Allocation {
            batch_id: batch.batch_id.clone(),
            quantity: take,
        });
        remaining -= take;
    }

    Ok(picks)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_splits_across_batches_in_expiry_order() {
        let batches = vec![
            BatchStock::new("B2", date(2025, 2, 1), 1, 10),
            BatchStock::new("B1", date(2025, 1, 1), 2, 3),
        ];

        let picks = allocate("P", &batches, 5).unwrap();
        assert_eq!(
            picks,
            vec![
                Allocation { batch_id: "B1".into(), quantity: 3 },
                Allocation { batch_id: "B2".into(), quantity: 2 },
            ]
        );
    }

    #[test]
    fn test_no_expiry_sorts_last() {
        let batches = vec![
            BatchStock::new("forever", None, 1, 10),
            BatchStock::new("late", date(2030, 1, 1), 2, 1),
        ];

        let picks = allocate("P", &batches, 2).unwrap();
        assert_eq!(picks[0].batch_id, "late");
        assert_eq!(picks[1].batch_id, "forever");
        assert_eq!(picks[1].quantity, 1);
    }

    #[test]
    fn test_equal_expiry_uses_creation_order() {
        let batches = vec![
            BatchStock::new("newer", date(2025, 6, 1), 7, 5),
            BatchStock::new("older", date(2025, 6, 1), 3, 5),
            BatchStock::new("none-new", None, 9, 5),
            BatchStock::new("none-old", None, 4, 5),
        ];

        let picks = allocate("P", &batches, 20).unwrap();
        let order: Vec<&str> = picks.iter().map(|p| p.batch_id.as_str()).collect();
        assert_eq!(order, vec!["older", "newer", "none-old", "none-new"]);
    }

    #[test]
    fn test_skips_empty_batches() {
        let batches = vec![
            BatchStock::new("empty", date(2024, 1, 1), 1, 0),
            BatchStock::new("full", date(2025, 1, 1), 2, 4),
        ];

        let picks = allocate("P", &batches, 4).unwrap();
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].batch_id, "full");
    }

    #[test]
    fn test_insufficient_stock_allocates_nothing() {
        let batches = vec![
            BatchStock::new("B1", date(2025, 1, 1), 1, 1),
            BatchStock::new("B2", date(2025, 2, 1), 2, 2),
        ];

        let err = allocate("P", &batches, 5).unwrap_err();
        match err {
            CoreError::InsufficientStock {
                product_id,
                available,
                requested,
            } => {
                assert_eq!(product_id, "P");
                assert_eq!(available, 3);
                assert_eq!(requested, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_exact_fit_consumes_everything() {
        let batches = vec![
            BatchStock::new("B1", date(2025, 1, 1), 1, 2),
            BatchStock::new("B2", date(2025, 2, 1), 2, 3),
        ];
        let picks = allocate("P", &batches, 5).unwrap();
        assert_eq!(picks.iter().map(|p| p.quantity).sum::<i64>(), 5);
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        assert!(matches!(
            allocate("P", &[], 0),
            Err(CoreError::Validation(_))
        ));
    }
}
