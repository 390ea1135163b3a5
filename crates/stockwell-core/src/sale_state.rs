//! # Sale State Machine
//!
//! Guarded transitions of [`SaleStatus`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Sale Transitions                                     │
//! │                                                                         │
//! │  current    command                         next        stock effect   │
//! │  ────────   ─────────────────────────────   ─────────   ────────────   │
//! │  DRAFT      MarkPaid                        PAID        consume (FEFO) │
//! │  PAID       MarkPaid                        ✗ InvalidSaleState         │
//! │  REFUNDED   MarkPaid                        ✗ InvalidSaleState         │
//! │  DRAFT      Refund                          ✗ InvalidSaleState         │
//! │  PAID       Refund { fully_refunded: no }   PAID        restock        │
//! │  PAID       Refund { fully_refunded: yes }  REFUNDED    restock        │
//! │  REFUNDED   Refund                          REFUNDED    (over-refund   │
//! │                                                          catches it)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Re-invoking `MarkPaid` is rejected rather than treated as a no-op: stock
//! is consumed exactly once per sale.

use crate::error::{CoreError, CoreResult};
use crate::types::SaleStatus;

/// A request to move a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleCommand {
    /// Payment confirmed by the workflow.
    MarkPaid,
    /// A refund was validated; `fully_refunded` tells whether cumulative
    /// refunded quantity now equals the sold quantity.
    Refund { fully_refunded: bool },
}

impl SaleCommand {
    fn operation(&self) -> &'static str {
        match self {
            SaleCommand::MarkPaid => "mark paid",
            SaleCommand::Refund { .. } => "refund",
        }
    }
}

/// Applies `command` to a sale in `current` status.
pub fn transition(sale_id: &str, current: SaleStatus, command: SaleCommand) -> CoreResult<SaleStatus> {
    let next = match (current, command) {
        (SaleStatus::Draft, SaleCommand::MarkPaid) => Some(SaleStatus::Paid),
        (SaleStatus::Paid | SaleStatus::Refunded, SaleCommand::Refund { fully_refunded }) => {
            if fully_refunded {
                Some(SaleStatus::Refunded)
            } else {
                Some(current)
            }
        }
        _ => None,
    };

    next.ok_or_else(|| CoreError::InvalidSaleState {
        sale_id: sale_id.to_string(),
        current,
        operation: command.operation(),
    })
}

/// Fails unless a refund may be issued against a sale in `current` status.
pub fn ensure_refundable(sale_id: &str, current: SaleStatus) -> CoreResult<()> {
    match current {
        SaleStatus::Paid | SaleStatus::Refunded => Ok(()),
        SaleStatus::Draft => Err(CoreError::InvalidSaleState {
            sale_id: sale_id.to_string(),
            current,
            operation: "refund",
        }),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_to_paid() {
        assert_eq!(
            transition("s1", SaleStatus::Draft, SaleCommand::MarkPaid).unwrap(),
            SaleStatus::Paid
        );
    }

    #[test]
    fn test_mark_paid_twice_rejected() {
        for status in [SaleStatus::Paid, SaleStatus::Refunded] {
            let err = transition("s1", status, SaleCommand::MarkPaid).unwrap_err();
            assert!(matches!(err, CoreError::InvalidSaleState { current, .. } if current == status));
        }
    }

    #[test]
    fn test_partial_refund_keeps_paid() {
        let next = transition(
            "s1",
            SaleStatus::Paid,
            SaleCommand::Refund { fully_refunded: false },
        )
        .unwrap();
        assert_eq!(next, SaleStatus::Paid);
    }

    #[test]
    fn test_full_refund_moves_to_refunded() {
        let next = transition(
            "s1",
            SaleStatus::Paid,
            SaleCommand::Refund { fully_refunded: true },
        )
        .unwrap();
        assert_eq!(next, SaleStatus::Refunded);
    }

    #[test]
    fn test_refund_of_draft_rejected() {
        assert!(ensure_refundable("s1", SaleStatus::Draft).is_err());
        assert!(ensure_refundable("s1", SaleStatus::Paid).is_ok());
        assert!(ensure_refundable("s1", SaleStatus::Refunded).is_ok());
        assert!(transition(
            "s1",
            SaleStatus::Draft,
            SaleCommand::Refund { fully_refunded: false }
        )
        .is_err());
    }
}
