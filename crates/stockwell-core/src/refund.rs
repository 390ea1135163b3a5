//! # Refund Planning
//!
//! Pure validation and planning of a refund request, done before the
//! orchestrator writes anything.
//!
//! ## Planning Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  refund(sale, [(line, qty)...])                                         │
//! │                                                                         │
//! │  1. plan_refund                                                         │
//! │     ├── request not empty, qty > 0, no line twice                       │
//! │     ├── every line belongs to the sale      ✗ SaleLineNotFound          │
//! │     ├── already_refunded + qty ≤ sold       ✗ OverRefund (whole request)│
//! │     ├── amount = prorate(line_total, prior+qty) − prorate(.., prior)    │
//! │     └── fully_refunded = Σ refunded (all lines) == Σ sold               │
//! │                                                                         │
//! │  2. plan_restock (per stock-tracked line)                               │
//! │     ├── credit batches the line consumed, newest-consumed first         │
//! │     └── remainder without attribution → returns batch                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::fefo::Allocation;
use crate::money::Money;
use crate::types::{RefundLineRequest, SaleLine};

// =============================================================================
// Refund Plan
// =============================================================================

/// One validated line of a refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundPlanLine {
    pub sale_line_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub already_refunded: i64,
    pub amount: Money,
}

/// A validated refund, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundPlan {
    /// Lines in request order.
    pub lines: Vec<RefundPlanLine>,
    pub total: Money,
    /// Whether the refund brings cumulative refunded quantity to the sold quantity.
    pub fully_refunded: bool,
}

/// Money refunded for `quantity` units of `line` on top of `prior` refunded units.
///
/// Pro-rated on the line total so the refunds of a line add up to its total.
pub fn refund_amount(line: &SaleLine, prior: i64, quantity: i64) -> Money {
    let total = line.line_total();
    total.prorate(prior + quantity, line.quantity) - total.prorate(prior, line.quantity)
}

/// Validates a refund request against the sale's lines and prior refunds.
///
/// ## Arguments
/// * `sale_id` - The sale being refunded
/// * `sale_lines` - All lines of the sale
/// * `prior_refunded` - Units already refunded per sale line id (missing = 0)
/// * `request` - Requested (sale_line_id, qty) pairs
///
/// ## Errors
/// Every requested line is checked before any result is returned, so a
/// single over-refunded line rejects the whole request.
pub fn plan_refund(
    sale_id: &str,
    sale_lines: &[SaleLine],
    prior_refunded: &HashMap<String, i64>,
    request: &[RefundLineRequest],
) -> CoreResult<RefundPlan> {
    if request.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        }
        .into());
    }

    let by_id: HashMap<&str, &SaleLine> = sale_lines.iter().map(|l| (l.id.as_str(), l)).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut lines = Vec::with_capacity(request.len());

    for req in request {
        if req.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            }
            .into());
        }

        if !seen.insert(req.sale_line_id.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "sale_line_id".to_string(),
                value: req.sale_line_id.clone(),
            }
            .into());
        }

        let line = by_id
            .get(req.sale_line_id.as_str())
            .ok_or_else(|| CoreError::SaleLineNotFound {
                sale_id: sale_id.to_string(),
                sale_line_id: req.sale_line_id.clone(),
            })?;

        let already_refunded = prior_refunded.get(&line.id).copied().unwrap_or(0);

        // Compared against the remainder so a huge request cannot overflow.
        if req.quantity > line.quantity - already_refunded {
            return Err(CoreError::OverRefund {
                sale_line_id: line.id.clone(),
                sold: line.quantity,
                already_refunded,
                requested: req.quantity,
            });
        }

        lines.push(RefundPlanLine {
            sale_line_id: line.id.clone(),
            product_id: line.product_id.clone(),
            quantity: req.quantity,
            already_refunded,
            amount: refund_amount(line, already_refunded, req.quantity),
        });
    }

    let total: Money = lines.iter().map(|l| l.amount).sum();

    let sold: i64 = sale_lines.iter().map(|l| l.quantity).sum();
    let refunded_before: i64 = sale_lines
        .iter()
        .map(|l| prior_refunded.get(&l.id).copied().unwrap_or(0))
        .sum();
    let refunded_now: i64 = lines.iter().map(|l| l.quantity).sum();

    Ok(RefundPlan {
        lines,
        total,
        fully_refunded: refunded_before + refunded_now == sold,
    })
}

// =============================================================================
// Restock Planning
// =============================================================================

/// Where refunded units go back into stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestockPolicy {
    /// Credit the batches the sale line consumed; fall back to the returns
    /// batch for any unattributed remainder.
    #[default]
    OriginalBatch,
    /// Always credit the product's returns batch.
    ReturnsBatch,
}

impl fmt::Display for RestockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestockPolicy::OriginalBatch => write!(f, "original_batch"),
            RestockPolicy::ReturnsBatch => write!(f, "returns_batch"),
        }
    }
}

impl FromStr for RestockPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "original_batch" | "original" => Ok(RestockPolicy::OriginalBatch),
            "returns_batch" | "returns" => Ok(RestockPolicy::ReturnsBatch),
            other => Err(ValidationError::InvalidFormat {
                field: "restock_policy".to_string(),
                reason: format!("unknown policy '{other}', expected original_batch or returns_batch"),
            }),
        }
    }
}

/// What one sale line took from one batch, and what refunds gave back so far.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ConsumedBatch {
    pub batch_id: String,
    /// Units taken by SALE_OUT entries (positive).
    pub consumed: i64,
    /// Units already credited back by REFUND_IN entries.
    pub returned: i64,
}

/// Where a refunded quantity of one line is credited.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestockPlan {
    /// Credits to originally consumed batches.
    pub credits: Vec<Allocation>,
    /// Units with no batch attribution left, for the returns batch.
    pub unattributed: i64,
}

/// Plans where `quantity` refunded units of a line go.
///
/// `consumed` is in allocation order; credits are taken from the end
/// (the last batch drawn from is refilled first) and never exceed what the
/// line took from a batch minus what was already returned to it.
pub fn plan_restock(policy: RestockPolicy, consumed: &[ConsumedBatch], quantity: i64) -> RestockPlan {
    if policy == RestockPolicy::ReturnsBatch {
        return RestockPlan {
            credits: Vec::new(),
            unattributed: quantity,
        };
    }

    let mut remaining = quantity;
    let mut credits = Vec::new();

    for batch in consumed.iter().rev() {
        if remaining == 0 {
            break;
        }
        let capacity = (batch.consumed - batch.returned).max(0);
        let credit = remaining.min(capacity);
        if credit > 0 {
            credits.push(Allocation {
                batch_id: batch.batch_id.clone(),
                quantity: credit,
            });
            remaining -= credit;
        }
    }

    RestockPlan {
        credits,
        unattributed: remaining,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
