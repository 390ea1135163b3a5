//! # Domain Types
//!
//! Core domain types used throughout Stockwell.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │    Product      │◄──│     Batch       │◄──│  StockLedgerEntry   │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  id, sku        │   │  lot_code       │   │  quantity (signed)  │   │
//! │  │  unit           │   │  expiry_date?   │   │  kind: IN/SALE_OUT/ │   │
//! │  │  track_stock    │   │  on-hand=Σledger│   │        REFUND_IN    │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │      Sale       │──►│    SaleLine     │◄──│   SaleRefundLine    │   │
//! │  │  status         │   │  quantity       │   │  qty_refunded       │   │
//! │  │  DRAFT/PAID/    │   │  unit_price     │   └──────────┬──────────┘   │
//! │  │  REFUNDED       │   │  line_total     │              │              │
//! │  └────────┬────────┘   └─────────────────┘   ┌──────────▼──────────┐   │
//! │           └─────────────────────────────────►│     SaleRefund      │   │
//! │                                              │  idempotency_key?   │   │
//! │                                              └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Row types carry money as `*_cents: i64` columns with `Money` accessors,
//! the same shape they have in the database.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Money;

// =============================================================================
// Product
// =============================================================================

/// A product that can be sold and, when `track_stock` is set, stocked in batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Display name.
    pub name: String,

    /// Unit of measure ("box", "vial", "unit").
    pub unit: String,

    /// Whether sales of this product consume stock.
    pub track_stock: bool,

    pub created_at: DateTime<Utc>,
}

/// Input for creating a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub track_stock: bool,
}

// =============================================================================
// Batch
// =============================================================================

/// A lot of one product with an optional expiry date.
///
/// On-hand quantity is never stored; see [`BatchWithStock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Batch {
    pub id: String,
    pub product_id: String,

    /// Lot identifier printed on the packaging (unique per product).
    pub lot_code: String,

    /// Expiry date; `None` means "does not expire" and sorts last in FEFO.
    pub expiry_date: Option<NaiveDate>,

    /// Set on the per-product batch that receives unattributed returns.
    pub is_returns: bool,

    /// Monotonic creation sequence, the FEFO tie-break.
    pub seq: i64,

    pub created_at: DateTime<Utc>,
}

/// Input for creating a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatch {
    pub product_id: String,
    pub lot_code: String,
    pub expiry_date: Option<NaiveDate>,
}

/// A batch together with its derived on-hand quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct BatchWithStock {
    #[cfg_attr(feature = "sqlx", sqlx(flatten))]
    #[serde(flatten)]
    pub batch: Batch,

    /// Signed sum of all ledger entries of the batch.
    pub on_hand: i64,
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerKind {
    /// Goods received into a batch (positive).
    In,
    /// Consumed by a paid sale (negative).
    SaleOut,
    /// Returned by a refund (positive).
    RefundIn,
}

impl LedgerKind {
    /// Whether entries of this kind carry a positive quantity.
    pub const fn is_inbound(&self) -> bool {
        matches!(self, LedgerKind::In | LedgerKind::RefundIn)
    }

    /// Storage representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::In => "in",
            LedgerKind::SaleOut => "sale_out",
            LedgerKind::RefundIn => "refund_in",
        }
    }
}

/// One immutable stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockLedgerEntry {
    /// Monotonic id; ledger order is id order.
    pub id: i64,
    pub batch_id: String,
    /// Signed quantity: positive for IN / REFUND_IN, negative for SALE_OUT.
    pub quantity: i64,
    pub kind: LedgerKind,
    /// sale_id for SALE_OUT, refund_id for REFUND_IN, receipt reference for IN.
    pub reference_id: String,
    /// Sale line the movement is attributed to (SALE_OUT and REFUND_IN).
    pub sale_line_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale.
///
/// ```text
/// DRAFT ──mark_paid──► PAID ──refund (cumulative = sold)──► REFUNDED
///                       │ ▲
///                       └─┘ partial refund keeps PAID
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    /// Created by the workflow, not yet paid. No stock consumed.
    #[default]
    Draft,
    /// Paid; stock consumed exactly once.
    Paid,
    /// Every sold unit has been refunded.
    Refunded,
}

impl SaleStatus {
    /// Storage representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Draft => "draft",
            SaleStatus::Paid => "paid",
            SaleStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A sale header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Sale {
    pub id: String,
    pub legal_entity: String,
    /// ISO-4217 currency snapshot taken when the sale was created.
    pub currency: String,
    pub status: SaleStatus,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Returns the sale total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A line of a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleLine {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    /// Line order within the sale.
    pub position: i64,
    /// Units sold (positive integer).
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
    /// unit_price × quantity − discount.
    pub line_total_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl SaleLine {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

/// Input for creating a draft sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSale {
    pub legal_entity: String,
    pub currency: String,
    pub lines: Vec<NewSaleLine>,
}

/// Input for one line of a draft sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSaleLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Money,
}

// =============================================================================
// Refunds
// =============================================================================

/// Status of a persisted refund.
///
/// Only `Created` exists: a refund that fails leaves no row at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    #[default]
    Created,
}

/// A (full or partial) refund of a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleRefund {
    pub id: String,
    pub sale_id: String,
    /// Client-supplied retry token, unique per sale when present.
    pub idempotency_key: Option<String>,
    pub status: RefundStatus,
    pub total_refunded_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl SaleRefund {
    #[inline]
    pub fn total_refunded(&self) -> Money {
        Money::from_cents(self.total_refunded_cents)
    }
}

/// One refunded line of a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleRefundLine {
    pub id: String,
    pub refund_id: String,
    pub sale_line_id: String,
    pub qty_refunded: i64,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// A requested (sale_line_id, quantity) pair of a refund request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundLineRequest {
    pub sale_line_id: String,
    pub quantity: i64,
}

impl RefundLineRequest {
    pub fn new(sale_line_id: impl Into<String>, quantity: i64) -> Self {
        RefundLineRequest {
            sale_line_id: sale_line_id.into(),
            quantity,
        }
    }
}

/// Sold / refunded / remaining quantities of one sale line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RefundableLine {
    pub sale_line_id: String,
    pub product_id: String,
    pub sold: i64,
    pub refunded: i64,
}

impl RefundableLine {
    /// Units that can still be refunded.
    #[inline]
    pub fn remaining(&self) -> i64 {
        self.sold - self.refunded
    }
}

// =============================================================================
// Event Outbox
// =============================================================================

/// An entry in the event outbox.
///
/// Committed transition events are written in the same transaction as the
/// state change and published afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OutboxEntry {
    pub id: String,
    /// Event name: "sale_paid", "refund_created", ...
    pub event_type: String,
    /// Sale or refund the event belongs to.
    pub aggregate_id: String,
    /// The event as JSON.
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sale_status_default_and_display() {
        assert_eq!(SaleStatus::default(), SaleStatus::Draft);
        assert_eq!(SaleStatus::Refunded.to_string(), "refunded");
    }

    #[test]
    fn test_ledger_kind_direction() {
        assert!(LedgerKind::In.is_inbound());
        assert!(LedgerKind::RefundIn.is_inbound());
        assert!(!LedgerKind::SaleOut.is_inbound());
        assert_eq!(LedgerKind::SaleOut.as_str(), "sale_out");
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&SaleStatus::Paid).unwrap();
        assert_eq!(json, "\"PAID\"");
    }

    #[test]
    fn test_refundable_remaining() {
        let line = RefundableLine {
            sale_line_id: "l1".to_string(),
            product_id: "p1".to_string(),
            sold: 5,
            refunded: 3,
        };
        assert_eq!(line.remaining(), 2);
    }
}
