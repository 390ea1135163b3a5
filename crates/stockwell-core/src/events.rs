//! # Stock Events
//!
//! Structured events the engine reports to the outside world.
//!
//! Events carry identifiers, quantities, amounts and enum statuses only.
//! Never names, emails or clinical text: the payload is safe to ship to
//! any logging or metrics backend.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  orchestrator ──commit──► event_outbox rows (same transaction)          │
//! │        │                                                                │
//! │        └──after commit / on rejection──► EventSink::emit(&event)        │
//! │                                              │                          │
//! │                                ┌─────────────┴─────────────┐            │
//! │                                │ TracingSink (stockwell-db)│            │
//! │                                │ RecordingSink (tests)     │            │
//! │                                └───────────────────────────┘            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::types::SaleStatus;

/// A transition or rejection observed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StockEvent {
    /// A batch received goods.
    StockReceived {
        batch_id: String,
        product_id: String,
        quantity: i64,
    },
    /// A sale line consumed units from a batch.
    StockConsumed {
        sale_id: String,
        sale_line_id: String,
        product_id: String,
        batch_id: String,
        quantity: i64,
    },
    /// A sale moved DRAFT → PAID.
    SalePaid {
        sale_id: String,
        line_count: usize,
        units: i64,
        total_cents: i64,
    },
    /// A refund was committed.
    RefundCreated {
        refund_id: String,
        sale_id: String,
        line_count: usize,
        units: i64,
        total_refunded_cents: i64,
        sale_status: SaleStatus,
    },
    /// Refunded units went back into a batch.
    StockRestored {
        refund_id: String,
        sale_line_id: String,
        batch_id: String,
        quantity: i64,
    },
    /// A refund request was rejected for exceeding the refundable quantity.
    OverRefundBlocked {
        sale_id: String,
        sale_line_id: String,
        sold: i64,
        already_refunded: i64,
        requested: i64,
    },
    /// A sale could not be paid for lack of stock.
    InsufficientStock {
        sale_id: String,
        product_id: String,
        available: i64,
        requested: i64,
    },
    /// A transition was requested from the wrong status.
    InvalidState {
        sale_id: String,
        status: SaleStatus,
        operation: String,
    },
    /// A retried refund request returned the existing refund.
    IdempotentReplay {
        sale_id: String,
        refund_id: String,
        /// Whether the retry asked for the same lines as the stored refund.
        request_matches: bool,
    },
}

impl StockEvent {
    /// Event name as stored in the outbox.
    pub fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockReceived { .. } => "stock_received",
            StockEvent::StockConsumed { .. } => "stock_consumed",
            StockEvent::SalePaid { .. } => "sale_paid",
            StockEvent::RefundCreated { .. } => "refund_created",
            StockEvent::StockRestored { .. } => "stock_restored",
            StockEvent::OverRefundBlocked { .. } => "over_refund_blocked",
            StockEvent::InsufficientStock { .. } => "insufficient_stock",
            StockEvent::InvalidState { .. } => "invalid_state",
            StockEvent::IdempotentReplay { .. } => "idempotent_replay",
        }
    }

    /// The sale, refund or batch the event belongs to.
    pub fn aggregate_id(&self) -> &str {
        match self {
            StockEvent::StockReceived { batch_id, .. } => batch_id,
            StockEvent::StockRestored { refund_id, .. } | StockEvent::RefundCreated { refund_id, .. } => refund_id,
            StockEvent::StockConsumed { sale_id, .. }
            | StockEvent::SalePaid { sale_id, .. }
            | StockEvent::OverRefundBlocked { sale_id, .. }
            | StockEvent::InsufficientStock { sale_id, .. }
            | StockEvent::InvalidState { sale_id, .. }
            | StockEvent::IdempotentReplay { sale_id, .. } => sale_id,
        }
    }

    /// Whether the event reports a rejected request.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StockEvent::OverRefundBlocked { .. }
                | StockEvent::InsufficientStock { .. }
                | StockEvent::InvalidState { .. }
        )
    }
}

/// Receives engine events.
///
/// Implementations must not block for long: `emit` runs on the request path
/// after the transaction has committed.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &StockEvent);
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StockEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<StockEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Events with the given outbox name.
    pub fn of_type(&self, event_type: &str) -> Vec<StockEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &StockEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
