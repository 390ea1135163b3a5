//! # stockwell-core: Pure Logic for the Clinic Stock Ledger
//!
//! This crate holds every business rule of the stock ledger and the
//! sale/refund transaction engine as pure functions with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockwell Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Workflow / HTTP layer (outside this workspace)       │   │
//! │  │      payment confirmed ──► mark_paid    refund request ──► refund│  │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                stockwell-db (transactions, SQLite)              │   │
//! │  │   SaleTransactionOrchestrator   RefundTransactionOrchestrator   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ pure calls                             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stockwell-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌────────────┐ ┌─────────┐ ┌───────┐ │   │
//! │  │   │  fefo   │ │ refund  │ │ sale_state │ │ ledger  │ │ money │ │   │
//! │  │   │allocate │ │  plan   │ │   guards   │ │  audit  │ │ cents │ │   │
//! │  │   └─────────┘ └─────────┘ └────────────┘ └─────────┘ └───────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Batch, Sale, SaleRefund, ledger rows)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - Domain error types and error classification
//! - [`validation`] - Input validation
//! - [`fefo`] - First-expire-first-out batch allocation
//! - [`sale_state`] - Sale status transitions
//! - [`refund`] - Refund validation, pro-rating and restock planning
//! - [`ledger`] - Ledger invariants (running balance, conservation)
//! - [`events`] - PHI-free transition events and the sink trait
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::NaiveDate;
//! use stockwell_core::fefo::{allocate, BatchStock};
//!
//! let batches = vec![
//!     BatchStock::new("B2", NaiveDate::from_ymd_opt(2025, 2, 1), 2, 10),
//!     BatchStock::new("B1", NaiveDate::from_ymd_opt(2025, 1, 1), 1, 3),
//! ];
//!
//! let picks = allocate("paracetamol", &batches, 5).unwrap();
//! assert_eq!(picks[0].batch_id, "B1");
//! assert_eq!(picks[0].quantity, 3);
//! assert_eq!(picks[1].batch_id, "B2");
//! assert_eq!(picks[1].quantity, 2);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod events;
pub mod fefo;
pub mod ledger;
pub mod money;
pub mod refund;
pub mod sale_state;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorCode, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity on a single sale line.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 10000 instead of 10).
pub const MAX_LINE_QUANTITY: i64 = 9_999;

/// Maximum units booked by a single stock receipt.
///
/// Keeps every per-batch and per-product ledger sum far inside `i64`.
pub const MAX_RECEIPT_QUANTITY: i64 = 1_000_000;

/// Maximum unit price in cents (1,000,000.00).
pub const MAX_UNIT_PRICE_CENTS: i64 = 100_000_000;

/// Maximum number of lines on a single sale.
pub const MAX_SALE_LINES: usize = 200;

/// Default lot code of the per-product batch that receives unattributed returns.
pub const DEFAULT_RETURNS_LOT_CODE: &str = "RETURNS";

/// Maximum length of a client-supplied idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
