//! # Error Types
//!
//! Domain-specific error types for stockwell-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockwell-core errors (this file)                                     │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  stockwell-db errors (separate crate)                                  │
//! │  └── DbError          - Database failures, wraps CoreError             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ErrorCode → HTTP layer  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include identifiers and quantities in messages, never names or
//!    clinical text
//! 3. Errors are enum variants, never String
//! 4. Every error leaves the database untouched: the caller's transaction
//!    is rolled back before the error reaches the HTTP layer

use serde::Serialize;
use thiserror::Error;

use crate::types::SaleStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Batch cannot be found.
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// Sale cannot be found.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// A refund referenced a line that does not belong to the sale.
    #[error("Sale line {sale_line_id} not found on sale {sale_id}")]
    SaleLineNotFound {
        sale_id: String,
        sale_line_id: String,
    },

    /// Sale is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - `mark_paid` on a sale that is already PAID or REFUNDED
    /// - `refund` on a sale that is still DRAFT
    #[error("Sale {sale_id} is {current}, cannot {operation}")]
    InvalidSaleState {
        sale_id: String,
        current: SaleStatus,
        operation: &'static str,
    },

    /// FEFO allocation cannot satisfy the demand.
    ///
    /// ## User Workflow
    /// ```text
    /// mark_paid(sale) ── line: product P, qty 5
    ///      │
    ///      ▼
    /// Batches of P: B1 = 1, B2 = 2  (available 3)
    ///      │
    ///      ▼
    /// InsufficientStock { product_id: P, available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Transaction rolled back, sale stays DRAFT
    /// ```
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// Requested refund exceeds the remaining refundable quantity of a line.
    #[error("Over-refund on sale line {sale_line_id}: sold {sold}, already refunded {already_refunded}, requested {requested}")]
    OverRefund {
        sale_line_id: String,
        sold: i64,
        already_refunded: i64,
        requested: i64,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Classifies the error for the surrounding HTTP layer.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::ProductNotFound(_)
            | CoreError::BatchNotFound(_)
            | CoreError::SaleNotFound(_)
            | CoreError::SaleLineNotFound { .. } => ErrorCode::NotFound,
            CoreError::InvalidSaleState { .. } => ErrorCode::InvalidState,
            CoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            CoreError::OverRefund { .. } => ErrorCode::OverRefund,
            CoreError::Validation(_) => ErrorCode::Validation,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., currency code, lot code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., the same sale line twice in one refund).
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Error Code
// =============================================================================

/// Machine-readable error classification.
///
/// The engine owns no HTTP surface; this is the contract the HTTP layer
/// maps onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Resource not found (404)
    NotFound,
    /// Input validation failed (400)
    Validation,
    /// Wrong sale status for the transition (409)
    InvalidState,
    /// FEFO allocation failed (409)
    InsufficientStock,
    /// Refund exceeds the refundable quantity (422)
    OverRefund,
    /// Database operation failed (500)
    Database,
    /// Internal error (500)
    Internal,
}

impl ErrorCode {
    /// Suggested HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::Validation => 400,
            ErrorCode::InvalidState | ErrorCode::InsufficientStock => 409,
            ErrorCode::OverRefund => 422,
            ErrorCode::Database | ErrorCode::Internal => 500,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
