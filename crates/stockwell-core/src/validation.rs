//! # Validation Module
//!
//! Input validation for the data the engine accepts from its callers.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP layer (outside this workspace)                          │
//! │  └── Deserialization, authentication                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Business rule validation before a transaction opens               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints (ledger sign, positive quantities)              │
//! │  ├── UNIQUE indexes (sku, lot code, idempotency key)                   │
//! │  └── Triggers (append-only ledger, no negative stock)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{NewBatch, NewProduct, NewSale, NewSaleLine};
use crate::{MAX_IDEMPOTENCY_KEY_LEN, MAX_LINE_QUANTITY, MAX_RECEIPT_QUANTITY, MAX_SALE_LINES, MAX_UNIT_PRICE_CENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an identifier-like code (SKU, lot code).
///
/// ## Rules
/// - Must not be empty
/// - At most `max` characters
/// - Only alphanumeric characters, hyphens, underscores, dots and slashes
fn validate_code(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    if !value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters, numbers, '-', '_', '.' and '/'".to_string(),
        });
    }

    Ok(())
}

fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// Validates a SKU.
///
/// ## Example
/// ```rust
/// use stockwell_core::validation::validate_sku;
///
/// assert!(validate_sku("AMOX-500").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("AMOX 500").is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    validate_code("sku", sku, 50)
}

/// Validates a batch lot code.
pub fn validate_lot_code(lot_code: &str) -> ValidationResult<()> {
    validate_code("lot_code", lot_code, 64)
}

/// Rejects a user lot code that collides (case-insensitively) with the
/// lot code reserved for returns batches.
///
/// ## Example
/// ```rust
/// use stockwell_core::validation::validate_unreserved_lot_code;
///
/// assert!(validate_unreserved_lot_code("AX-2401", "RETURNS").is_ok());
/// assert!(validate_unreserved_lot_code("returns", "RETURNS").is_err());
/// ```
pub fn validate_unreserved_lot_code(lot_code: &str, reserved: &str) -> ValidationResult<()> {
    if lot_code.trim().eq_ignore_ascii_case(reserved.trim()) {
        return Err(ValidationError::InvalidFormat {
            field: "lot_code".to_string(),
            reason: format!("'{reserved}' is reserved for returns batches"),
        });
    }
    Ok(())
}

/// Validates an ISO-4217 currency code ("EUR", "USD").
///
/// ## Example
/// ```rust
/// use stockwell_core::validation::validate_currency;
///
/// assert!(validate_currency("EUR").is_ok());
/// assert!(validate_currency("eur").is_err());
/// assert!(validate_currency("EURO").is_err());
/// ```
pub fn validate_currency(currency: &str) -> ValidationResult<()> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::InvalidFormat {
            field: "currency".to_string(),
            reason: "must be a 3-letter upper-case ISO-4217 code".to_string(),
        });
    }
    Ok(())
}

/// Validates a client-supplied idempotency key.
///
/// ## Rules
/// - Not blank
/// - At most [`MAX_IDEMPOTENCY_KEY_LEN`] characters
/// - Printable ASCII only
pub fn validate_idempotency_key(key: &str) -> ValidationResult<()> {
    if key.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "idempotency_key".to_string(),
        });
    }

    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "idempotency_key".to_string(),
            max: MAX_IDEMPOTENCY_KEY_LEN,
        });
    }

    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ValidationError::InvalidFormat {
            field: "idempotency_key".to_string(),
            reason: "must be printable ASCII without spaces".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity (1..=MAX_LINE_QUANTITY).
///
/// ## Example
/// ```rust
/// use stockwell_core::validation::validate_quantity;
///
/// assert!(validate_quantity(1).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(-3).is_err());
/// ```
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if quantity > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a stock receipt quantity (1..=MAX_RECEIPT_QUANTITY).
pub fn validate_receipt_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if quantity > MAX_RECEIPT_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_RECEIPT_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a sale line's price and discount, returning the line total.
///
/// ## Rules
/// - Unit price must be within 0..=MAX_UNIT_PRICE_CENTS
/// - Discount must not be negative
/// - Discount must not exceed unit_price × quantity
pub fn validate_sale_line(line: &NewSaleLine) -> ValidationResult<Money> {
    validate_quantity(line.quantity)?;

    if line.unit_price.is_negative() || line.unit_price.cents() > MAX_UNIT_PRICE_CENTS {
        return Err(ValidationError::OutOfRange {
            field: "unit_price".to_string(),
            min: 0,
            max: MAX_UNIT_PRICE_CENTS,
        });
    }

    let gross = line
        .unit_price
        .checked_multiply_quantity(line.quantity)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "unit_price".to_string(),
            min: 0,
            max: MAX_UNIT_PRICE_CENTS,
        })?;

    if line.discount.is_negative() || line.discount > gross {
        return Err(ValidationError::OutOfRange {
            field: "discount".to_string(),
            min: 0,
            max: gross.cents(),
        });
    }

    Ok(gross - line.discount)
}

// =============================================================================
// Aggregate Validators
// =============================================================================

/// Validates a new product.
pub fn validate_new_product(product: &NewProduct) -> ValidationResult<()> {
    validate_sku(&product.sku)?;
    validate_text("name", &product.name, 200)?;
    validate_text("unit", &product.unit, 20)?;
    Ok(())
}

/// Validates a new batch.
pub fn validate_new_batch(batch: &NewBatch) -> ValidationResult<()> {
    validate_text("product_id", &batch.product_id, 64)?;
    validate_lot_code(&batch.lot_code)
}

/// Validates a draft sale and returns each line's total, in order.
pub fn validate_new_sale(sale: &NewSale) -> ValidationResult<Vec<Money>> {
    validate_text("legal_entity", &sale.legal_entity, 100)?;
    validate_currency(&sale.currency)?;

    if sale.lines.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }

    if sale.lines.len() > MAX_SALE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_SALE_LINES as i64,
        });
    }

    sale.lines.iter().map(validate_sale_line).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: i64, unit_price: i64, discount: i64) -> NewSaleLine {
        NewSaleLine {
            product_id: "p1".to_string(),
            quantity,
            unit_price: Money::from_cents(unit_price),
            discount: Money::from_cents(discount),
        }
    }

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("AMOX-500").is_ok());
        assert!(validate_sku("  ").is_err());
        assert!(validate_sku(&"A".repeat(51)).is_err());
        assert!(validate_sku("bad sku").is_err());
    }

    #[test]
    fn test_validate_lot_code() {
        assert!(validate_lot_code("LOT-2025/01").is_ok());
        assert!(validate_lot_code("").is_err());
    }

    #[test]
    fn test_validate_idempotency_key() {
        assert!(validate_idempotency_key("r1").is_ok());
        assert!(validate_idempotency_key("  ").is_err());
        assert!(validate_idempotency_key("has space").is_err());
        assert!(validate_idempotency_key(&"k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_quantity_bounds() {
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());
        assert!(matches!(
            validate_quantity(MAX_LINE_QUANTITY + 1),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_sale_line_total() {
        assert_eq!(validate_sale_line(&line(10, 500, 0)).unwrap().cents(), 5000);
        assert_eq!(validate_sale_line(&line(2, 500, 150)).unwrap().cents(), 850);
        assert!(validate_sale_line(&line(2, 500, 1001)).is_err());
        assert!(validate_sale_line(&line(2, -1, 0)).is_err());
        assert!(validate_sale_line(&line(2, 500, -1)).is_err());
    }

    #[test]
    fn test_sale_line_price_bounds() {
        let max_line = validate_sale_line(&line(MAX_LINE_QUANTITY, MAX_UNIT_PRICE_CENTS, 0)).unwrap();
        assert_eq!(max_line.cents(), MAX_LINE_QUANTITY * MAX_UNIT_PRICE_CENTS);

        assert!(matches!(
            validate_sale_line(&line(3, i64::MAX / 2, 0)),
            Err(ValidationError::OutOfRange { ref field, .. }) if field == "unit_price"
        ));
        assert!(matches!(
            validate_sale_line(&line(1, MAX_UNIT_PRICE_CENTS + 1, 0)),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_receipt_quantity_bounds() {
        assert!(validate_receipt_quantity(MAX_RECEIPT_QUANTITY).is_ok());
        assert!(matches!(validate_receipt_quantity(0), Err(ValidationError::MustBePositive { .. })));
        assert!(matches!(
            validate_receipt_quantity(i64::MAX),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_new_sale() {
        let sale = NewSale {
            legal_entity: "clinic-north".to_string(),
            currency: "EUR".to_string(),
            lines: vec![line(1, 100, 0), line(3, 250, 50)],
        };
        let totals = validate_new_sale(&sale).unwrap();
        assert_eq!(totals, vec![Money::from_cents(100), Money::from_cents(700)]);

        let empty = NewSale {
            lines: vec![],
            ..sale.clone()
        };
        assert!(validate_new_sale(&empty).is_err());

        let bad_currency = NewSale {
            currency: "euro".to_string(),
            ..sale
        };
        assert!(validate_new_sale(&bad_currency).is_err());
    }
}
