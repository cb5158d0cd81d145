//! Product domain events.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainEvent, ValidationError};

/// Event type string for product creation.
pub const PRODUCT_CREATED_V1: &str = "product.created.v1";

/// Published once per successfully accepted product creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreatedEvent {
    pub product_id: String,
    pub title: String,
    /// Decimal amount exactly as submitted (e.g. "12.34").
    pub price: String,
    pub quantity: i32,
}

impl DomainEvent for ProductCreatedEvent {
    fn event_type(&self) -> &'static str {
        PRODUCT_CREATED_V1
    }

    fn entity_id(&self) -> String {
        self.product_id.clone()
    }
}

/// Request to create a product, as accepted by the ingress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub title: String,
    pub price: String,
    pub quantity: i32,
}

impl CreateProduct {
    /// Validates the request fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::empty_field("title"));
        }
        if self.quantity < 0 {
            return Err(ValidationError::out_of_range(
                "quantity",
                0,
                i64::from(i32::MAX),
                i64::from(self.quantity),
            ));
        }
        validate_price(&self.price)
    }

    /// Builds the creation event for an assigned product id.
    pub fn into_event(self, product_id: impl Into<String>) -> ProductCreatedEvent {
        ProductCreatedEvent {
            product_id: product_id.into(),
            title: self.title,
            price: self.price,
            quantity: self.quantity,
        }
    }
}

/// Accepts non-negative decimal literals: an optional `+`, digits with at
/// most one `.`, and an optional exponent (`1e3`, `2.5E-2`).
fn validate_price(price: &str) -> Result<(), ValidationError> {
    let invalid = || {
        ValidationError::invalid_format(
            "price",
            format!("'{}' is not a non-negative decimal", price),
        )
    };

    let unsigned = price.strip_prefix('+').unwrap_or(price);
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, Some(exponent)),
        None => (unsigned, None),
    };

    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !digits_only(whole) || !digits_only(fraction) {
        return Err(invalid());
    }

    if let Some(exponent) = exponent {
        let digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
        if digits.is_empty() || !digits_only(digits) {
            return Err(invalid());
        }
    }
    Ok(())
}
