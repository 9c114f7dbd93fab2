//! Checkout input and order numbers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{CartItemId, UserId};
use rand::Rng;
use serde::Deserialize;
use store::model::{NewOrder, PaymentMethod, ShippingDetails};

use crate::error::{DomainError, Result};

/// Maximum length of an order number.
pub const ORDER_NUMBER_MAX: usize = 20;

const ORDER_NUMBER_SUFFIX: usize = 6;
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A checkout as submitted by a buyer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CheckoutRequest {
    pub cart_items: Vec<CartItemId>,
    pub payment_method: Option<PaymentMethod>,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub shipping_address1: String,
    pub shipping_address2: String,
    pub shipping_zip_code: String,
    pub shipping_note: String,
}

impl CheckoutRequest {
    /// Checks presence, length and uniqueness rules. Ownership and stock are
    /// checked against the store later.
    pub fn validate(&self) -> Result<()> {
        if self.cart_items.is_empty() {
            return Err(DomainError::validation(
                "cart_items",
                "Select at least one cart item",
            ));
        }
        let unique: HashSet<_> = self.cart_items.iter().collect();
        if unique.len() != self.cart_items.len() {
            return Err(DomainError::validation(
                "cart_items",
                "Cart items must not repeat",
            ));
        }
        if self.payment_method.is_none() {
            return Err(DomainError::validation(
                "payment_method",
                "This field is required",
            ));
        }

        required("recipient_name", &self.recipient_name, 100)?;
        required("recipient_phone", &self.recipient_phone, 15)?;
        required("shipping_address1", &self.shipping_address1, 200)?;
        optional("shipping_address2", &self.shipping_address2, 200)?;
        required("shipping_zip_code", &self.shipping_zip_code, 10)?;
        optional("shipping_note", &self.shipping_note, 200)?;
        Ok(())
    }

    pub(crate) fn to_new_order(&self, user_id: UserId, order_number: String) -> Result<NewOrder> {
        let payment_method = self
            .payment_method
            .ok_or_else(|| DomainError::validation("payment_method", "This field is required"))?;
        Ok(NewOrder {
            user_id,
            order_number,
            payment_method,
            shipping: ShippingDetails {
                recipient_name: self.recipient_name.trim().to_string(),
                recipient_phone: self.recipient_phone.trim().to_string(),
                shipping_address1: self.shipping_address1.trim().to_string(),
                shipping_address2: self.shipping_address2.trim().to_string(),
                shipping_zip_code: self.shipping_zip_code.trim().to_string(),
                shipping_note: self.shipping_note.trim().to_string(),
            },
        })
    }
}

fn required(field: &str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(field, "This field may not be blank"));
    }
    optional(field, value, max)
}

fn optional(field: &str, value: &str, max: usize) -> Result<()> {
    if value.trim().chars().count() > max {
        return Err(DomainError::validation(
            field,
            format!("Ensure this field has no more than {max} characters"),
        ));
    }
    Ok(())
}

/// `YYYYMMDDHHMMSS` of `now` followed by six random uppercase letters or
/// digits.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_NUMBER_SUFFIX)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
        .collect();
    let mut number = format!("{}{suffix}", now.format("%Y%m%d%H%M%S"));
    number.truncate(ORDER_NUMBER_MAX);
    number
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn request(cart_items: Vec<CartItemId>) -> CheckoutRequest {
        CheckoutRequest {
            cart_items,
            payment_method: Some(PaymentMethod::Card),
            recipient_name: "Kim Minji".to_string(),
            recipient_phone: "010-1234-5678".to_string(),
            shipping_address1: "12 Harbor Road".to_string(),
            shipping_address2: String::new(),
            shipping_zip_code: "04524".to_string(),
            shipping_note: String::new(),
        }
    }

    fn field_of(err: DomainError) -> String {
        match err {
            DomainError::Validation { field, .. } => field,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn complete_request_is_valid() {
        assert!(request(vec![CartItemId::new()]).validate().is_ok());
    }

    #[test]
    fn empty_and_repeated_selections_are_rejected() {
        let err = request(vec![]).validate().unwrap_err();
        assert_eq!(field_of(err), "cart_items");

        let id = CartItemId::new();
        let err = request(vec![id, id]).validate().unwrap_err();
        assert_eq!(field_of(err), "cart_items");
    }

    #[test]
    fn missing_payment_method_is_rejected() {
        let mut req = request(vec![CartItemId::new()]);
        req.payment_method = None;
        assert_eq!(field_of(req.validate().unwrap_err()), "payment_method");
    }

    #[test]
    fn blank_and_overlong_fields_are_named() {
        let mut req = request(vec![CartItemId::new()]);
        req.recipient_name = "   ".to_string();
        assert_eq!(field_of(req.validate().unwrap_err()), "recipient_name");

        let mut req = request(vec![CartItemId::new()]);
        req.recipient_phone = "0".repeat(16);
        assert_eq!(field_of(req.validate().unwrap_err()), "recipient_phone");

        let mut req = request(vec![CartItemId::new()]);
        req.shipping_zip_code = "12345678901".to_string();
        assert_eq!(field_of(req.validate().unwrap_err()), "shipping_zip_code");

        let mut req = request(vec![CartItemId::new()]);
        req.shipping_note = "x".repeat(201);
        assert_eq!(field_of(req.validate().unwrap_err()), "shipping_note");
    }

    #[test]
    fn payload_with_missing_fields_deserializes_then_fails_validation() {
        let req: CheckoutRequest =
            serde_json::from_value(serde_json::json!({ "cart_items": [CartItemId::new()] }))
                .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn order_number_is_timestamp_plus_suffix() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let number = generate_order_number(at);

        assert_eq!(number.len(), ORDER_NUMBER_MAX);
        assert!(number.starts_with("20240309140507"));
        assert!(
            number[14..]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }
}
