//! Domain error types.

use common::{CartItemId, ProductId};
use store::{StoreError, model::OrderStatus};
use thiserror::Error;

use crate::order::OrderAction;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Malformed or missing input.
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    /// A product does not hold enough units.
    #[error(
        "Insufficient stock for '{product_name}': requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        product_name: String,
        requested: u32,
        available: u32,
    },

    /// Selected cart lines are missing or owned by someone else.
    #[error("Invalid cart selection: {} line(s) not found", missing.len())]
    InvalidCartSelection { missing: Vec<CartItemId> },

    /// The order's status does not allow the requested action.
    #[error("Cannot {action} an order that is {from}")]
    InvalidTransition {
        from: OrderStatus,
        action: OrderAction,
    },

    /// A category write would break the tree rules.
    #[error("Invalid category hierarchy: {0}")]
    InvalidHierarchy(String),

    /// The requested resource does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The caller may not touch this resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A uniqueness rule was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[source] StoreError),
}

impl DomainError {
    /// Creates a validation error for a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => DomainError::NotFound { entity, id },
            StoreError::InsufficientStock {
                product_id,
                product_name,
                requested,
                available,
            } => DomainError::InsufficientStock {
                product_id,
                product_name,
                requested,
                available,
            },
            StoreError::InvalidCartSelection { missing } => {
                DomainError::InvalidCartSelection { missing }
            }
            StoreError::InvalidHierarchy(message) => DomainError::InvalidHierarchy(message),
            StoreError::Conflict(message) => DomainError::Conflict(message),
            StoreError::StockOverflow {
                stock, quantity, ..
            } => DomainError::validation(
                "quantity",
                format!("adding {quantity} units to a stock of {stock} exceeds the limit"),
            ),
            other => DomainError::Store(other),
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_meaning() {
        let err: DomainError = StoreError::InvalidHierarchy("too deep".to_string()).into();
        assert!(matches!(err, DomainError::InvalidHierarchy(_)));

        let err: DomainError = StoreError::InvalidCartSelection {
            missing: vec![CartItemId::new()],
        }
        .into();
        assert!(matches!(err, DomainError::InvalidCartSelection { .. }));

        let err: DomainError = StoreError::StockOverflow {
            product_id: ProductId::new(),
            stock: 10,
            quantity: u32::MAX,
        }
        .into();
        assert!(matches!(err, DomainError::Validation { ref field, .. } if field == "quantity"));

        let err: DomainError = StoreError::Decode("bad".to_string()).into();
        assert!(matches!(err, DomainError::Store(_)));
    }

    #[test]
    fn transition_error_names_action_and_status() {
        let err = DomainError::InvalidTransition {
            from: OrderStatus::Paid,
            action: OrderAction::Cancel,
        };
        assert_eq!(err.to_string(), "Cannot cancel an order that is paid");
    }
}
