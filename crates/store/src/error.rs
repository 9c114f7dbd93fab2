use common::{CartItemId, OrderId, ProductId};
use thiserror::Error;

use crate::model::OrderStatus;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A conditional stock decrement found fewer units than requested.
    #[error(
        "Insufficient stock for '{product_name}' ({product_id}): requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        product_name: String,
        requested: u32,
        available: u32,
    },

    /// Crediting stock would pass the largest storable quantity.
    #[error("Stock of product {product_id} would exceed the limit: {stock} + {quantity}")]
    StockOverflow {
        product_id: ProductId,
        stock: u32,
        quantity: u32,
    },

    /// Some of the selected cart lines do not exist or belong to another user.
    #[error("Invalid cart selection: {} line(s) not found", missing.len())]
    InvalidCartSelection { missing: Vec<CartItemId> },

    /// A category write would break the two-level tree rules.
    #[error("Invalid category hierarchy: {0}")]
    InvalidHierarchy(String),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An order was not in the status the write expected.
    #[error("Order {order_id} is {actual}, expected {expected}")]
    StatusConflict {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    /// A stored value could not be decoded into a model type.
    #[error("Corrupt row: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
