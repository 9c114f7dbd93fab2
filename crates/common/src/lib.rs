//! Shared identifiers and value objects used across the shop crates.

pub mod ids;
pub mod money;

pub use ids::{CartItemId, CategoryId, OrderId, OrderItemId, ProductId, UserId};
pub use money::Money;
