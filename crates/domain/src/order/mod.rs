//! Orders: checkout, the status state machine and lifecycle operations.

mod checkout;
mod service;
mod state;

pub use checkout::{CheckoutRequest, ORDER_NUMBER_MAX, generate_order_number};
pub use service::OrderService;
pub use state::{OrderAction, next_status};
