//! Order state machine.

use serde::{Deserialize, Serialize};
use store::model::OrderStatus;

use crate::error::{DomainError, Result};

/// A requested change of order status.
///
/// Allowed edges:
/// ```text
/// pending ──pay──► paid ──ship──► shipping ──deliver──► delivered
///    │
///    └──cancel──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    Cancel,
    MarkPaid,
    MarkShipping,
    MarkDelivered,
}

impl OrderAction {
    /// The only status this action may start from.
    pub fn required_status(&self) -> OrderStatus {
        match self {
            OrderAction::Cancel | OrderAction::MarkPaid => OrderStatus::Pending,
            OrderAction::MarkShipping => OrderStatus::Paid,
            OrderAction::MarkDelivered => OrderStatus::Shipping,
        }
    }

    /// The status the order ends up in.
    pub fn target_status(&self) -> OrderStatus {
        match self {
            OrderAction::Cancel => OrderStatus::Cancelled,
            OrderAction::MarkPaid => OrderStatus::Paid,
            OrderAction::MarkShipping => OrderStatus::Shipping,
            OrderAction::MarkDelivered => OrderStatus::Delivered,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            OrderAction::Cancel => "cancel",
            OrderAction::MarkPaid => "pay",
            OrderAction::MarkShipping => "ship",
            OrderAction::MarkDelivered => "deliver",
        }
    }
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.verb())
    }
}

/// Returns the next status, or `InvalidTransition` if the edge does not exist.
pub fn next_status(from: OrderStatus, action: OrderAction) -> Result<OrderStatus> {
    if from == action.required_status() {
        Ok(action.target_status())
    } else {
        Err(DomainError::InvalidTransition { from, action })
    }
}
