//! Rows held by the store.

use chrono::{DateTime, Utc};
use common::{CartItemId, CategoryId, Money, OrderId, OrderItemId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// A node of the two-level category tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_id: Option<CategoryId>,
    pub is_active: bool,
    /// Sibling sort key.
    pub order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    /// Returns true for top-level categories.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Field values for creating or replacing a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDraft {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_id: Option<CategoryId>,
    pub is_active: bool,
    pub order: i32,
}

/// Checks the placement of a category under `parent`.
///
/// `id` is `None` for a category that does not exist yet. `has_children`
/// tells whether the category being placed already has child nodes.
pub fn check_placement(
    id: Option<CategoryId>,
    parent: Option<&Category>,
    has_children: bool,
) -> Result<()> {
    let Some(parent) = parent else {
        return Ok(());
    };

    if Some(parent.id) == id {
        return Err(StoreError::InvalidHierarchy(
            "a category cannot be its own parent".to_string(),
        ));
    }
    if !parent.is_root() {
        return Err(StoreError::InvalidHierarchy(format!(
            "'{}' is already a child category; only two levels are allowed",
            parent.name
        )));
    }
    if has_children {
        return Err(StoreError::InvalidHierarchy(
            "a category with children cannot be moved under another category".to_string(),
        ));
    }
    Ok(())
}

/// A sellable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price: Money,
    pub discount_price: Option<Money>,
    pub stock: u32,
    pub is_active: bool,
    pub is_featured: bool,
    pub category_id: Option<CategoryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns true when a discount price is set and lower than the list price.
    pub fn is_on_sale(&self) -> bool {
        matches!(self.discount_price, Some(discount) if discount < self.price)
    }

    /// Returns the price a buyer pays right now.
    pub fn current_price(&self) -> Money {
        effective_price(self.price, self.discount_price)
    }
}

/// Largest stock a product can hold; stock is stored as a signed 32-bit column.
pub const STOCK_MAX: u32 = i32::MAX as u32;

/// `stock + quantity`, or `StockOverflow` when the sum passes [`STOCK_MAX`].
pub fn add_stock(product_id: ProductId, stock: u32, quantity: u32) -> Result<u32> {
    stock
        .checked_add(quantity)
        .filter(|total| *total <= STOCK_MAX)
        .ok_or(StoreError::StockOverflow {
            product_id,
            stock,
            quantity,
        })
}

/// The discount price when it undercuts `price`, otherwise `price`.
pub fn effective_price(price: Money, discount_price: Option<Money>) -> Money {
    match discount_price {
        Some(discount) if discount < price => discount,
        _ => price,
    }
}

/// Field values for a new product. The slug must already be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price: Money,
    pub discount_price: Option<Money>,
    pub stock: u32,
    pub is_active: bool,
    pub is_featured: bool,
    pub category_id: Option<CategoryId>,
}

/// Partial update of a product. Stock is deliberately absent: it only moves
/// through the decrement and restore paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub discount_price: Option<Option<Money>>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    pub category_id: Option<Option<CategoryId>>,
}

impl ProductUpdate {
    pub(crate) fn apply_to(&self, product: &mut Product) {
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(description) = &self.description {
            product.description = description.clone();
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(discount_price) = self.discount_price {
            product.discount_price = discount_price;
        }
        if let Some(is_active) = self.is_active {
            product.is_active = is_active;
        }
        if let Some(is_featured) = self.is_featured {
            product.is_featured = is_featured;
        }
        if let Some(category_id) = self.category_id {
            product.category_id = category_id;
        }
    }
}

/// One product line in a user's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line joined with its live product row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub item: CartItem,
    pub product: Product,
}

impl CartLine {
    /// Current price times quantity, computed live.
    pub fn subtotal(&self) -> Money {
        self.product.current_price().multiply(self.item.quantity)
    }
}

/// Lifecycle status of an order.
///
/// ```text
/// Pending ──► Paid ──► Shipping ──► Delivered
///    │
///    └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Shipping,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "shipping" => Ok(OrderStatus::Shipping),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(StoreError::Decode(format!("unknown order status '{other}'"))),
        }
    }
}

/// How an order is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Mobile,
    VirtualAccount,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Mobile => "mobile",
            PaymentMethod::VirtualAccount => "virtual_account",
        }
    }

    /// Human readable label used in notification mails.
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "Credit card",
            PaymentMethod::BankTransfer => "Bank transfer",
            PaymentMethod::Mobile => "Mobile payment",
            PaymentMethod::VirtualAccount => "Virtual account",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "mobile" => Ok(PaymentMethod::Mobile),
            "virtual_account" => Ok(PaymentMethod::VirtualAccount),
            other => Err(StoreError::Decode(format!("unknown payment method '{other}'"))),
        }
    }
}

/// Recipient and address, copied onto the order at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub recipient_name: String,
    pub recipient_phone: String,
    pub shipping_address1: String,
    #[serde(default)]
    pub shipping_address2: String,
    pub shipping_zip_code: String,
    #[serde(default)]
    pub shipping_note: String,
}

/// A placed order with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub status: OrderStatus,
    pub total_price: Money,
    pub payment_method: PaymentMethod,
    #[serde(flatten)]
    pub shipping: ShippingDetails,
    pub payment_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

/// An immutable snapshot of one purchased product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub price: Money,
    pub quantity: u32,
    /// Set once the quantity has been credited back to the product.
    pub restored_at: Option<DateTime<Utc>>,
}

impl OrderItem {
    pub fn subtotal(&self) -> Money {
        self.price.multiply(self.quantity)
    }
}

/// Header fields of an order about to be created by checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub order_number: String,
    pub payment_method: PaymentMethod,
    pub shipping: ShippingDetails,
}

/// Field changes that accompany a status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    Paid {
        payment_id: String,
        paid_at: DateTime<Utc>,
    },
    Shipping,
    Delivered,
    Cancelled,
}

impl StatusChange {
    /// The status the order ends up in.
    pub fn target(&self) -> OrderStatus {
        match self {
            StatusChange::Paid { .. } => OrderStatus::Paid,
            StatusChange::Shipping => OrderStatus::Shipping,
            StatusChange::Delivered => OrderStatus::Delivered,
            StatusChange::Cancelled => OrderStatus::Cancelled,
        }
    }
}

/// Result of crediting an order item's quantity back to stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored {
        product_id: ProductId,
        quantity: u32,
        new_stock: u32,
    },
    /// The item was credited earlier; nothing changed.
    AlreadyRestored,
}

/// Result of deleting a single order item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItemRemoval {
    pub item: OrderItem,
    pub stock_restored: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(price: i64, discount: Option<i64>) -> Product {
        let now = Utc::now();
        Product {
            id: ProductId::new(),
            name: "Widget".to_string(),
            slug: "widget".to_string(),
            description: String::new(),
            price: Money::from_minor(price),
            discount_price: discount.map(Money::from_minor),
            stock: 10,
            is_active: true,
            is_featured: false,
            category_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn stock_cannot_pass_the_column_limit() {
        let id = ProductId::new();
        assert_eq!(add_stock(id, 7, 3).unwrap(), 10);
        assert_eq!(add_stock(id, 0, STOCK_MAX).unwrap(), STOCK_MAX);
        assert!(matches!(
            add_stock(id, 1, STOCK_MAX),
            Err(StoreError::StockOverflow { stock: 1, .. })
        ));
        assert!(matches!(
            add_stock(id, 5, u32::MAX),
            Err(StoreError::StockOverflow { .. })
        ));
    }

    fn category(name: &str, parent_id: Option<CategoryId>) -> Category {
        let now = Utc::now();
        Category {
            id: CategoryId::new(),
            name: name.to_string(),
            slug: name.to_lowercase(),
            description: String::new(),
            parent_id,
            is_active: true,
            order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn current_price_never_exceeds_price() {
        let cases = [
            (1000, None),
            (1000, Some(800)),
            (1000, Some(1000)),
            (1000, Some(1200)),
            (0, Some(0)),
        ];
        for (price, discount) in cases {
            let p = product(price, discount);
            assert!(p.current_price() <= p.price);
            assert_eq!(
                p.is_on_sale(),
                Some(p.current_price()) == p.discount_price && p.discount_price < Some(p.price)
            );
        }
    }

    #[test]
    fn discount_applies_only_when_lower() {
        let on_sale = product(1000, Some(800));
        assert!(on_sale.is_on_sale());
        assert_eq!(on_sale.current_price(), Money::from_minor(800));

        let same = product(1000, Some(1000));
        assert!(!same.is_on_sale());
        assert_eq!(same.current_price(), Money::from_minor(1000));
    }

    #[test]
    fn placement_under_root_is_allowed() {
        let root = category("Fashion", None);
        assert!(check_placement(None, Some(&root), false).is_ok());
        assert!(check_placement(None, None, true).is_ok());
    }

    #[test]
    fn placement_under_child_is_rejected() {
        let root = category("Fashion", None);
        let child = category("Shoes", Some(root.id));
        let err = check_placement(None, Some(&child), false).unwrap_err();
        assert!(matches!(err, StoreError::InvalidHierarchy(_)));
    }

    #[test]
    fn self_parent_is_rejected() {
        let root = category("Fashion", None);
        let err = check_placement(Some(root.id), Some(&root), false).unwrap_err();
        assert!(matches!(err, StoreError::InvalidHierarchy(_)));
    }

    #[test]
    fn parent_with_children_cannot_be_nested() {
        let root = category("Fashion", None);
        let err = check_placement(Some(CategoryId::new()), Some(&root), true).unwrap_err();
        assert!(matches!(err, StoreError::InvalidHierarchy(_)));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Shipping,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn order_serializes_shipping_fields_flat() {
        let now = Utc::now();
        let order = Order {
            id: OrderId::new(),
            user_id: UserId::new(),
            order_number: "20250101000000ABC123".to_string(),
            status: OrderStatus::Pending,
            total_price: Money::from_minor(2000),
            payment_method: PaymentMethod::BankTransfer,
            shipping: ShippingDetails {
                recipient_name: "Kim".to_string(),
                recipient_phone: "01012345678".to_string(),
                shipping_address1: "Seoul".to_string(),
                shipping_address2: String::new(),
                shipping_zip_code: "12345".to_string(),
                shipping_note: String::new(),
            },
            payment_id: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
            items: vec![],
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["payment_method"], "bank_transfer");
        assert_eq!(json["recipient_name"], "Kim");
        assert_eq!(json["total_price"], 2000);
    }
}
