use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartItemId, CategoryId, OrderId, OrderItemId, ProductId, UserId};

use crate::{
    OrderQuery, ProductQuery, Result,
    model::{
        CartItem, CartLine, Category, CategoryDraft, NewOrder, NewProduct, Order, OrderItem,
        OrderItemRemoval, OrderStatus, Product, ProductUpdate, RestoreOutcome, StatusChange,
    },
};

/// Which slice of the category table to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryScope {
    All,
    Roots,
    ChildrenOf(CategoryId),
}

/// Categories and products.
///
/// Category writes enforce the tree rules themselves: depth of two, no self
/// parent, unique names among siblings and unique slugs.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts a category after checking its placement.
    async fn insert_category(&self, draft: CategoryDraft) -> Result<Category>;

    /// Replaces every editable field of a category.
    async fn update_category(&self, id: CategoryId, draft: CategoryDraft) -> Result<Category>;

    /// Deletes a category. Its children move to the root and its products
    /// lose their category.
    async fn delete_category(&self, id: CategoryId) -> Result<Category>;

    async fn get_category(&self, id: CategoryId) -> Result<Option<Category>>;

    /// Lists categories ordered by `(order, name)`.
    async fn list_categories(&self, scope: CategoryScope, active_only: bool)
    -> Result<Vec<Category>>;

    async fn category_slug_exists(&self, slug: &str) -> Result<bool>;

    /// Inserts a product. A taken slug is reported as `Conflict`.
    async fn insert_product(&self, product: NewProduct) -> Result<Product>;

    async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    async fn product_slug_exists(&self, slug: &str) -> Result<bool>;

    async fn query_products(&self, query: ProductQuery) -> Result<Vec<Product>>;

    /// Atomically adds `quantity` units to a product's stock.
    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Product>;
}

/// Per-user cart lines. At most one line exists per `(user, product)`.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Lists a user's lines, oldest first, joined with their products.
    async fn list_cart(&self, user_id: UserId) -> Result<Vec<CartLine>>;

    async fn get_cart_item(&self, id: CartItemId) -> Result<Option<CartItem>>;

    async fn find_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartItem>>;

    /// Creates the `(user, product)` line or adds `quantity` to it.
    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem>;

    /// Overwrites the quantity of a line.
    async fn set_cart_quantity(&self, id: CartItemId, quantity: u32) -> Result<CartItem>;

    /// Returns false when the line did not exist.
    async fn delete_cart_item(&self, id: CartItemId) -> Result<bool>;

    /// Returns the number of deleted lines.
    async fn clear_cart(&self, user_id: UserId) -> Result<u64>;

    /// Counts cart lines last touched before `cutoff`.
    async fn count_cart_items_updated_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Orders and their items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Turns the selected cart lines of `order.user_id` into a pending order.
    ///
    /// Runs as one unit: every line must exist and belong to the user, every
    /// product must hold enough stock at the moment of the decrement, and on
    /// success the order, its item snapshots, the stock decrements and the
    /// cart deletions all become visible together. On any failure nothing
    /// changes.
    async fn checkout(&self, order: NewOrder, cart_item_ids: &[CartItemId]) -> Result<Order>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists orders newest first.
    async fn list_orders(&self, query: OrderQuery) -> Result<Vec<Order>>;

    /// Moves an order from `expected` to the status named by `change`.
    ///
    /// Fails with `StatusConflict` when the order is no longer in `expected`.
    async fn transition_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        change: StatusChange,
    ) -> Result<Order>;

    /// Deletes a cancelled order and its items.
    async fn delete_order(&self, id: OrderId) -> Result<()>;

    async fn get_order_item(&self, id: OrderItemId) -> Result<Option<OrderItem>>;

    /// Credits an item's quantity back to its product exactly once.
    async fn restore_order_item_stock(&self, id: OrderItemId) -> Result<RestoreOutcome>;

    /// Deletes one item. Stock is credited back unless the order is pending
    /// or cancelled, or the item was already restored.
    async fn delete_order_item(&self, id: OrderItemId) -> Result<OrderItemRemoval>;

    /// Counts orders placed before `cutoff`, whatever their status.
    async fn count_orders_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Everything the services need from persistence.
pub trait Store: CatalogStore + CartStore + OrderStore {}

impl<T: CatalogStore + CartStore + OrderStore + ?Sized> Store for T {}
