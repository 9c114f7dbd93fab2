use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartItemId, CategoryId, OrderId, OrderItemId, ProductId, UserId};
use tokio::sync::RwLock;

use crate::{
    OrderQuery, ProductQuery, Result, StoreError,
    model::{
        CartItem, CartLine, Category, CategoryDraft, NewOrder, NewProduct, Order, OrderItem,
        OrderItemRemoval, OrderStatus, Product, ProductUpdate, RestoreOutcome, StatusChange,
        add_stock, check_placement,
    },
    store::{CartStore, CatalogStore, CategoryScope, OrderStore},
};

#[derive(Default)]
struct State {
    categories: HashMap<CategoryId, Category>,
    products: HashMap<ProductId, Product>,
    cart: HashMap<CartItemId, CartItem>,
    orders: HashMap<OrderId, Order>,
}

impl State {
    fn product(&self, id: ProductId) -> Result<&Product> {
        self.products
            .get(&id)
            .ok_or_else(|| StoreError::not_found("product", id))
    }

    fn check_category(&self, id: Option<CategoryId>, draft: &CategoryDraft) -> Result<()> {
        let parent = match draft.parent_id {
            Some(parent_id) => Some(
                self.categories
                    .get(&parent_id)
                    .ok_or_else(|| StoreError::not_found("category", parent_id))?,
            ),
            None => None,
        };
        let has_children =
            id.is_some_and(|id| self.categories.values().any(|c| c.parent_id == Some(id)));
        check_placement(id, parent, has_children)?;

        let others = self.categories.values().filter(|c| Some(c.id) != id);
        for other in others {
            if other.parent_id == draft.parent_id && other.name == draft.name {
                return Err(StoreError::InvalidHierarchy(format!(
                    "a sibling category named '{}' already exists",
                    draft.name
                )));
            }
            if other.slug == draft.slug {
                return Err(StoreError::Conflict(format!(
                    "category slug '{}' is taken",
                    draft.slug
                )));
            }
        }
        Ok(())
    }

    fn credit_stock(&mut self, id: ProductId, quantity: u32) -> Result<u32> {
        let product = self
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("product", id))?;
        product.stock = add_stock(id, product.stock, quantity)?;
        product.updated_at = Utc::now();
        Ok(product.stock)
    }

    /// Credits every unrestored item of an order back to stock and marks it
    /// restored. Nothing changes if any credit fails.
    fn restore_order(&mut self, order_id: OrderId) -> Result<()> {
        let Some(order) = self.orders.get(&order_id) else {
            return Ok(());
        };
        let mut totals: HashMap<ProductId, u32> = HashMap::new();
        for item in order.items.iter().filter(|i| i.restored_at.is_none()) {
            let stock = match totals.get(&item.product_id) {
                Some(stock) => *stock,
                None => self.product(item.product_id)?.stock,
            };
            totals.insert(
                item.product_id,
                add_stock(item.product_id, stock, item.quantity)?,
            );
        }

        let now = Utc::now();
        for (id, stock) in totals {
            if let Some(product) = self.products.get_mut(&id) {
                product.stock = stock;
                product.updated_at = now;
            }
        }
        if let Some(order) = self.orders.get_mut(&order_id) {
            for item in order.items.iter_mut().filter(|i| i.restored_at.is_none()) {
                item.restored_at = Some(now);
            }
        }
        Ok(())
    }

    fn order_item_mut(&mut self, id: OrderItemId) -> Option<(OrderStatus, &mut OrderItem)> {
        self.orders.values_mut().find_map(|order| {
            let status = order.status;
            order
                .items
                .iter_mut()
                .find(|item| item.id == id)
                .map(|item| (status, item))
        })
    }
}

/// In-memory store for tests and local runs.
///
/// All tables live behind one lock so that checkout and the other multi-row
/// writes are atomic with respect to each other, matching the transactional
/// behaviour of [`crate::PostgresStore`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Removes every row.
    pub async fn clear(&self) {
        *self.state.write().await = State::default();
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn insert_category(&self, draft: CategoryDraft) -> Result<Category> {
        let mut state = self.state.write().await;
        state.check_category(None, &draft)?;

        let now = Utc::now();
        let category = Category {
            id: CategoryId::new(),
            name: draft.name,
            slug: draft.slug,
            description: draft.description,
            parent_id: draft.parent_id,
            is_active: draft.is_active,
            order: draft.order,
            created_at: now,
            updated_at: now,
        };
        state.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn update_category(&self, id: CategoryId, draft: CategoryDraft) -> Result<Category> {
        let mut state = self.state.write().await;
        if !state.categories.contains_key(&id) {
            return Err(StoreError::not_found("category", id));
        }
        state.check_category(Some(id), &draft)?;

        let category = state
            .categories
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("category", id))?;
        category.name = draft.name;
        category.slug = draft.slug;
        category.description = draft.description;
        category.parent_id = draft.parent_id;
        category.is_active = draft.is_active;
        category.order = draft.order;
        category.updated_at = Utc::now();
        Ok(category.clone())
    }

    async fn delete_category(&self, id: CategoryId) -> Result<Category> {
        let mut state = self.state.write().await;
        let removed = state
            .categories
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("category", id))?;

        let children: Vec<CategoryId> = state
            .categories
            .values()
            .filter(|c| c.parent_id == Some(id))
            .map(|c| c.id)
            .collect();
        for child in &children {
            let name = &state.categories[child].name;
            let clash = state
                .categories
                .values()
                .any(|c| c.parent_id.is_none() && &c.name == name);
            if clash {
                return Err(StoreError::InvalidHierarchy(format!(
                    "child '{name}' cannot move to the root: a root category has the same name"
                )));
            }
        }

        state.categories.remove(&id);
        let now = Utc::now();
        for child in children {
            if let Some(category) = state.categories.get_mut(&child) {
                category.parent_id = None;
                category.updated_at = now;
            }
        }
        for product in state.products.values_mut() {
            if product.category_id == Some(id) {
                product.category_id = None;
            }
        }
        Ok(removed)
    }

    async fn get_category(&self, id: CategoryId) -> Result<Option<Category>> {
        Ok(self.state.read().await.categories.get(&id).cloned())
    }

    async fn list_categories(
        &self,
        scope: CategoryScope,
        active_only: bool,
    ) -> Result<Vec<Category>> {
        let state = self.state.read().await;
        let mut categories: Vec<Category> = state
            .categories
            .values()
            .filter(|c| match scope {
                CategoryScope::All => true,
                CategoryScope::Roots => c.parent_id.is_none(),
                CategoryScope::ChildrenOf(parent) => c.parent_id == Some(parent),
            })
            .filter(|c| !active_only || c.is_active)
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        Ok(categories)
    }

    async fn category_slug_exists(&self, slug: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.categories.values().any(|c| c.slug == slug))
    }

    async fn insert_product(&self, new: NewProduct) -> Result<Product> {
        let mut state = self.state.write().await;
        if state.products.values().any(|p| p.slug == new.slug) {
            return Err(StoreError::Conflict(format!(
                "product slug '{}' is taken",
                new.slug
            )));
        }
        if let Some(category_id) = new.category_id
            && !state.categories.contains_key(&category_id)
        {
            return Err(StoreError::not_found("category", category_id));
        }

        let now = Utc::now();
        let product = Product {
            id: ProductId::new(),
            name: new.name,
            slug: new.slug,
            description: new.description,
            price: new.price,
            discount_price: new.discount_price,
            stock: new.stock,
            is_active: new.is_active,
            is_featured: new.is_featured,
            category_id: new.category_id,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product> {
        let mut state = self.state.write().await;
        if let Some(Some(category_id)) = update.category_id
            && !state.categories.contains_key(&category_id)
        {
            return Err(StoreError::not_found("category", category_id));
        }
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("product", id))?;
        update.apply_to(product);
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn product_slug_exists(&self, slug: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.products.values().any(|p| p.slug == slug))
    }

    async fn query_products(&self, query: ProductQuery) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        let family: Option<Vec<CategoryId>> = query.parent.map(|parent| {
            std::iter::once(parent)
                .chain(
                    state
                        .categories
                        .values()
                        .filter(|c| c.parent_id == Some(parent))
                        .map(|c| c.id),
                )
                .collect()
        });

        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| query.matches(p))
            .filter(|p| match &family {
                Some(ids) => p.category_id.is_some_and(|id| ids.contains(&id)),
                None => true,
            })
            .cloned()
            .collect();
        products.sort_by(|a, b| query.ordering.compare(a, b));

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(products.into_iter().skip(offset).take(limit).collect())
    }

    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Product> {
        let mut state = self.state.write().await;
        state.credit_stock(id, quantity)?;
        state.product(id).cloned()
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn list_cart(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let state = self.state.read().await;
        let mut lines = state
            .cart
            .values()
            .filter(|item| item.user_id == user_id)
            .map(|item| {
                Ok(CartLine {
                    item: item.clone(),
                    product: state.product(item.product_id)?.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        lines.sort_by(|a, b| {
            a.item
                .created_at
                .cmp(&b.item.created_at)
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        Ok(lines)
    }

    async fn get_cart_item(&self, id: CartItemId) -> Result<Option<CartItem>> {
        Ok(self.state.read().await.cart.get(&id).cloned())
    }

    async fn find_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartItem>> {
        let state = self.state.read().await;
        Ok(state
            .cart
            .values()
            .find(|item| item.user_id == user_id && item.product_id == product_id)
            .cloned())
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        let mut state = self.state.write().await;
        state.product(product_id)?;

        let now = Utc::now();
        let existing = state
            .cart
            .values_mut()
            .find(|item| item.user_id == user_id && item.product_id == product_id);
        if let Some(item) = existing {
            item.quantity += quantity;
            item.updated_at = now;
            return Ok(item.clone());
        }

        let item = CartItem {
            id: CartItemId::new(),
            user_id,
            product_id,
            quantity,
            created_at: now,
            updated_at: now,
        };
        state.cart.insert(item.id, item.clone());
        Ok(item)
    }

    async fn set_cart_quantity(&self, id: CartItemId, quantity: u32) -> Result<CartItem> {
        let mut state = self.state.write().await;
        let item = state
            .cart
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("cart item", id))?;
        item.quantity = quantity;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn delete_cart_item(&self, id: CartItemId) -> Result<bool> {
        Ok(self.state.write().await.cart.remove(&id).is_some())
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.cart.len();
        state.cart.retain(|_, item| item.user_id != user_id);
        Ok((before - state.cart.len()) as u64)
    }

    async fn count_cart_items_updated_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.cart.values().filter(|item| item.updated_at < cutoff).count() as u64)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn checkout(&self, new: NewOrder, cart_item_ids: &[CartItemId]) -> Result<Order> {
        let mut ids = cart_item_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut state = self.state.write().await;

        if state
            .orders
            .values()
            .any(|o| o.order_number == new.order_number)
        {
            return Err(StoreError::Conflict(format!(
                "order number '{}' is taken",
                new.order_number
            )));
        }

        let mut lines = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in &ids {
            match state.cart.get(id) {
                Some(item) if item.user_id == new.user_id => lines.push(item.clone()),
                _ => missing.push(*id),
            }
        }
        if !missing.is_empty() {
            return Err(StoreError::InvalidCartSelection { missing });
        }

        // Validate every line before the first write.
        lines.sort_by_key(|item| item.product_id);
        for line in &lines {
            let product = state.product(line.product_id)?;
            if product.stock < line.quantity {
                return Err(StoreError::InsufficientStock {
                    product_id: product.id,
                    product_name: product.name.clone(),
                    requested: line.quantity,
                    available: product.stock,
                });
            }
        }

        let now = Utc::now();
        let order_id = OrderId::new();
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = state
                .products
                .get_mut(&line.product_id)
                .ok_or_else(|| StoreError::not_found("product", line.product_id))?;
            product.stock -= line.quantity;
            product.updated_at = now;
            items.push(OrderItem {
                id: OrderItemId::new(),
                order_id,
                product_id: product.id,
                product_name: product.name.clone(),
                price: product.current_price(),
                quantity: line.quantity,
                restored_at: None,
            });
        }
        for line in &lines {
            state.cart.remove(&line.id);
        }

        let order = Order {
            id: order_id,
            user_id: new.user_id,
            order_number: new.order_number,
            status: OrderStatus::Pending,
            total_price: items.iter().map(OrderItem::subtotal).sum(),
            payment_method: new.payment_method,
            shipping: new.shipping,
            payment_id: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
            items,
        };
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self, query: OrderQuery) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| query.matches(o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(orders.into_iter().skip(offset).take(limit).collect())
    }

    async fn transition_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        change: StatusChange,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get(&id)
            .ok_or_else(|| StoreError::not_found("order", id))?;
        if order.status != expected {
            return Err(StoreError::StatusConflict {
                order_id: id,
                expected,
                actual: order.status,
            });
        }
        if change == StatusChange::Cancelled {
            state.restore_order(id)?;
        }

        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("order", id))?;
        order.status = change.target();
        if let StatusChange::Paid {
            payment_id,
            paid_at,
        } = change
        {
            order.payment_id = Some(payment_id);
            order.paid_at = Some(paid_at);
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn delete_order(&self, id: OrderId) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get(&id)
            .ok_or_else(|| StoreError::not_found("order", id))?;
        if order.status != OrderStatus::Cancelled {
            return Err(StoreError::StatusConflict {
                order_id: id,
                expected: OrderStatus::Cancelled,
                actual: order.status,
            });
        }
        state.restore_order(id)?;
        state.orders.remove(&id);
        Ok(())
    }

    async fn get_order_item(&self, id: OrderItemId) -> Result<Option<OrderItem>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .flat_map(|o| o.items.iter())
            .find(|item| item.id == id)
            .cloned())
    }

    async fn restore_order_item_stock(&self, id: OrderItemId) -> Result<RestoreOutcome> {
        let mut state = self.state.write().await;
        let (_, item) = state
            .order_item_mut(id)
            .ok_or_else(|| StoreError::not_found("order item", id))?;
        if item.restored_at.is_some() {
            return Ok(RestoreOutcome::AlreadyRestored);
        }
        let (product_id, quantity) = (item.product_id, item.quantity);
        let new_stock = state.credit_stock(product_id, quantity)?;

        if let Some((_, item)) = state.order_item_mut(id) {
            item.restored_at = Some(Utc::now());
        }
        Ok(RestoreOutcome::Restored {
            product_id,
            quantity,
            new_stock,
        })
    }

    async fn delete_order_item(&self, id: OrderItemId) -> Result<OrderItemRemoval> {
        let mut state = self.state.write().await;
        let (status, item) = state
            .order_item_mut(id)
            .ok_or_else(|| StoreError::not_found("order item", id))?;
        let item = item.clone();

        let restore = item.restored_at.is_none()
            && !matches!(status, OrderStatus::Pending | OrderStatus::Cancelled);
        if restore {
            state.credit_stock(item.product_id, item.quantity)?;
        }

        if let Some(order) = state.orders.get_mut(&item.order_id) {
            order.items.retain(|i| i.id != id);
        }
        Ok(OrderItemRemoval {
            item,
            stock_restored: restore,
        })
    }
    async fn count_orders_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.orders.values().filter(|o| o.created_at < cutoff).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use common::Money;

    use super::*;
    use crate::model::{PaymentMethod, ShippingDetails};

    fn draft(name: &str, parent_id: Option<CategoryId>) -> CategoryDraft {
        CategoryDraft {
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            description: String::new(),
            parent_id,
            is_active: true,
            order: 0,
        }
    }

    fn new_product(name: &str, price: i64, stock: u32) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            description: String::new(),
            price: Money::from_minor(price),
            discount_price: None,
            stock,
            is_active: true,
            is_featured: false,
            category_id: None,
        }
    }

    fn new_order(user_id: UserId, number: &str) -> NewOrder {
        NewOrder {
            user_id,
            order_number: number.to_string(),
            payment_method: PaymentMethod::Card,
            shipping: ShippingDetails {
                recipient_name: "Kim".to_string(),
                recipient_phone: "01012345678".to_string(),
                shipping_address1: "1 Main St".to_string(),
                shipping_address2: String::new(),
                shipping_zip_code: "12345".to_string(),
                shipping_note: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn category_depth_is_limited_to_two() {
        let store = InMemoryStore::new();
        let root = store.insert_category(draft("Fashion", None)).await.unwrap();
        let child = store
            .insert_category(draft("Shoes", Some(root.id)))
            .await
            .unwrap();

        let err = store
            .insert_category(draft("Sneakers", Some(child.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidHierarchy(_)));
    }

    #[tokio::test]
    async fn sibling_names_must_be_unique() {
        let store = InMemoryStore::new();
        let root = store.insert_category(draft("Fashion", None)).await.unwrap();
        store
            .insert_category(draft("Shoes", Some(root.id)))
            .await
            .unwrap();

        let mut twin = draft("Shoes", Some(root.id));
        twin.slug = "shoes-2".to_string();
        let err = store.insert_category(twin).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidHierarchy(_)));

        // Same name under another parent is fine.
        let other = store.insert_category(draft("Sports", None)).await.unwrap();
        let mut elsewhere = draft("Shoes", Some(other.id));
        elsewhere.slug = "sports-shoes".to_string();
        assert!(store.insert_category(elsewhere).await.is_ok());
    }

    #[tokio::test]
    async fn parent_cannot_be_moved_under_another_root() {
        let store = InMemoryStore::new();
        let fashion = store.insert_category(draft("Fashion", None)).await.unwrap();
        let sports = store.insert_category(draft("Sports", None)).await.unwrap();
        store
            .insert_category(draft("Shoes", Some(fashion.id)))
            .await
            .unwrap();

        let err = store
            .update_category(fashion.id, draft("Fashion", Some(sports.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidHierarchy(_)));

        let err = store
            .update_category(sports.id, draft("Sports", Some(sports.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidHierarchy(_)));
    }

    #[tokio::test]
    async fn deleting_category_reparents_children_and_clears_products() {
        let store = InMemoryStore::new();
        let root = store.insert_category(draft("Fashion", None)).await.unwrap();
        let child = store
            .insert_category(draft("Shoes", Some(root.id)))
            .await
            .unwrap();
        let mut product = new_product("Loafer", 5000, 3);
        product.category_id = Some(root.id);
        let product = store.insert_product(product).await.unwrap();

        store.delete_category(root.id).await.unwrap();

        let child = store.get_category(child.id).await.unwrap().unwrap();
        assert!(child.is_root());
        let product = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(product.category_id, None);
    }

    #[tokio::test]
    async fn duplicate_product_slug_conflicts() {
        let store = InMemoryStore::new();
        store
            .insert_product(new_product("Mug", 1000, 1))
            .await
            .unwrap();
        let err = store
            .insert_product(new_product("Mug", 1000, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.product_slug_exists("mug").await.unwrap());
    }

    #[tokio::test]
    async fn adding_same_product_twice_increments_one_line() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let product = store
            .insert_product(new_product("Mug", 1000, 10))
            .await
            .unwrap();

        store.add_to_cart(user, product.id, 3).await.unwrap();
        let item = store.add_to_cart(user, product.id, 2).await.unwrap();

        assert_eq!(item.quantity, 5);
        assert_eq!(store.list_cart(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn checkout_moves_cart_into_order() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let mut sale = new_product("Shirt", 2000, 100);
        sale.discount_price = Some(Money::from_minor(1500));
        let shirt = store.insert_product(sale).await.unwrap();
        let line = store.add_to_cart(user, shirt.id, 2).await.unwrap();

        let order = store
            .checkout(new_order(user, "N1"), &[line.id])
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_price, Money::from_minor(3000));
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].price, Money::from_minor(1500));
        assert_eq!(order.items[0].product_name, "Shirt");

        let shirt = store.get_product(shirt.id).await.unwrap().unwrap();
        assert_eq!(shirt.stock, 98);
        assert!(store.list_cart(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkout_with_short_stock_changes_nothing() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let plenty = store
            .insert_product(new_product("Plenty", 100, 50))
            .await
            .unwrap();
        let scarce = store
            .insert_product(new_product("Scarce", 100, 1))
            .await
            .unwrap();
        let a = store.add_to_cart(user, plenty.id, 5).await.unwrap();
        let b = store.add_to_cart(user, scarce.id, 2).await.unwrap();

        let err = store
            .checkout(new_order(user, "N1"), &[a.id, b.id])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock { requested: 2, available: 1, .. }
        ));

        assert_eq!(store.get_product(plenty.id).await.unwrap().unwrap().stock, 50);
        assert_eq!(store.list_cart(user).await.unwrap().len(), 2);
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn checkout_rejects_foreign_cart_lines() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let intruder = UserId::new();
        let product = store
            .insert_product(new_product("Mug", 1000, 10))
            .await
            .unwrap();
        let line = store.add_to_cart(owner, product.id, 1).await.unwrap();

        let err = store
            .checkout(new_order(intruder, "N1"), &[line.id])
            .await
            .unwrap_err();
        match err {
            StoreError::InvalidCartSelection { missing } => assert_eq!(missing, vec![line.id]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.list_cart(owner).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checkouts_never_oversell() {
        let store = InMemoryStore::new();
        let product = store
            .insert_product(new_product("Last two", 1000, 2))
            .await
            .unwrap();
        let buyers = [UserId::new(), UserId::new()];
        let mut lines = Vec::new();
        for user in buyers {
            lines.push(store.add_to_cart(user, product.id, 2).await.unwrap());
        }

        let handles: Vec<_> = buyers
            .into_iter()
            .zip(lines)
            .enumerate()
            .map(|(i, (user, line))| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .checkout(new_order(user, &format!("N{i}")), &[line.id])
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        let mut short = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::InsufficientStock { .. }) => short += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((ok, short), (1, 1));
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 0);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let product = store
            .insert_product(new_product("Mug", 1000, 10))
            .await
            .unwrap();
        let line = store.add_to_cart(user, product.id, 1).await.unwrap();
        let order = store
            .checkout(new_order(user, "N1"), &[line.id])
            .await
            .unwrap();

        let paid = store
            .transition_order(
                order.id,
                OrderStatus::Pending,
                StatusChange::Paid {
                    payment_id: "pay_1".to_string(),
                    paid_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.payment_id.as_deref(), Some("pay_1"));
        assert!(paid.paid_at.is_some());

        let err = store
            .transition_order(order.id, OrderStatus::Pending, StatusChange::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StatusConflict { actual: OrderStatus::Paid, .. }
        ));
    }

    #[tokio::test]
    async fn stock_restoration_happens_once() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let product = store
            .insert_product(new_product("Mug", 1000, 10))
            .await
            .unwrap();
        let line = store.add_to_cart(user, product.id, 4).await.unwrap();
        let order = store
            .checkout(new_order(user, "N1"), &[line.id])
            .await
            .unwrap();
        let item_id = order.items[0].id;

        let first = store.restore_order_item_stock(item_id).await.unwrap();
        let second = store.restore_order_item_stock(item_id).await.unwrap();

        assert!(matches!(first, RestoreOutcome::Restored { new_stock: 10, .. }));
        assert_eq!(second, RestoreOutcome::AlreadyRestored);
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 10);
        let item = store.get_order_item(item_id).await.unwrap().unwrap();
        assert!(item.restored_at.is_some());
    }

    #[tokio::test]
    async fn stale_carts_and_old_orders_are_counted_by_age() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let product = store
            .insert_product(new_product("Mug", 1000, 10))
            .await
            .unwrap();
        let kept = store.add_to_cart(user, product.id, 1).await.unwrap();
        let ordered = store
            .add_to_cart(UserId::new(), product.id, 1)
            .await
            .unwrap();
        store
            .checkout(new_order(ordered.user_id, "N1"), &[ordered.id])
            .await
            .unwrap();

        let now = Utc::now() + chrono::Duration::seconds(1);
        let long_ago = kept.updated_at - chrono::Duration::hours(24);
        assert_eq!(store.count_cart_items_updated_before(now).await.unwrap(), 1);
        assert_eq!(store.count_cart_items_updated_before(long_ago).await.unwrap(), 0);
        assert_eq!(store.count_orders_created_before(now).await.unwrap(), 1);
        assert_eq!(store.count_orders_created_before(long_ago).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelling_credits_stock_in_the_same_write() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let product = store
            .insert_product(new_product("Mug", 1000, 10))
            .await
            .unwrap();
        let line = store.add_to_cart(user, product.id, 3).await.unwrap();
        let order = store
            .checkout(new_order(user, "N1"), &[line.id])
            .await
            .unwrap();
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 7);

        let cancelled = store
            .transition_order(order.id, OrderStatus::Pending, StatusChange::Cancelled)
            .await
            .unwrap();
        assert!(cancelled.items.iter().all(|i| i.restored_at.is_some()));
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 10);

        // A late restore job and the delete find nothing left to credit.
        let replay = store
            .restore_order_item_stock(order.items[0].id)
            .await
            .unwrap();
        assert_eq!(replay, RestoreOutcome::AlreadyRestored);
        store.delete_order(order.id).await.unwrap();
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 10);
    }

    #[tokio::test]
    async fn stock_increment_stops_at_the_limit() {
        let store = InMemoryStore::new();
        let product = store
            .insert_product(new_product("Mug", 1000, 10))
            .await
            .unwrap();

        let err = store
            .increment_stock(product.id, u32::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StockOverflow { stock: 10, .. }));
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 10);

        let full = store
            .increment_stock(product.id, crate::model::STOCK_MAX - 10)
            .await
            .unwrap();
        assert_eq!(full.stock, crate::model::STOCK_MAX);
    }

    #[tokio::test]
    async fn only_cancelled_orders_can_be_deleted() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let product = store
            .insert_product(new_product("Mug", 1000, 10))
            .await
            .unwrap();
        let line = store.add_to_cart(user, product.id, 1).await.unwrap();
        let order = store
            .checkout(new_order(user, "N1"), &[line.id])
            .await
            .unwrap();

        let err = store.delete_order(order.id).await.unwrap_err();
        assert!(matches!(err, StoreError::StatusConflict { .. }));

        store
            .transition_order(order.id, OrderStatus::Pending, StatusChange::Cancelled)
            .await
            .unwrap();
        store.delete_order(order.id).await.unwrap();
        assert!(store.get_order(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_item_of_paid_order_restores_stock() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let product = store
            .insert_product(new_product("Mug", 1000, 10))
            .await
            .unwrap();
        let line = store.add_to_cart(user, product.id, 3).await.unwrap();
        let order = store
            .checkout(new_order(user, "N1"), &[line.id])
            .await
            .unwrap();

        // Pending orders keep their stock untouched.
        let pending_line = store.add_to_cart(user, product.id, 1).await.unwrap();
        let pending = store
            .checkout(new_order(user, "N2"), &[pending_line.id])
            .await
            .unwrap();
        let removal = store
            .delete_order_item(pending.items[0].id)
            .await
            .unwrap();
        assert!(!removal.stock_restored);
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 6);

        store
            .transition_order(
                order.id,
                OrderStatus::Pending,
                StatusChange::Paid {
                    payment_id: "pay".to_string(),
                    paid_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let removal = store.delete_order_item(order.items[0].id).await.unwrap();
        assert!(removal.stock_restored);
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 9);
        let order = store.get_order(order.id).await.unwrap().unwrap();
        assert!(order.items.is_empty());
    }

    #[tokio::test]
    async fn product_query_filters_and_orders() {
        let store = InMemoryStore::new();
        let root = store.insert_category(draft("Fashion", None)).await.unwrap();
        let child = store
            .insert_category(draft("Shoes", Some(root.id)))
            .await
            .unwrap();

        let mut cheap = new_product("Cheap sock", 500, 5);
        cheap.category_id = Some(root.id);
        let mut pricey = new_product("Pricey boot", 9000, 5);
        pricey.category_id = Some(child.id);
        pricey.discount_price = Some(Money::from_minor(8000));
        let mut hidden = new_product("Hidden", 100, 5);
        hidden.is_active = false;
        hidden.category_id = Some(child.id);
        for p in [cheap, pricey, hidden] {
            store.insert_product(p).await.unwrap();
        }

        let by_price = store
            .query_products(
                ProductQuery::new()
                    .parent(root.id)
                    .ordering(crate::ProductOrdering::PriceAsc),
            )
            .await
            .unwrap();
        let names: Vec<_> = by_price.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Cheap sock", "Pricey boot"]);

        let on_sale = store
            .query_products(ProductQuery::new().on_sale())
            .await
            .unwrap();
        assert_eq!(on_sale.len(), 1);

        let search = store
            .query_products(ProductQuery::including_inactive().search("HIDDEN"))
            .await
            .unwrap();
        assert_eq!(search.len(), 1);

        let direct = store
            .query_products(ProductQuery::new().category(child.id))
            .await
            .unwrap();
        assert_eq!(direct.len(), 1);
    }

    #[tokio::test]
    async fn list_orders_filters_by_user_and_status() {
        let store = InMemoryStore::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let product = store
            .insert_product(new_product("Mug", 1000, 10))
            .await
            .unwrap();
        for (i, user) in [alice, alice, bob].into_iter().enumerate() {
            let line = store.add_to_cart(user, product.id, 1).await.unwrap();
            store
                .checkout(new_order(user, &format!("2025{i}")), &[line.id])
                .await
                .unwrap();
        }

        let mine = store.list_orders(OrderQuery::for_user(alice)).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine[0].created_at >= mine[1].created_at);

        let paid = store
            .list_orders(OrderQuery::new().status(OrderStatus::Paid))
            .await
            .unwrap();
        assert!(paid.is_empty());

        let by_number = store
            .list_orders(OrderQuery::new().order_number("20252"))
            .await
            .unwrap();
        assert_eq!(by_number.len(), 1);
        assert_eq!(by_number[0].user_id, bob);
    }
}
