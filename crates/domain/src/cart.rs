//! Cart engine.

use std::sync::Arc;

use common::{CartItemId, Money, ProductId, UserId};
use serde::Serialize;
use store::{
    Store,
    model::{CartItem, CartLine, Product},
};

use crate::error::{DomainError, Result};
use crate::jobs::{self, JobQueue};

/// Totals over a user's cart, priced live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CartSummary {
    /// Number of lines, not units.
    pub total_items: usize,
    pub total_price: Money,
}

/// Per-user cart operations.
///
/// Stock checks here are advisory: stock may move before checkout, which
/// performs the authoritative decrement.
pub struct CartService<S: Store + ?Sized> {
    store: Arc<S>,
    jobs: Arc<dyn JobQueue>,
    low_stock_threshold: u32,
}

impl<S: Store + ?Sized> CartService<S> {
    pub fn new(store: Arc<S>, jobs: Arc<dyn JobQueue>, low_stock_threshold: u32) -> Self {
        Self {
            store,
            jobs,
            low_stock_threshold,
        }
    }

    /// Adds `quantity` units of a product, merging with an existing line.
    #[tracing::instrument(skip(self))]
    pub async fn add_or_increment(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        check_quantity(quantity)?;
        let product = self.purchasable_product(product_id).await?;

        let in_cart = self
            .store
            .find_cart_item(user_id, product_id)
            .await?
            .map_or(0, |item| item.quantity);
        check_stock(&product, in_cart.saturating_add(quantity))?;

        let item = self.store.add_to_cart(user_id, product_id, quantity).await?;
        tracing::debug!(cart_item_id = %item.id, quantity = item.quantity, "cart line saved");

        self.check_low_stock(product_id).await;
        Ok(item)
    }

    /// Overwrites the quantity of one of the user's lines.
    #[tracing::instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: UserId,
        cart_item_id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem> {
        check_quantity(quantity)?;
        let item = self.owned_item(user_id, cart_item_id).await?;
        let product = self
            .store
            .get_product(item.product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", item.product_id))?;
        check_stock(&product, quantity)?;

        let item = self.store.set_cart_quantity(cart_item_id, quantity).await?;
        self.check_low_stock(product.id).await;
        Ok(item)
    }

    /// Deletes one of the user's lines.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, user_id: UserId, cart_item_id: CartItemId) -> Result<()> {
        self.owned_item(user_id, cart_item_id).await?;
        if !self.store.delete_cart_item(cart_item_id).await? {
            return Err(DomainError::not_found("cart item", cart_item_id));
        }
        Ok(())
    }

    /// The user's lines, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        Ok(self.store.list_cart(user_id).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn summary(&self, user_id: UserId) -> Result<CartSummary> {
        let lines = self.store.list_cart(user_id).await?;
        Ok(CartSummary {
            total_items: lines.len(),
            total_price: lines.iter().map(CartLine::subtotal).sum(),
        })
    }

    /// Deletes every line of the user and returns how many there were.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, user_id: UserId) -> Result<u64> {
        let removed = self.store.clear_cart(user_id).await?;
        tracing::debug!(removed, "cart cleared");
        Ok(removed)
    }

    async fn owned_item(&self, user_id: UserId, id: CartItemId) -> Result<CartItem> {
        let item = self
            .store
            .get_cart_item(id)
            .await?
            .ok_or_else(|| DomainError::not_found("cart item", id))?;
        if item.user_id != user_id {
            return Err(DomainError::Forbidden(format!(
                "cart item {id} belongs to another user"
            )));
        }
        Ok(item)
    }

    async fn purchasable_product(&self, id: ProductId) -> Result<Product> {
        let product = self
            .store
            .get_product(id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", id))?;
        if !product.is_active {
            return Err(DomainError::validation(
                "product",
                format!("'{}' is not available for purchase", product.name),
            ));
        }
        Ok(product)
    }

    /// Checks the product as stored after the write, not as read before it.
    async fn check_low_stock(&self, product_id: ProductId) {
        match self.store.get_product(product_id).await {
            Ok(Some(product)) => {
                jobs::alert_if_low(self.jobs.as_ref(), &product, self.low_stock_threshold).await;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(%product_id, error = %e, "low-stock check skipped"),
        }
    }
}

fn check_quantity(quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(DomainError::validation(
            "quantity",
            "Ensure this value is greater than or equal to 1",
        ));
    }
    Ok(())
}

fn check_stock(product: &Product, requested: u32) -> Result<()> {
    if requested > product.stock {
        return Err(DomainError::InsufficientStock {
            product_id: product.id,
            product_name: product.name.clone(),
            requested,
            available: product.stock,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use store::{CatalogStore, InMemoryStore, model::NewProduct};

    use super::*;
    use crate::jobs::InMemoryJobQueue;

    async fn setup(stock: u32) -> (CartService<InMemoryStore>, InMemoryJobQueue, Product) {
        let store = Arc::new(InMemoryStore::new());
        let product = store
            .insert_product(NewProduct {
                name: "Notebook".to_string(),
                slug: "notebook".to_string(),
                description: String::new(),
                price: Money::from_minor(4_000),
                discount_price: Some(Money::from_minor(3_000)),
                stock,
                is_active: true,
                is_featured: false,
                category_id: None,
            })
            .await
            .unwrap();
        let queue = InMemoryJobQueue::new();
        let service = CartService::new(store, Arc::new(queue.clone()), 5);
        (service, queue, product)
    }

    #[tokio::test]
    async fn adding_twice_merges_into_one_line() {
        let (service, _, product) = setup(20).await;
        let user = UserId::new();

        let first = service.add_or_increment(user, product.id, 3).await.unwrap();
        let second = service.add_or_increment(user, product.id, 2).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.quantity, 5);
        assert_eq!(service.list(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn merged_quantity_is_checked_against_stock() {
        let (service, _, product) = setup(4).await;
        let user = UserId::new();
        service.add_or_increment(user, product.id, 3).await.unwrap();

        let err = service
            .add_or_increment(user, product.id, 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientStock {
                requested: 5,
                available: 4,
                ..
            }
        ));
        let lines = service.list(user).await.unwrap();
        assert_eq!(lines[0].item.quantity, 3);
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let (service, _, product) = setup(4).await;
        let err = service
            .add_or_increment(UserId::new(), product.id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation { ref field, .. } if field == "quantity"));
    }

    #[tokio::test]
    async fn summary_uses_current_price() {
        let (service, _, product) = setup(20).await;
        let user = UserId::new();
        service.add_or_increment(user, product.id, 2).await.unwrap();

        let summary = service.summary(user).await.unwrap();
        assert_eq!(summary.total_items, 1);
        assert_eq!(summary.total_price, Money::from_minor(6_000));
    }

    #[tokio::test]
    async fn other_users_lines_are_forbidden() {
        let (service, _, product) = setup(20).await;
        let owner = UserId::new();
        let line = service.add_or_increment(owner, product.id, 1).await.unwrap();

        let stranger = UserId::new();
        let err = service.update_quantity(stranger, line.id, 2).await.unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
        let err = service.remove(stranger, line.id).await.unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[tokio::test]
    async fn update_overwrites_and_remove_signals_absence() {
        let (service, _, product) = setup(20).await;
        let user = UserId::new();
        let line = service.add_or_increment(user, product.id, 1).await.unwrap();

        let updated = service.update_quantity(user, line.id, 7).await.unwrap();
        assert_eq!(updated.quantity, 7);
        assert!(service.update_quantity(user, line.id, 21).await.is_err());

        service.remove(user, line.id).await.unwrap();
        let err = service.remove(user, line.id).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn clear_empties_only_the_users_cart() {
        let (service, _, product) = setup(20).await;
        let (alice, bob) = (UserId::new(), UserId::new());
        service.add_or_increment(alice, product.id, 1).await.unwrap();
        service.add_or_increment(bob, product.id, 1).await.unwrap();

        assert_eq!(service.clear(alice).await.unwrap(), 1);
        assert!(service.list(alice).await.unwrap().is_empty());
        assert_eq!(service.list(bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn low_stock_enqueues_alert() {
        let (service, queue, product) = setup(5).await;
        service
            .add_or_increment(UserId::new(), product.id, 1)
            .await
            .unwrap();

        let alerts = queue.jobs_named("low_stock_alert").await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].payload["current_stock"], 5);
        assert_eq!(alerts[0].payload["threshold"], 5);
    }

    #[tokio::test]
    async fn queue_failure_does_not_fail_the_write() {
        let (service, queue, product) = setup(3).await;
        queue.set_fail_on_enqueue(true);

        let item = service
            .add_or_increment(UserId::new(), product.id, 1)
            .await
            .unwrap();
        assert_eq!(item.quantity, 1);
        assert!(queue.jobs().await.is_empty());
    }
}
