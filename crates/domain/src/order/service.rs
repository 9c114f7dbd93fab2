//! Checkout and order lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{OrderId, OrderItemId, ProductId, UserId};
use store::{
    OrderQuery, Store, StoreError,
    model::{Order, OrderItemRemoval, StatusChange},
};

use super::checkout::{CheckoutRequest, generate_order_number};
use super::state::{OrderAction, next_status};
use crate::catalog::ProductListings;
use crate::error::{DomainError, Result};
use crate::jobs::{self, Job, JobQueue};
use crate::settings::DEFAULT_LOW_STOCK_THRESHOLD;

/// Attempts at finding a free order number.
const ORDER_NUMBER_ATTEMPTS: usize = 3;

const PAYMENT_ID_MAX: usize = 100;

/// Service for placing orders and moving them through their lifecycle.
///
/// Buyer-facing methods take the requesting user and refuse orders owned by
/// someone else. Methods without a user are administrative.
pub struct OrderService<S: Store + ?Sized> {
    store: Arc<S>,
    jobs: Arc<dyn JobQueue>,
    listings: Option<ProductListings>,
    low_stock_threshold: u32,
}

impl<S: Store + ?Sized> OrderService<S> {
    pub fn new(store: Arc<S>, jobs: Arc<dyn JobQueue>) -> Self {
        Self {
            store,
            jobs,
            listings: None,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
        }
    }

    /// Stock level at or below which a checkout enqueues a low-stock alert.
    pub fn with_low_stock_threshold(mut self, threshold: u32) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    /// Drops the catalog's cached listings whenever an order moves stock.
    pub fn with_listings(mut self, listings: ProductListings) -> Self {
        self.listings = Some(listings);
        self
    }

    /// Turns the selected cart lines into a pending order.
    ///
    /// Nothing is written unless every line exists, belongs to the user and
    /// is covered by stock at the moment of the decrement.
    #[tracing::instrument(skip(self, request), fields(lines = request.cart_items.len()))]
    pub async fn checkout(&self, user_id: UserId, request: CheckoutRequest) -> Result<Order> {
        let started = Instant::now();
        let result = self.place_order(user_id, &request).await;
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                self.stock_moved(order.items.iter().map(|i| i.product_id))
                    .await;
                self.check_low_stock(order).await;
                metrics::counter!("checkout_total").increment(1);
                tracing::info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    total = order.total_price.minor(),
                    "order placed"
                );
                jobs::dispatch(
                    self.jobs.as_ref(),
                    Job::OrderConfirmation { order_id: order.id },
                )
                .await;
            }
            Err(e) => {
                metrics::counter!("checkout_failed_total", "reason" => failure_reason(e))
                    .increment(1);
                tracing::info!(error = %e, "checkout rejected");
            }
        }
        result
    }

    async fn place_order(&self, user_id: UserId, request: &CheckoutRequest) -> Result<Order> {
        request.validate()?;
        self.precheck(user_id, request).await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let order = request.to_new_order(user_id, generate_order_number(Utc::now()))?;
            match self.store.checkout(order, &request.cart_items).await {
                Ok(order) => return Ok(order),
                Err(StoreError::Conflict(message)) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    tracing::warn!(attempt, %message, "order number taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fails fast on selections that cannot succeed. The store repeats both
    /// checks inside its transaction.
    async fn precheck(&self, user_id: UserId, request: &CheckoutRequest) -> Result<()> {
        let lines: HashMap<_, _> = self
            .store
            .list_cart(user_id)
            .await?
            .into_iter()
            .map(|line| (line.item.id, line))
            .collect();

        let missing: Vec<_> = request
            .cart_items
            .iter()
            .filter(|id| !lines.contains_key(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(DomainError::InvalidCartSelection { missing });
        }

        for id in &request.cart_items {
            let Some(line) = lines.get(id) else { continue };
            if line.item.quantity > line.product.stock {
                return Err(DomainError::InsufficientStock {
                    product_id: line.product.id,
                    product_name: line.product.name.clone(),
                    requested: line.item.quantity,
                    available: line.product.stock,
                });
            }
        }
        Ok(())
    }

    /// One of the user's orders.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let order = self.load(order_id).await?;
        if order.user_id != user_id {
            return Err(DomainError::Forbidden(format!(
                "order {order_id} belongs to another user"
            )));
        }
        Ok(order)
    }

    /// The user's orders, newest first. The query's user filter is replaced.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, user_id: UserId, query: OrderQuery) -> Result<Vec<Order>> {
        let query = OrderQuery {
            user_id: Some(user_id),
            ..query
        };
        Ok(self.store.list_orders(query).await?)
    }

    /// Cancels a pending order.
    ///
    /// The store credits every item's stock back in the same write as the
    /// status change. The `RestoreStock` job per item replays that guarded
    /// restore and finds nothing left to do.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        self.get_order(user_id, order_id).await?;
        let order = self
            .transition(order_id, OrderAction::Cancel, StatusChange::Cancelled)
            .await?;
        self.stock_moved(order.items.iter().map(|i| i.product_id))
            .await;

        for item in &order.items {
            jobs::dispatch(
                self.jobs.as_ref(),
                Job::RestoreStock {
                    order_item_id: item.id,
                },
            )
            .await;
        }
        Ok(order)
    }

    /// Records a completed payment on a pending order.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        user_id: UserId,
        order_id: OrderId,
        payment_id: Option<String>,
    ) -> Result<Order> {
        let payment_id = payment_id.unwrap_or_default().trim().to_string();
        if payment_id.chars().count() > PAYMENT_ID_MAX {
            return Err(DomainError::validation(
                "payment_id",
                format!("Ensure this field has no more than {PAYMENT_ID_MAX} characters"),
            ));
        }

        self.get_order(user_id, order_id).await?;
        let order = self
            .transition(
                order_id,
                OrderAction::MarkPaid,
                StatusChange::Paid {
                    payment_id,
                    paid_at: Utc::now(),
                },
            )
            .await?;

        jobs::dispatch(self.jobs.as_ref(), Job::PaymentComplete { order_id }).await;
        Ok(order)
    }

    /// Hands a paid order to the carrier.
    #[tracing::instrument(skip(self))]
    pub async fn mark_shipping(
        &self,
        order_id: OrderId,
        tracking_number: Option<String>,
        carrier: Option<String>,
    ) -> Result<Order> {
        let order = self
            .transition(order_id, OrderAction::MarkShipping, StatusChange::Shipping)
            .await?;

        jobs::dispatch(
            self.jobs.as_ref(),
            Job::ShippingUpdate {
                order_id,
                tracking_number,
                carrier,
            },
        )
        .await;
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_delivered(&self, order_id: OrderId) -> Result<Order> {
        let order = self
            .transition(order_id, OrderAction::MarkDelivered, StatusChange::Delivered)
            .await?;

        jobs::dispatch(self.jobs.as_ref(), Job::DeliveryComplete { order_id }).await;
        Ok(order)
    }

    /// Every order matching `query`, for staff.
    #[tracing::instrument(skip(self))]
    pub async fn search_orders(&self, query: OrderQuery) -> Result<Vec<Order>> {
        Ok(self.store.list_orders(query).await?)
    }

    /// Deletes a cancelled order.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        match self.store.delete_order(order_id).await {
            Ok(()) => {
                tracing::info!(%order_id, "order deleted");
                Ok(())
            }
            Err(StoreError::StatusConflict { actual, .. }) => Err(DomainError::Conflict(
                format!("only cancelled orders can be deleted; this one is {actual}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes one order item, crediting its stock back when the order had
    /// already moved past pending.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order_item(&self, item_id: OrderItemId) -> Result<OrderItemRemoval> {
        let removal = self.store.delete_order_item(item_id).await?;
        if removal.stock_restored {
            metrics::counter!("stock_restored_total").increment(1);
            self.stock_moved([removal.item.product_id]).await;
        }
        tracing::info!(
            %item_id,
            stock_restored = removal.stock_restored,
            "order item deleted"
        );
        Ok(removal)
    }

    /// Alerts on every ordered product left at or below the threshold by the
    /// decrement.
    async fn check_low_stock(&self, order: &Order) {
        for item in &order.items {
            match self.store.get_product(item.product_id).await {
                Ok(Some(product)) => {
                    jobs::alert_if_low(self.jobs.as_ref(), &product, self.low_stock_threshold)
                        .await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(product_id = %item.product_id, error = %e, "low-stock check skipped");
                }
            }
        }
    }

    async fn stock_moved(&self, products: impl IntoIterator<Item = ProductId>) {
        if let Some(listings) = &self.listings {
            let products: Vec<ProductId> = products.into_iter().collect();
            listings.forget_products(&products).await;
        }
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("order", order_id))
    }

    /// Applies `action` with a compare-and-set on the order's status, so two
    /// racing transitions cannot both win.
    async fn transition(
        &self,
        order_id: OrderId,
        action: OrderAction,
        change: StatusChange,
    ) -> Result<Order> {
        let current = self.load(order_id).await?;
        next_status(current.status, action)?;

        match self
            .store
            .transition_order(order_id, action.required_status(), change)
            .await
        {
            Ok(order) => {
                metrics::counter!("order_transitions_total", "to" => order.status.as_str())
                    .increment(1);
                tracing::info!(%order_id, from = %current.status, to = %order.status, "order status changed");
                Ok(order)
            }
            Err(StoreError::StatusConflict { actual, .. }) => {
                Err(DomainError::InvalidTransition {
                    from: actual,
                    action,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn failure_reason(error: &DomainError) -> &'static str {
    match error {
        DomainError::Validation { .. } => "validation",
        DomainError::InsufficientStock { .. } => "insufficient_stock",
        DomainError::InvalidCartSelection { .. } => "invalid_cart_selection",
        DomainError::Conflict(_) => "conflict",
        _ => "error",
    }
}
