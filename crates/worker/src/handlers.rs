//! What each job does.

use std::sync::Arc;

use chrono::Utc;
use common::{OrderId, OrderItemId, ProductId, UserId};
use domain::{Job, UserDirectory};
use store::{
    Store,
    model::{Order, Product, RestoreOutcome},
};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::mailer::{Mail, Mailer};

const SUBJECT_PREFIX: &str = "[ShopEase]";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Executes decoded jobs against current rows.
///
/// Jobs carry identifiers only, so every handler reloads what it needs. A
/// replayed notification sends a second mail; a replayed restore is a no-op.
pub struct JobHandler<S: Store + ?Sized> {
    store: Arc<S>,
    users: Arc<dyn UserDirectory>,
    mailer: Arc<dyn Mailer>,
    admin_email: String,
    from_email: String,
}

impl<S: Store + ?Sized> JobHandler<S> {
    pub fn new(
        store: Arc<S>,
        users: Arc<dyn UserDirectory>,
        mailer: Arc<dyn Mailer>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            store,
            users,
            mailer,
            admin_email: config.admin_email.clone(),
            from_email: config.from_email.clone(),
        }
    }

    #[tracing::instrument(skip(self), fields(job = job.name()))]
    pub async fn handle(&self, job: &Job) -> Result<()> {
        match job {
            Job::OrderConfirmation { order_id } => {
                let order = self.order(*order_id).await?;
                self.mail_buyer(order.user_id, order_confirmation(&order))
                    .await
            }
            Job::PaymentComplete { order_id } => {
                let order = self.order(*order_id).await?;
                self.mail_buyer(order.user_id, payment_complete(&order))
                    .await
            }
            Job::ShippingUpdate {
                order_id,
                tracking_number,
                carrier,
            } => {
                let order = self.order(*order_id).await?;
                let message =
                    shipping_update(&order, tracking_number.as_deref(), carrier.as_deref());
                self.mail_buyer(order.user_id, message).await
            }
            Job::DeliveryComplete { order_id } => {
                let order = self.order(*order_id).await?;
                self.mail_buyer(order.user_id, delivery_complete(&order))
                    .await
            }
            Job::RestoreStock { order_item_id } => self.restore_stock(*order_item_id).await,
            Job::LowStockAlert {
                product_id,
                current_stock,
                threshold,
            } => {
                let product = self.product(*product_id).await?;
                let (subject, body) = low_stock_alert(&product, *current_stock, *threshold);
                self.send(self.admin_email.clone(), subject, body).await
            }
            Job::ProcessAbandonedCarts { hours } => {
                let cutoff = Utc::now() - chrono::Duration::hours(i64::from(*hours));
                let count = self.store.count_cart_items_updated_before(cutoff).await?;
                metrics::gauge!("abandoned_cart_items").set(count as f64);
                tracing::info!(hours, count, "abandoned cart lines counted");
                Ok(())
            }
            Job::CleanOldOrders { days } => {
                let cutoff = Utc::now() - chrono::Duration::days(i64::from(*days));
                let count = self.store.count_orders_created_before(cutoff).await?;
                metrics::gauge!("old_orders").set(count as f64);
                tracing::info!(days, count, "old orders counted");
                Ok(())
            }
        }
    }

    async fn restore_stock(&self, order_item_id: OrderItemId) -> Result<()> {
        match self.store.restore_order_item_stock(order_item_id).await? {
            RestoreOutcome::Restored {
                product_id,
                quantity,
                new_stock,
            } => {
                metrics::counter!("stock_restored_total").increment(1);
                tracing::info!(%order_item_id, %product_id, quantity, new_stock, "stock restored");
            }
            RestoreOutcome::AlreadyRestored => {
                tracing::debug!(%order_item_id, "stock already restored, skipping");
            }
        }
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Order> {
        self.store
            .get_order(id)
            .await?
            .ok_or_else(|| WorkerError::not_found("order", id))
    }

    async fn product(&self, id: ProductId) -> Result<Product> {
        self.store
            .get_product(id)
            .await?
            .ok_or_else(|| WorkerError::not_found("product", id))
    }

    async fn mail_buyer(&self, user_id: UserId, (subject, body): (String, String)) -> Result<()> {
        let user = self
            .users
            .find(user_id)
            .await?
            .ok_or_else(|| WorkerError::not_found("user", user_id))?;
        self.send(user.email, subject, body).await
    }

    async fn send(&self, to: String, subject: String, body: String) -> Result<()> {
        self.mailer
            .send(Mail {
                from: self.from_email.clone(),
                to,
                subject,
                body,
            })
            .await
    }
}

fn now() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn order_confirmation(order: &Order) -> (String, String) {
    let subject = format!(
        "{SUBJECT_PREFIX} Your order has been placed (order no. {})",
        order.order_number
    );
    let body = format!(
        "Hello,\n\n\
         Your order has been placed.\n\n\
         Order number: {}\n\
         Amount: {}\n\
         Ordered at: {}\n\n\
         You can follow your order from your account page.\n\n\
         Thank you,\nShopEase",
        order.order_number,
        order.total_price,
        order.created_at.format(TIMESTAMP_FORMAT),
    );
    (subject, body)
}

fn payment_complete(order: &Order) -> (String, String) {
    let subject = format!(
        "{SUBJECT_PREFIX} Payment received (order no. {})",
        order.order_number
    );
    let paid_at = order
        .paid_at
        .map(|at| at.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(now);
    let body = format!(
        "Hello,\n\n\
         We have received your payment.\n\n\
         Order number: {}\n\
         Amount: {}\n\
         Payment method: {}\n\
         Paid at: {paid_at}\n\n\
         Thank you,\nShopEase",
        order.order_number,
        order.total_price,
        order.payment_method.label(),
    );
    (subject, body)
}

fn shipping_update(
    order: &Order,
    tracking_number: Option<&str>,
    carrier: Option<&str>,
) -> (String, String) {
    let subject = format!(
        "{SUBJECT_PREFIX} Your order has shipped (order no. {})",
        order.order_number
    );
    let mut body = format!(
        "Hello,\n\n\
         Your order is on its way.\n\n\
         Order number: {}\n\
         Shipped at: {}\n",
        order.order_number,
        now(),
    );
    if let (Some(tracking_number), Some(carrier)) = (tracking_number, carrier) {
        body.push_str(&format!(
            "\nCarrier: {carrier}\nTracking number: {tracking_number}\n\
             You can track the parcel on the carrier's website.\n"
        ));
    }
    body.push_str("\nThank you,\nShopEase");
    (subject, body)
}

fn delivery_complete(order: &Order) -> (String, String) {
    let subject = format!(
        "{SUBJECT_PREFIX} Your order has been delivered (order no. {})",
        order.order_number
    );
    let body = format!(
        "Hello,\n\n\
         Your order has been delivered.\n\n\
         Order number: {}\n\
         Delivered at: {}\n\n\
         Exchanges and returns are accepted within 7 days of delivery.\n\n\
         Thank you for shopping with us,\nShopEase",
        order.order_number,
        now(),
    );
    (subject, body)
}

fn low_stock_alert(product: &Product, current_stock: u32, threshold: u32) -> (String, String) {
    let subject = format!("{SUBJECT_PREFIX} Low stock alert - {}", product.name);
    let body = format!(
        "Hello,\n\n\
         The stock of the following product is at or below the threshold ({threshold}):\n\n\
         Product: {}\n\
         Current stock: {current_stock}\n\n\
         Please restock it.\n\nShopEase",
        product.name,
    );
    (subject, body)
}
