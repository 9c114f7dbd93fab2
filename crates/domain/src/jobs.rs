//! Asynchronous job contract.
//!
//! Services describe background work as a [`Job`] and hand its
//! [`JobDescriptor`] to a [`JobQueue`]. Payloads carry identifiers only, so a
//! replayed job always reads current rows.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{OrderId, OrderItemId, ProductId};
use serde::{Deserialize, Serialize};
use store::model::Product;
use thiserror::Error;
use tokio::sync::Mutex;

/// Background work emitted by the services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all = "snake_case")]
pub enum Job {
    OrderConfirmation {
        order_id: OrderId,
    },
    PaymentComplete {
        order_id: OrderId,
    },
    ShippingUpdate {
        order_id: OrderId,
        #[serde(default)]
        tracking_number: Option<String>,
        #[serde(default)]
        carrier: Option<String>,
    },
    DeliveryComplete {
        order_id: OrderId,
    },
    RestoreStock {
        order_item_id: OrderItemId,
    },
    LowStockAlert {
        product_id: ProductId,
        current_stock: u32,
        threshold: u32,
    },
    /// Periodic count of cart lines idle for `hours`.
    ProcessAbandonedCarts {
        hours: u32,
    },
    /// Periodic count of orders older than `days`.
    CleanOldOrders {
        days: u32,
    },
}

impl Job {
    /// The wire name of the job.
    pub fn name(&self) -> &'static str {
        match self {
            Job::OrderConfirmation { .. } => "order_confirmation",
            Job::PaymentComplete { .. } => "payment_complete",
            Job::ShippingUpdate { .. } => "shipping_update",
            Job::DeliveryComplete { .. } => "delivery_complete",
            Job::RestoreStock { .. } => "restore_stock",
            Job::LowStockAlert { .. } => "low_stock_alert",
            Job::ProcessAbandonedCarts { .. } => "process_abandoned_carts",
            Job::CleanOldOrders { .. } => "clean_old_orders",
        }
    }

    /// Converts the job into its queue representation.
    pub fn to_descriptor(&self) -> Result<JobDescriptor, QueueError> {
        let value = serde_json::to_value(self)?;
        Ok(JobDescriptor {
            name: self.name().to_string(),
            payload: value.get("payload").cloned().unwrap_or_default(),
        })
    }
}

/// A job as it travels through the queue: a name plus a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    pub payload: serde_json::Value,
}

impl JobDescriptor {
    /// Decodes the descriptor back into a typed job.
    pub fn decode(&self) -> Result<Job, QueueError> {
        let value = serde_json::json!({
            "name": self.name,
            "payload": self.payload,
        });
        Ok(serde_json::from_value(value)?)
    }
}

/// Errors raised by job queues.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue cannot accept work right now.
    #[error("Job queue unavailable: {0}")]
    Unavailable(String),

    /// The job could not be encoded or decoded.
    #[error("Job payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Fire-and-forget job sink.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job. Delivery is at least once.
    async fn enqueue(&self, job: JobDescriptor) -> Result<(), QueueError>;
}

/// Enqueues `job`, logging and swallowing any failure.
pub async fn dispatch(queue: &dyn JobQueue, job: Job) {
    let name = job.name();
    let result = match job.to_descriptor() {
        Ok(descriptor) => queue.enqueue(descriptor).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            metrics::counter!("jobs_enqueued_total", "job" => name).increment(1);
            tracing::debug!(job = name, "job enqueued");
        }
        Err(e) => {
            tracing::warn!(job = name, error = %e, "failed to enqueue job");
        }
    }
}

/// Enqueues a `LowStockAlert` when `product` holds `threshold` units or fewer.
pub(crate) async fn alert_if_low(queue: &dyn JobQueue, product: &Product, threshold: u32) {
    if product.stock > threshold {
        return;
    }
    tracing::info!(product_id = %product.id, stock = product.stock, "stock is running low");
    dispatch(
        queue,
        Job::LowStockAlert {
            product_id: product.id,
            current_stock: product.stock,
            threshold,
        },
    )
    .await;
}

/// In-memory queue that records every job, for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobQueue {
    jobs: Arc<Mutex<Vec<JobDescriptor>>>,
    fail_on_enqueue: Arc<AtomicBool>,
}

impl InMemoryJobQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following enqueue fail.
    pub fn set_fail_on_enqueue(&self, fail: bool) {
        self.fail_on_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Returns all recorded jobs in enqueue order.
    pub async fn jobs(&self) -> Vec<JobDescriptor> {
        self.jobs.lock().await.clone()
    }

    /// Returns the recorded jobs with the given name.
    pub async fn jobs_named(&self, name: &str) -> Vec<JobDescriptor> {
        self.jobs
            .lock()
            .await
            .iter()
            .filter(|job| job.name == name)
            .cloned()
            .collect()
    }

    /// Removes and returns all recorded jobs.
    pub async fn drain(&self) -> Vec<JobDescriptor> {
        std::mem::take(&mut *self.jobs.lock().await)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: JobDescriptor) -> Result<(), QueueError> {
        if self.fail_on_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("broker is down".to_string()));
        }
        self.jobs.lock().await.push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_uses_wire_name_and_flat_payload() {
        let order_id = OrderId::new();
        let descriptor = Job::ShippingUpdate {
            order_id,
            tracking_number: Some("TRK-1".to_string()),
            carrier: None,
        }
        .to_descriptor()
        .unwrap();

        assert_eq!(descriptor.name, "shipping_update");
        assert_eq!(descriptor.payload["order_id"], order_id.to_string());
        assert_eq!(descriptor.payload["tracking_number"], "TRK-1");
    }

    #[test]
    fn descriptor_decodes_back_to_job() {
        let job = Job::LowStockAlert {
            product_id: ProductId::new(),
            current_stock: 3,
            threshold: 5,
        };
        let decoded = job.to_descriptor().unwrap().decode().unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn sweep_jobs_carry_their_age() {
        let descriptor = Job::ProcessAbandonedCarts { hours: 24 }
            .to_descriptor()
            .unwrap();
        assert_eq!(descriptor.name, "process_abandoned_carts");
        assert_eq!(descriptor.payload["hours"], 24);

        let descriptor = JobDescriptor {
            name: "clean_old_orders".to_string(),
            payload: serde_json::json!({ "days": 90 }),
        };
        assert_eq!(descriptor.decode().unwrap(), Job::CleanOldOrders { days: 90 });
    }

    #[test]
    fn unknown_job_name_fails_to_decode() {
        let descriptor = JobDescriptor {
            name: "send_sms".to_string(),
            payload: serde_json::json!({}),
        };
        assert!(matches!(descriptor.decode(), Err(QueueError::Payload(_))));
    }

    #[tokio::test]
    async fn in_memory_queue_records_and_fails_on_demand() {
        let queue = InMemoryJobQueue::new();
        let job = Job::RestoreStock {
            order_item_id: OrderItemId::new(),
        };

        dispatch(&queue, job.clone()).await;
        assert_eq!(queue.jobs_named("restore_stock").await.len(), 1);

        queue.set_fail_on_enqueue(true);
        dispatch(&queue, job).await;
        assert_eq!(queue.jobs().await.len(), 1);

        assert_eq!(queue.drain().await.len(), 1);
        assert!(queue.jobs().await.is_empty());
    }
}
