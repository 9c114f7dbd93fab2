use std::time::Duration;

/// Worker tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Attempts per job, the first one included.
    pub max_attempts: u32,

    /// Base delay between attempts. Attempt `n` waits `n` times this.
    pub retry_backoff: Duration,

    /// Jobs buffered before enqueueing starts to fail.
    pub queue_capacity: usize,

    /// Recipient of low stock alerts.
    pub admin_email: String,

    /// Sender address of every mail.
    pub from_email: String,

    /// Idle age after which a cart line counts as abandoned.
    pub abandoned_cart_hours: u32,

    /// Period of the abandoned cart sweep.
    pub abandoned_cart_every: Duration,

    /// Age after which an order counts as old.
    pub old_order_days: u32,

    /// Period of the old order sweep.
    pub old_order_every: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            queue_capacity: 1024,
            admin_email: "admin@shopease.com".to_string(),
            from_email: "noreply@shopease.com".to_string(),
            abandoned_cart_hours: 24,
            abandoned_cart_every: Duration::from_secs(24 * 60 * 60),
            old_order_days: 90,
            old_order_every: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}
