//! Change broadcast contract.
//!
//! Category writes publish a [`CategoryChange`] on [`CATEGORY_TOPIC`].
//! Messages are a hint to invalidate and refetch; no ordering is promised
//! across concurrent writes.

use chrono::Utc;
use common::CategoryId;
use serde::{Deserialize, Serialize};
use store::model::Category;
use thiserror::Error;
use tokio::sync::broadcast;

/// Topic carrying category mutations.
pub const CATEGORY_TOPIC: &str = "category_updates";

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Kind of category mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// Payload published for every category mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryChange {
    pub action: ChangeAction,
    pub id: CategoryId,
    pub name: String,
    pub is_active: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl CategoryChange {
    pub fn new(action: ChangeAction, category: &Category) -> Self {
        Self {
            action,
            id: category.id,
            name: category.name.clone(),
            is_active: category.is_active,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// A message on a named topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Broadcast channel unavailable: {0}")]
    Unavailable(String),

    #[error("Broadcast payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Pub/sub sink for change notifications.
pub trait ChangeBroadcaster: Send + Sync {
    fn publish(&self, topic: &str, message: serde_json::Value) -> Result<(), BroadcastError>;
}

/// In-process fan-out hub backed by `tokio::sync::broadcast`.
///
/// Slow subscribers that fall more than the channel capacity behind observe
/// `RecvError::Lagged` and should refetch.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<TopicMessage>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to every topic.
    pub fn subscribe(&self) -> broadcast::Receiver<TopicMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeBroadcaster for BroadcastHub {
    fn publish(&self, topic: &str, message: serde_json::Value) -> Result<(), BroadcastError> {
        // A send error only means nobody is listening.
        let _ = self.sender.send(TopicMessage {
            topic: topic.to_string(),
            payload: message,
        });
        Ok(())
    }
}

/// Publishes a category change, logging and swallowing any failure.
pub(crate) fn announce(broadcaster: &dyn ChangeBroadcaster, change: &CategoryChange) {
    let result = serde_json::to_value(change)
        .map_err(BroadcastError::from)
        .and_then(|payload| broadcaster.publish(CATEGORY_TOPIC, payload));
    if let Err(e) = result {
        tracing::warn!(category_id = %change.id, error = %e, "failed to broadcast category change");
    }
}
