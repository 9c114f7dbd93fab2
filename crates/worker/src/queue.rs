//! Channel-backed job queue.

use async_trait::async_trait;
use domain::{JobDescriptor, JobQueue, QueueError};
use tokio::sync::mpsc;

/// Receiving half handed to the [`crate::JobWorker`].
pub type JobReceiver = mpsc::Receiver<JobDescriptor>;

/// In-process queue feeding a worker over a bounded channel.
///
/// Enqueueing never waits: a full buffer is reported as unavailable so the
/// caller can log it and move on.
#[derive(Debug, Clone)]
pub struct ChannelJobQueue {
    sender: mpsc::Sender<JobDescriptor>,
}

impl ChannelJobQueue {
    /// Creates a queue and the receiver its worker reads from.
    pub fn channel(capacity: usize) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Jobs that can still be buffered.
    pub fn remaining_capacity(&self) -> usize {
        self.sender.capacity()
    }
}

#[async_trait]
impl JobQueue for ChannelJobQueue {
    async fn enqueue(&self, job: JobDescriptor) -> Result<(), QueueError> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => {
                QueueError::Unavailable(format!("queue is full, dropping '{}'", job.name))
            }
            mpsc::error::TrySendError::Closed(_) => {
                QueueError::Unavailable("worker has stopped".to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use common::OrderId;
    use domain::Job;

    use super::*;

    fn descriptor() -> JobDescriptor {
        Job::OrderConfirmation {
            order_id: OrderId::new(),
        }
        .to_descriptor()
        .unwrap()
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (queue, mut rx) = ChannelJobQueue::channel(4);
        let first = descriptor();
        let second = descriptor();
        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second.clone()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), first);
        assert_eq!(rx.recv().await.unwrap(), second);
    }

    #[tokio::test]
    async fn full_queue_rejects_without_waiting() {
        let (queue, _rx) = ChannelJobQueue::channel(1);
        queue.enqueue(descriptor()).await.unwrap();
        assert_eq!(queue.remaining_capacity(), 0);

        let err = queue.enqueue(descriptor()).await.unwrap_err();
        assert!(matches!(err, QueueError::Unavailable(_)));
    }

    #[tokio::test]
    async fn closed_queue_is_unavailable() {
        let (queue, rx) = ChannelJobQueue::channel(1);
        drop(rx);
        assert!(queue.enqueue(descriptor()).await.is_err());
    }
}
