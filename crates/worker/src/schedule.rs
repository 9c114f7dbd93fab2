//! Periodic sweep jobs.

use std::sync::Arc;
use std::time::Duration;

use domain::{Job, JobQueue};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::WorkerConfig;

/// A job enqueued once per period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub job: Job,
    pub every: Duration,
}

/// Enqueues each [`ScheduledJob`] on its own interval.
///
/// The first run happens one full period after start. Jobs go through the
/// regular queue, so a full queue skips that round with a warning.
pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    entries: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn JobQueue>, entries: Vec<ScheduledJob>) -> Self {
        Self { queue, entries }
    }

    /// The abandoned cart and old order sweeps.
    pub fn sweeps(queue: Arc<dyn JobQueue>, config: &WorkerConfig) -> Self {
        Self::new(
            queue,
            vec![
                ScheduledJob {
                    job: Job::ProcessAbandonedCarts {
                        hours: config.abandoned_cart_hours,
                    },
                    every: config.abandoned_cart_every,
                },
                ScheduledJob {
                    job: Job::CleanOldOrders {
                        days: config.old_order_days,
                    },
                    every: config.old_order_every,
                },
            ],
        )
    }

    pub fn entries(&self) -> &[ScheduledJob] {
        &self.entries
    }

    /// Runs the schedule on a new task. Aborting the handle stops every entry.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut tasks = JoinSet::new();
        for entry in self.entries {
            if entry.every.is_zero() {
                tracing::warn!(job = entry.job.name(), "zero period, sweep disabled");
                continue;
            }
            tracing::info!(job = entry.job.name(), every = ?entry.every, "sweep scheduled");
            tasks.spawn(tick(self.queue.clone(), entry));
        }
        while tasks.join_next().await.is_some() {}
    }
}

async fn tick(queue: Arc<dyn JobQueue>, entry: ScheduledJob) {
    let mut interval = tokio::time::interval_at(Instant::now() + entry.every, entry.every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        domain::dispatch(queue.as_ref(), entry.job.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use domain::InMemoryJobQueue;

    use super::*;

    fn every(job: Job, secs: u64) -> ScheduledJob {
        ScheduledJob {
            job,
            every: Duration::from_secs(secs),
        }
    }

    #[test]
    fn sweeps_follow_the_config() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let scheduler = Scheduler::sweeps(queue, &WorkerConfig::default());
        assert_eq!(
            scheduler.entries(),
            &[
                every(Job::ProcessAbandonedCarts { hours: 24 }, 24 * 60 * 60),
                every(Job::CleanOldOrders { days: 90 }, 7 * 24 * 60 * 60),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn each_job_runs_once_per_period() {
        let queue = InMemoryJobQueue::new();
        let handle = Scheduler::new(
            Arc::new(queue.clone()),
            vec![
                every(Job::ProcessAbandonedCarts { hours: 24 }, 10),
                every(Job::CleanOldOrders { days: 90 }, 25),
            ],
        )
        .spawn();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(queue.jobs().await.is_empty());

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(queue.jobs_named("process_abandoned_carts").await.len(), 3);
        assert_eq!(queue.jobs_named("clean_old_orders").await.len(), 1);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(queue.jobs().await.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_skipped() {
        let queue = InMemoryJobQueue::new();
        let handle = Scheduler::new(
            Arc::new(queue.clone()),
            vec![every(Job::CleanOldOrders { days: 90 }, 0)],
        )
        .spawn();
        handle.await.unwrap();
        assert!(queue.jobs().await.is_empty());
    }
}
