//! The worker loop.

use domain::JobDescriptor;
use store::Store;
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::handlers::JobHandler;
use crate::queue::JobReceiver;

/// Drains a [`JobReceiver`], retrying failed jobs with linear backoff.
///
/// Delivery is at least once: a job that fails after some side effect may
/// run again. The loop ends once every queue handle has been dropped and the
/// buffer is empty.
pub struct JobWorker<S: Store + ?Sized> {
    handler: JobHandler<S>,
    receiver: JobReceiver,
    config: WorkerConfig,
}

impl<S: Store + ?Sized + 'static> JobWorker<S> {
    pub fn new(handler: JobHandler<S>, receiver: JobReceiver, config: WorkerConfig) -> Self {
        Self {
            handler,
            receiver,
            config,
        }
    }

    /// Runs the loop on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::info!(max_attempts = self.config.max_attempts, "job worker started");
        while let Some(descriptor) = self.receiver.recv().await {
            self.process(descriptor).await;
        }
        tracing::info!("job worker stopped");
    }

    /// Runs one job to success or exhaustion. Returns true on success.
    pub async fn process(&self, descriptor: JobDescriptor) -> bool {
        let job = match descriptor.decode() {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job = %descriptor.name, error = %e, "undecodable job dropped");
                metrics::counter!("jobs_failed_total", "job" => descriptor.name).increment(1);
                return false;
            }
        };
        let name = job.name();
        let max_attempts = self.config.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.handler.handle(&job).await {
                Ok(()) => {
                    metrics::counter!("jobs_processed_total", "job" => name).increment(1);
                    tracing::debug!(job = name, attempt, "job done");
                    return true;
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.retry_backoff * attempt;
                    tracing::warn!(job = name, attempt, error = %e, ?delay, "job failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(job = name, attempt, error = %e, "job dropped");
                    metrics::counter!("jobs_failed_total", "job" => name).increment(1);
                    return false;
                }
            }
        }
    }
}
