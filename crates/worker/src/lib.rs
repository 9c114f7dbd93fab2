//! Background job runner.
//!
//! Services enqueue [`domain::JobDescriptor`]s on a [`ChannelJobQueue`]; a
//! [`JobWorker`] decodes them and hands them to the [`JobHandler`], which
//! sends notification mail through a [`Mailer`], credits cancelled stock
//! back exactly once and counts stale carts and orders. A [`Scheduler`]
//! enqueues those sweeps periodically.

pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod queue;
pub mod runner;
pub mod schedule;

pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use handlers::JobHandler;
pub use mailer::{InMemoryMailer, LogMailer, Mail, Mailer};
pub use queue::{ChannelJobQueue, JobReceiver};
pub use runner::JobWorker;
pub use schedule::{ScheduledJob, Scheduler};
