//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::AppState;
use api::config::{Config, LogFormat};
use domain::InMemoryUserDirectory;
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::{ChannelJobQueue, JobHandler, JobWorker, LogMailer, Scheduler};

const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        () = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wires the services over `store`, starts the job worker and its sweeps and
/// serves until shutdown.
async fn serve<S: Store + 'static>(
    store: Arc<S>,
    config: Config,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) {
    let (queue, receiver) = ChannelJobQueue::channel(config.worker.queue_capacity);
    let users = Arc::new(InMemoryUserDirectory::new());

    let handler = JobHandler::new(
        store.clone(),
        users.clone(),
        Arc::new(LogMailer),
        &config.worker,
    );
    let worker = JobWorker::new(handler, receiver, config.worker.clone()).spawn();
    let queue = Arc::new(queue);
    let sweeps = Scheduler::sweeps(queue.clone(), &config.worker).spawn();

    let state = Arc::new(AppState::new(
        store,
        queue,
        users,
        &config.services,
    ));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // The scheduler and the router held the last queue senders; the worker
    // drains and exits.
    sweeps.abort();
    let _ = sweeps.await;
    match tokio::time::timeout(WORKER_DRAIN_TIMEOUT, worker).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "job worker ended abnormally"),
        Err(_) => tracing::warn!("job worker still busy at shutdown, abandoning queued jobs"),
    }
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(&url)
                .await
                .expect("failed to connect to Postgres");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using Postgres store");
            serve(Arc::new(store), config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            serve(Arc::new(InMemoryStore::new()), config, metrics_handle).await;
        }
    }
}
