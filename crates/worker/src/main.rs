use std::sync::Arc;

use polyslim_core::config::env_lookup;
use polyslim_db::{JobStore, PgJobStore};
use polyslim_storage::{FileStore, StorageConfig};
use polyslim_worker::{Dispatcher, DispatcherConfig, OptimizationWorker, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "polyslim_worker=debug,polyslim_storage=info,polyslim_db=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let storage_config = StorageConfig::from_env().expect("Invalid storage configuration");
    let worker_config = WorkerConfig::from_env().expect("Invalid worker configuration");
    let dispatcher_config =
        DispatcherConfig::from_env().expect("Invalid dispatcher configuration");

    tracing::info!(
        optimizer = %worker_config.optimizer_path.display(),
        degraded_mode = worker_config.degraded_mode,
        "Worker starting",
    );

    let database_url =
        polyslim_worker::config::database_url(env_lookup).expect("Invalid database configuration");
    let pool = polyslim_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    polyslim_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    polyslim_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database connection established");
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));

    let files = Arc::new(FileStore::from_config(&storage_config));
    let worker = Arc::new(OptimizationWorker::new(
        Arc::clone(&jobs),
        files,
        worker_config,
    ));
    let dispatcher = Dispatcher::start(worker, jobs, dispatcher_config);

    shutdown_signal().await;

    dispatcher.shutdown().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
