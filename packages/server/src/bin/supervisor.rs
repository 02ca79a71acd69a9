// Job supervisor: claims pending crawl jobs, runs each in its own runner
// process and keeps its heartbeat fresh. A watchdog loop in the same
// process recovers jobs whose heartbeat went stale.

use std::sync::Arc;

use anyhow::{Context, Result};
use orchestrator_core::kernel::jobs::{
    JobStore, PostgresJobStore, ProcessLauncher, Supervisor, Watchdog,
};
use orchestrator_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orchestrator_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool));
    let supervisor_config = config.supervisor_config();
    let launcher = Arc::new(ProcessLauncher::new(supervisor_config.runner_bin.clone()));

    info!(
        worker_id = %supervisor_config.worker_id,
        runner_bin = %supervisor_config.runner_bin.display(),
        max_concurrent_jobs = supervisor_config.max_concurrent_jobs,
        "Starting crawl supervisor"
    );

    let supervisor = Supervisor::new(store.clone(), launcher, supervisor_config);
    let watchdog = Watchdog::new(store, config.watchdog_config());

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("received shutdown signal");
            shutdown.cancel();
        }
    });

    let watchdog_task = tokio::spawn(watchdog.run(shutdown.clone()));
    let result = supervisor.run(shutdown.clone()).await;

    // The supervisor loop may also end on its own error
    shutdown.cancel();
    match watchdog_task.await {
        Ok(Err(e)) => error!(error = %e, "watchdog exited with error"),
        Err(e) => error!(error = %e, "watchdog task panicked"),
        Ok(Ok(())) => {}
    }

    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
