// Runner: executes exactly one crawl job, then exits.
//
// Usage: runner <job-id>
//
// Exit codes: 0 completed, 1 failed, 2 stopped at a checkpoint (paused,
// reassigned or already finished).

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use crawler::{EngineConfig, SitemapEngineManager};
use orchestrator_core::kernel::jobs::{JobRunner, JobStore, PostgresJobStore, RunOutcome};
use orchestrator_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orchestrator_core=debug,sqlx=warn".into()),
        )
        .with(
            // stderr is captured into the job's error message
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();

    match run().await {
        Ok(outcome) => {
            match &outcome {
                RunOutcome::Completed(summary) => info!(visited = summary.pages_visited, "crawl completed"),
                RunOutcome::Failed(message) => error!(error = %message, "crawl failed"),
                RunOutcome::Cancelled(reason) => info!(reason = %reason, "crawl stopped"),
            }
            ExitCode::from(outcome.exit_code() as u8)
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "runner failed");
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<RunOutcome> {
    let job_id: Uuid = std::env::args()
        .nth(1)
        .context("usage: runner <job-id>")?
        .parse()
        .context("job id must be a UUID")?;

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool));
    let engines = Arc::new(SitemapEngineManager::new(EngineConfig::default()));

    info!(job_id = %job_id, "runner starting");
    JobRunner::new(store, engines).run(job_id).await
}
