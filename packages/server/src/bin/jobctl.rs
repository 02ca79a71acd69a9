//! Operator tool for the crawl job queue.
//!
//! Talks to the job database directly; no API server or supervisor needs to
//! be running.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crawler::CrawlRequest;
use orchestrator_core::kernel::jobs::{
    JobStatus, JobStore, NewJob, PostgresJobStore, Watchdog, FORCE_CANCELLED_MESSAGE,
};
use orchestrator_core::Config;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

const WATCH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "jobctl")]
#[command(about = "Inspect and manage crawl jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a crawl job
    Enqueue {
        url: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long)]
        max_depth: Option<u32>,
        /// Poll the job until it finishes
        #[arg(long)]
        watch: bool,
    },

    /// List pending and processing jobs
    Jobs,

    /// Force-fail every pending and processing job
    Cleanup,

    /// Run one watchdog sweep over stale jobs
    Recover,

    /// Pause a pending or processing job
    Pause { id: Uuid },

    /// Put a paused job back in the queue
    Resume { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool));

    match cli.command {
        Commands::Enqueue {
            url,
            priority,
            max_depth,
            watch,
        } => {
            let mut request = CrawlRequest::new(url);
            if let Some(depth) = max_depth {
                request = request.with_max_depth(depth);
            }
            request.validate()?;

            let job = store
                .insert(NewJob::builder().request(request).priority(priority).build())
                .await?;
            println!("Queued job {}", job.id);

            if watch {
                watch_job(store.as_ref(), job.id).await?;
            }
        }

        Commands::Jobs => {
            let jobs = store
                .list(&[JobStatus::Pending, JobStatus::Processing])
                .await?;
            if jobs.is_empty() {
                println!("No active jobs");
                return Ok(());
            }

            println!(
                "{:<36}  {:<10}  {:>8}  {:>7}  {:>7}  URL",
                "ID", "STATUS", "PRIORITY", "VISITED", "PENDING"
            );
            for job in jobs {
                let (visited, pending) = match store.load_state(job.id).await?.found() {
                    Some(state) => (state.visited(), state.pending()),
                    None => (0, 0),
                };
                println!(
                    "{:<36}  {:<10}  {:>8}  {:>7}  {:>7}  {}",
                    job.id,
                    job.status,
                    job.priority,
                    visited,
                    pending,
                    job.url().unwrap_or("-")
                );
            }
        }

        Commands::Cleanup => {
            let count = store.force_fail_active(FORCE_CANCELLED_MESSAGE).await?;
            println!("Force-failed {} job(s)", count);
        }

        Commands::Recover => {
            let report = Watchdog::new(store, config.watchdog_config())
                .sweep()
                .await?;
            println!(
                "Requeued {}, failed {}, skipped {}, errors {}",
                report.requeued, report.failed, report.skipped, report.errors
            );
        }

        Commands::Pause { id } => {
            if !store.pause(id).await? {
                bail!("job {} is not pending or processing", id);
            }
            println!("Paused job {}", id);
        }

        Commands::Resume { id } => {
            if !store.resume(id).await? {
                bail!("job {} is not paused", id);
            }
            println!("Resumed job {}", id);
        }
    }

    Ok(())
}

async fn watch_job(store: &dyn JobStore, id: Uuid) -> Result<()> {
    let mut last = None;
    loop {
        let job = store.find(id).await?.context(&format!("job {}", id))?;

        let line = format!("{} {}%", job.status, job.progress_percentage);
        if last.as_ref() != Some(&line) {
            println!("{}", line);
            last = Some(line);
        }

        if job.status.is_terminal() {
            if let Some(error) = job.error_message {
                println!("Error: {}", error);
            }
            return Ok(());
        }

        tokio::time::sleep(WATCH_INTERVAL).await;
    }
}
