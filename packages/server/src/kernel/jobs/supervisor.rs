//! Job supervisor: claims pending jobs and runs each one in its own runner
//! process.
//!
//! # Architecture
//!
//! ```text
//! Supervisor (one scheduling loop)
//!     │
//!     ├─► reap finished monitors
//!     ├─► under the bound? claim next pending job (conditional UPDATE)
//!     │       └─► spawn monitor task
//!     │               ├─► launch `runner <job-id>`
//!     │               ├─► select! { runner exit, heartbeat tick }
//!     │               └─► non-zero exit + still ours → mark failed
//!     └─► otherwise sleep poll_interval
//! ```
//!
//! Crash detection is not done here: a supervisor that dies simply stops
//! heartbeating, and the [`Watchdog`](super::Watchdog) requeues its jobs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::Job;
use super::job_store::JobStore;
use super::launcher::{RunnerExit, RunnerLauncher};
use crate::common::utils::{bounded_error, tail_chars, MAX_ERROR_CHARS};

/// Configuration for the job supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upper bound on concurrently running jobs
    pub max_concurrent_jobs: usize,
    /// Sleep when no job is claimable or the bound is reached
    pub poll_interval: Duration,
    /// How often a running job's heartbeat is refreshed
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for in-flight monitors
    pub drain_timeout: Duration,
    /// Path of the runner executable
    pub runner_bin: PathBuf,
    /// Owner identity written to claimed jobs
    pub worker_id: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
            runner_bin: PathBuf::from("runner"),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl SupervisorConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

pub struct Supervisor {
    store: Arc<dyn JobStore>,
    launcher: Arc<dyn RunnerLauncher>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn JobStore>,
        launcher: Arc<dyn RunnerLauncher>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            store,
            launcher,
            config,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Claim the next pending job for this supervisor.
    ///
    /// `None` when nothing is pending, when another supervisor won the race
    /// for the candidate, or when the store is unreachable (logged).
    pub async fn poll_and_claim(&self) -> Option<Job> {
        let candidate = match self.store.next_pending().await {
            Ok(Some(job)) => job,
            Ok(None) => return None,
            Err(e) => {
                error!(error = %e, "failed to poll for pending jobs");
                return None;
            }
        };

        match self.store.try_claim(candidate.id, &self.config.worker_id).await {
            Ok(Some(job)) => {
                info!(job_id = %job.id, worker_id = %self.config.worker_id, "claimed job");
                Some(job)
            }
            Ok(None) => {
                debug!(job_id = %candidate.id, "job claimed by another worker");
                None
            }
            Err(e) => {
                error!(job_id = %candidate.id, error = %e, "failed to claim job");
                None
            }
        }
    }

    /// Run one claimed job to completion: launch its runner, heartbeat while
    /// it lives, then reconcile its exit.
    pub async fn spawn_and_monitor(&self, job: Job) {
        monitor_job(
            self.store.clone(),
            self.launcher.clone(),
            job.id,
            self.config.worker_id.clone(),
            self.config.heartbeat_interval,
        )
        .await
    }

    /// The scheduling loop. Returns after `shutdown` fires and in-flight
    /// monitors have drained (or the drain timeout passed).
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "job supervisor starting"
        );

        let mut active: JoinSet<()> = JoinSet::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // A panicked monitor frees its slot; the watchdog owns its job.
            while let Some(finished) = active.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "job monitor task failed");
                }
            }

            if active.len() < self.config.max_concurrent_jobs {
                if let Some(job) = self.poll_and_claim().await {
                    active.spawn(monitor_job(
                        self.store.clone(),
                        self.launcher.clone(),
                        job.id,
                        self.config.worker_id.clone(),
                        self.config.heartbeat_interval,
                    ));
                    continue;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        if !active.is_empty() {
            info!(count = active.len(), "waiting for running jobs to finish");
            let drained = tokio::time::timeout(self.config.drain_timeout, async {
                while active.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                // Runners outlive their monitors; the watchdog reconciles them.
                warn!(count = active.len(), "drain timeout reached, detaching monitors");
                active.abort_all();
            }
        }

        info!(worker_id = %self.config.worker_id, "job supervisor stopped");
        Ok(())
    }
}

async fn monitor_job(
    store: Arc<dyn JobStore>,
    launcher: Arc<dyn RunnerLauncher>,
    job_id: Uuid,
    worker_id: String,
    heartbeat_interval: Duration,
) {
    let mut handle = match launcher.launch(job_id) {
        Ok(handle) => handle,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to start runner");
            let message = bounded_error(&format!("Failed to start runner: {:#}", e));
            if let Err(e) = store.fail(job_id, &message).await {
                error!(job_id = %job_id, error = %e, "failed to mark job as failed");
            }
            return;
        }
    };

    info!(job_id = %job_id, "runner started");

    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // Skip first immediate tick

    let exit = loop {
        tokio::select! {
            exit = &mut handle => break exit,
            _ = ticker.tick() => {
                match store.heartbeat(job_id, &worker_id).await {
                    Ok(true) => debug!(job_id = %job_id, "heartbeat"),
                    Ok(false) => debug!(job_id = %job_id, "heartbeat skipped, job no longer owned"),
                    Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                }
            }
        }
    };

    match exit {
        Ok(exit) => reconcile_exit(store.as_ref(), job_id, &worker_id, &exit).await,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "lost track of runner process");
            let message = bounded_error(&format!("Runner monitoring failed: {:#}", e));
            if let Err(e) = store.fail_if_owned(job_id, &worker_id, &message).await {
                error!(job_id = %job_id, error = %e, "failed to mark job as failed");
            }
        }
    }
}

async fn reconcile_exit(store: &dyn JobStore, job_id: Uuid, worker_id: &str, exit: &RunnerExit) {
    if !exit.stdout.trim().is_empty() {
        info!(job_id = %job_id, output = %exit.stdout.trim_end(), "runner stdout");
    }
    if !exit.stderr.trim().is_empty() {
        warn!(job_id = %job_id, output = %exit.stderr.trim_end(), "runner stderr");
    }

    if exit.success() {
        info!(job_id = %job_id, "runner finished");
        return;
    }

    let message = exit_failure_message(exit);
    match store.fail_if_owned(job_id, worker_id, &message).await {
        Ok(true) => warn!(job_id = %job_id, code = ?exit.code, "runner exited without recording failure, marked failed"),
        Ok(false) => debug!(job_id = %job_id, code = ?exit.code, "runner already recorded its outcome"),
        Err(e) => error!(job_id = %job_id, error = %e, "failed to mark job as failed"),
    }
}

/// `"Process failed with code N: <stderr excerpt>"`, never longer than the
/// stored error limit.
pub fn exit_failure_message(exit: &RunnerExit) -> String {
    let code = exit
        .code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    // The cause is usually the last thing a runner writes.
    let prefix = format!("Process failed with code {}: ", code);
    let budget = MAX_ERROR_CHARS.saturating_sub(prefix.chars().count());
    bounded_error(&format!("{}{}", prefix, tail_chars(exit.stderr.trim_end(), budget)))
}
