//! Stale-job recovery.
//!
//! The watchdog is the only crash detector. A `processing` job whose
//! heartbeat is older than the threshold has lost its supervisor or runner;
//! it is requeued while retries remain and failed after that.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::Recovery;
use super::job_store::JobStore;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Heartbeat age after which a processing job counts as crashed
    pub stale_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(120),
        }
    }
}

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct Watchdog {
    store: Arc<dyn JobStore>,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(store: Arc<dyn JobStore>, config: WatchdogConfig) -> Self {
        Self { store, config }
    }

    /// Scan once and recover every stale job found.
    ///
    /// Errors on individual jobs are logged and counted; only a failed scan
    /// is returned as `Err`.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let threshold = chrono::Duration::from_std(self.config.stale_threshold)
            .context("stale threshold out of range")?;
        let cutoff = Utc::now() - threshold;

        let stale = self.store.find_stale(cutoff).await?;
        let mut report = SweepReport::default();

        for job in stale {
            let age = job.heartbeat_age(Utc::now()).map(|d| d.num_seconds());
            match self.store.recover_stale(job.id, cutoff).await {
                Ok(Recovery::Requeued { retry_count }) => {
                    warn!(
                        job_id = %job.id,
                        worker_id = ?job.worker_id,
                        heartbeat_age_secs = ?age,
                        retry_count,
                        "requeued stale job"
                    );
                    report.requeued += 1;
                }
                Ok(Recovery::Failed) => {
                    error!(
                        job_id = %job.id,
                        worker_id = ?job.worker_id,
                        heartbeat_age_secs = ?age,
                        "stale job exceeded max retries, marked failed"
                    );
                    report.failed += 1;
                }
                Ok(Recovery::Skipped) => {
                    debug!(job_id = %job.id, "job recovered before watchdog update");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "failed to recover stale job");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            interval_secs = self.config.interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "watchdog starting"
        );

        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.requeued + report.failed > 0 => {
                            info!(requeued = report.requeued, failed = report.failed, "watchdog sweep recovered jobs");
                        }
                        Ok(_) => debug!("watchdog sweep found nothing stale"),
                        Err(e) => error!(error = %e, "watchdog sweep failed"),
                    }
                }
            }
        }

        info!("watchdog stopped");
        Ok(())
    }
}
