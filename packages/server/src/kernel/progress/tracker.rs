//! Process-local progress cache, reconciled against the job store on read.
//!
//! Records are created by whichever process started the operation and are
//! lost on restart. Runners live in other processes, so every read of an
//! in-flight crawl record first re-derives status and percentage from the
//! job row and its crawl state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use crawler::ProgressUpdate;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::record::{
    failed_log, state_progress, ActiveOperation, OperationKind, OperationStatus, ProgressRecord,
    COMPLETED_FROM_STORE, WORKER_STARTING,
};
use crate::common::Lookup;
use crate::kernel::jobs::{CrawlState, Job, JobStatus, JobStore};

/// How long a finished record stays cached after its last change. Later
/// reads fall back to the job store.
pub const TERMINAL_RETENTION: Duration = Duration::minutes(10);

#[derive(Clone)]
pub struct ProgressTracker {
    records: Arc<RwLock<HashMap<String, ProgressRecord>>>,
    store: Arc<dyn JobStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            store,
        }
    }

    // ========================================================================
    // Local writes
    // ========================================================================

    pub fn start(&self, record: ProgressRecord) {
        debug!(progress_id = %record.progress_id, status = %record.status, "progress started");
        self.evict_terminal(Utc::now());
        self.write().insert(record.progress_id.clone(), record);
    }

    /// Merge an engine update into the record. Returns false for unknown ids.
    pub fn apply_update(&self, progress_id: &str, update: &ProgressUpdate) -> bool {
        let mut records = self.write();
        let Some(record) = records.get_mut(progress_id) else {
            return false;
        };

        if let Some(phase) = update.phase {
            record.status = phase.into();
        }
        if let Some(progress) = update.progress {
            record.progress = progress.min(100);
        }
        if let Some(log) = &update.log {
            record.log = log.clone();
        }
        if let OperationKind::Crawl(crawl) = &mut record.details {
            if update.current_url.is_some() {
                crawl.current_url = update.current_url.clone();
            }
            if update.pages_crawled.is_some() {
                crawl.pages_crawled = update.pages_crawled;
            }
            if update.total_pages.is_some() {
                crawl.total_pages = update.total_pages;
            }
            if update.code_blocks_found.is_some() {
                crawl.code_blocks_found = update.code_blocks_found;
            }
        }
        record.touch();
        true
    }

    pub fn set_status(&self, progress_id: &str, status: OperationStatus, log: impl Into<String>) {
        if let Some(record) = self.write().get_mut(progress_id) {
            record.status = status;
            record.log = log.into();
            record.touch();
        }
    }

    pub fn complete(&self, progress_id: &str, log: impl Into<String>) {
        if let Some(record) = self.write().get_mut(progress_id) {
            record.status = OperationStatus::Completed;
            record.progress = 100;
            record.log = log.into();
            record.touch();
        }
    }

    pub fn fail(&self, progress_id: &str, error: &str) {
        if let Some(record) = self.write().get_mut(progress_id) {
            record.status = OperationStatus::Failed;
            record.error = Some(error.to_string());
            record.log = failed_log(Some(error));
            record.touch();
        }
    }

    /// Drop finished records untouched for longer than [`TERMINAL_RETENTION`].
    pub fn evict_terminal(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - TERMINAL_RETENTION;
        let mut records = self.write();
        let before = records.len();
        records.retain(|_, r| !(r.is_terminal() && r.updated_at < cutoff));

        let evicted = before - records.len();
        if evicted > 0 {
            debug!(evicted, "evicted finished progress records");
        }
        evicted
    }

    /// The cached record, without reconciliation.
    pub fn cached(&self, progress_id: &str) -> Option<ProgressRecord> {
        self.read().get(progress_id).cloned()
    }

    // ========================================================================
    // Reconciled reads
    // ========================================================================

    /// Current progress for `progress_id`.
    ///
    /// Ids this process never tracked fall back to the job store so a
    /// restarted API process still answers for jobs it accepted earlier.
    /// Reconciliation failures are logged and the cached record returned.
    pub async fn get_progress(&self, progress_id: &str) -> Result<Lookup<ProgressRecord>> {
        let mut record = match self.cached(progress_id) {
            Some(record) => record,
            None => match self.load_untracked(progress_id).await? {
                Lookup::Found(record) => record,
                Lookup::NotFound => return Ok(Lookup::NotFound),
            },
        };

        if record.is_crawl() && !record.is_terminal() {
            match self.reconcile(&mut record).await {
                Ok(true) => self.write_back(&record),
                Ok(false) => {}
                Err(e) => {
                    error!(progress_id = %progress_id, error = %e, "failed to sync progress with job store");
                }
            }
        }

        Ok(Lookup::Found(record))
    }

    /// In-flight operations: reconciled local records plus active jobs that
    /// only exist in the job store.
    pub async fn list_active(&self) -> Vec<ActiveOperation> {
        self.evict_terminal(Utc::now());
        let local: Vec<ProgressRecord> = self.read().values().cloned().collect();
        let known: HashSet<String> = local.iter().map(|r| r.progress_id.clone()).collect();
        let mut operations = Vec::new();

        for mut record in local {
            if record.is_terminal() {
                continue;
            }
            if record.is_crawl() {
                match self.reconcile(&mut record).await {
                    Ok(true) => self.write_back(&record),
                    Ok(false) => {}
                    Err(e) => {
                        error!(progress_id = %record.progress_id, error = %e, "failed to sync progress with job store");
                    }
                }
            }
            if !record.is_terminal() {
                operations.push(ActiveOperation::from(&record));
            }
        }

        match self.store.list(&JobStatus::ACTIVE).await {
            Ok(jobs) => {
                for job in jobs {
                    if known.contains(&job.id.to_string()) {
                        continue;
                    }
                    let state = self.state_for(&job).await;
                    operations.push(ActiveOperation::from(&ProgressRecord::from_job(&job, state.as_ref())));
                }
            }
            Err(e) => error!(error = %e, "failed to fetch active jobs"),
        }

        operations.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        info!(count = operations.len(), "active operations listed");
        operations
    }

    async fn reconcile(&self, record: &mut ProgressRecord) -> Result<bool> {
        let Ok(job_id) = Uuid::parse_str(&record.progress_id) else {
            return Ok(false);
        };
        let job = match self.store.find(job_id).await? {
            Lookup::Found(job) => job,
            Lookup::NotFound => return Ok(false),
        };
        let state = match job.status {
            JobStatus::Processing | JobStatus::Paused => self.store.load_state(job_id).await?.found(),
            _ => None,
        };

        Ok(reconcile_record(record, &job, state.as_ref()))
    }

    async fn load_untracked(&self, progress_id: &str) -> Result<Lookup<ProgressRecord>> {
        let Ok(job_id) = Uuid::parse_str(progress_id) else {
            return Ok(Lookup::NotFound);
        };
        let job = match self.store.find(job_id).await? {
            Lookup::Found(job) => job,
            Lookup::NotFound => return Ok(Lookup::NotFound),
        };

        let state = self.state_for(&job).await;
        let record = ProgressRecord::from_job(&job, state.as_ref());
        self.start(record.clone());
        Ok(Lookup::Found(record))
    }

    async fn state_for(&self, job: &Job) -> Option<CrawlState> {
        if !matches!(job.status, JobStatus::Processing | JobStatus::Paused) {
            return None;
        }
        match self.store.load_state(job.id).await {
            Ok(state) => state.found(),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to fetch crawl state");
                None
            }
        }
    }

    fn write_back(&self, record: &ProgressRecord) {
        self.write().insert(record.progress_id.clone(), record.clone());
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ProgressRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ProgressRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bring a cached record in line with the job row and its crawl state.
///
/// Returns whether anything changed; `updated_at` only moves when it did, so
/// fingerprints of an unchanged operation stay stable across polls.
pub fn reconcile_record(record: &mut ProgressRecord, job: &Job, state: Option<&CrawlState>) -> bool {
    let mut changed = false;
    let stored = OperationStatus::from(job.status);

    if stored != record.status {
        info!(
            progress_id = %record.progress_id,
            memory = %record.status,
            db = %stored,
            "syncing progress from job store"
        );
        record.status = stored;
        match job.status {
            JobStatus::Completed => {
                record.progress = 100;
                record.log = COMPLETED_FROM_STORE.to_string();
            }
            JobStatus::Failed => {
                record.error = job.error_message.clone();
                record.log = failed_log(job.error_message.as_deref());
            }
            _ => {}
        }
        changed = true;
    }

    if let (JobStatus::Processing | JobStatus::Paused, Some(state)) = (job.status, state) {
        let (progress, log) = state_progress(job.status, state).unwrap_or((0, WORKER_STARTING.to_string()));
        if progress != record.progress || log != record.log {
            debug!(progress_id = %record.progress_id, progress, "synced progress from crawl state");
            record.progress = progress;
            record.log = log;
            changed = true;
        }
    }

    if changed {
        record.touch();
    }
    changed
}
