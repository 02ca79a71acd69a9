//! Single-job runner.
//!
//! A runner process executes exactly one claimed job and exits:
//!
//! ```text
//! runner <job-id>
//!     │
//!     ├─► find job (missing → fatal)
//!     ├─► empty crawl state + status=processing
//!     ├─► with_engine(acquire → execute_job → release)
//!     │       └─► JobObserver: crawl state, progress, checkpoints
//!     └─► completed | failed | left as-is when cancelled
//! ```
//!
//! Retries are never attempted here; that belongs to the watchdog.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use crawler::{
    with_engine, CrawlError, CrawlObserver, CrawlResult, CrawlSnapshot, CrawlSummary,
    EngineManager, ProgressUpdate,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::job::{Job, JobStatus};
use super::job_store::JobStore;
use crate::common::utils::bounded_error;
use crate::common::Lookup;
use crate::kernel::progress::{OperationStatus, ProgressRecord, ProgressTracker};

/// How a run ended. Maps onto the process exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(CrawlSummary),
    Failed(String),
    /// Stopped at a checkpoint; the job row was left untouched.
    Cancelled(String),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed(_) => 0,
            RunOutcome::Failed(_) => 1,
            RunOutcome::Cancelled(_) => 2,
        }
    }
}

pub struct JobRunner {
    store: Arc<dyn JobStore>,
    engines: Arc<dyn EngineManager>,
    tracker: ProgressTracker,
    worker_id: String,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>, engines: Arc<dyn EngineManager>) -> Self {
        Self {
            tracker: ProgressTracker::new(store.clone()),
            store,
            engines,
            worker_id: format!("runner-{}", std::process::id()),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Execute `job_id` to an outcome.
    ///
    /// `Err` is returned only when the job cannot be found or read; every
    /// later failure is written to the job row and reported as
    /// [`RunOutcome::Failed`].
    pub async fn run(&self, job_id: Uuid) -> Result<RunOutcome> {
        let job = match self.store.find(job_id).await? {
            Lookup::Found(job) => job,
            Lookup::NotFound => bail!("job {} not found", job_id),
        };

        info!(job_id = %job_id, url = ?job.url(), status = %job.status, "runner starting job");

        let progress_id = job_id.to_string();
        self.tracker.start(ProgressRecord::from_job(&job, None));

        match self.execute(&job, &progress_id).await {
            Ok(summary) => {
                if self.store.complete(job_id).await? {
                    info!(
                        job_id = %job_id,
                        pages_visited = summary.pages_visited,
                        pages_failed = summary.pages_failed,
                        "job completed"
                    );
                } else {
                    warn!(job_id = %job_id, "job was already terminal, completion not written");
                }
                self.tracker.complete(&progress_id, "Crawl completed");
                Ok(RunOutcome::Completed(summary))
            }
            Err(e) if e.is_cancelled() => {
                info!(job_id = %job_id, reason = %e, "job cancelled, leaving status as-is");
                self.tracker
                    .set_status(&progress_id, OperationStatus::Cancelled, e.to_string());
                Ok(RunOutcome::Cancelled(e.to_string()))
            }
            Err(e) => {
                let message = bounded_error(&e.to_string());
                error!(job_id = %job_id, error = %message, "job failed");
                match self.store.fail(job_id, &message).await {
                    Ok(true) => {}
                    Ok(false) => warn!(job_id = %job_id, "job was already terminal, failure not written"),
                    Err(store_err) => {
                        error!(job_id = %job_id, error = %store_err, "failed to record job failure")
                    }
                }
                self.tracker.fail(&progress_id, &message);
                Ok(RunOutcome::Failed(message))
            }
        }
    }

    async fn execute(&self, job: &Job, progress_id: &str) -> CrawlResult<CrawlSummary> {
        let request = job.request()?;

        // Observers see "starting" before the engine spends time booting.
        self.store.init_state(job.id).await?;
        // A supervisor claim names the owner; a bare pending row is ours.
        let claimant = job.worker_id.as_deref().unwrap_or(&self.worker_id);
        if !self.store.start_run(job.id, claimant).await? {
            return Err(CrawlError::cancelled(format!(
                "job is no longer runnable by {}",
                claimant
            )));
        }

        let owner = match self.store.find(job.id).await? {
            Lookup::Found(current) => current.worker_id,
            Lookup::NotFound => return Err(CrawlError::cancelled("job disappeared")),
        };
        self.tracker
            .set_status(progress_id, OperationStatus::Starting, "Worker starting...");

        let observer = JobObserver {
            store: self.store.clone(),
            tracker: self.tracker.clone(),
            job_id: job.id,
            owner,
        };

        with_engine(self.engines.as_ref(), &request, progress_id, &observer).await
    }
}

/// Bridges engine callbacks to the job store and the local tracker.
pub struct JobObserver {
    store: Arc<dyn JobStore>,
    tracker: ProgressTracker,
    job_id: Uuid,
    owner: Option<String>,
}

#[async_trait]
impl CrawlObserver for JobObserver {
    async fn record_state(&self, snapshot: &CrawlSnapshot) -> CrawlResult<()> {
        self.store.save_state(self.job_id, snapshot).await?;
        Ok(())
    }

    async fn report(&self, update: ProgressUpdate) {
        if let Some(progress) = update.progress {
            if let Err(e) = self.store.update_progress(self.job_id, i32::from(progress)).await {
                warn!(job_id = %self.job_id, error = %e, "failed to write progress percentage");
            }
        }
        self.tracker.apply_update(&self.job_id.to_string(), &update);
    }

    /// Cancelled once the row is no longer ours to run.
    async fn checkpoint(&self) -> CrawlResult<()> {
        let job = match self.store.find(self.job_id).await? {
            Lookup::Found(job) => job,
            Lookup::NotFound => return Err(CrawlError::cancelled("job disappeared")),
        };

        match job.status {
            JobStatus::Processing if job.worker_id == self.owner => Ok(()),
            JobStatus::Processing => Err(CrawlError::cancelled(format!(
                "job reassigned to {}",
                job.worker_id.as_deref().unwrap_or("nobody")
            ))),
            status => Err(CrawlError::cancelled(format!("job is {}", status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::utils::MAX_ERROR_CHARS;
    use crate::kernel::jobs::testing::MemoryJobStore;
    use crate::kernel::jobs::NewJob;
    use crawler::{CrawlEngine, CrawlRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Script {
        /// Visit `n` pages, recording state and progress after each
        Visit(usize),
        Fail,
        LongFail,
        /// Hit a checkpoint after the first page
        Checkpoint,
    }

    struct ScriptedEngine(Script);

    #[async_trait]
    impl CrawlEngine for ScriptedEngine {
        async fn execute_job(
            &self,
            _request: &CrawlRequest,
            _progress_id: &str,
            observer: &dyn CrawlObserver,
        ) -> CrawlResult<CrawlSummary> {
            match self.0 {
                Script::Visit(n) => {
                    let all: Vec<String> = (0..n).map(|i| format!("https://a.example/{i}")).collect();
                    for done in 1..=n {
                        let snapshot = CrawlSnapshot::new(all[..done].to_vec(), all[done..].to_vec());
                        observer.record_state(&snapshot).await?;
                        observer
                            .report(
                                ProgressUpdate::default()
                                    .with_progress(snapshot.percent_complete().unwrap_or(0)),
                            )
                            .await;
                    }
                    Ok(CrawlSummary {
                        pages_visited: n,
                        pages_failed: 0,
                    })
                }
                Script::Fail => Err(CrawlError::Engine("browser crashed".into())),
                Script::LongFail => Err(CrawlError::Engine("x".repeat(5000))),
                Script::Checkpoint => {
                    observer
                        .record_state(&CrawlSnapshot::new(vec!["https://a.example/0".into()], vec![]))
                        .await?;
                    observer.checkpoint().await?;
                    Ok(CrawlSummary::default())
                }
            }
        }
    }

    struct ScriptedManager {
        script: Script,
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl ScriptedManager {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EngineManager for ScriptedManager {
        async fn acquire(&self) -> CrawlResult<Box<dyn CrawlEngine>> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedEngine(self.script)))
        }

        async fn release(&self, _engine: Box<dyn CrawlEngine>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn claimed_job(store: &MemoryJobStore) -> Uuid {
        let job = store
            .insert(NewJob::for_request(CrawlRequest::new("https://a.example")))
            .await
            .unwrap();
        store.try_claim(job.id, "worker-1").await.unwrap();
        job.id
    }

    fn runner(store: Arc<MemoryJobStore>, manager: Arc<ScriptedManager>) -> JobRunner {
        JobRunner::new(store, manager).with_worker_id("runner-test")
    }

    #[tokio::test]
    async fn test_successful_run_completes_job() {
        let store = Arc::new(MemoryJobStore::new());
        let manager = ScriptedManager::new(Script::Visit(10));
        let id = claimed_job(&store).await;

        let outcome = runner(store.clone(), manager.clone()).run(id).await.unwrap();
        assert_eq!(outcome.exit_code(), 0);

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percentage, 100);
        assert!(job.completed_at.is_some());
        assert!(job.worker_id.is_none());

        let state = store.state(id).unwrap();
        assert_eq!(state.visited(), 10);
        assert_eq!(state.pending(), 0);

        assert_eq!(manager.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(manager.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_supervisor_owner_is_kept() {
        let store = Arc::new(MemoryJobStore::new());
        let id = claimed_job(&store).await;

        // the checkpoint passes only if the runner adopted worker-1 as owner
        let outcome = runner(store.clone(), ScriptedManager::new(Script::Checkpoint))
            .run(id)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_engine_error_fails_job() {
        let store = Arc::new(MemoryJobStore::new());
        let manager = ScriptedManager::new(Script::Fail);
        let id = claimed_job(&store).await;

        let outcome = runner(store.clone(), manager.clone()).run(id).await.unwrap();
        assert_eq!(outcome.exit_code(), 1);

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("browser crashed"));
        assert!(job.completed_at.is_some());
        assert_eq!(manager.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_message_is_bounded() {
        let store = Arc::new(MemoryJobStore::new());
        let id = claimed_job(&store).await;

        runner(store.clone(), ScriptedManager::new(Script::LongFail))
            .run(id)
            .await
            .unwrap();
        let message = store.get(id).unwrap().error_message.unwrap();
        assert_eq!(message.chars().count(), MAX_ERROR_CHARS);
    }

    #[tokio::test]
    async fn test_invalid_payload_fails_without_engine() {
        let store = Arc::new(MemoryJobStore::new());
        let manager = ScriptedManager::new(Script::Visit(1));
        let mut job = NewJob::for_request(CrawlRequest::new("https://a.example")).into_job(chrono::Utc::now());
        job.payload = serde_json::json!({"url": "ftp://a.example"});
        let id = job.id;
        store.put(job);

        let outcome = runner(store.clone(), manager.clone()).run(id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed(_)));
        assert_eq!(store.get(id).unwrap().status, JobStatus::Failed);
        assert_eq!(manager.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_job_is_fatal() {
        let store = Arc::new(MemoryJobStore::new());
        let result = runner(store, ScriptedManager::new(Script::Visit(1)))
            .run(Uuid::new_v4())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_terminal_job_not_reopened() {
        let store = Arc::new(MemoryJobStore::new());
        let manager = ScriptedManager::new(Script::Visit(1));
        let id = claimed_job(&store).await;
        store.fail(id, "operator").await.unwrap();

        let outcome = runner(store.clone(), manager.clone()).run(id).await.unwrap();
        assert_eq!(outcome.exit_code(), 2);

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("operator"));
        assert_eq!(manager.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_paused_job_is_not_restarted() {
        let store = Arc::new(MemoryJobStore::new());
        let manager = ScriptedManager::new(Script::Visit(1));
        let id = claimed_job(&store).await;
        store.pause(id).await.unwrap();

        let outcome = runner(store.clone(), manager.clone()).run(id).await.unwrap();
        assert_eq!(outcome.exit_code(), 2);

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert!(job.worker_id.is_none());
        assert_eq!(manager.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_checkpoint_cancels_paused_job() {
        let store = Arc::new(MemoryJobStore::new());
        let id = claimed_job(&store).await;
        let observer = JobObserver {
            store: store.clone(),
            tracker: ProgressTracker::new(store.clone()),
            job_id: id,
            owner: Some("worker-1".into()),
        };
        assert!(observer.checkpoint().await.is_ok());

        store.pause(id).await.unwrap();
        let err = observer.checkpoint().await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("paused"));
    }

    #[tokio::test]
    async fn test_checkpoint_cancels_reassigned_job() {
        let store = Arc::new(MemoryJobStore::new());
        let id = claimed_job(&store).await;
        let observer = JobObserver {
            store: store.clone(),
            tracker: ProgressTracker::new(store.clone()),
            job_id: id,
            owner: Some("worker-old".into()),
        };

        let err = observer.checkpoint().await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("worker-1"));
    }

    #[tokio::test]
    async fn test_store_outage_during_crawl_fails_job_attempt() {
        let store = Arc::new(MemoryJobStore::new());
        let id = claimed_job(&store).await;
        let observer = JobObserver {
            store: store.clone(),
            tracker: ProgressTracker::new(store.clone()),
            job_id: id,
            owner: Some("worker-1".into()),
        };
        store.set_unavailable(true);

        let err = observer
            .record_state(&CrawlSnapshot::default())
            .await
            .unwrap_err();
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn test_local_tracker_follows_run() {
        let store = Arc::new(MemoryJobStore::new());
        let id = claimed_job(&store).await;
        let runner = runner(store.clone(), ScriptedManager::new(Script::Visit(3)));

        runner.run(id).await.unwrap();
        let record = runner.tracker().cached(&id.to_string()).unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.progress, 100);
    }
}
