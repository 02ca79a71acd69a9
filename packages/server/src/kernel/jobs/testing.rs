//! Job testing utilities.
//!
//! [`MemoryJobStore`] applies the same guarded transitions as the Postgres
//! store against an in-process map, so supervisor, watchdog, runner and
//! progress logic can be exercised without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crawler::CrawlSnapshot;
use uuid::Uuid;

use super::job::{
    CrawlState, Job, JobStatus, NewJob, Recovery, CRASH_EXHAUSTED_MESSAGE, RECOVERED_MESSAGE,
};
use super::job_store::JobStore;
use crate::common::Lookup;

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    states: Mutex<HashMap<Uuid, CrawlState>>,
    unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a row as-is, bypassing intake.
    pub fn put(&self, job: Job) {
        self.jobs().insert(job.id, job);
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs().get(&id).cloned()
    }

    pub fn state(&self, id: Uuid) -> Option<CrawlState> {
        self.states().get(&id).cloned()
    }

    pub fn set_heartbeat(&self, id: Uuid, at: Option<DateTime<Utc>>) {
        if let Some(job) = self.jobs().get_mut(&id) {
            job.last_heartbeat = at;
        }
    }

    pub fn set_status(&self, id: Uuid, status: JobStatus) {
        if let Some(job) = self.jobs().get_mut(&id) {
            job.status = status;
            if status != JobStatus::Processing {
                job.worker_id = None;
            }
        }
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs().values().filter(|j| j.status == status).count()
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn states(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CrawlState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("job store unavailable");
        }
        Ok(())
    }

    fn claim_order(jobs: &mut [Job]) {
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
    }

    /// Apply `f` to the job if `guard` holds; report whether it did.
    fn update_if(&self, id: Uuid, guard: impl Fn(&Job) -> bool, f: impl FnOnce(&mut Job)) -> bool {
        let mut jobs = self.jobs();
        match jobs.get_mut(&id) {
            Some(job) if guard(job) => {
                f(job);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: NewJob) -> Result<Job> {
        self.check_available()?;
        let job = job.into_job(Utc::now());
        self.jobs().insert(job.id, job.clone());
        Ok(job)
    }

    async fn find(&self, id: Uuid) -> Result<Lookup<Job>> {
        self.check_available()?;
        Ok(self.get(id).into())
    }

    async fn list(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        self.check_available()?;
        let mut jobs: Vec<Job> = self
            .jobs()
            .values()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        Self::claim_order(&mut jobs);
        Ok(jobs)
    }

    async fn next_pending(&self) -> Result<Option<Job>> {
        let mut pending = self.list(&[JobStatus::Pending]).await?;
        Ok(if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        })
    }

    async fn try_claim(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>> {
        self.check_available()?;
        let now = Utc::now();
        let claimed = self.update_if(
            id,
            |j| j.status == JobStatus::Pending,
            |j| {
                j.status = JobStatus::Processing;
                j.worker_id = Some(worker_id.to_string());
                j.started_at = Some(now);
                j.last_heartbeat = Some(now);
            },
        );
        Ok(if claimed { self.get(id) } else { None })
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.update_if(
            id,
            |j| j.status == JobStatus::Processing && j.worker_id.as_deref() == Some(worker_id),
            |j| j.last_heartbeat = Some(Utc::now()),
        ))
    }

    async fn fail_if_owned(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.update_if(
            id,
            |j| j.status == JobStatus::Processing && j.worker_id.as_deref() == Some(worker_id),
            |j| {
                j.status = JobStatus::Failed;
                j.worker_id = None;
                j.error_message = Some(error.to_string());
                j.completed_at = Some(Utc::now());
            },
        ))
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        self.check_available()?;
        let mut jobs: Vec<Job> = self
            .jobs()
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .filter(|j| matches!(j.last_heartbeat, Some(hb) if hb < cutoff))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.last_heartbeat);
        Ok(jobs)
    }

    async fn recover_stale(&self, id: Uuid, cutoff: DateTime<Utc>) -> Result<Recovery> {
        self.check_available()?;
        let mut outcome = Recovery::Skipped;
        self.update_if(
            id,
            |j| {
                j.status == JobStatus::Processing
                    && matches!(j.last_heartbeat, Some(hb) if hb < cutoff)
            },
            |j| {
                j.worker_id = None;
                if j.can_retry() {
                    j.status = JobStatus::Pending;
                    j.retry_count += 1;
                    j.error_message = Some(RECOVERED_MESSAGE.to_string());
                    outcome = Recovery::Requeued {
                        retry_count: j.retry_count,
                    };
                } else {
                    j.status = JobStatus::Failed;
                    j.error_message = Some(CRASH_EXHAUSTED_MESSAGE.to_string());
                    j.completed_at = Some(Utc::now());
                    outcome = Recovery::Failed;
                }
            },
        );
        Ok(outcome)
    }

    async fn start_run(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        self.check_available()?;
        let now = Utc::now();
        Ok(self.update_if(
            id,
            |j| {
                matches!(j.status, JobStatus::Pending | JobStatus::Processing)
                    && j.worker_id.as_deref().map_or(true, |w| w == worker_id)
            },
            |j| {
                j.status = JobStatus::Processing;
                if j.worker_id.is_none() {
                    j.worker_id = Some(worker_id.to_string());
                }
                j.started_at.get_or_insert(now);
                j.last_heartbeat = Some(now);
            },
        ))
    }

    async fn update_progress(&self, id: Uuid, percentage: i32) -> Result<()> {
        self.check_available()?;
        self.update_if(
            id,
            |j| j.status == JobStatus::Processing,
            |j| j.progress_percentage = percentage.clamp(0, 100),
        );
        Ok(())
    }

    async fn complete(&self, id: Uuid) -> Result<bool> {
        self.check_available()?;
        Ok(self.update_if(
            id,
            |j| !j.status.is_terminal(),
            |j| {
                j.status = JobStatus::Completed;
                j.worker_id = None;
                j.progress_percentage = 100;
                j.completed_at = Some(Utc::now());
            },
        ))
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.update_if(
            id,
            |j| !j.status.is_terminal(),
            |j| {
                j.status = JobStatus::Failed;
                j.worker_id = None;
                j.error_message = Some(error.to_string());
                j.completed_at = Some(Utc::now());
            },
        ))
    }

    async fn pause(&self, id: Uuid) -> Result<bool> {
        self.check_available()?;
        Ok(self.update_if(
            id,
            |j| matches!(j.status, JobStatus::Pending | JobStatus::Processing),
            |j| {
                j.status = JobStatus::Paused;
                j.worker_id = None;
            },
        ))
    }

    async fn resume(&self, id: Uuid) -> Result<bool> {
        self.check_available()?;
        Ok(self.update_if(
            id,
            |j| j.status == JobStatus::Paused,
            |j| j.status = JobStatus::Pending,
        ))
    }

    async fn force_fail_active(&self, message: &str) -> Result<u64> {
        self.check_available()?;
        let now = Utc::now();
        let mut count = 0;
        for job in self.jobs().values_mut() {
            if matches!(job.status, JobStatus::Pending | JobStatus::Processing) {
                job.status = JobStatus::Failed;
                job.worker_id = None;
                job.error_message = Some(message.to_string());
                job.completed_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn init_state(&self, id: Uuid) -> Result<()> {
        self.check_available()?;
        self.states().insert(id, CrawlState::empty(id, Utc::now()));
        Ok(())
    }

    async fn save_state(&self, id: Uuid, snapshot: &CrawlSnapshot) -> Result<()> {
        self.check_available()?;
        let now = Utc::now();
        self.states()
            .entry(id)
            .or_insert_with(|| CrawlState::empty(id, now))
            .apply(snapshot, now);
        Ok(())
    }

    async fn load_state(&self, id: Uuid) -> Result<Lookup<CrawlState>> {
        self.check_available()?;
        Ok(self.state(id).into())
    }
}
