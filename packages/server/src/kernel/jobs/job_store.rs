//! Job Store: the shared relational store that coordinates supervisors and
//! runners.
//!
//! Every ownership change is a single conditional `UPDATE`; the number of
//! rows it touches is the only mutual-exclusion primitive in the system.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crawler::CrawlSnapshot;
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{
    CrawlState, Job, JobStatus, NewJob, Recovery, CRASH_EXHAUSTED_MESSAGE, RECOVERED_MESSAGE,
};
use crate::common::Lookup;

/// Storage operations used by the supervisor, watchdog, runner and API.
///
/// Write methods returning `bool` report whether the guarded update matched a
/// row; `false` means another actor got there first and is not an error.
#[async_trait]
pub trait JobStore: Send + Sync {
    // ---- intake / reads ----------------------------------------------------

    async fn insert(&self, job: NewJob) -> Result<Job>;

    async fn find(&self, id: Uuid) -> Result<Lookup<Job>>;

    /// Jobs whose status is one of `statuses`, in claim order.
    async fn list(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;

    // ---- supervisor --------------------------------------------------------

    /// Highest-priority, oldest `pending` job, if any.
    async fn next_pending(&self) -> Result<Option<Job>>;

    /// `pending -> processing` for `id`, owned by `worker_id`.
    /// `None` when the job was no longer pending.
    async fn try_claim(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>>;

    /// Refresh `last_heartbeat` while `worker_id` still owns a processing job.
    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<bool>;

    /// Backstop for runners that died without a terminal write.
    async fn fail_if_owned(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool>;

    // ---- watchdog ----------------------------------------------------------

    /// Processing jobs whose heartbeat is older than `cutoff`. Jobs that never
    /// heartbeated are not returned.
    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>>;

    /// Requeue or fail a stale job, re-checking staleness in the same update.
    async fn recover_stale(&self, id: Uuid, cutoff: DateTime<Utc>) -> Result<Recovery>;

    // ---- runner ------------------------------------------------------------

    /// Mark the job processing with a fresh heartbeat. Only a pending row or
    /// a processing row already owned by `worker_id` qualifies; paused and
    /// terminal rows are never reopened.
    async fn start_run(&self, id: Uuid, worker_id: &str) -> Result<bool>;

    async fn update_progress(&self, id: Uuid, percentage: i32) -> Result<()>;

    async fn complete(&self, id: Uuid) -> Result<bool>;

    async fn fail(&self, id: Uuid, error: &str) -> Result<bool>;

    // ---- operator ----------------------------------------------------------

    async fn pause(&self, id: Uuid) -> Result<bool>;

    async fn resume(&self, id: Uuid) -> Result<bool>;

    /// Fail every pending or processing job. Returns how many were touched.
    async fn force_fail_active(&self, message: &str) -> Result<u64>;

    // ---- crawl state -------------------------------------------------------

    /// Create or reset the job's crawl state to empty.
    async fn init_state(&self, id: Uuid) -> Result<()>;

    async fn save_state(&self, id: Uuid, snapshot: &CrawlSnapshot) -> Result<()>;

    async fn load_state(&self, id: Uuid) -> Result<Lookup<CrawlState>>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: NewJob) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO crawl_jobs (id, status, payload, priority, max_retries)
            VALUES ($1, 'pending', $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.request.to_value())
        .bind(job.priority)
        .bind(job.max_retries)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert crawl job")?;

        Ok(job)
    }

    async fn find(&self, id: Uuid) -> Result<Lookup<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM crawl_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job.into())
    }

    async fn list(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let statuses: Vec<&str> = statuses.iter().map(JobStatus::as_str).collect();
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM crawl_jobs
            WHERE status::text = ANY($1)
            ORDER BY priority DESC, created_at ASC
            "#,
        )
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn next_pending(&self) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM crawl_jobs
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn try_claim(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE crawl_jobs
            SET status = 'processing',
                worker_id = $2,
                started_at = NOW(),
                last_heartbeat = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET last_heartbeat = NOW()
            WHERE id = $1 AND worker_id = $2 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_if_owned(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'failed',
                worker_id = NULL,
                error_message = $3,
                completed_at = NOW()
            WHERE id = $1 AND worker_id = $2 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM crawl_jobs
            WHERE status = 'processing'
              AND last_heartbeat IS NOT NULL
              AND last_heartbeat < $1
            ORDER BY last_heartbeat ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn recover_stale(&self, id: Uuid, cutoff: DateTime<Utc>) -> Result<Recovery> {
        // CASE arms see the pre-update row, so every column agrees on the
        // same retry decision.
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE crawl_jobs
            SET status = CASE WHEN retry_count < max_retries
                              THEN 'pending'::crawl_job_status
                              ELSE 'failed'::crawl_job_status END,
                worker_id = NULL,
                retry_count = CASE WHEN retry_count < max_retries
                                   THEN retry_count + 1 ELSE retry_count END,
                error_message = CASE WHEN retry_count < max_retries
                                     THEN $3 ELSE $4 END,
                completed_at = CASE WHEN retry_count < max_retries
                                    THEN completed_at ELSE NOW() END
            WHERE id = $1
              AND status = 'processing'
              AND last_heartbeat IS NOT NULL
              AND last_heartbeat < $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(cutoff)
        .bind(RECOVERED_MESSAGE)
        .bind(CRASH_EXHAUSTED_MESSAGE)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match job {
            Some(job) if job.status == JobStatus::Pending => Recovery::Requeued {
                retry_count: job.retry_count,
            },
            Some(_) => Recovery::Failed,
            None => Recovery::Skipped,
        })
    }

    async fn start_run(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'processing',
                worker_id = COALESCE(worker_id, $2),
                started_at = COALESCE(started_at, NOW()),
                last_heartbeat = NOW()
            WHERE id = $1
              AND status IN ('pending', 'processing')
              AND (worker_id IS NULL OR worker_id = $2)
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(&self, id: Uuid, percentage: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET progress_percentage = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(percentage.clamp(0, 100))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'completed',
                worker_id = NULL,
                progress_percentage = 100,
                completed_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'failed',
                worker_id = NULL,
                error_message = $2,
                completed_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn pause(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'paused', worker_id = NULL
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn resume(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'pending'
            WHERE id = $1 AND status = 'paused'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn force_fail_active(&self, message: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'failed',
                worker_id = NULL,
                error_message = $1,
                completed_at = NOW()
            WHERE status IN ('pending', 'processing')
            "#,
        )
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn init_state(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_states (job_id, visited_urls, frontier, total_pending, updated_at)
            VALUES ($1, '{}', '{}', NULL, NOW())
            ON CONFLICT (job_id) DO UPDATE
            SET visited_urls = '{}',
                frontier = '{}',
                total_pending = NULL,
                updated_at = NOW()
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_state(&self, id: Uuid, snapshot: &CrawlSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_states (job_id, visited_urls, frontier, total_pending, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (job_id) DO UPDATE
            SET visited_urls = EXCLUDED.visited_urls,
                frontier = EXCLUDED.frontier,
                total_pending = EXCLUDED.total_pending,
                updated_at = NOW()
            "#,
        )
        .bind(id)
        .bind(&snapshot.visited)
        .bind(&snapshot.frontier)
        .bind(snapshot.total_pending)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_state(&self, id: Uuid) -> Result<Lookup<CrawlState>> {
        let state = sqlx::query_as::<_, CrawlState>("SELECT * FROM crawl_states WHERE job_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(state.into())
    }
}
