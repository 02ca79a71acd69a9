//! Crawl job model and its per-job crawl state.

use chrono::{DateTime, Utc};
use crawler::{CrawlRequest, CrawlSnapshot, PayloadError};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "crawl_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal rows are never written again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Statuses that count as "in flight" for listings.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing | JobStatus::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub const ACTIVE: [JobStatus; 3] = [JobStatus::Pending, JobStatus::Processing, JobStatus::Paused];
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub worker_id: Option<String>,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub progress_percentage: i32,
}

impl Job {
    /// Decode and validate the stored payload.
    pub fn request(&self) -> Result<CrawlRequest, PayloadError> {
        CrawlRequest::from_value(self.payload.clone())
    }

    /// Target URL from the payload, without full validation.
    pub fn url(&self) -> Option<&str> {
        self.payload.get("url").and_then(|v| v.as_str())
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Seconds since the last heartbeat, if one was ever written.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_heartbeat.map(|hb| now - hb)
    }
}

/// A job to be inserted by request intake.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewJob {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub request: CrawlRequest,
    #[builder(default = 0)]
    pub priority: i32,
    #[builder(default = 3)]
    pub max_retries: i32,
}

impl NewJob {
    pub fn for_request(request: CrawlRequest) -> Self {
        Self::builder().request(request).build()
    }

    /// Materialize the pending row this insert creates.
    pub fn into_job(self, now: DateTime<Utc>) -> Job {
        Job {
            id: self.id,
            status: JobStatus::Pending,
            payload: self.request.to_value(),
            worker_id: None,
            priority: self.priority,
            retry_count: 0,
            max_retries: self.max_retries,
            created_at: now,
            started_at: None,
            last_heartbeat: None,
            completed_at: None,
            error_message: None,
            progress_percentage: 0,
        }
    }
}

// ============================================================================
// Crawl State
// ============================================================================

#[derive(FromRow, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlState {
    pub job_id: Uuid,
    pub visited_urls: Vec<String>,
    pub frontier: Vec<String>,
    pub total_pending: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl CrawlState {
    pub fn empty(job_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            visited_urls: Vec::new(),
            frontier: Vec::new(),
            total_pending: None,
            updated_at: now,
        }
    }

    pub fn visited(&self) -> usize {
        self.visited_urls.len()
    }

    /// Precomputed pending count, else the frontier length.
    pub fn pending(&self) -> usize {
        match self.total_pending {
            Some(n) => usize::try_from(n).unwrap_or(0),
            None => self.frontier.len(),
        }
    }

    pub fn apply(&mut self, snapshot: &CrawlSnapshot, now: DateTime<Utc>) {
        self.visited_urls = snapshot.visited.clone();
        self.frontier = snapshot.frontier.clone();
        self.total_pending = snapshot.total_pending;
        self.updated_at = now;
    }
}

/// What a watchdog recovery did to a stale job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Back to `pending` with one more retry consumed
    Requeued { retry_count: i32 },
    /// Out of retries; marked `failed`
    Failed,
    /// The job was no longer stale when the update ran
    Skipped,
}

pub const RECOVERED_MESSAGE: &str = "Recovered from crash by Watchdog";
pub const CRASH_EXHAUSTED_MESSAGE: &str = "Job crashed and exceeded max retries";
pub const FORCE_CANCELLED_MESSAGE: &str = "Force cancelled by system cleanup";
