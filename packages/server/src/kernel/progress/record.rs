//! Progress record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kernel::jobs::{CrawlState, Job, JobStatus};

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Starting,
    Pending,
    Processing,
    Crawling,
    CodeExtraction,
    Paused,
    Completed,
    Failed,
    Error,
    Cancelled,
}

impl OperationStatus {
    /// Terminal operations need no further polling.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed
                | OperationStatus::Failed
                | OperationStatus::Error
                | OperationStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Starting => "starting",
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Crawling => "crawling",
            OperationStatus::CodeExtraction => "code_extraction",
            OperationStatus::Paused => "paused",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Error => "error",
            OperationStatus::Cancelled => "cancelled",
        }
    }
}

impl From<JobStatus> for OperationStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => OperationStatus::Pending,
            JobStatus::Processing => OperationStatus::Processing,
            JobStatus::Paused => OperationStatus::Paused,
            JobStatus::Completed => OperationStatus::Completed,
            JobStatus::Failed => OperationStatus::Failed,
        }
    }
}

impl From<crawler::CrawlPhase> for OperationStatus {
    fn from(phase: crawler::CrawlPhase) -> Self {
        match phase {
            crawler::CrawlPhase::Starting => OperationStatus::Starting,
            crawler::CrawlPhase::Crawling => OperationStatus::Crawling,
            crawler::CrawlPhase::CodeExtraction => OperationStatus::CodeExtraction,
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Per-type details
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_crawled: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_blocks_found: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_created: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_stored: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_created: Option<u32>,
}

/// Operation type; serialized as the record's `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    Crawl(CrawlProgress),
    Upload(UploadProgress),
}

impl OperationKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            OperationKind::Crawl(_) => "crawl",
            OperationKind::Upload(_) => "upload",
        }
    }

    pub fn as_crawl(&self) -> Option<&CrawlProgress> {
        match self {
            OperationKind::Crawl(crawl) => Some(crawl),
            OperationKind::Upload(_) => None,
        }
    }
}

// ============================================================================
// Record
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub progress_id: String,
    pub status: OperationStatus,
    pub progress: u8,
    pub log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub details: OperationKind,
}

pub const WAITING_FOR_WORKER: &str = "Waiting for worker...";
pub const WORKER_STARTING: &str = "Worker starting...";
pub const COMPLETED_FROM_STORE: &str = "Completed (synced from DB)";

impl ProgressRecord {
    pub fn new(
        progress_id: impl Into<String>,
        status: OperationStatus,
        log: impl Into<String>,
        details: OperationKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            progress_id: progress_id.into(),
            status,
            progress: 0,
            log: log.into(),
            error: None,
            started_at: now,
            updated_at: now,
            details,
        }
    }

    /// A crawl record waiting for a supervisor to claim the job.
    pub fn crawl_pending(progress_id: impl Into<String>, url: &str, crawl_type: &str) -> Self {
        Self::new(
            progress_id,
            OperationStatus::Pending,
            WAITING_FOR_WORKER,
            OperationKind::Crawl(CrawlProgress {
                url: Some(url.to_string()),
                crawl_type: Some(crawl_type.to_string()),
                ..Default::default()
            }),
        )
    }

    /// Minimal record for a job this process never tracked.
    pub fn from_job(job: &Job, state: Option<&CrawlState>) -> Self {
        let mut record = Self::new(
            job.id.to_string(),
            job.status.into(),
            WAITING_FOR_WORKER,
            OperationKind::Crawl(CrawlProgress {
                url: job.url().map(str::to_string),
                crawl_type: Some(
                    job.payload
                        .get("knowledge_type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("general")
                        .to_string(),
                ),
                ..Default::default()
            }),
        );
        record.started_at = job.created_at;
        record.updated_at = job.created_at;

        match job.status {
            JobStatus::Processing | JobStatus::Paused => {
                record.log = WORKER_STARTING.to_string();
                if let Some(state) = state {
                    if let Some((progress, log)) = state_progress(job.status, state) {
                        record.progress = progress;
                        record.log = log;
                    }
                }
            }
            JobStatus::Completed => {
                record.progress = 100;
                record.log = COMPLETED_FROM_STORE.to_string();
            }
            JobStatus::Failed => {
                record.error = job.error_message.clone();
                record.log = failed_log(job.error_message.as_deref());
            }
            JobStatus::Pending => {}
        }

        record
    }

    pub fn is_crawl(&self) -> bool {
        matches!(self.details, OperationKind::Crawl(_))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Milliseconds a client should wait between polls; 0 once terminal.
    pub fn poll_interval_ms(&self) -> u64 {
        if self.is_terminal() {
            0
        } else {
            1000
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Progress and log line derived from persisted crawl state, or `None`
/// while nothing has been discovered yet.
pub fn state_progress(status: JobStatus, state: &CrawlState) -> Option<(u8, String)> {
    let visited = state.visited();
    let total = visited + state.pending();
    let progress = crawler::percent_complete(visited, state.pending())?;
    let log = if status == JobStatus::Paused {
        format!("Paused at {visited}/{total} pages...")
    } else {
        format!("Processed {visited}/{total} pages...")
    };
    Some((progress, log))
}

pub fn failed_log(error: Option<&str>) -> String {
    format!("Failed: {}", error.unwrap_or("None"))
}

// ============================================================================
// List entry
// ============================================================================

/// One entry of the active-operations listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveOperation {
    pub operation_id: String,
    pub operation_type: &'static str,
    pub status: OperationStatus,
    pub progress: u8,
    pub message: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_crawled: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_created: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_blocks_found: Option<u32>,
}

impl From<&ProgressRecord> for ActiveOperation {
    fn from(record: &ProgressRecord) -> Self {
        let mut op = Self {
            operation_id: record.progress_id.clone(),
            operation_type: record.details.type_name(),
            status: record.status,
            progress: record.progress,
            message: record.log.clone(),
            started_at: record.started_at,
            url: None,
            current_url: None,
            crawl_type: None,
            pages_crawled: None,
            total_pages: None,
            documents_created: None,
            code_blocks_found: None,
        };

        match &record.details {
            OperationKind::Crawl(crawl) => {
                op.url = crawl.url.clone();
                op.current_url = crawl.current_url.clone();
                op.crawl_type = crawl.crawl_type.clone();
                op.pages_crawled = crawl.pages_crawled;
                op.total_pages = crawl.total_pages;
                op.documents_created = crawl.documents_created;
                op.code_blocks_found = crawl.code_blocks_found;
            }
            OperationKind::Upload(upload) => {
                op.documents_created = upload.documents_created.or(upload.chunks_stored);
            }
        }

        op
    }
}
