use serde::{Deserialize, Serialize};

/// Persistable crawl position: what has been visited and what is queued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSnapshot {
    pub visited: Vec<String>,
    pub frontier: Vec<String>,
    /// Precomputed pending count, when the engine knows better than the
    /// frontier length (e.g. a truncated frontier).
    pub total_pending: Option<i64>,
}

impl CrawlSnapshot {
    pub fn new(visited: Vec<String>, frontier: Vec<String>) -> Self {
        Self {
            visited,
            frontier,
            total_pending: None,
        }
    }

    pub fn pending(&self) -> usize {
        match self.total_pending {
            Some(n) => usize::try_from(n).unwrap_or(0),
            None => self.frontier.len(),
        }
    }

    pub fn percent_complete(&self) -> Option<u8> {
        percent_complete(self.visited.len(), self.pending())
    }
}

/// `floor(visited / (visited + pending) * 100)`, or `None` when nothing is
/// known yet.
pub fn percent_complete(visited: usize, pending: usize) -> Option<u8> {
    let total = visited.checked_add(pending)?;
    if total == 0 {
        return None;
    }
    let percent = (visited as u128 * 100) / total as u128;
    Some(percent.min(100) as u8)
}

/// Coarse phase an engine reports while it works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlPhase {
    Starting,
    Crawling,
    CodeExtraction,
}

/// Incremental progress pushed from an engine to its observer.
///
/// Every field is optional; `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub phase: Option<CrawlPhase>,
    pub progress: Option<u8>,
    pub log: Option<String>,
    pub current_url: Option<String>,
    pub pages_crawled: Option<u32>,
    pub total_pages: Option<u32>,
    pub code_blocks_found: Option<u32>,
}

impl ProgressUpdate {
    pub fn phase(phase: CrawlPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_current_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = Some(url.into());
        self
    }

    pub fn with_pages(mut self, crawled: u32, total: u32) -> Self {
        self.pages_crawled = Some(crawled);
        self.total_pages = Some(total);
        self
    }
}

/// What an engine reports once `execute_job` returns successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub pages_visited: usize,
    pub pages_failed: usize,
}
