//! Fixtures shared by the integration tests.

use async_trait::async_trait;
use crawler::{
    CrawlEngine, CrawlObserver, CrawlRequest, CrawlResult, CrawlSnapshot, CrawlSummary,
    EngineManager, ProgressUpdate,
};
use orchestrator_core::kernel::jobs::NewJob;

pub fn crawl_job(url: &str, priority: i32) -> NewJob {
    NewJob::builder()
        .request(CrawlRequest::new(url))
        .priority(priority)
        .build()
}

/// Engine that "visits" `pages` synthetic pages under the request URL,
/// checkpointing and recording state after each one.
pub struct SyntheticEngine {
    pub pages: usize,
}

#[async_trait]
impl CrawlEngine for SyntheticEngine {
    async fn execute_job(
        &self,
        request: &CrawlRequest,
        _progress_id: &str,
        observer: &dyn CrawlObserver,
    ) -> CrawlResult<CrawlSummary> {
        let urls: Vec<String> = (0..self.pages)
            .map(|i| format!("{}/page-{}", request.url.trim_end_matches('/'), i))
            .collect();

        for i in 0..urls.len() {
            observer.checkpoint().await?;
            let snapshot = CrawlSnapshot::new(urls[..=i].to_vec(), urls[i + 1..].to_vec());
            observer.record_state(&snapshot).await?;
            observer
                .report(
                    ProgressUpdate::default()
                        .with_current_url(urls[i].clone())
                        .with_pages((i + 1) as u32, urls.len() as u32),
                )
                .await;
        }

        Ok(CrawlSummary {
            pages_visited: urls.len(),
            pages_failed: 0,
        })
    }
}

pub struct SyntheticEngines {
    pub pages: usize,
}

#[async_trait]
impl EngineManager for SyntheticEngines {
    async fn acquire(&self) -> CrawlResult<Box<dyn CrawlEngine>> {
        Ok(Box::new(SyntheticEngine { pages: self.pages }))
    }

    async fn release(&self, _engine: Box<dyn CrawlEngine>) {}
}
