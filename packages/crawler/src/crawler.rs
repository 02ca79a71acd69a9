use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{CrawlError, CrawlResult};
use crate::request::CrawlRequest;
use crate::sitemap::{is_sitemap_url, SitemapCrawlStrategy};
use crate::traits::{CrawlEngine, CrawlObserver, EngineManager, ObserverCheck};
use crate::types::{CrawlPhase, CrawlSnapshot, CrawlSummary, ProgressUpdate};

/// Reference engine: seeds the frontier from a sitemap (or the target URL
/// itself) and fetches each page in order.
///
/// It does not extract links or content; it exists to exercise the
/// checkpoint, state and progress contracts end to end.
pub struct SitemapEngine {
    config: EngineConfig,
    sitemap: SitemapCrawlStrategy,
    client: reqwest::Client,
}

impl SitemapEngine {
    pub fn new(config: EngineConfig) -> CrawlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CrawlError::EngineUnavailable(e.to_string()))?;

        Ok(Self {
            sitemap: SitemapCrawlStrategy::from_config(&config),
            config,
            client,
        })
    }

    async fn seed_frontier(
        &self,
        request: &CrawlRequest,
        observer: &dyn CrawlObserver,
    ) -> CrawlResult<VecDeque<String>> {
        let target = request.target_url()?;

        if is_sitemap_url(&target) {
            let urls = self
                .sitemap
                .parse_sitemap(target.as_str(), Some(&ObserverCheck(observer)))
                .await?;
            return Ok(urls.into_iter().collect());
        }

        Ok(VecDeque::from([target.to_string()]))
    }

    async fn fetch(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "page fetch returned error status");
                false
            }
            Err(e) => {
                warn!(url = %url, error = %e, "page fetch failed");
                false
            }
        }
    }
}

#[async_trait]
impl CrawlEngine for SitemapEngine {
    async fn execute_job(
        &self,
        request: &CrawlRequest,
        progress_id: &str,
        observer: &dyn CrawlObserver,
    ) -> CrawlResult<CrawlSummary> {
        info!(progress_id = %progress_id, url = %request.url, "starting crawl");

        observer
            .report(ProgressUpdate::phase(CrawlPhase::Starting).with_log("Discovering URLs..."))
            .await;

        let mut frontier = self.seed_frontier(request, observer).await?;

        let limit = request
            .max_pages
            .map(|n| n as usize)
            .unwrap_or(self.config.page_limit);
        frontier.truncate(limit);

        let total = frontier.len();
        let mut visited: Vec<String> = Vec::with_capacity(total);
        let mut summary = CrawlSummary::default();

        observer
            .record_state(&CrawlSnapshot::new(Vec::new(), frontier.iter().cloned().collect()))
            .await?;

        while let Some(url) = frontier.pop_front() {
            observer.checkpoint().await?;

            if self.fetch(&url).await {
                summary.pages_visited += 1;
            } else {
                summary.pages_failed += 1;
            }
            visited.push(url.clone());

            let snapshot = CrawlSnapshot::new(visited.clone(), frontier.iter().cloned().collect());
            observer.record_state(&snapshot).await?;

            let done = visited.len() as u32;
            let mut update = ProgressUpdate::phase(CrawlPhase::Crawling)
                .with_current_url(url)
                .with_pages(done, total as u32)
                .with_log(format!("Processed {}/{} pages...", done, total));
            if let Some(percent) = snapshot.percent_complete() {
                update = update.with_progress(percent);
            }
            observer.report(update).await;
        }

        debug!(
            progress_id = %progress_id,
            visited = summary.pages_visited,
            failed = summary.pages_failed,
            "crawl finished"
        );

        Ok(summary)
    }
}

/// Hands out a fresh [`SitemapEngine`] per job.
#[derive(Debug, Clone, Default)]
pub struct SitemapEngineManager {
    config: EngineConfig,
}

impl SitemapEngineManager {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineManager for SitemapEngineManager {
    async fn acquire(&self) -> CrawlResult<Box<dyn CrawlEngine>> {
        Ok(Box::new(SitemapEngine::new(self.config.clone())?))
    }

    async fn release(&self, engine: Box<dyn CrawlEngine>) {
        drop(engine);
    }
}
