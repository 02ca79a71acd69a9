//! Sitemap enumeration.
//!
//! Fetches a sitemap document and returns the text of every `<loc>` element,
//! whatever namespace it lives in. Sitemap indexes are not followed; their
//! `<loc>` entries (child sitemaps) are returned like any other URL.
//!
//! Failures of the remote document (non-200, unreachable host, malformed XML)
//! are not errors for the caller: they are logged and yield an empty list.
//! Only cancellation observed at the status checkpoint propagates.

use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::CrawlResult;
use crate::traits::StatusCheck;

#[derive(Debug, Error)]
enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
#[error("malformed sitemap XML: {0}")]
pub struct SitemapParseError(String);

/// Enumerates URLs from sitemap documents.
#[derive(Debug, Clone)]
pub struct SitemapCrawlStrategy {
    timeout: Duration,
    user_agent: String,
}

impl Default for SitemapCrawlStrategy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SitemapCrawlStrategy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout: config.request_timeout,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Fetch `sitemap_url` and return the URLs it lists.
    ///
    /// `status_check` runs once before any network traffic. The blocking
    /// fetch happens on tokio's blocking pool so the caller's executor keeps
    /// serving heartbeats and other jobs.
    pub async fn parse_sitemap(
        &self,
        sitemap_url: &str,
        status_check: Option<&dyn StatusCheck>,
    ) -> CrawlResult<Vec<String>> {
        if let Some(check) = status_check {
            if let Err(e) = check.check().await {
                if e.is_cancelled() {
                    info!(url = %sitemap_url, "sitemap parsing cancelled by status check");
                    return Err(e);
                }
                warn!(url = %sitemap_url, error = %e, "status check failed, continuing");
            }
        }

        info!(url = %sitemap_url, "parsing sitemap");

        let url = sitemap_url.to_string();
        let timeout = self.timeout;
        let user_agent = self.user_agent.clone();
        let fetched =
            tokio::task::spawn_blocking(move || fetch_blocking(&url, timeout, &user_agent)).await;

        let body = match fetched {
            Ok(Ok(body)) => body,
            Ok(Err(FetchError::Status(code))) => {
                error!(url = %sitemap_url, status = code, "failed to fetch sitemap");
                return Ok(Vec::new());
            }
            Ok(Err(FetchError::Http(e))) => {
                error!(url = %sitemap_url, error = %e, "network error fetching sitemap");
                return Ok(Vec::new());
            }
            Err(e) => {
                error!(url = %sitemap_url, error = %e, "sitemap fetch task failed");
                return Ok(Vec::new());
            }
        };

        match extract_locs(&body) {
            Ok(urls) => {
                info!(url = %sitemap_url, count = urls.len(), "extracted URLs from sitemap");
                Ok(urls)
            }
            Err(e) => {
                error!(url = %sitemap_url, error = %e, "error parsing sitemap XML");
                Ok(Vec::new())
            }
        }
    }
}

fn fetch_blocking(url: &str, timeout: Duration, user_agent: &str) -> Result<String, FetchError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()?;

    let response = client.get(url).send()?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(FetchError::Status(status.as_u16()));
    }

    Ok(response.text()?)
}

/// Collect the trimmed text of every `<loc>` element, ignoring namespace
/// prefixes. A document with no root element or unbalanced tags is rejected.
pub fn extract_locs(xml: &str) -> Result<Vec<String>, SitemapParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut depth: usize = 0;
    let mut saw_root = false;
    let mut current: Option<String> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SitemapParseError(e.to_string()))?;

        match event {
            Event::Start(e) => {
                depth += 1;
                saw_root = true;
                if e.local_name().as_ref() == b"loc" {
                    current = Some(String::new());
                }
            }
            Event::End(e) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SitemapParseError("unexpected closing tag".into()))?;
                if e.local_name().as_ref() == b"loc" {
                    if let Some(text) = current.take() {
                        let text = text.trim();
                        if !text.is_empty() {
                            locs.push(text.to_string());
                        }
                    }
                }
            }
            Event::Empty(_) => saw_root = true,
            Event::Text(t) => {
                if let Some(buf) = current.as_mut() {
                    let text = t.unescape().map_err(|e| SitemapParseError(e.to_string()))?;
                    buf.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(buf) = current.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(SitemapParseError("no root element".into()));
    }
    if depth != 0 {
        return Err(SitemapParseError(format!("{} unclosed element(s)", depth)));
    }

    debug!(count = locs.len(), "parsed sitemap locations");
    Ok(locs)
}

/// Whether `url` looks like a sitemap document (`.../sitemap*.xml`).
pub fn is_sitemap_url(url: &Url) -> bool {
    let Some(last) = url.path_segments().and_then(|mut segments| segments.next_back()) else {
        return false;
    };
    let last = last.to_ascii_lowercase();
    last.starts_with("sitemap") && last.ends_with(".xml")
}
