use std::time::Duration;

/// Tuning for the reference sitemap engine and its HTTP clients.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub user_agent: String,
    /// Per-request timeout for page and sitemap fetches.
    pub request_timeout: Duration,
    /// Hard cap on pages visited when the request sets no `max_pages`.
    pub page_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("crawl-orchestrator/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(30),
            page_limit: 100,
        }
    }
}

impl EngineConfig {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.page_limit, 100);
        assert!(config.user_agent.starts_with("crawl-orchestrator/"));
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::default()
            .with_user_agent("test-agent")
            .with_request_timeout(Duration::from_secs(5))
            .with_page_limit(3);
        assert_eq!(config.user_agent, "test-agent");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.page_limit, 3);
    }
}
