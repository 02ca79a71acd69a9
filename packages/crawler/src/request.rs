use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PayloadError;

pub const MAX_DEPTH_LIMIT: u32 = 10;
pub const MAX_CONCURRENT_LIMIT: u32 = 50;

/// The job payload: what to crawl and how.
///
/// Stored as JSON in the job row. Unknown fields are rejected so that a typo
/// in an enqueue call fails at intake instead of being silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrawlRequest {
    pub url: String,

    #[serde(default = "default_knowledge_type")]
    pub knowledge_type: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,

    #[serde(default = "default_true")]
    pub extract_code_examples: bool,

    #[serde(default = "default_true")]
    pub generate_summary: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

fn default_knowledge_type() -> String {
    "technical".to_string()
}

fn default_max_depth() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl CrawlRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            knowledge_type: default_knowledge_type(),
            tags: Vec::new(),
            max_depth: default_max_depth(),
            max_concurrent: None,
            extract_code_examples: true,
            generate_summary: true,
            max_pages: None,
        }
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_concurrent(mut self, concurrent: u32) -> Self {
        self.max_concurrent = Some(concurrent);
        self
    }

    pub fn with_max_pages(mut self, pages: u32) -> Self {
        self.max_pages = Some(pages);
        self
    }

    /// Decode a stored payload and validate it.
    pub fn from_value(value: serde_json::Value) -> Result<Self, PayloadError> {
        let request: Self = serde_json::from_value(value)
            .map_err(|e| PayloadError::Malformed(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        self.target_url()?;

        if !(1..=MAX_DEPTH_LIMIT).contains(&self.max_depth) {
            return Err(PayloadError::DepthOutOfRange {
                value: self.max_depth,
                max: MAX_DEPTH_LIMIT,
            });
        }

        if let Some(concurrent) = self.max_concurrent {
            if !(1..=MAX_CONCURRENT_LIMIT).contains(&concurrent) {
                return Err(PayloadError::ConcurrencyOutOfRange {
                    value: concurrent,
                    max: MAX_CONCURRENT_LIMIT,
                });
            }
        }

        if self.max_pages == Some(0) {
            return Err(PayloadError::EmptyPageLimit);
        }

        Ok(())
    }

    pub fn target_url(&self) -> Result<Url, PayloadError> {
        let url = Url::parse(&self.url).map_err(|_| PayloadError::InvalidUrl(self.url.clone()))?;
        match url.scheme() {
            "http" | "https" if url.host().is_some() => Ok(url),
            _ => Err(PayloadError::InvalidUrl(self.url.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_from_minimal_payload() {
        let request = CrawlRequest::from_value(json!({"url": "https://docs.example.com"})).unwrap();
        assert_eq!(request.knowledge_type, "technical");
        assert_eq!(request.max_depth, 2);
        assert!(request.extract_code_examples);
        assert!(request.generate_summary);
        assert!(request.max_concurrent.is_none());
        assert!(request.tags.is_empty());
    }

    #[test]
    fn test_full_payload() {
        let request = CrawlRequest::from_value(json!({
            "url": "https://docs.example.com/sitemap.xml",
            "knowledge_type": "business",
            "tags": ["docs"],
            "max_depth": 3,
            "max_concurrent": 10,
            "extract_code_examples": false,
            "generate_summary": false,
            "max_pages": 25
        }))
        .unwrap();
        assert_eq!(request.max_depth, 3);
        assert_eq!(request.max_concurrent, Some(10));
        assert_eq!(request.max_pages, Some(25));
        assert!(!request.extract_code_examples);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = CrawlRequest::from_value(json!({"url": "https://a.example", "depth": 4}))
            .unwrap_err();
        assert!(matches!(err, PayloadError::Malformed(_)));
    }

    #[test]
    fn test_url_must_be_http() {
        let err = CrawlRequest::new("ftp://files.example.com").validate().unwrap_err();
        assert!(matches!(err, PayloadError::InvalidUrl(_)));

        let err = CrawlRequest::new("not a url").validate().unwrap_err();
        assert!(matches!(err, PayloadError::InvalidUrl(_)));
    }

    #[test]
    fn test_depth_bounds() {
        let err = CrawlRequest::new("https://a.example")
            .with_max_depth(0)
            .validate()
            .unwrap_err();
        assert_eq!(err, PayloadError::DepthOutOfRange { value: 0, max: 10 });

        assert!(CrawlRequest::new("https://a.example")
            .with_max_depth(10)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_concurrency_bounds() {
        let err = CrawlRequest::new("https://a.example")
            .with_max_concurrent(51)
            .validate()
            .unwrap_err();
        assert!(matches!(err, PayloadError::ConcurrencyOutOfRange { value: 51, .. }));
    }

    #[test]
    fn test_zero_page_limit_rejected() {
        let err = CrawlRequest::new("https://a.example")
            .with_max_pages(0)
            .validate()
            .unwrap_err();
        assert_eq!(err, PayloadError::EmptyPageLimit);
    }

    #[test]
    fn test_value_omits_unset_options() {
        let value = CrawlRequest::new("https://a.example").to_value();
        assert!(value.get("max_concurrent").is_none());
        assert!(value.get("max_pages").is_none());
        assert_eq!(value["max_depth"], 2);
    }
}
