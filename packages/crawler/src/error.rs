use thiserror::Error;

/// Errors surfaced by a crawl engine or its helpers.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// A status checkpoint observed that the job should stop.
    ///
    /// This is a control-flow signal, not a failure: callers propagate it
    /// unchanged and leave the job row as it is.
    #[error("crawl cancelled: {0}")]
    Cancelled(String),

    #[error("invalid crawl request: {0}")]
    InvalidRequest(#[from] PayloadError),

    #[error("crawl engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("crawl engine failed: {0}")]
    Engine(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Validation failures for an incoming crawl payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload is not a valid crawl request: {0}")]
    Malformed(String),

    #[error("url '{0}' is not an absolute http(s) URL")]
    InvalidUrl(String),

    #[error("max_depth must be between 1 and {max}, got {value}")]
    DepthOutOfRange { value: u32, max: u32 },

    #[error("max_concurrent must be between 1 and {max}, got {value}")]
    ConcurrencyOutOfRange { value: u32, max: u32 },

    #[error("max_pages must be at least 1")]
    EmptyPageLimit,
}

pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
