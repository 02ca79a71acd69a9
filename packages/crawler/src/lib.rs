// Crawl engine collaborator contract.
//
// The orchestrator never fetches pages itself: it hands a validated
// `CrawlRequest` to a `CrawlEngine` obtained from an `EngineManager` and
// listens through a `CrawlObserver`. Cancellation is cooperative via
// `StatusCheck` checkpoints.

pub mod config;
pub mod crawler;
pub mod error;
pub mod request;
pub mod sitemap;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use crawler::{SitemapEngine, SitemapEngineManager};
pub use error::{CrawlError, CrawlResult, PayloadError};
pub use request::CrawlRequest;
pub use sitemap::{is_sitemap_url, SitemapCrawlStrategy};
pub use traits::{with_engine, CrawlEngine, CrawlObserver, EngineManager, ObserverCheck, StatusCheck};
pub use types::{percent_complete, CrawlPhase, CrawlSnapshot, CrawlSummary, ProgressUpdate};
