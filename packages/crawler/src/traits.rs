use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use crate::error::{CrawlError, CrawlResult};
use crate::request::CrawlRequest;
use crate::types::{CrawlSnapshot, CrawlSummary, ProgressUpdate};

// ============================================================================
// CANCELLATION: cooperative checkpoints
// ============================================================================

/// A cooperative cancellation checkpoint.
///
/// Returns `Err(CrawlError::Cancelled)` when the surrounding job has been
/// paused or stopped. Any other error is an infrastructure failure of the
/// check itself.
#[async_trait]
pub trait StatusCheck: Send + Sync {
    async fn check(&self) -> CrawlResult<()>;
}

// ============================================================================
// OBSERVER: where an engine reports state and progress
// ============================================================================

#[async_trait]
pub trait CrawlObserver: Send + Sync {
    /// Replace the persisted visited set and frontier for this job.
    async fn record_state(&self, snapshot: &CrawlSnapshot) -> CrawlResult<()>;

    /// Push an incremental update to the human-facing progress record.
    /// Best effort; failures are the observer's to log.
    async fn report(&self, update: ProgressUpdate);

    /// Checkpoint between units of work.
    async fn checkpoint(&self) -> CrawlResult<()>;
}

/// Exposes an observer's checkpoint to helpers that only take a `StatusCheck`.
pub struct ObserverCheck<'a>(pub &'a dyn CrawlObserver);

#[async_trait]
impl StatusCheck for ObserverCheck<'_> {
    async fn check(&self) -> CrawlResult<()> {
        self.0.checkpoint().await
    }
}

// ============================================================================
// ENGINE: the crawl collaborator
// ============================================================================

#[async_trait]
pub trait CrawlEngine: Send + Sync {
    async fn execute_job(
        &self,
        request: &CrawlRequest,
        progress_id: &str,
        observer: &dyn CrawlObserver,
    ) -> CrawlResult<CrawlSummary>;
}

/// Owns the lifecycle of crawl engines (browsers, HTTP pools, ...).
#[async_trait]
pub trait EngineManager: Send + Sync {
    async fn acquire(&self) -> CrawlResult<Box<dyn CrawlEngine>>;

    async fn release(&self, engine: Box<dyn CrawlEngine>);
}

/// Run one job on an engine from `manager`.
///
/// The engine is released after `execute_job` returns, whether it succeeded,
/// failed, was cancelled at a checkpoint, or panicked.
pub async fn with_engine(
    manager: &dyn EngineManager,
    request: &CrawlRequest,
    progress_id: &str,
    observer: &dyn CrawlObserver,
) -> CrawlResult<CrawlSummary> {
    let engine = manager.acquire().await?;
    debug!(progress_id = %progress_id, "crawl engine acquired");

    let outcome = AssertUnwindSafe(engine.execute_job(request, progress_id, observer))
        .catch_unwind()
        .await;

    manager.release(engine).await;
    debug!(progress_id = %progress_id, "crawl engine released");

    match outcome {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(progress_id = %progress_id, panic = %message, "crawl engine panicked");
            Err(CrawlError::Engine(format!("engine panicked: {}", message)))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Cancel,
        Panic,
    }

    struct FakeEngine(Behavior);

    #[async_trait]
    impl CrawlEngine for FakeEngine {
        async fn execute_job(
            &self,
            _request: &CrawlRequest,
            _progress_id: &str,
            observer: &dyn CrawlObserver,
        ) -> CrawlResult<CrawlSummary> {
            match self.0 {
                Behavior::Succeed => Ok(CrawlSummary {
                    pages_visited: 3,
                    pages_failed: 0,
                }),
                Behavior::Fail => Err(CrawlError::Engine("network down".into())),
                Behavior::Cancel => {
                    observer.checkpoint().await?;
                    Ok(CrawlSummary::default())
                }
                Behavior::Panic => panic!("engine exploded"),
            }
        }
    }

    struct CountingManager {
        behavior: Behavior,
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    impl CountingManager {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                acquired: Arc::new(AtomicUsize::new(0)),
                released: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl EngineManager for CountingManager {
        async fn acquire(&self) -> CrawlResult<Box<dyn CrawlEngine>> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeEngine(self.behavior)))
        }

        async fn release(&self, _engine: Box<dyn CrawlEngine>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CancellingObserver;

    #[async_trait]
    impl CrawlObserver for CancellingObserver {
        async fn record_state(&self, _snapshot: &CrawlSnapshot) -> CrawlResult<()> {
            Ok(())
        }

        async fn report(&self, _update: ProgressUpdate) {}

        async fn checkpoint(&self) -> CrawlResult<()> {
            Err(CrawlError::cancelled("job paused"))
        }
    }

    async fn run(behavior: Behavior) -> (CrawlResult<CrawlSummary>, usize, usize) {
        let manager = CountingManager::new(behavior);
        let request = CrawlRequest::new("https://a.example");
        let result = with_engine(&manager, &request, "progress-1", &CancellingObserver).await;
        (
            result,
            manager.acquired.load(Ordering::SeqCst),
            manager.released.load(Ordering::SeqCst),
        )
    }

    #[tokio::test]
    async fn test_release_after_success() {
        let (result, acquired, released) = run(Behavior::Succeed).await;
        assert_eq!(result.unwrap().pages_visited, 3);
        assert_eq!((acquired, released), (1, 1));
    }

    #[tokio::test]
    async fn test_release_after_failure() {
        let (result, acquired, released) = run(Behavior::Fail).await;
        assert!(matches!(result, Err(CrawlError::Engine(_))));
        assert_eq!((acquired, released), (1, 1));
    }

    #[tokio::test]
    async fn test_release_after_cancellation() {
        let (result, acquired, released) = run(Behavior::Cancel).await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!((acquired, released), (1, 1));
    }

    #[tokio::test]
    async fn test_release_after_panic() {
        let (result, acquired, released) = run(Behavior::Panic).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("engine exploded"));
        assert_eq!((acquired, released), (1, 1));
    }

    #[tokio::test]
    async fn test_observer_check_delegates_to_checkpoint() {
        let check = ObserverCheck(&CancellingObserver);
        assert!(check.check().await.unwrap_err().is_cancelled());
    }
}
