//! Operation progress: cached records and their reconciliation.

mod record;
mod tracker;

pub use record::{
    state_progress, ActiveOperation, CrawlProgress, OperationKind, OperationStatus, ProgressRecord,
    UploadProgress, COMPLETED_FROM_STORE, WAITING_FOR_WORKER, WORKER_STARTING,
};
pub use tracker::{reconcile_record, ProgressTracker};
