//! Crawl job execution.
//!
//! ```text
//! Supervisor (one per host)                Runner (one process per job)
//!     │                                        │
//!     ├─► claim pending job (CAS on status)    ├─► init crawl state
//!     ├─► spawn `runner <job-id>` ───────────► ├─► drive crawl engine
//!     ├─► heartbeat while it runs              └─► completed / failed
//!     └─► reconcile exit code
//!
//! Watchdog
//!     └─► requeue or fail jobs whose heartbeat went stale
//! ```
//!
//! The job store's conditional updates are the only coordination between
//! processes.

mod job;
mod job_store;
mod launcher;
mod runner;
mod supervisor;
pub mod testing;
mod watchdog;

pub use job::{
    CrawlState, Job, JobStatus, NewJob, Recovery, CRASH_EXHAUSTED_MESSAGE,
    FORCE_CANCELLED_MESSAGE, RECOVERED_MESSAGE,
};
pub use job_store::{JobStore, PostgresJobStore};
pub use launcher::{ProcessLauncher, RunnerExit, RunnerHandle, RunnerLauncher};
pub use runner::{JobObserver, JobRunner, RunOutcome};
pub use supervisor::{exit_failure_message, Supervisor, SupervisorConfig};
pub use watchdog::{SweepReport, Watchdog, WatchdogConfig};
