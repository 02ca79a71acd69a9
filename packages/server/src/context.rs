//! Per-process application context.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::config::{Config, SessionBackend};
use crate::kernel::jobs::{JobStore, PostgresJobStore};
use crate::kernel::progress::ProgressTracker;
use crate::kernel::sessions::{FileSessionStore, PostgresSessionStore, SessionManager, SessionStore};

/// Everything a handler or background loop needs, built once in `main` and
/// shared by `Extension`.
#[derive(Clone)]
pub struct AppContext {
    pub pool: PgPool,
    pub jobs: Arc<dyn JobStore>,
    pub tracker: ProgressTracker,
    pub sessions: SessionManager,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    pub fn new(pool: PgPool, jobs: Arc<dyn JobStore>, sessions: SessionManager) -> Self {
        Self {
            tracker: ProgressTracker::new(jobs.clone()),
            pool,
            jobs,
            sessions,
            started_at: Utc::now(),
        }
    }

    pub fn from_config(config: &Config, pool: PgPool) -> Result<Self> {
        let jobs: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool.clone()));

        let session_store: Arc<dyn SessionStore> = match config.session_backend {
            SessionBackend::Database => Arc::new(PostgresSessionStore::new(pool.clone())),
            SessionBackend::File => Arc::new(FileSessionStore::new(&config.session_file)),
        };
        let sessions = SessionManager::new(session_store, config.session_timeout)?;

        Ok(Self::new(pool, jobs, sessions))
    }

    pub fn uptime_seconds(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
