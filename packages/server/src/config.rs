use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::jobs::{SupervisorConfig, WatchdogConfig};

/// Where session records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    /// `crawl_sessions` table in the job database
    Database,
    /// Shared JSON file on local disk
    File,
}

impl FromStr for SessionBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "database" | "db" | "postgres" => Ok(SessionBackend::Database),
            "file" => Ok(SessionBackend::File),
            other => Err(anyhow!("unknown session backend '{}'", other)),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub database_max_connections: u32,
    pub max_concurrent_jobs: usize,
    pub heartbeat_interval: Duration,
    pub stale_threshold: Duration,
    pub watchdog_interval: Duration,
    pub poll_interval: Duration,
    pub session_timeout: Duration,
    pub session_backend: SessionBackend,
    pub session_file: PathBuf,
    pub runner_bin: PathBuf,
    pub worker_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: parse_var("PORT", 8181)?,
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
            max_concurrent_jobs: parse_var("MAX_CONCURRENT_JOBS", 5)?,
            heartbeat_interval: Duration::from_secs(parse_var("HEARTBEAT_INTERVAL_SECS", 10)?),
            stale_threshold: Duration::from_secs(parse_var("STALE_THRESHOLD_SECS", 120)?),
            watchdog_interval: Duration::from_secs(parse_var("WATCHDOG_INTERVAL_SECS", 60)?),
            poll_interval: Duration::from_millis(parse_var("POLL_INTERVAL_MS", 1000)?),
            session_timeout: Duration::from_secs(parse_var("SESSION_TIMEOUT_SECS", 3600)?),
            session_backend: env::var("SESSION_BACKEND")
                .unwrap_or_else(|_| "database".to_string())
                .parse()
                .context("SESSION_BACKEND must be 'database' or 'file'")?,
            session_file: env::var("SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_session_file()),
            runner_bin: match env::var("RUNNER_BIN") {
                Ok(path) => PathBuf::from(path),
                Err(_) => default_runner_bin()?,
            },
            worker_id: env::var("WORKER_ID").ok().filter(|s| !s.is_empty()),
        })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let mut config = match &self.worker_id {
            Some(id) => SupervisorConfig::with_worker_id(id.clone()),
            None => SupervisorConfig::default(),
        };
        config.max_concurrent_jobs = self.max_concurrent_jobs;
        config.poll_interval = self.poll_interval;
        config.heartbeat_interval = self.heartbeat_interval;
        config.runner_bin = self.runner_bin.clone();
        config
    }

    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            interval: self.watchdog_interval,
            stale_threshold: self.stale_threshold,
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}

/// `<tmp>/crawl_sessions.json`, shared by every process on the host.
pub fn default_session_file() -> PathBuf {
    env::temp_dir().join("crawl_sessions.json")
}

/// The `runner` binary installed next to the current executable.
fn default_runner_bin() -> Result<PathBuf> {
    let exe = env::current_exe().context("cannot resolve current executable")?;
    Ok(exe.with_file_name(format!("runner{}", env::consts::EXE_SUFFIX)))
}
