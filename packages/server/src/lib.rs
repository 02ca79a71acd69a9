// Crawl Orchestrator - Core
//
// Durable crawl jobs in Postgres, a supervisor that runs each job in its own
// runner process, a watchdog that recovers jobs whose runner went silent, and
// an HTTP API for queueing crawls, polling progress and tracking sessions.
//
// The crawl engine itself lives in the `crawler` crate.

pub mod common;
pub mod config;
pub mod context;
pub mod kernel;
pub mod server;

pub use config::*;
