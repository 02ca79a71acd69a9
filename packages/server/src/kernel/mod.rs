//! Kernel module - job orchestration, progress and session infrastructure.

pub mod jobs;
pub mod progress;
pub mod sessions;
