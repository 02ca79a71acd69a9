//! Starting runner processes.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// How a runner process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunnerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Resolves once the runner exits. Polling it again after a `select!` arm
/// lost is safe; dropping it does not kill the process.
pub type RunnerHandle = BoxFuture<'static, Result<RunnerExit>>;

pub trait RunnerLauncher: Send + Sync {
    /// Start a runner for `job_id`. An `Err` means nothing was started.
    fn launch(&self, job_id: Uuid) -> Result<RunnerHandle>;
}

/// Launches the `runner` binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    runner_bin: PathBuf,
}

impl ProcessLauncher {
    pub fn new(runner_bin: impl Into<PathBuf>) -> Self {
        Self {
            runner_bin: runner_bin.into(),
        }
    }
}

impl RunnerLauncher for ProcessLauncher {
    fn launch(&self, job_id: Uuid) -> Result<RunnerHandle> {
        // Environment is inherited so the runner sees the same DATABASE_URL.
        // kill_on_drop(false): a supervisor restart must not take runners down.
        let child = Command::new(&self.runner_bin)
            .arg(job_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.runner_bin.display()))?;

        debug!(job_id = %job_id, pid = ?child.id(), "runner process spawned");

        Ok(Box::pin(async move {
            let output = child
                .wait_with_output()
                .await
                .context("failed to wait for runner process")?;

            Ok(RunnerExit {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_fails_to_launch() {
        let launcher = ProcessLauncher::new("/nonexistent/runner-binary");
        let err = launcher.launch(Uuid::new_v4()).err().unwrap();
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_collects_exit_code_and_output() {
        // `sh <job-id>` tries to run the id as a script file and fails
        let launcher = ProcessLauncher::new("sh");
        let exit = launcher.launch(Uuid::new_v4()).unwrap().await.unwrap();
        assert!(matches!(exit.code, Some(code) if code != 0));
        assert!(!exit.success());
        assert!(!exit.stderr.is_empty());
    }
}
