//! Execution wrapper for external commands.
//!
//! Every cluster-management and mount invocation goes through a
//! [`CommandRunner`], keeping shell integration in one place so the rest of
//! the crate can be exercised against a fake.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::DEFAULT_COMMAND_TIMEOUT;
use crate::error::VolumeError;

/// Runs an external command to completion and returns its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`.
    ///
    /// Returns standard output on a zero exit. A non-zero exit yields
    /// [`VolumeError::ExternalCommandFailed`] carrying the captured output;
    /// exceeding the deadline yields [`VolumeError::Timeout`]. Never retries.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, VolumeError>;
}

/// [`CommandRunner`] that spawns real processes with a fixed deadline.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

/// Render a command line for logs and error messages.
pub(crate) fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_owned();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, VolumeError> {
        let command = command_line(program, args);
        debug!(%command, "running external command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VolumeError::ExternalCommandFailed {
                command: command.clone(),
                output: e.to_string(),
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| VolumeError::ExternalCommandFailed {
                command: command.clone(),
                output: e.to_string(),
            })?,
            Err(_) => {
                return Err(VolumeError::Timeout {
                    command,
                    after: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut combined = stderr.trim_end().to_owned();
        if !stdout.trim().is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(stdout.trim_end());
        }
        if combined.is_empty() {
            combined = format!("exit status {}", output.status);
        }
        Err(VolumeError::ExternalCommandFailed {
            command,
            output: combined,
        })
    }
}
