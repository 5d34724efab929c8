//! Submission client: hands descriptors to the out-of-process submission
//! boundary and extracts job handles from its output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use reverie_core::defaults::SUBMIT_TIMEOUT_SECS;
use reverie_core::{Error, JobDescriptor, Result, Settings};

/// Boundary that accepts a descriptor and returns an opaque job handle.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Submit one job. A zero exit with no parseable handle is
    /// `Error::HandleMissing` — tolerated as a warning by the orchestrator.
    async fn submit(&self, descriptor: &JobDescriptor) -> Result<String>;
}

/// Production submitter: pipes the descriptor as JSON to an external
/// command's stdin and parses the handle from its stdout.
pub struct CommandSubmitter {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandSubmitter {
    pub fn new(settings: &Settings) -> Self {
        Self {
            argv: settings.submit_command.clone(),
            timeout: Duration::from_secs(SUBMIT_TIMEOUT_SECS),
        }
    }

    /// Override the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Submitter for CommandSubmitter {
    async fn submit(&self, descriptor: &JobDescriptor) -> Result<String> {
        let payload = serde_json::to_string(&descriptor.to_wire())?;

        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command = %self.argv.join(" "), algorithm = %descriptor.algorithm(), "invoking submission command");

        let mut child = cmd.spawn().map_err(|e| {
            Error::Submission {
                code: None,
                stderr: format!("failed to spawn {}: {}", self.argv[0], e),
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.as_bytes()).await?;
            // Drop closes the pipe so the child sees EOF.
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Submission {
                code: None,
                stderr: format!("submission timed out after {}s", self.timeout.as_secs()),
            })??;

        if !output.status.success() {
            return Err(Error::Submission {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_handle(&stdout).ok_or(Error::HandleMissing)
    }
}

/// Scan command output for a job handle.
///
/// The submission command may interleave log noise with its result, so
/// lines are scanned in reverse for the last one that is a complete JSON
/// object carrying a `jobId` field. String and numeric handles are both
/// accepted.
pub fn parse_handle(stdout: &str) -> Option<String> {
    for line in stdout.lines().rev() {
        let line = line.trim();
        if !(line.starts_with('{') && line.ends_with('}')) {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        match value.get("jobId") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
            _ => return None,
        }
    }
    None
}
