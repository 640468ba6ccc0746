//! Bounded-time subprocess execution.

use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Exit status and captured output of a package-manager invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// The most useful text for explaining a failure.
    pub fn failure_text(&self) -> String {
        if self.timed_out {
            return "command timed out".to_string();
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs `program args..` in `cwd`. A timeout is reported as a failed outcome
/// (the child is killed); failing to spawn at all is an `Err`.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    limit: Duration,
) -> std::io::Result<CommandOutcome> {
    debug!(program, ?args, cwd = %cwd.display(), "Running command");
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    match timeout(limit, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(CommandOutcome {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            })
        }
        Err(_) => {
            warn!(program, timeout_secs = limit.as_secs(), "Command timed out");
            Ok(CommandOutcome {
                timed_out: true,
                ..Default::default()
            })
        }
    }
}
