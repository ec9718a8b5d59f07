//! Out-of-process command execution with a wall-clock timeout

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Longest stderr excerpt kept for logging
const STDERR_LOG_LIMIT: usize = 2048;

/// Classified result of running a job's command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exit status 0
    Success,
    /// Ran to completion with a non-zero (or signal-terminated, `None`) status
    NonZeroExit { code: Option<i32>, stderr: String },
    /// Still running when the timeout elapsed; the child is killed
    Timeout,
    /// Could not be launched or awaited
    ExecutionError(String),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success)
    }
}

/// Runs job commands
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str, timeout: Duration) -> CommandOutcome;
}

/// Executes the command text verbatim through the platform shell
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    fn shell_command(command: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str, limit: Duration) -> CommandOutcome {
        let child = Self::shell_command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => return CommandOutcome::ExecutionError(format!("failed to spawn: {}", e)),
        };

        // Dropping the output future on timeout drops the child, which kills it
        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => CommandOutcome::Success,
            Ok(Ok(output)) => CommandOutcome::NonZeroExit {
                code: output.status.code(),
                stderr: truncate(&String::from_utf8_lossy(&output.stderr), STDERR_LOG_LIMIT),
            },
            Ok(Err(e)) => CommandOutcome::ExecutionError(format!("failed to wait: {}", e)),
            Err(_) => CommandOutcome::Timeout,
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim_end();
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
