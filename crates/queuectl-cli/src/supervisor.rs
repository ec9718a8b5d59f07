//! Worker process bookkeeping: PID files, spawning, and stop signals

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// PID directory for this set of workers
pub struct Supervisor {
    pid_dir: PathBuf,
}

impl Supervisor {
    pub fn new(pid_dir: impl Into<PathBuf>) -> Self {
        Self {
            pid_dir: pid_dir.into(),
        }
    }

    pub fn ensure_pid_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.pid_dir)
            .with_context(|| format!("Failed to create {}", self.pid_dir.display()))
    }

    pub fn pid_file(&self, pid: u32) -> PathBuf {
        self.pid_dir.join(format!("{}.pid", pid))
    }

    fn pid_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.pid_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "pid"))
            .collect()
    }

    /// PIDs of workers that are still running. Unreadable or stale PID files
    /// are removed along the way.
    pub fn active_workers(&self) -> Vec<u32> {
        let mut pids = Vec::new();
        for path in self.pid_files() {
            match read_pid(&path) {
                Some(pid) if process_alive(pid) => pids.push(pid),
                _ => {
                    debug!(path = %path.display(), "Removing stale PID file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
        pids.sort_unstable();
        pids
    }

    /// Start `count` detached `queuectl worker run` processes
    pub fn spawn_workers(&self, count: usize, database: &Path, verbose: u8) -> Result<Vec<u32>> {
        self.ensure_pid_dir()?;
        let exe = std::env::current_exe().context("Cannot locate the queuectl executable")?;

        let mut pids = Vec::with_capacity(count);
        for _ in 0..count {
            let mut cmd = Command::new(&exe);
            if verbose > 0 {
                cmd.arg(format!("-{}", "v".repeat(usize::from(verbose))));
            }
            cmd.arg("--database")
                .arg(database)
                .args(["worker", "run"])
                .stdin(Stdio::null());
            detach(&mut cmd);

            let child = cmd.spawn().context("Failed to spawn worker process")?;
            let pid = child.id();
            fs::write(self.pid_file(pid), pid.to_string())
                .with_context(|| format!("Failed to write PID file for {}", pid))?;
            pids.push(pid);
        }
        Ok(pids)
    }

    /// Ask every live worker to drain and exit. Returns `(pid, signalled)`.
    pub fn stop_workers(&self) -> Result<Vec<(u32, bool)>> {
        let mut results = Vec::new();
        for pid in self.active_workers() {
            let signalled = match send_terminate(pid) {
                Ok(()) => true,
                Err(e) => {
                    warn!(pid, error = %e, "Could not signal worker");
                    false
                }
            };
            self.release(pid);
            results.push((pid, signalled));
        }
        Ok(results)
    }

    /// Drop the PID file for `pid` if present
    pub fn release(&self, pid: u32) {
        let path = self.pid_file(pid);
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }
}

/// Put the child in its own process group so a terminal hangup or Ctrl+C
/// aimed at the caller does not reach it; workers stop via `worker stop`.
#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn detach(_cmd: &mut Command) {}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks existence; EPERM means it exists under another user
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).context("PID out of range")?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).with_context(|| format!("kill({}) failed", pid))
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> Result<()> {
    anyhow::bail!("stopping workers is only supported on Unix")
}
