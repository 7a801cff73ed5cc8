//! Out-of-process control of a running master.
//!
//! # Responsibilities
//! - Stop a master through its PID file and SIGTERM
//! - Ask a master to reload its workers with SIGUSR1
//!
//! # Design Decisions
//! - `stop` never force-kills; the timeout only bounds how long we wait
//! - A PID file naming a dead process is stale and gets removed

use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use thiserror::Error;

use crate::lifecycle::pidfile::PidFile;
use crate::lifecycle::signals::send_signal;

/// How long `stop` waits for the PID file to disappear.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// How often `stop` checks the PID file.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to signal pid {pid}: {source}")]
    Signal { pid: i32, source: nix::Error },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No PID file; nothing was signalled.
    NotRunning,
    /// The master removed its PID file in time.
    Stopped,
    /// The PID file is still there after the timeout.
    TimedOut,
    /// The PID file named a process that no longer exists; it was removed.
    Stale,
}

#[derive(Debug, Clone)]
pub struct Controller {
    pid_file: PidFile,
    timeout: Duration,
    poll_interval: Duration,
}

impl Controller {
    pub fn new(pid_file: PidFile) -> Self {
        Self {
            pid_file,
            timeout: STOP_TIMEOUT,
            poll_interval: STOP_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    pub fn stop(&self) -> Result<StopOutcome, LifecycleError> {
        let Some(pid) = self.pid_file.read() else {
            return Ok(StopOutcome::NotRunning);
        };

        let delivered = send_signal(pid, Signal::SIGTERM)
            .map_err(|source| LifecycleError::Signal { pid, source })?;
        if !delivered {
            tracing::warn!(pid, path = %self.pid_file.path().display(), "Removing stale pid file");
            self.pid_file.remove()?;
            return Ok(StopOutcome::Stale);
        }

        tracing::info!(pid, "Sent SIGTERM to master");
        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            thread::sleep(self.poll_interval);
            if !self.pid_file.exists() {
                return Ok(StopOutcome::Stopped);
            }
        }

        tracing::warn!(pid, timeout = ?self.timeout, "Master did not stop in time");
        Ok(StopOutcome::TimedOut)
    }

    /// Send SIGUSR1 to the master. Returns whether a signal was delivered.
    pub fn reload(&self) -> Result<bool, LifecycleError> {
        let Some(pid) = self.pid_file.read() else {
            return Ok(false);
        };
        let delivered = send_signal(pid, Signal::SIGUSR1)
            .map_err(|source| LifecycleError::Signal { pid, source })?;
        if delivered {
            tracing::info!(pid, "Sent SIGUSR1 to master");
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;

    #[test]
    fn stop_without_pid_file_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Controller::new(PidFile::new(dir.path().join("missing.pid")));

        let started = Instant::now();
        assert_eq!(controller.stop().unwrap(), StopOutcome::NotRunning);
        assert!(started.elapsed() < STOP_POLL_INTERVAL);
    }

    #[test]
    fn stale_pid_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pid");
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        fs::write(&path, pid.to_string()).unwrap();

        let controller = Controller::new(PidFile::new(&path));
        assert_eq!(controller.stop().unwrap(), StopOutcome::Stale);
        assert!(!path.exists());
    }

    #[test]
    fn stop_times_out_when_pid_file_stays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pid");
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        fs::write(&path, child.id().to_string()).unwrap();

        let controller = Controller::new(PidFile::new(&path))
            .with_timeout(Duration::from_millis(300), Duration::from_millis(50));
        assert_eq!(controller.stop().unwrap(), StopOutcome::TimedOut);

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn reload_without_pid_file_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Controller::new(PidFile::new(dir.path().join("server.pid")));
        assert!(!controller.reload().unwrap());
    }
}
