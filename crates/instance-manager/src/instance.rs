//! Emulator Instance
//!
//! Owns the OS process behind one emulator port and is the only thing
//! allowed to terminate it.

use std::process::ExitStatus;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::platform;
use crate::record::InstanceRecord;

/// How often a stopping process is checked for exit
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long an adopted process gets to disappear after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Instance errors
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("Child process exited before its PID could be read")]
    NoPid,
    #[error("Refusing to signal PID {0}")]
    InvalidPid(u32),
    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        source: std::io::Error,
    },
    #[error("Process {0} is still alive after SIGKILL")]
    Unkillable(u32),
    #[error("Adopted processes cannot be signalled on this platform")]
    Unsupported,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Unstarted,
    Launching,
    Probing,
    Ready,
    Stopping,
    Stopped,
    /// Launch or probing failed; cleanup moves it on to `Stopped`
    Failed,
}

/// Snapshot of a running instance that does not own the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub port: u16,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Result of [`InstanceHandle::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process was running and is now gone
    Stopped { forced: bool },
    /// Nothing to do: stopped earlier, detached, or exited on its own
    AlreadyStopped,
}

#[derive(Debug)]
enum Process {
    /// Spawned by us; waited on through tokio
    Child(Child),
    /// Recorded by an earlier invocation; signalled by PID only
    Adopted,
}

/// Owner of one emulator process
#[derive(Debug)]
pub struct InstanceHandle {
    port: u16,
    pid: u32,
    started_at: DateTime<Utc>,
    state: InstanceState,
    process: Option<Process>,
}

impl InstanceHandle {
    /// Take ownership of a freshly spawned child listening (eventually) on `port`
    pub fn from_child(port: u16, child: Child) -> Result<Self, InstanceError> {
        let pid = child.id().ok_or(InstanceError::NoPid)?;
        Ok(Self {
            port,
            pid,
            started_at: Utc::now(),
            state: InstanceState::Launching,
            process: Some(Process::Child(child)),
        })
    }

    /// Take ownership of a process started by an earlier invocation
    pub fn adopt(record: &InstanceRecord) -> Self {
        Self {
            port: record.port,
            pid: record.pid,
            started_at: record.started_at,
            state: InstanceState::Ready,
            process: Some(Process::Adopted),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            port: self.port,
            pid: self.pid,
            started_at: self.started_at,
        }
    }

    pub(crate) fn set_state(&mut self, next: InstanceState) {
        debug!("Emulator on port {}: {:?} -> {:?}", self.port, self.state, next);
        self.state = next;
    }

    /// Check if the process is still running
    pub fn is_running(&mut self) -> bool {
        match self.process.as_mut() {
            Some(Process::Child(child)) => matches!(child.try_wait(), Ok(None)),
            Some(Process::Adopted) => platform::is_alive(self.pid),
            None => false,
        }
    }

    /// Exit status of an owned child that has exited
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        match self.process.as_mut() {
            Some(Process::Child(child)) => child.try_wait().ok().flatten(),
            _ => None,
        }
    }

    pub(crate) fn describe_exit(&mut self) -> String {
        self.exit_status()
            .map(|status| status.to_string())
            .unwrap_or_else(|| "unknown status".to_string())
    }

    /// Stop the process: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Safe to call repeatedly; later calls report `AlreadyStopped`. A process
    /// that died on its own is reported as `AlreadyStopped` as well.
    pub async fn stop(&mut self, grace: Duration) -> Result<StopOutcome, InstanceError> {
        if self.process.is_none() {
            return Ok(StopOutcome::AlreadyStopped);
        }

        if !self.is_running() {
            let exit = self.describe_exit();
            warn!(
                "Emulator on port {} (pid {}) had already exited ({})",
                self.port, self.pid, exit
            );
            self.finish();
            return Ok(StopOutcome::AlreadyStopped);
        }

        self.set_state(InstanceState::Stopping);
        info!("Stopping emulator on port {} (pid {})", self.port, self.pid);

        if self.request_exit()? && self.wait_for_exit(grace).await {
            info!("Emulator on port {} stopped", self.port);
            self.finish();
            return Ok(StopOutcome::Stopped { forced: false });
        }

        warn!(
            "Emulator on port {} did not exit within {:?}, killing it",
            self.port, grace
        );
        self.kill().await?;
        self.finish();
        Ok(StopOutcome::Stopped { forced: true })
    }

    /// Give up ownership without stopping the process
    pub fn detach(mut self) -> InstanceInfo {
        let info = self.info();
        if self.process.take().is_some() {
            info!(
                "Emulator on port {} (pid {}) left running",
                self.port, self.pid
            );
        }
        info
    }

    /// Returns `false` when graceful termination is unavailable
    #[cfg(unix)]
    fn request_exit(&mut self) -> Result<bool, InstanceError> {
        platform::terminate(self.pid)?;
        Ok(true)
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) -> Result<bool, InstanceError> {
        Ok(false)
    }

    async fn wait_for_exit(&mut self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !self.is_running() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn kill(&mut self) -> Result<(), InstanceError> {
        let adopted = matches!(self.process, Some(Process::Adopted));
        if adopted {
            platform::force_kill(self.pid)?;
            return if self.wait_for_exit(KILL_WAIT).await {
                Ok(())
            } else {
                Err(InstanceError::Unkillable(self.pid))
            };
        }

        if let Some(Process::Child(child)) = self.process.as_mut() {
            if let Err(e) = child.kill().await {
                // Exited between the last check and the kill
                if !matches!(child.try_wait(), Ok(Some(_))) {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.process = None;
        self.set_state(InstanceState::Stopped);
    }
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        let Some(process) = self.process.as_mut() else {
            return;
        };

        let running = match process {
            Process::Child(child) => matches!(child.try_wait(), Ok(None)),
            Process::Adopted => platform::is_alive(self.pid),
        };
        if !running {
            return;
        }

        warn!(
            "Emulator on port {} (pid {}) dropped while running, killing it",
            self.port, self.pid
        );
        match process {
            Process::Child(child) => {
                let _ = child.start_kill();
            }
            Process::Adopted => {
                let _ = platform::force_kill(self.pid);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::process::Command;

    fn spawn_shell(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .spawn()
            .unwrap()
    }

    async fn eventually_dead(pid: u32) -> bool {
        for _ in 0..50 {
            if !platform::is_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut handle = InstanceHandle::from_child(9001, spawn_shell("exec sleep 30")).unwrap();
        assert_eq!(handle.state(), InstanceState::Launching);
        assert!(handle.is_running());

        let first = handle.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(first, StopOutcome::Stopped { forced: false });
        assert_eq!(handle.state(), InstanceState::Stopped);
        assert!(!handle.is_running());

        let second = handle.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(second, StopOutcome::AlreadyStopped);
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let mut child = spawn_shell("trap '' TERM; echo ready; exec sleep 30");
        let stdout = child.stdout.take().unwrap();
        let mut lines = BufReader::new(stdout).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("ready"));

        let mut handle = InstanceHandle::from_child(9002, child).unwrap();
        let outcome = handle.stop(Duration::from_millis(300)).await.unwrap();

        assert_eq!(outcome, StopOutcome::Stopped { forced: true });
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_stop_after_process_exited_on_its_own() {
        let mut handle = InstanceHandle::from_child(9003, spawn_shell("exit 3")).unwrap();
        for _ in 0..50 {
            if !handle.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(handle.exit_status().and_then(|s| s.code()), Some(3));

        let outcome = handle.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, StopOutcome::AlreadyStopped);
        assert_eq!(handle.state(), InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_drop_kills_running_child() {
        let handle = InstanceHandle::from_child(9004, spawn_shell("exec sleep 30")).unwrap();
        let pid = handle.pid();

        drop(handle);
        assert!(eventually_dead(pid).await);
    }

    #[tokio::test]
    async fn test_detach_leaves_process_running() {
        let handle = InstanceHandle::from_child(9005, spawn_shell("exec sleep 30")).unwrap();
        let info = handle.detach();

        assert_eq!(info.port, 9005);
        assert!(platform::is_alive(info.pid));

        assert!(platform::force_kill(info.pid).unwrap());
        assert!(eventually_dead(info.pid).await);
    }

    #[tokio::test]
    async fn test_adopted_process_stopped_by_pid() {
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let record = InstanceRecord {
            port: 9006,
            pid: child.id(),
            started_at: Utc::now(),
        };

        let mut handle = InstanceHandle::adopt(&record);
        assert_eq!(handle.state(), InstanceState::Ready);
        assert!(handle.is_running());

        let outcome = handle.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, StopOutcome::Stopped { forced: false });
        assert!(!platform::is_alive(record.pid));
    }
}
