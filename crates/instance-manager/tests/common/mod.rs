//! Stand-in emulators for lifecycle tests.
//!
//! `sleep` cannot listen on a port, so the listening launcher binds the socket
//! itself and lets only the spawned child inherit it. The port then stays
//! reachable exactly as long as that child lives.

#![allow(dead_code)]

use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dynamo_emulator_instance::{InstanceHandle, Launch, LaunchError, LaunchSpec, ReadinessProbe};
use tokio::process::Command;

pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn fast_probe() -> ReadinessProbe {
    ReadinessProbe::new(Duration::from_secs(5), Duration::from_millis(25))
}

pub fn sleeper() -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("exec sleep 30").process_group(0);
    cmd
}

/// Whether `pid` exists and has not exited. Never reaps, so an owning `Child`
/// stays waitable.
pub fn is_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only checks that the process exists
    if unsafe { libc::kill(pid as libc::pid_t, 0) } != 0 {
        return false;
    }
    std::process::Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .output()
        .map(|output| !String::from_utf8_lossy(&output.stdout).trim().starts_with('Z'))
        .unwrap_or(true)
}

/// Wait for a pid to disappear
pub async fn eventually_dead(pid: u32) -> bool {
    for _ in 0..100 {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// `sleep` holding a listening socket on the spec's port
#[derive(Debug, Default)]
pub struct ListeningLauncher;

#[async_trait]
impl Launch for ListeningLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<InstanceHandle, LaunchError> {
        let listener = std::net::TcpListener::bind(("0.0.0.0", spec.port())).map_err(|source| {
            LaunchError::PortInUse {
                port: spec.port(),
                source,
            }
        })?;
        let fd = listener.as_raw_fd();

        let mut cmd = sleeper();
        // SAFETY: dup(2) is async-signal-safe
        unsafe {
            cmd.pre_exec(move || {
                if libc::dup(fd) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: "sh".into(),
            source,
        })?;
        drop(listener);

        Ok(InstanceHandle::from_child(spec.port(), child)?)
    }
}

/// Spawns `sleep` that never opens its port
#[derive(Debug, Default)]
pub struct SilentLauncher;

#[async_trait]
impl Launch for SilentLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<InstanceHandle, LaunchError> {
        let child = sleeper().spawn().map_err(|source| LaunchError::Spawn {
            program: "sh".into(),
            source,
        })?;
        Ok(InstanceHandle::from_child(spec.port(), child)?)
    }
}

/// Exits straight away with status 1
#[derive(Debug, Default)]
pub struct CrashingLauncher;

#[async_trait]
impl Launch for CrashingLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<InstanceHandle, LaunchError> {
        let child = Command::new("sh")
            .arg("-c")
            .arg("exit 1")
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: "sh".into(),
                source,
            })?;
        Ok(InstanceHandle::from_child(spec.port(), child)?)
    }
}

/// Counts launches and remembers the pids handed out
#[derive(Debug, Default)]
pub struct Recording<L> {
    inner: L,
    launches: AtomicUsize,
    pids: Mutex<Vec<u32>>,
}

impl<L> Recording<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            launches: AtomicUsize::new(0),
            pids: Mutex::new(Vec::new()),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.pids.lock().unwrap().clone()
    }
}

#[async_trait]
impl<L: Launch> Launch for Recording<L> {
    async fn launch(&self, spec: &LaunchSpec) -> Result<InstanceHandle, LaunchError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let handle = self.inner.launch(spec).await?;
        self.pids.lock().unwrap().push(handle.pid());
        Ok(handle)
    }
}
