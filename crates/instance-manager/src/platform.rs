//! Platform-specific process signalling.
//!
//! Only needed for processes this process did not spawn itself (adopted from
//! an instance record) and for the graceful SIGTERM step of a stop. Owned
//! children are otherwise waited on and killed through tokio.

use crate::instance::InstanceError;

/// Check if a process with the given PID is alive.
///
/// Uses `kill(pid, 0)`. An exited process that nobody has waited on yet still
/// answers that, so a zombie counts as dead. Nothing is reaped here: a child
/// belongs to whoever holds its `Child` and must stay waitable for them.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    let Some(nix_pid) = to_pid(pid) else {
        return false;
    };

    match kill(nix_pid, None) {
        Ok(()) => !is_zombie(pid),
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Process state as reported by `ps`; `Z` is an exited, unreaped process
#[cfg(unix)]
fn is_zombie(pid: u32) -> bool {
    match std::process::Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .output()
    {
        Ok(output) => String::from_utf8_lossy(&output.stdout)
            .trim()
            .starts_with('Z'),
        // Without ps, fall back to the kill check
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    tracing::warn!("Process alive check not implemented for this platform");
    false
}

/// Ask a process to exit (SIGTERM). Returns `false` if it was already gone.
#[cfg(unix)]
pub fn terminate(pid: u32) -> Result<bool, InstanceError> {
    send(pid, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> Result<bool, InstanceError> {
    Err(InstanceError::Unsupported)
}

/// Kill a process (SIGKILL). Returns `false` if it was already gone.
#[cfg(unix)]
pub fn force_kill(pid: u32) -> Result<bool, InstanceError> {
    send(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(not(unix))]
pub fn force_kill(_pid: u32) -> Result<bool, InstanceError> {
    Err(InstanceError::Unsupported)
}

#[cfg(unix)]
fn send(pid: u32, signal: nix::sys::signal::Signal) -> Result<bool, InstanceError> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    let nix_pid = to_pid(pid).ok_or(InstanceError::InvalidPid(pid))?;
    tracing::debug!("Sending {:?} to process {}", signal, pid);

    match kill(nix_pid, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(InstanceError::Signal {
            pid,
            source: std::io::Error::from(e),
        }),
    }
}

/// Zero and values past `i32::MAX` would address process groups, not a process.
#[cfg(unix)]
fn to_pid(pid: u32) -> Option<nix::unistd::Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(nix::unistd::Pid::from_raw(raw)),
        _ => None,
    }
}
