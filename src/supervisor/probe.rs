//! Zero-effect process liveness probe.
//!
//! On Unix the probe sends signal 0 to the pid: the kernel performs the
//! existence and permission checks without delivering anything. Elsewhere
//! the pid is looked up in the process table.
//!
//! Any failure, including `EPERM` for a process owned by another user, is
//! reported as "not alive".

/// Answers whether a pid currently refers to a live process.
pub trait LivenessProbe: Send + Sync {
    /// `true` only when the process exists and may be signalled.
    fn is_alive(&self, pid: u32) -> bool;
}

impl std::fmt::Debug for dyn LivenessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LivenessProbe")
    }
}

/// Probe backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl LivenessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        pid_alive(pid)
    }
}

/// Probe a raw pid. Pid 0 is never alive.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    os_probe(pid)
}

#[cfg(unix)]
fn os_probe(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Values above i32::MAX would wrap into negative group targets.
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(raw), None).is_ok()
}

#[cfg(not(unix))]
fn os_probe(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system.process(pid).is_some()
}
