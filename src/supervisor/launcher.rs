//! Session process launcher.
//!
//! [`SessionLauncher`] is the seam between supervision and whatever starts
//! processes: a successful `launch` must leave the session tracked, a `stop`
//! must leave it untracked. [`ProcessLauncher`] is the `tokio::process`
//! implementation. Each spawned child gets a waiter task that reaps it on
//! exit (an unreaped zombie still answers the liveness probe) and kills it
//! when the session is stopped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::session::{Session, SessionStatus};
use crate::persistence::session_store::SessionStore;
use crate::{AppError, Result};

use super::process_tracker::ProcessTracker;

/// Result of a launch attempt.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Whether a process is now running for the session.
    pub success: bool,
    /// Pid of the new process.
    pub pid: Option<u32>,
    /// Reason for failure.
    pub error: Option<String>,
}

impl LaunchOutcome {
    /// Successful launch under `pid`.
    #[must_use]
    pub fn started(pid: u32) -> Self {
        Self {
            success: true,
            pid: Some(pid),
            error: None,
        }
    }

    /// Failed launch.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            pid: None,
            error: Some(error.into()),
        }
    }
}

/// Result of a stop attempt.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StopOutcome {
    /// Whether the session is now stopped.
    pub success: bool,
    /// Reason for failure.
    pub error: Option<String>,
}

impl StopOutcome {
    /// Successful stop.
    #[must_use]
    pub fn stopped() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Failed stop.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Starts and stops the OS process behind a session.
pub trait SessionLauncher: Send + Sync {
    /// Start the session's process.
    fn launch<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = LaunchOutcome> + Send + 'a>>;

    /// Stop the session's process.
    fn stop<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = StopOutcome> + Send + 'a>>;
}

/// Launcher spawning real child processes.
pub struct ProcessLauncher {
    store: Arc<SessionStore>,
    tracker: Arc<ProcessTracker>,
    children: Arc<Mutex<HashMap<String, ChildHandle>>>,
    next_generation: AtomicU64,
}

struct ChildHandle {
    generation: u64,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ProcessLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLauncher").finish_non_exhaustive()
    }
}

impl ProcessLauncher {
    /// Create a launcher that records through `store` and tracks via `tracker`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, tracker: Arc<ProcessTracker>) -> Self {
        Self {
            store,
            tracker,
            children: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Number of children this instance spawned that have not exited yet.
    pub async fn live_children(&self) -> usize {
        self.children.lock().await.len()
    }

    async fn launch_session(&self, session_id: &str) -> Result<u32> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

        if session.is_running() && session.pid.is_some_and(super::probe::pid_alive) {
            return Err(AppError::Launch(format!(
                "session {session_id} is already running"
            )));
        }

        let child = match spawn_child(&session) {
            Ok(child) => child,
            Err(err) => {
                let message = format!("Launch failed: {err}");
                if let Err(log_err) = self.store.add_session_log(session_id, &message).await {
                    warn!(%log_err, session_id, "failed to record launch failure");
                }
                return Err(err);
            }
        };

        let Some(pid) = child.id() else {
            reap_orphan(session_id, child).await;
            return Err(AppError::Launch(
                "spawned process exited before reporting a pid".into(),
            ));
        };

        self.watch_child(session_id, pid, child).await;
        self.tracker.track(session_id, pid).await;

        self.store
            .update_session_status(session_id, SessionStatus::Running, Some(pid))
            .await?;
        self.store
            .add_session_log(session_id, &format!("Session launched with PID {pid}"))
            .await?;

        info!(session_id, pid, command = %session.command, "session process spawned");
        Ok(pid)
    }

    async fn watch_child(&self, session_id: &str, pid: u32, mut child: Child) {
        let cancel = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = ChildHandle {
            generation,
            cancel: cancel.clone(),
        };
        if let Some(previous) = self
            .children
            .lock()
            .await
            .insert(session_id.to_owned(), handle)
        {
            previous.cancel.cancel();
        }

        let children = Arc::clone(&self.children);
        let owner = session_id.to_owned();
        tokio::spawn(
            async move {
                tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) => info!(?status, "session process exited"),
                        Err(err) => warn!(%err, "failed to wait on session process"),
                    },
                    () = cancel.cancelled() => {
                        if let Err(err) = child.start_kill() {
                            warn!(%err, "failed to kill session process");
                        }
                        if let Err(err) = child.wait().await {
                            warn!(%err, "failed to reap killed session process");
                        }
                    }
                }

                // A relaunch may have registered a newer child under the same id.
                let mut guard = children.lock().await;
                if guard.get(&owner).is_some_and(|h| h.generation == generation) {
                    guard.remove(&owner);
                }
            }
            .instrument(info_span!("session_child", session_id, pid)),
        );
    }

    async fn stop_session(&self, session_id: &str) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

        if !session.is_running() {
            return Err(AppError::Launch(format!(
                "session {session_id} is not running"
            )));
        }

        let spawned = self.children.lock().await.remove(session_id);
        match (spawned, session.pid) {
            (Some(handle), _) => handle.cancel.cancel(),
            (None, Some(pid)) => terminate_adopted(pid)?,
            (None, None) => {}
        }

        self.tracker.untrack(session_id).await;
        self.store
            .update_session_status(session_id, SessionStatus::Stopped, None)
            .await?;
        self.store
            .add_session_log(session_id, "Session stopped")
            .await?;

        info!(session_id, "session stopped");
        Ok(())
    }
}

fn spawn_child(session: &Session) -> Result<Child> {
    let mut parts = session.command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| AppError::Launch(format!("session {} has no command", session.id)))?;

    let mut cmd = Command::new(program);
    cmd.args(parts)
        .env("SESSION_WARDEN_SESSION_ID", &session.id)
        .env("SESSION_WARDEN_WORKSPACE_ID", &session.workspace_id)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);

    if !session.working_dir.is_empty() {
        cmd.current_dir(&session.working_dir);
    }

    cmd.spawn()
        .map_err(|err| AppError::Launch(format!("failed to spawn `{program}`: {err}")))
}

/// Kill and wait a child that never reported a pid, so it is not left a zombie.
async fn reap_orphan(session_id: &str, mut child: Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, session_id, "pidless child already exited");
    }
    if let Err(err) = child.wait().await {
        warn!(%err, session_id, "failed to reap pidless child");
    }
}

#[cfg(unix)]
fn terminate_adopted(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| AppError::Launch(format!("invalid pid {pid}")))?;
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(AppError::Launch(format!("failed to signal pid {pid}: {err}"))),
    }
}

#[cfg(not(unix))]
fn terminate_adopted(pid: u32) -> Result<()> {
    Err(AppError::Launch(format!(
        "cannot signal adopted process {pid} on this platform"
    )))
}

impl SessionLauncher for ProcessLauncher {
    fn launch<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = LaunchOutcome> + Send + 'a>> {
        Box::pin(async move {
            match self.launch_session(session_id).await {
                Ok(pid) => LaunchOutcome::started(pid),
                Err(err) => {
                    warn!(%err, session_id, "session launch failed");
                    LaunchOutcome::failed(err.to_string())
                }
            }
        })
    }

    fn stop<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = StopOutcome> + Send + 'a>> {
        Box::pin(async move {
            match self.stop_session(session_id).await {
                Ok(()) => StopOutcome::stopped(),
                Err(err) => {
                    warn!(%err, session_id, "session stop failed");
                    StopOutcome::failed(err.to_string())
                }
            }
        })
    }
}
