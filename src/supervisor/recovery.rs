//! Startup reconciliation of declared session state against the OS.
//!
//! After a restart the tracker is empty, so [`RecoveryCoordinator`] probes
//! every `running` session's pid directly. Stale sessions are moved to
//! `stopped` before any relaunch, and relaunches happen one at a time.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::context::SupervisorContext;
use crate::models::notification::NotificationLevel;
use crate::models::session::{Session, SessionStatus};
use crate::persistence::session_store::SessionStore;
use crate::Result;

use super::launcher::SessionLauncher;
use super::probe::LivenessProbe;
use super::process_tracker::ProcessTracker;

/// Log substring identifying a session brought back by auto-recovery.
pub const RECOVERY_MARKER: &str = "Auto-recovered";

const STALE_LOG: &str = "Marked stopped during recovery (process no longer alive)";

/// Partition of the store's `running` sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryCheck {
    /// Running sessions whose pid is alive.
    pub healthy: Vec<Session>,
    /// Running sessions with no pid or a dead one.
    pub stale: Vec<Session>,
    /// Number of sessions in the store, whatever their status.
    pub total: usize,
}

/// Result of an auto-recovery pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// Sessions relaunched successfully.
    pub recovered: Vec<String>,
    /// Sessions whose relaunch failed; they stay `stopped`.
    pub failed: Vec<String>,
}

/// Diagnostic view of the last recovery.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Healthy sessions carrying the recovery marker in their log.
    pub recovered: Vec<String>,
    /// Running sessions whose process is gone right now.
    pub stale: Vec<String>,
    /// Running sessions whose process is alive right now.
    pub healthy: Vec<String>,
}

/// Everything [`run_startup_recovery`] did.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StartupRecovery {
    /// Sessions found stale and marked stopped.
    pub marked_stopped: Vec<String>,
    /// Relaunch results; empty when auto-recovery is off.
    pub outcome: RecoveryOutcome,
    /// Healthy sessions newly registered with the tracker.
    pub adopted: Vec<String>,
    /// Report taken after recovery finished.
    pub report: RecoveryReport,
}

/// One-shot startup reconciler.
pub struct RecoveryCoordinator {
    store: Arc<SessionStore>,
    probe: Arc<dyn LivenessProbe>,
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator").finish_non_exhaustive()
    }
}

impl RecoveryCoordinator {
    /// Create a coordinator probing with `probe`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, probe: Arc<dyn LivenessProbe>) -> Self {
        Self { store, probe }
    }

    fn pid_alive(&self, pid: Option<u32>) -> bool {
        pid.is_some_and(|pid| pid != 0 && self.probe.is_alive(pid))
    }

    /// Probe every `running` session's pid. `total` counts all sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if sessions cannot be listed.
    pub async fn check_for_recovery(&self) -> Result<RecoveryCheck> {
        let sessions = self.store.get_all_sessions_list().await?;
        let mut check = RecoveryCheck {
            total: sessions.len(),
            ..RecoveryCheck::default()
        };
        for session in sessions {
            if session.status != SessionStatus::Running {
                continue;
            }
            if self.pid_alive(session.pid) {
                check.healthy.push(session);
            } else {
                check.stale.push(session);
            }
        }
        Ok(check)
    }

    /// Move every stale session to `stopped` and clear its pid.
    ///
    /// Returns the ids actually transitioned. A session stopped or
    /// relaunched between the check and the write is skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the scan fails. Per-session write failures
    /// are logged and skipped.
    pub async fn mark_stale_sessions_stopped(&self) -> Result<Vec<String>> {
        let check = self.check_for_recovery().await?;
        let mut marked = Vec::with_capacity(check.stale.len());

        for session in check.stale {
            match self.store.stop_if_running(&session.id, session.pid).await {
                Ok(Some(_)) => {
                    if let Err(err) = self.store.add_session_log(&session.id, STALE_LOG).await {
                        warn!(%err, session_id = %session.id, "failed to record stale marker");
                    }
                    info!(session_id = %session.id, pid = ?session.pid, "stale session marked stopped");
                    marked.push(session.id);
                }
                Ok(None) => {}
                Err(err) => warn!(%err, session_id = %session.id, "failed to mark stale session"),
            }
        }

        Ok(marked)
    }

    /// Relaunch stale sessions when `auto_recover` is enabled.
    ///
    /// Each stale session is marked stopped first, then attempted exactly
    /// once, sequentially. A failure never prevents the remaining attempts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if settings or sessions cannot be read.
    pub async fn recover_sessions(
        &self,
        launcher: &dyn SessionLauncher,
    ) -> Result<RecoveryOutcome> {
        let mut outcome = RecoveryOutcome::default();
        if !self.store.settings().await?.auto_recover {
            return Ok(outcome);
        }

        let stale = self.mark_stale_sessions_stopped().await?;
        for session_id in stale {
            let recovered = self
                .recover_one(launcher, &session_id)
                .instrument(info_span!("auto_recover", session_id = %session_id))
                .await;
            if recovered {
                outcome.recovered.push(session_id);
            } else {
                outcome.failed.push(session_id);
            }
        }

        info!(
            recovered = outcome.recovered.len(),
            failed = outcome.failed.len(),
            "auto-recovery finished"
        );
        Ok(outcome)
    }

    async fn recover_one(&self, launcher: &dyn SessionLauncher, session_id: &str) -> bool {
        self.log(session_id, "Auto-recovering session...").await;

        let launched = launcher.launch(session_id).await;
        let pid = match (launched.success, launched.pid) {
            (true, Some(pid)) if pid > 0 => pid,
            _ => {
                let error = launched
                    .error
                    .unwrap_or_else(|| "launcher reported no pid".to_owned());
                warn!(session_id, %error, "auto-recovery failed");
                self.log(session_id, &format!("Auto-recovery failed: {error}"))
                    .await;
                return false;
            }
        };

        if let Err(err) = self.ensure_running(session_id, pid).await {
            warn!(%err, session_id, pid, "failed to record recovered pid");
        }
        self.log(
            session_id,
            &format!("Auto-recovered successfully (new PID: {pid})"),
        )
        .await;
        info!(session_id, pid, "session auto-recovered");
        true
    }

    /// Make the store hold `running` with `pid` unless the launcher already did.
    async fn ensure_running(&self, session_id: &str, pid: u32) -> Result<()> {
        let current = self.store.get_session(session_id).await?;
        let already = current.is_some_and(|s| s.is_running() && s.pid == Some(pid));
        if !already {
            self.store
                .update_session_status(session_id, SessionStatus::Running, Some(pid))
                .await?;
        }
        Ok(())
    }

    async fn log(&self, session_id: &str, message: &str) {
        if let Err(err) = self.store.add_session_log(session_id, message).await {
            warn!(%err, session_id, "failed to append recovery log");
        }
    }

    /// Rebuild the recovered/stale/healthy sets as of now.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if sessions cannot be listed.
    pub async fn recovery_report(&self) -> Result<RecoveryReport> {
        let check = self.check_for_recovery().await?;
        Ok(RecoveryReport {
            recovered: check
                .healthy
                .iter()
                .filter(|s| s.has_log_containing(RECOVERY_MARKER))
                .map(|s| s.id.clone())
                .collect(),
            stale: check.stale.into_iter().map(|s| s.id).collect(),
            healthy: check.healthy.into_iter().map(|s| s.id).collect(),
        })
    }

    /// Track every healthy `running` session not already tracked.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if sessions cannot be listed.
    pub async fn adopt_healthy_sessions(&self, tracker: &ProcessTracker) -> Result<Vec<String>> {
        let check = self.check_for_recovery().await?;
        let mut adopted = Vec::new();
        for session in check.healthy {
            let Some(pid) = session.pid else { continue };
            if tracker.entry(&session.id).await.is_some() {
                continue;
            }
            tracker.track(&session.id, pid).await;
            adopted.push(session.id);
        }
        Ok(adopted)
    }
}

/// Reconcile the store at startup, before the sweep and HTTP surface start.
///
/// Relaunches stale sessions when `auto_recover` is set, otherwise marks
/// them stopped. Posts a `Recovery` warning when anything was stale, then
/// adopts surviving processes into the tracker.
///
/// # Errors
///
/// Returns `AppError::Db` if the store cannot be read.
pub async fn run_startup_recovery(
    ctx: &SupervisorContext,
    launcher: &dyn SessionLauncher,
) -> Result<StartupRecovery> {
    let coordinator = RecoveryCoordinator::new(Arc::clone(&ctx.store), Arc::clone(&ctx.probe));

    let check = coordinator.check_for_recovery().await?;
    info!(
        total = check.total,
        healthy = check.healthy.len(),
        stale = check.stale.len(),
        "startup recovery scan"
    );

    let mut result = StartupRecovery::default();
    if ctx.store.settings().await?.auto_recover {
        result.outcome = coordinator.recover_sessions(launcher).await?;
        result.marked_stopped = result
            .outcome
            .recovered
            .iter()
            .chain(&result.outcome.failed)
            .cloned()
            .collect();
    } else {
        result.marked_stopped = coordinator.mark_stale_sessions_stopped().await?;
    }

    if !result.marked_stopped.is_empty() {
        ctx.notifications.notify(
            NotificationLevel::Warning,
            "Recovery",
            format!(
                "{} session(s) were found stale and marked stopped",
                result.marked_stopped.len()
            ),
        );
    }

    result.adopted = coordinator.adopt_healthy_sessions(&ctx.tracker).await?;
    result.report = coordinator.recovery_report().await?;
    Ok(result)
}
