//! In-memory registry of processes this instance is watching.
//!
//! The tracker maps session ids to the pid they were launched (or adopted)
//! with. It is a cache, never the source of truth: the store's status is.
//! [`ProcessTracker::check_all`] is the one place where OS reality
//! overwrites declared state, and it only ever moves `running → stopped`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::persistence::session_store::SessionStore;

use super::probe::LivenessProbe;

/// A watched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedProcess {
    /// Process id.
    pub pid: u32,
    /// When tracking began.
    pub start_time: DateTime<Utc>,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions whose process answered the probe.
    pub alive: Vec<String>,
    /// Sessions whose process was gone; they are no longer tracked.
    pub dead: Vec<String>,
}

/// Read-only tracker snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TrackerStats {
    /// Number of tracked sessions.
    pub tracked: usize,
    /// Tracked sessions whose process is alive right now.
    pub alive: usize,
    /// Tracked sessions that the next sweep will reap.
    pub dead: usize,
}

/// Session id → pid registry with liveness sweep.
pub struct ProcessTracker {
    store: Arc<SessionStore>,
    probe: Arc<dyn LivenessProbe>,
    entries: Mutex<BTreeMap<String, TrackedProcess>>,
    sweep_lock: Mutex<()>,
}

impl std::fmt::Debug for ProcessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTracker").finish_non_exhaustive()
    }
}

impl ProcessTracker {
    /// Create an empty tracker writing repairs through `store`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, probe: Arc<dyn LivenessProbe>) -> Self {
        Self {
            store,
            probe,
            entries: Mutex::new(BTreeMap::new()),
            sweep_lock: Mutex::new(()),
        }
    }

    /// Start watching `session_id`, replacing any previous entry.
    pub async fn track(&self, session_id: &str, pid: u32) {
        let entry = TrackedProcess {
            pid,
            start_time: Utc::now(),
        };
        self.entries.lock().await.insert(session_id.to_owned(), entry);
        debug!(session_id, pid, "tracking session process");
    }

    /// Stop watching `session_id`. Absent ids are ignored.
    pub async fn untrack(&self, session_id: &str) {
        if self.entries.lock().await.remove(session_id).is_some() {
            debug!(session_id, "untracked session process");
        }
    }

    /// The tracked entry for `session_id`, if any.
    pub async fn entry(&self, session_id: &str) -> Option<TrackedProcess> {
        self.entries.lock().await.get(session_id).copied()
    }

    /// Whether the tracked process for `session_id` is alive.
    ///
    /// `false` when the session is not tracked or its pid is 0.
    pub async fn is_alive(&self, session_id: &str) -> bool {
        let entry = self.entries.lock().await.get(session_id).copied();
        entry.is_some_and(|e| self.probe_pid(e.pid))
    }

    fn probe_pid(&self, pid: u32) -> bool {
        pid != 0 && self.probe.is_alive(pid)
    }

    /// Sweep every tracked process once.
    ///
    /// Dead entries are dropped. For each, if the store still declares the
    /// session `running` under the same pid, it is moved to `stopped` with
    /// the pid cleared and an audit line is appended. A session the store
    /// shows `running` under another pid is re-tracked with that pid, so
    /// the next sweep judges the process the store actually names.
    /// Stopped, idle, errored and deleted sessions are left alone.
    pub async fn check_all(&self) -> SweepReport {
        let _sweep = self.sweep_lock.lock().await;

        let mut report = SweepReport::default();
        let mut reaped: Vec<(String, u32)> = Vec::new();

        let mut guard = self.entries.lock().await;
        for (session_id, entry) in guard.iter() {
            if self.probe_pid(entry.pid) {
                report.alive.push(session_id.clone());
            } else {
                reaped.push((session_id.clone(), entry.pid));
            }
        }
        for (session_id, _) in &reaped {
            guard.remove(session_id);
        }
        // Release the map before store I/O.
        drop(guard);

        for (session_id, pid) in reaped {
            self.repair_dead(&session_id, pid)
                .instrument(info_span!("repair_dead", session_id = %session_id, pid))
                .await;
            report.dead.push(session_id);
        }

        report
    }

    async fn repair_dead(&self, session_id: &str, pid: u32) {
        match self.store.stop_if_running(session_id, Some(pid)).await {
            Ok(Some(_)) => {
                info!(session_id, pid, "session process exited unexpectedly");
                let message = format!("Process (PID {pid}) exited unexpectedly");
                if let Err(err) = self.store.add_session_log(session_id, &message).await {
                    warn!(%err, session_id, "failed to record unexpected exit");
                }
            }
            Ok(None) => self.follow_stored_pid(session_id, pid).await,
            Err(err) => {
                warn!(%err, session_id, "failed to mark session stopped after exit");
            }
        }
    }

    async fn follow_stored_pid(&self, session_id: &str, dead_pid: u32) {
        let stored = match self.store.get_session(session_id).await {
            Ok(Some(session)) if session.is_running() => session.pid,
            Ok(_) => None,
            Err(err) => {
                warn!(%err, session_id, "failed to read session after exit");
                None
            }
        };
        let Some(stored_pid) = stored.filter(|p| *p != dead_pid) else {
            debug!(session_id, pid = dead_pid, "dead process no longer backs a running session");
            return;
        };

        let mut entries = self.entries.lock().await;
        if !entries.contains_key(session_id) {
            entries.insert(
                session_id.to_owned(),
                TrackedProcess {
                    pid: stored_pid,
                    start_time: Utc::now(),
                },
            );
            debug!(session_id, pid = stored_pid, "re-tracking pid recorded in store");
        }
    }

    /// Snapshot counts without mutating anything.
    pub async fn stats(&self) -> TrackerStats {
        let pids: Vec<u32> = self.entries.lock().await.values().map(|e| e.pid).collect();
        let alive = pids.iter().filter(|pid| self.probe_pid(**pid)).count();
        TrackerStats {
            tracked: pids.len(),
            alive,
            dead: pids.len() - alive,
        }
    }

    /// Ids currently being watched, sorted.
    pub async fn tracked_sessions(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }
}
