//! Shared fixtures for supervision integration tests.
//!
//! Provides an in-memory store, a scriptable liveness probe, and a
//! recording launcher so scenarios run without real processes.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use session_warden::config::GlobalConfig;
use session_warden::context::SupervisorContext;
use session_warden::models::session::{NewSession, Session, SessionStatus};
use session_warden::models::workspace::Workspace;
use session_warden::persistence::db;
use session_warden::persistence::session_store::SessionStore;
use session_warden::supervisor::launcher::{LaunchOutcome, SessionLauncher, StopOutcome};
use session_warden::supervisor::probe::LivenessProbe;

/// Probe answering from a set of pids the test declares alive.
#[derive(Debug, Default)]
pub struct FakeProbe {
    alive: Mutex<HashSet<u32>>,
}

impl FakeProbe {
    pub fn with_alive(pids: &[u32]) -> Arc<Self> {
        let probe = Self::default();
        probe.alive.lock().unwrap().extend(pids.iter().copied());
        Arc::new(probe)
    }

    pub fn revive(&self, pid: u32) {
        self.alive.lock().unwrap().insert(pid);
    }

    pub fn kill(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }
}

impl LivenessProbe for FakeProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }
}

/// Launcher that records calls and answers from a script.
///
/// Sessions without a scripted outcome fail. It never touches the store,
/// so callers observe exactly what the code under test writes.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    outcomes: Mutex<HashMap<String, LaunchOutcome>>,
    launched: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn will_launch(&self, session_id: &str, pid: u32) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(session_id.to_owned(), LaunchOutcome::started(pid));
    }

    pub fn will_fail(&self, session_id: &str, error: &str) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(session_id.to_owned(), LaunchOutcome::failed(error));
    }

    pub fn will_return(&self, session_id: &str, outcome: LaunchOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(session_id.to_owned(), outcome);
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

impl SessionLauncher for FakeLauncher {
    fn launch<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = LaunchOutcome> + Send + 'a>> {
        Box::pin(async move {
            self.launched.lock().unwrap().push(session_id.to_owned());
            self.outcomes
                .lock()
                .unwrap()
                .get(session_id)
                .cloned()
                .unwrap_or_else(|| LaunchOutcome::failed("no scripted outcome"))
        })
    }

    fn stop<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = StopOutcome> + Send + 'a>> {
        Box::pin(async move {
            self.stopped.lock().unwrap().push(session_id.to_owned());
            StopOutcome::stopped()
        })
    }
}

/// Store over a fresh in-memory database.
pub async fn memory_store() -> Arc<SessionStore> {
    let pool = db::connect_memory().await.expect("in-memory db");
    Arc::new(SessionStore::new(Arc::new(pool), 100))
}

/// Config rooted in `data_dir` with defaults everywhere else.
pub fn test_config(data_dir: &std::path::Path) -> GlobalConfig {
    let toml = format!(
        "data_dir = '{}'\n",
        data_dir.display().to_string().replace('\\', "\\\\")
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Context over an in-memory database and the given probe.
///
/// The returned tempdir must outlive the context.
pub async fn test_context(probe: Arc<dyn LivenessProbe>) -> (SupervisorContext, tempfile::TempDir) {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let pool = db::connect_memory().await.expect("in-memory db");
    (SupervisorContext::with_database(config, pool, probe), temp)
}

pub async fn workspace(store: &SessionStore, name: &str) -> Workspace {
    store
        .create_workspace(name, "", "cyan")
        .await
        .expect("create workspace")
}

pub async fn idle_session(store: &SessionStore, workspace_id: &str, name: &str) -> Session {
    store
        .create_session(NewSession {
            workspace_id: workspace_id.to_owned(),
            name: name.to_owned(),
            command: "claude".to_owned(),
            ..NewSession::default()
        })
        .await
        .expect("create session")
}

/// Create a session already declared `running` under `pid`.
pub async fn running_session(
    store: &SessionStore,
    workspace_id: &str,
    name: &str,
    pid: u32,
) -> Session {
    let session = idle_session(store, workspace_id, name).await;
    store
        .update_session_status(&session.id, SessionStatus::Running, Some(pid))
        .await
        .expect("mark running")
        .expect("session exists")
}

pub async fn fetch(store: &SessionStore, session_id: &str) -> Session {
    store
        .get_session(session_id)
        .await
        .expect("get session")
        .expect("session exists")
}
