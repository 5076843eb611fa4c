//! Process launcher tests against real child processes.

use std::sync::Arc;
use std::time::Duration;

use session_warden::models::session::{NewSession, SessionStatus};
use session_warden::supervisor::launcher::{ProcessLauncher, SessionLauncher};
use session_warden::supervisor::probe::{pid_alive, SystemProbe};
use session_warden::supervisor::process_tracker::ProcessTracker;

use super::test_helpers::{fetch, memory_store, workspace};

async fn wait_until_dead(pid: u32) -> bool {
    for _ in 0..50 {
        if !pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn launch_missing_session_fails() {
    let store = memory_store().await;
    let tracker = Arc::new(ProcessTracker::new(Arc::clone(&store), Arc::new(SystemProbe)));
    let launcher = ProcessLauncher::new(store, tracker);

    let outcome = launcher.launch("no-such-session").await;
    assert!(!outcome.success);
    assert!(outcome.pid.is_none());
    assert!(outcome.error.expect("error").contains("not found"));
}

#[tokio::test]
async fn spawn_failure_is_logged_on_session() {
    let store = memory_store().await;
    let ws = workspace(&store, "main").await;
    let session = store
        .create_session(NewSession {
            workspace_id: ws.id.clone(),
            name: "broken".into(),
            command: "definitely-not-a-real-binary-4f2a".into(),
            ..NewSession::default()
        })
        .await
        .expect("create");

    let tracker = Arc::new(ProcessTracker::new(Arc::clone(&store), Arc::new(SystemProbe)));
    let launcher = ProcessLauncher::new(Arc::clone(&store), Arc::clone(&tracker));

    let outcome = launcher.launch(&session.id).await;
    assert!(!outcome.success);

    let after = fetch(&store, &session.id).await;
    assert_eq!(after.status, SessionStatus::Idle);
    assert!(after.has_log_containing("Launch failed"));
    assert!(tracker.tracked_sessions().await.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn launch_then_stop_round_trip() {
    let store = memory_store().await;
    let ws = workspace(&store, "main").await;
    let session = store
        .create_session(NewSession {
            workspace_id: ws.id.clone(),
            name: "sleeper".into(),
            command: "sleep 30".into(),
            ..NewSession::default()
        })
        .await
        .expect("create");

    let tracker = Arc::new(ProcessTracker::new(Arc::clone(&store), Arc::new(SystemProbe)));
    let launcher = ProcessLauncher::new(Arc::clone(&store), Arc::clone(&tracker));

    let outcome = launcher.launch(&session.id).await;
    assert!(outcome.success, "launch failed: {:?}", outcome.error);
    let pid = outcome.pid.expect("pid");

    let running = fetch(&store, &session.id).await;
    assert_eq!(running.status, SessionStatus::Running);
    assert_eq!(running.pid, Some(pid));
    assert!(running.has_log_containing(&format!("Session launched with PID {pid}")));
    assert!(tracker.is_alive(&session.id).await);

    let again = launcher.launch(&session.id).await;
    assert!(!again.success);
    assert!(again.error.expect("error").contains("already running"));

    let stopped = launcher.stop(&session.id).await;
    assert!(stopped.success, "stop failed: {:?}", stopped.error);
    assert!(tracker.entry(&session.id).await.is_none());

    let after = fetch(&store, &session.id).await;
    assert_eq!(after.status, SessionStatus::Stopped);
    assert_eq!(after.pid, None);
    assert!(after.has_log_containing("Session stopped"));
    assert!(wait_until_dead(pid).await, "child should be killed and reaped");
}

#[cfg(unix)]
#[tokio::test]
async fn exited_child_is_reaped_and_swept() {
    let store = memory_store().await;
    let ws = workspace(&store, "main").await;
    let session = store
        .create_session(NewSession {
            workspace_id: ws.id.clone(),
            name: "short".into(),
            command: "sleep 0.2".into(),
            ..NewSession::default()
        })
        .await
        .expect("create");

    let tracker = Arc::new(ProcessTracker::new(Arc::clone(&store), Arc::new(SystemProbe)));
    let launcher = ProcessLauncher::new(Arc::clone(&store), Arc::clone(&tracker));

    let pid = launcher.launch(&session.id).await.pid.expect("pid");
    assert!(wait_until_dead(pid).await, "exited child must not linger as a zombie");

    let report = tracker.check_all().await;
    assert_eq!(report.dead, vec![session.id.clone()]);

    let after = fetch(&store, &session.id).await;
    assert_eq!(after.status, SessionStatus::Stopped);
    assert!(after.has_log_containing(&format!("Process (PID {pid}) exited unexpectedly")));
    for _ in 0..20 {
        if launcher.live_children().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("waiter task should drop the exited child");
}

#[tokio::test]
async fn stop_of_non_running_session_fails() {
    let store = memory_store().await;
    let ws = workspace(&store, "main").await;
    let session = store
        .create_session(NewSession {
            workspace_id: ws.id.clone(),
            name: "idle".into(),
            command: "sleep 1".into(),
            ..NewSession::default()
        })
        .await
        .expect("create");

    let tracker = Arc::new(ProcessTracker::new(Arc::clone(&store), Arc::new(SystemProbe)));
    let launcher = ProcessLauncher::new(Arc::clone(&store), tracker);

    let outcome = launcher.stop(&session.id).await;
    assert!(!outcome.success);
    assert!(outcome.error.expect("error").contains("not running"));
}
