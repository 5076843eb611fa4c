use std::sync::{Arc, Mutex};

use session_warden::models::session::{NewSession, SessionStatus};
use session_warden::persistence::db;
use session_warden::persistence::session_store::{SessionStore, StoreEvent};
use session_warden::AppError;

async fn store_with_cap(max_logs: u32) -> SessionStore {
    let pool = db::connect_memory().await.expect("db connect");
    SessionStore::new(Arc::new(pool), max_logs)
}

fn new_session(workspace_id: &str, name: &str) -> NewSession {
    NewSession {
        workspace_id: workspace_id.to_owned(),
        name: name.to_owned(),
        working_dir: "/tmp".to_owned(),
        topic: "t".to_owned(),
        command: "claude".to_owned(),
    }
}

fn record(store: &SessionStore) -> Arc<Mutex<Vec<StoreEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    store
        .events()
        .subscribe(move |e: &StoreEvent| sink.lock().unwrap().push(e.clone()));
    events
}

#[tokio::test]
async fn in_memory_connect_creates_tables() {
    let pool = db::connect_memory().await.expect("connect");
    for table in ["workspace", "session", "session_log", "setting"] {
        let query = format!("SELECT COUNT(*) FROM {table}");
        let row: (i64,) = sqlx::query_as(&query)
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("table '{table}' should be queryable: {e}"));
        assert_eq!(row.0, 0);
    }
}

#[tokio::test]
async fn file_database_persists_across_connections() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("nested").join("sessions.db");

    {
        let pool = db::connect(&path).await.expect("connect");
        let store = SessionStore::new(Arc::new(pool.clone()), 10);
        store.create_workspace("w", "", "cyan").await.expect("ws");
        pool.close().await;
    }

    let pool = db::connect(&path).await.expect("reconnect");
    let store = SessionStore::new(Arc::new(pool), 10);
    assert_eq!(store.list_workspaces().await.expect("list").len(), 1);
}

#[tokio::test]
async fn session_crud_round_trip() {
    let store = store_with_cap(100).await;
    let ws = store.create_workspace("w", "d", "red").await.expect("ws");
    let created = store.create_session(new_session(&ws.id, "a")).await.expect("create");

    let fetched = store
        .get_session(&created.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(fetched.name, "a");
    assert_eq!(fetched.working_dir, "/tmp");
    assert_eq!(fetched.status, SessionStatus::Idle);

    store.create_session(new_session(&ws.id, "b")).await.expect("create b");
    let all = store.get_all_sessions_list().await.expect("all");
    assert_eq!(
        all.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    assert_eq!(store.workspace_sessions(&ws.id).await.expect("ws").len(), 2);

    assert!(store.delete_session(&created.id).await.expect("delete"));
    assert!(!store.delete_session(&created.id).await.expect("delete again"));
    assert!(store.get_session(&created.id).await.expect("get").is_none());
}

#[tokio::test]
async fn session_in_unknown_workspace_is_not_found() {
    let store = store_with_cap(100).await;
    let events = record(&store);

    let err = store
        .create_session(new_session("missing", "a"))
        .await
        .expect_err("no workspace");
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(matches!(
        events.lock().unwrap().as_slice(),
        [StoreEvent::Error { kind, .. }] if kind == "create_session"
    ));
}

#[tokio::test]
async fn running_requires_positive_pid() {
    let store = store_with_cap(100).await;
    let ws = store.create_workspace("w", "", "cyan").await.expect("ws");
    let s = store.create_session(new_session(&ws.id, "a")).await.expect("create");

    for pid in [None, Some(0)] {
        let err = store
            .update_session_status(&s.id, SessionStatus::Running, pid)
            .await
            .expect_err("invalid");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    let running = store
        .update_session_status(&s.id, SessionStatus::Running, Some(99))
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(running.pid, Some(99));
}

#[tokio::test]
async fn update_of_missing_session_returns_none() {
    let store = store_with_cap(100).await;
    let events = record(&store);
    let result = store
        .update_session_status("ghost", SessionStatus::Stopped, None)
        .await
        .expect("update");
    assert!(result.is_none());
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stop_if_running_respects_pid_guard() {
    let store = store_with_cap(100).await;
    let ws = store.create_workspace("w", "", "cyan").await.expect("ws");
    let s = store.create_session(new_session(&ws.id, "a")).await.expect("create");
    store
        .update_session_status(&s.id, SessionStatus::Running, Some(10))
        .await
        .expect("running");

    assert!(store
        .stop_if_running(&s.id, Some(11))
        .await
        .expect("cas")
        .is_none());

    let stopped = store
        .stop_if_running(&s.id, Some(10))
        .await
        .expect("cas")
        .expect("transitioned");
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert_eq!(stopped.pid, None);

    assert!(store
        .stop_if_running(&s.id, Some(10))
        .await
        .expect("cas")
        .is_none());
}

#[tokio::test]
async fn logs_are_bounded_oldest_first() {
    let store = store_with_cap(3).await;
    let ws = store.create_workspace("w", "", "cyan").await.expect("ws");
    let s = store.create_session(new_session(&ws.id, "a")).await.expect("create");
    let events = record(&store);

    for i in 0..5 {
        assert!(store.add_session_log(&s.id, &format!("line {i}")).await.expect("log"));
    }
    assert!(!store.add_session_log("ghost", "x").await.expect("log"));

    let logs = store
        .get_session(&s.id)
        .await
        .expect("get")
        .expect("exists")
        .logs;
    let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
    assert!(events.lock().unwrap().is_empty(), "logging publishes nothing");
}

#[tokio::test]
async fn workspace_delete_cascades_and_clears_active() {
    let store = store_with_cap(100).await;
    let ws = store.create_workspace("w", "", "cyan").await.expect("ws");
    let s = store.create_session(new_session(&ws.id, "a")).await.expect("create");
    store.add_session_log(&s.id, "hello").await.expect("log");
    assert!(store.set_active_workspace(&ws.id).await.expect("activate"));
    assert_eq!(
        store.active_workspace().await.expect("active").map(|w| w.id),
        Some(ws.id.clone())
    );

    let events = record(&store);
    assert!(store.delete_workspace(&ws.id).await.expect("delete"));

    assert!(store.get_session(&s.id).await.expect("get").is_none());
    assert!(store.active_workspace().await.expect("active").is_none());
    assert_eq!(
        *events.lock().unwrap(),
        vec![StoreEvent::WorkspaceDeleted { id: ws.id.clone() }]
    );
    assert!(!store.delete_workspace(&ws.id).await.expect("delete again"));
    assert!(!store.set_active_workspace(&ws.id).await.expect("activate gone"));
}

#[tokio::test]
async fn each_change_publishes_once() {
    let store = store_with_cap(100).await;
    let events = record(&store);

    let ws = store.create_workspace("w", "", "cyan").await.expect("ws");
    let s = store.create_session(new_session(&ws.id, "a")).await.expect("create");
    store
        .update_session_status(&s.id, SessionStatus::Running, Some(5))
        .await
        .expect("running");

    let kinds: Vec<&'static str> = events
        .lock()
        .unwrap()
        .iter()
        .map(|e| match e {
            StoreEvent::WorkspaceCreated(_) => "workspace_created",
            StoreEvent::SessionCreated(_) => "session_created",
            StoreEvent::SessionUpdated(_) => "session_updated",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["workspace_created", "session_created", "session_updated"]
    );
}

#[tokio::test]
async fn auto_recover_setting_round_trips() {
    let store = store_with_cap(100).await;
    assert!(!store.settings().await.expect("settings").auto_recover);

    store.set_auto_recover(true).await.expect("enable");
    assert!(store.settings().await.expect("settings").auto_recover);

    store.set_auto_recover(false).await.expect("disable");
    assert!(!store.settings().await.expect("settings").auto_recover);
}
