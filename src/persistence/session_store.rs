//! Workspace and session record store backed by `SQLite`.
//!
//! The store is the source of truth for every session's declared status.
//! Each successful mutation publishes a [`StoreEvent`] on [`SessionStore::events`];
//! each failed mutation publishes [`StoreEvent::Error`] before the error is
//! returned to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::events::EventBus;
use crate::models::session::{NewSession, Session, SessionLogEntry, SessionStatus};
use crate::models::workspace::Workspace;
use crate::{AppError, Result};

use super::db::Database;

const SESSION_COLUMNS: &str =
    "id, workspace_id, name, working_dir, topic, command, status, pid, created_at, updated_at";

const ACTIVE_WORKSPACE_KEY: &str = "active_workspace_id";
const AUTO_RECOVER_KEY: &str = "auto_recover";

/// Lifecycle events published by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A session record was inserted.
    SessionCreated(Session),
    /// A session's status or pid changed; carries the full record.
    SessionUpdated(Session),
    /// A session record was removed.
    SessionDeleted {
        /// Removed session id.
        id: String,
    },
    /// A workspace record was inserted.
    WorkspaceCreated(Workspace),
    /// A workspace and its sessions were removed.
    WorkspaceDeleted {
        /// Removed workspace id.
        id: String,
    },
    /// The active workspace changed.
    WorkspaceActivated(Workspace),
    /// A store mutation failed.
    Error {
        /// Operation that failed.
        kind: String,
        /// Rendered error.
        error: String,
    },
}

/// Persisted global settings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Re-launch stale sessions at startup.
    pub auto_recover: bool,
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: String,
    name: String,
    description: String,
    color: String,
    created_at: String,
}

impl WorkspaceRow {
    fn into_workspace(self) -> Result<Workspace> {
        Ok(Workspace {
            id: self.id,
            name: self.name,
            description: self.description,
            color: self.color,
            created_at: parse_ts(&self.created_at, "created_at")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    workspace_id: String,
    name: String,
    working_dir: String,
    topic: String,
    command: String,
    status: String,
    pid: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn into_session(self, logs: Vec<SessionLogEntry>) -> Result<Session> {
        Ok(Session {
            id: self.id,
            workspace_id: self.workspace_id,
            name: self.name,
            working_dir: self.working_dir,
            topic: self.topic,
            command: self.command,
            status: self.status.parse()?,
            pid: self.pid.and_then(|pid| u32::try_from(pid).ok()),
            created_at: parse_ts(&self.created_at, "created_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
            logs,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    session_id: String,
    time: String,
    message: String,
}

impl LogRow {
    fn into_entry(self) -> Result<(String, SessionLogEntry)> {
        let time = parse_ts(&self.time, "time")?;
        Ok((
            self.session_id,
            SessionLogEntry {
                time,
                message: self.message,
            },
        ))
    }
}

fn parse_ts(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

/// Repository for workspaces, sessions, session logs, and settings.
pub struct SessionStore {
    db: Arc<Database>,
    max_logs: u32,
    events: EventBus<StoreEvent>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("max_logs", &self.max_logs)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create a store keeping at most `max_logs` log lines per session.
    #[must_use]
    pub fn new(db: Arc<Database>, max_logs: u32) -> Self {
        Self {
            db,
            max_logs: max_logs.max(1),
            events: EventBus::new(),
        }
    }

    /// Publication point for lifecycle events.
    #[must_use]
    pub fn events(&self) -> &EventBus<StoreEvent> {
        &self.events
    }

    fn report<T>(&self, kind: &str, result: Result<T>) -> Result<T> {
        if let Err(ref err) = result {
            warn!(kind, %err, "store operation failed");
            self.events.publish(&StoreEvent::Error {
                kind: kind.to_owned(),
                error: err.to_string(),
            });
        }
        result
    }

    // ── Workspaces ──────────────────────────────────────

    /// Insert a new workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create_workspace(
        &self,
        name: &str,
        description: &str,
        color: &str,
    ) -> Result<Workspace> {
        let workspace = Workspace::new(name.to_owned(), description.to_owned(), color.to_owned());
        let result = sqlx::query(
            "INSERT INTO workspace (id, name, description, color, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&workspace.id)
        .bind(&workspace.name)
        .bind(&workspace.description)
        .bind(&workspace.color)
        .bind(workspace.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await
        .map_err(AppError::from);
        self.report("create_workspace", result)?;

        self.events
            .publish(&StoreEvent::WorkspaceCreated(workspace.clone()));
        Ok(workspace)
    }

    /// Retrieve a workspace by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        let row: Option<WorkspaceRow> = sqlx::query_as(
            "SELECT id, name, description, color, created_at FROM workspace WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(WorkspaceRow::into_workspace).transpose()
    }

    /// List all workspaces, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let rows: Vec<WorkspaceRow> = sqlx::query_as(
            "SELECT id, name, description, color, created_at FROM workspace
             ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(WorkspaceRow::into_workspace).collect()
    }

    /// Delete a workspace with all its sessions and their logs.
    ///
    /// Returns `false` when the workspace did not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails.
    pub async fn delete_workspace(&self, id: &str) -> Result<bool> {
        let result = self.delete_workspace_rows(id).await;
        let deleted = self.report("delete_workspace", result)?;
        if deleted {
            self.events
                .publish(&StoreEvent::WorkspaceDeleted { id: id.to_owned() });
        }
        Ok(deleted)
    }

    async fn delete_workspace_rows(&self, id: &str) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "DELETE FROM session_log WHERE session_id IN
             (SELECT id FROM session WHERE workspace_id = ?1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM session WHERE workspace_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM setting WHERE key = ?1 AND value = ?2")
            .bind(ACTIVE_WORKSPACE_KEY)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let removed = sqlx::query("DELETE FROM workspace WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Mark a workspace as the active one.
    ///
    /// Returns `false` when the workspace does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn set_active_workspace(&self, id: &str) -> Result<bool> {
        let Some(workspace) = self.get_workspace(id).await? else {
            return Ok(false);
        };
        let result = self.put_setting(ACTIVE_WORKSPACE_KEY, id).await;
        self.report("set_active_workspace", result)?;
        self.events
            .publish(&StoreEvent::WorkspaceActivated(workspace));
        Ok(true)
    }

    /// The currently active workspace, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn active_workspace(&self) -> Result<Option<Workspace>> {
        match self.get_setting(ACTIVE_WORKSPACE_KEY).await? {
            Some(id) => self.get_workspace(&id).await,
            None => Ok(None),
        }
    }

    // ── Sessions ────────────────────────────────────────

    /// Insert a new idle session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workspace does not exist, or
    /// `AppError::Db` if the insert fails.
    pub async fn create_session(&self, fields: NewSession) -> Result<Session> {
        let session = Session::new(fields);
        let result = self.insert_session(&session).await;
        self.report("create_session", result)?;
        self.events
            .publish(&StoreEvent::SessionCreated(session.clone()));
        Ok(session)
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        if self.get_workspace(&session.workspace_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "workspace {} not found",
                session.workspace_id
            )));
        }

        sqlx::query(
            "INSERT INTO session (id, workspace_id, name, working_dir, topic, command,
                                  status, pid, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&session.id)
        .bind(&session.workspace_id)
        .bind(&session.name)
        .bind(&session.working_dir)
        .bind(&session.topic)
        .bind(&session.command)
        .bind(session.status.as_str())
        .bind(session.pid.map(i64::from))
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a session, including its logs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM session WHERE id = ?1");
        let row: Option<SessionRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        match row {
            Some(row) => {
                let logs = self.load_logs(id).await?;
                row.into_session(logs).map(Some)
            }
            None => Ok(None),
        }
    }

    /// All sessions across all workspaces, oldest first, including logs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_all_sessions_list(&self) -> Result<Vec<Session>> {
        let query =
            format!("SELECT {SESSION_COLUMNS} FROM session ORDER BY created_at ASC, rowid ASC");
        let rows: Vec<SessionRow> = sqlx::query_as(&query)
            .fetch_all(self.db.as_ref())
            .await?;
        self.attach_logs(rows).await
    }

    /// Sessions belonging to one workspace, oldest first, including logs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn workspace_sessions(&self, workspace_id: &str) -> Result<Vec<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM session WHERE workspace_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&query)
            .bind(workspace_id)
            .fetch_all(self.db.as_ref())
            .await?;
        self.attach_logs(rows).await
    }

    /// Delete a session and its logs.
    ///
    /// Returns `false` when the session did not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let result = self.delete_session_rows(id).await;
        let deleted = self.report("delete_session", result)?;
        if deleted {
            self.events
                .publish(&StoreEvent::SessionDeleted { id: id.to_owned() });
        }
        Ok(deleted)
    }

    async fn delete_session_rows(&self, id: &str) -> Result<bool> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM session_log WHERE session_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM session WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Set a session's status and pid unconditionally.
    ///
    /// Returns `None` when the session does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` when `status` is `Running` without a
    /// positive pid, or `AppError::Db` if the update fails.
    pub async fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
        pid: Option<u32>,
    ) -> Result<Option<Session>> {
        let result = self.write_status(id, status, pid).await;
        let updated = self.report("update_session_status", result)?;
        if let Some(ref session) = updated {
            self.events
                .publish(&StoreEvent::SessionUpdated(session.clone()));
        }
        Ok(updated)
    }

    async fn write_status(
        &self,
        id: &str,
        status: SessionStatus,
        pid: Option<u32>,
    ) -> Result<Option<Session>> {
        if status == SessionStatus::Running && !pid.is_some_and(|p| p > 0) {
            return Err(AppError::InvalidInput(format!(
                "session {id} cannot be running without a pid"
            )));
        }

        let affected = sqlx::query(
            "UPDATE session SET status = ?1, pid = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(status.as_str())
        .bind(pid.map(i64::from))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?
        .rows_affected();

        if affected == 0 {
            return Ok(None);
        }
        self.get_session(id).await
    }

    /// Transition `running → stopped` and clear the pid, but only while the
    /// record is still `running` with `expected_pid` (or no pid at all).
    ///
    /// Returns the updated session when the transition happened, `None` when
    /// the session is missing, no longer running, or was relaunched under a
    /// different pid.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn stop_if_running(
        &self,
        id: &str,
        expected_pid: Option<u32>,
    ) -> Result<Option<Session>> {
        let result = self.write_stop_if_running(id, expected_pid).await;
        let updated = self.report("stop_if_running", result)?;
        if let Some(ref session) = updated {
            self.events
                .publish(&StoreEvent::SessionUpdated(session.clone()));
        }
        Ok(updated)
    }

    async fn write_stop_if_running(
        &self,
        id: &str,
        expected_pid: Option<u32>,
    ) -> Result<Option<Session>> {
        let affected = sqlx::query(
            "UPDATE session SET status = 'stopped', pid = NULL, updated_at = ?1
             WHERE id = ?2 AND status = 'running' AND (pid IS NULL OR pid = ?3)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(expected_pid.map(i64::from))
        .execute(self.db.as_ref())
        .await?
        .rows_affected();

        if affected == 0 {
            return Ok(None);
        }
        self.get_session(id).await
    }

    /// Append a line to a session's log, trimming the oldest beyond the cap.
    ///
    /// Returns `false` when the session does not exist. Does not publish an
    /// event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn add_session_log(&self, id: &str, message: &str) -> Result<bool> {
        let result = self.append_log(id, message).await;
        self.report("add_session_log", result)
    }

    async fn append_log(&self, id: &str, message: &str) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO session_log (session_id, time, message)
             SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM session WHERE id = ?1)",
        )
        .bind(id)
        .bind(Utc::now().to_rfc3339())
        .bind(message)
        .execute(self.db.as_ref())
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(false);
        }

        sqlx::query(
            "DELETE FROM session_log WHERE session_id = ?1 AND seq NOT IN
             (SELECT seq FROM session_log WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2)",
        )
        .bind(id)
        .bind(i64::from(self.max_logs))
        .execute(self.db.as_ref())
        .await?;

        Ok(true)
    }

    async fn load_logs(&self, id: &str) -> Result<Vec<SessionLogEntry>> {
        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT session_id, time, message FROM session_log
             WHERE session_id = ?1 ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter()
            .map(|row| row.into_entry().map(|(_, entry)| entry))
            .collect()
    }

    async fn attach_logs(&self, rows: Vec<SessionRow>) -> Result<Vec<Session>> {
        let log_rows: Vec<LogRow> =
            sqlx::query_as("SELECT session_id, time, message FROM session_log ORDER BY seq ASC")
                .fetch_all(self.db.as_ref())
                .await?;

        let mut by_session: HashMap<String, Vec<SessionLogEntry>> = HashMap::new();
        for row in log_rows {
            let (session_id, entry) = row.into_entry()?;
            by_session.entry(session_id).or_default().push(entry);
        }

        rows.into_iter()
            .map(|row| {
                let logs = by_session.remove(&row.id).unwrap_or_default();
                row.into_session(logs)
            })
            .collect()
    }

    // ── Settings ────────────────────────────────────────

    /// Current persisted settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn settings(&self) -> Result<Settings> {
        let auto_recover = self
            .get_setting(AUTO_RECOVER_KEY)
            .await?
            .is_some_and(|value| value == "true");
        Ok(Settings { auto_recover })
    }

    /// Persist the `auto_recover` flag.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn set_auto_recover(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "true" } else { "false" };
        let result = self.put_setting(AUTO_RECOVER_KEY, value).await;
        self.report("set_auto_recover", result)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM setting WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.db.as_ref())
            .await?;
        Ok(value.map(|(v,)| v))
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO setting (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }
}
