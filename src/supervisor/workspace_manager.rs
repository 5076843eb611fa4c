//! Workspace and session management on top of the store.

use std::sync::Arc;

use tracing::{info, warn};

use crate::models::session::{NewSession, Session, SessionStatus};
use crate::models::workspace::{Workspace, WorkspaceStats};
use crate::persistence::session_store::SessionStore;
use crate::{AppError, Result};

use super::launcher::SessionLauncher;

/// Accent colour for workspaces created without one.
pub const DEFAULT_COLOR: &str = "cyan";

/// Command for sessions created without one.
pub const DEFAULT_COMMAND: &str = "claude";

/// Request to add a session to a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// Display name; required.
    pub name: String,
    /// Start directory.
    pub working_dir: String,
    /// Description.
    pub topic: String,
    /// Command line; [`DEFAULT_COMMAND`] when blank.
    pub command: Option<String>,
}

/// Validating facade over workspace operations.
pub struct WorkspaceManager {
    store: Arc<SessionStore>,
    launcher: Arc<dyn SessionLauncher>,
}

impl std::fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceManager").finish_non_exhaustive()
    }
}

impl WorkspaceManager {
    /// Create a manager stopping sessions through `launcher`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, launcher: Arc<dyn SessionLauncher>) -> Self {
        Self { store, launcher }
    }

    /// Create a workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` when `name` is blank, or
    /// `AppError::Db` if the insert fails.
    pub async fn create_workspace(
        &self,
        name: &str,
        description: &str,
        color: Option<&str>,
    ) -> Result<Workspace> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput("workspace name is required".into()));
        }
        let color = color
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_COLOR);

        let workspace = self
            .store
            .create_workspace(name, description.trim(), color)
            .await?;
        info!(workspace_id = %workspace.id, name, "workspace created");
        Ok(workspace)
    }

    /// Make `workspace_id` the active workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workspace does not exist.
    pub async fn switch_workspace(&self, workspace_id: &str) -> Result<Workspace> {
        if !self.store.set_active_workspace(workspace_id).await? {
            return Err(not_found(workspace_id));
        }
        self.store
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| not_found(workspace_id))
    }

    /// Stop every running session in the workspace, then delete it.
    ///
    /// Stop failures are logged; the delete proceeds regardless.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workspace does not exist, or
    /// `AppError::Db` if the delete fails.
    pub async fn delete_workspace(&self, workspace_id: &str) -> Result<()> {
        if self.store.get_workspace(workspace_id).await?.is_none() {
            return Err(not_found(workspace_id));
        }

        for session in self.store.workspace_sessions(workspace_id).await? {
            if !session.is_running() {
                continue;
            }
            let outcome = self.launcher.stop(&session.id).await;
            if !outcome.success {
                warn!(
                    session_id = %session.id,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "failed to stop session before workspace delete"
                );
            }
        }

        if !self.store.delete_workspace(workspace_id).await? {
            return Err(not_found(workspace_id));
        }
        info!(workspace_id, "workspace deleted");
        Ok(())
    }

    /// Add an idle session to a workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` when the name is blank,
    /// `AppError::NotFound` if the workspace does not exist, or
    /// `AppError::Db` if the insert fails.
    pub async fn add_session_to_workspace(
        &self,
        workspace_id: &str,
        request: &SessionRequest,
    ) -> Result<Session> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput("session name is required".into()));
        }
        let command = request
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_COMMAND);

        self.store
            .create_session(NewSession {
                workspace_id: workspace_id.to_owned(),
                name: name.to_owned(),
                working_dir: request.working_dir.trim().to_owned(),
                topic: request.topic.trim().to_owned(),
                command: command.to_owned(),
            })
            .await
    }

    /// Session counts for a workspace. Idle sessions count as stopped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workspace does not exist, or
    /// `AppError::Db` if the query fails.
    pub async fn workspace_stats(&self, workspace_id: &str) -> Result<WorkspaceStats> {
        if self.store.get_workspace(workspace_id).await?.is_none() {
            return Err(not_found(workspace_id));
        }
        let sessions = self.store.workspace_sessions(workspace_id).await?;
        let mut stats = WorkspaceStats {
            total: sessions.len(),
            ..WorkspaceStats::default()
        };
        for session in &sessions {
            match session.status {
                SessionStatus::Running => stats.running += 1,
                SessionStatus::Stopped | SessionStatus::Idle => stats.stopped += 1,
                SessionStatus::Error => stats.errors += 1,
            }
        }
        Ok(stats)
    }
}

fn not_found(workspace_id: &str) -> AppError {
    AppError::NotFound(format!("workspace {workspace_id} not found"))
}
