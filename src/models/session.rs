//! Session model and lifecycle helpers.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppError;

/// Declared lifecycle status for a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, never started or parked without a process.
    Idle,
    /// Believed to have a live process.
    Running,
    /// Process ended, by request or detected exit.
    Stopped,
    /// Launcher or API layer reported a failure.
    Error,
}

impl SessionStatus {
    /// Storage and wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => Err(AppError::Db(format!("invalid session status: {other}"))),
        }
    }
}

/// One line of a session's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionLogEntry {
    /// When the line was appended.
    pub time: DateTime<Utc>,
    /// Human-readable text.
    pub message: String,
}

/// Session record owned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier; immutable after creation.
    pub id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Display name.
    pub name: String,
    /// Directory the process is started in; empty means inherit.
    pub working_dir: String,
    /// Free-text description of what the session works on.
    pub topic: String,
    /// Command line used to start the process.
    pub command: String,
    /// Declared status.
    pub status: SessionStatus,
    /// Process id; meaningful only while `status` is `Running`.
    pub pid: Option<u32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Bounded audit trail, oldest first.
    #[serde(default)]
    pub logs: Vec<SessionLogEntry>,
}

impl Session {
    /// Build an idle session with a generated identifier.
    #[must_use]
    pub fn new(fields: NewSession) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: fields.workspace_id,
            name: fields.name,
            working_dir: fields.working_dir,
            topic: fields.topic,
            command: fields.command,
            status: SessionStatus::Idle,
            pid: None,
            created_at: now,
            updated_at: now,
            logs: Vec::new(),
        }
    }

    /// Whether the session is declared running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Whether any log line contains `needle`.
    #[must_use]
    pub fn has_log_containing(&self, needle: &str) -> bool {
        self.logs.iter().any(|entry| entry.message.contains(needle))
    }
}

/// Fields supplied when creating a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSession {
    /// Owning workspace.
    pub workspace_id: String,
    /// Display name.
    pub name: String,
    /// Start directory.
    pub working_dir: String,
    /// Description.
    pub topic: String,
    /// Command line.
    pub command: String,
}
