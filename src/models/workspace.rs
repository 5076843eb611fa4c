//! Workspace model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named grouping of sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Workspace {
    /// Unique record identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// UI accent colour name.
    pub color: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Construct a workspace with a generated identifier.
    #[must_use]
    pub fn new(name: String, description: String, color: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            color,
            created_at: Utc::now(),
        }
    }
}

/// Counts of a workspace's sessions by status bucket.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceStats {
    /// All sessions.
    pub total: usize,
    /// Sessions declared running.
    pub running: usize,
    /// Stopped and idle sessions.
    pub stopped: usize,
    /// Sessions in error.
    pub errors: usize,
}
