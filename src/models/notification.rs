//! Notification record published to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity tag for a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    /// Neutral information.
    Info,
    /// Something completed as intended.
    Success,
    /// Attention advised.
    Warning,
    /// Something failed.
    Error,
}

/// Human-readable, severity-tagged event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    /// Sequential id starting at 1; never reused.
    pub id: u64,
    /// Severity.
    pub level: NotificationLevel,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}
