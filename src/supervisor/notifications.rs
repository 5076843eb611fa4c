//! Bounded notification queue with store-driven synthesis.
//!
//! Holds the last [`MAX_QUEUE_SIZE`] notifications in insertion order and
//! republishes each one on its own [`EventBus`]. When attached to a
//! [`SessionStore`] it turns lifecycle events into human-readable messages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Utc;
use tracing::debug;

use crate::events::{EventBus, SubscriptionId};
use crate::models::notification::{Notification, NotificationLevel};
use crate::models::session::SessionStatus;
use crate::persistence::session_store::{SessionStore, StoreEvent};

/// Queue capacity; older entries are evicted first.
pub const MAX_QUEUE_SIZE: usize = 50;

/// Default slice length for [`NotificationManager::recent`].
pub const DEFAULT_RECENT: usize = 10;

/// Events published to notification observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// A notification was appended.
    Posted(Notification),
    /// The queue was emptied.
    Cleared,
}

struct Queue {
    entries: VecDeque<Notification>,
    next_id: u64,
}

struct StoreAttachment {
    store: Weak<SessionStore>,
    subscription: SubscriptionId,
}

/// Severity-tagged notification queue and fan-out point.
pub struct NotificationManager {
    queue: Mutex<Queue>,
    bus: EventBus<NotificationEvent>,
    attachment: Mutex<Option<StoreAttachment>>,
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self {
            queue: Mutex::new(Queue {
                entries: VecDeque::with_capacity(MAX_QUEUE_SIZE),
                next_id: 1,
            }),
            bus: EventBus::new(),
            attachment: Mutex::new(None),
        }
    }
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("count", &self.count())
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl NotificationManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer registration point.
    #[must_use]
    pub fn events(&self) -> &EventBus<NotificationEvent> {
        &self.bus
    }

    /// Append a notification and publish it.
    pub fn notify(
        &self,
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Notification {
        let notification = {
            let mut queue = self.lock_queue();
            let notification = Notification {
                id: queue.next_id,
                level,
                title: title.into(),
                message: message.into(),
                timestamp: Utc::now(),
            };
            queue.next_id += 1;
            queue.entries.push_back(notification.clone());
            while queue.entries.len() > MAX_QUEUE_SIZE {
                queue.entries.pop_front();
            }
            notification
        };

        debug!(id = notification.id, title = %notification.title, "notification posted");
        self.bus
            .publish(&NotificationEvent::Posted(notification.clone()));
        notification
    }

    /// The last `count` notifications, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<Notification> {
        let queue = self.lock_queue();
        let skip = queue.entries.len().saturating_sub(count);
        queue.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of queued notifications.
    #[must_use]
    pub fn count(&self) -> usize {
        self.lock_queue().entries.len()
    }

    /// Empty the queue and publish [`NotificationEvent::Cleared`].
    ///
    /// Ids keep counting from where they were.
    pub fn clear(&self) {
        self.lock_queue().entries.clear();
        self.bus.publish(&NotificationEvent::Cleared);
    }

    /// Subscribe to `store` lifecycle events. Later calls are no-ops.
    pub fn attach_store_listeners(self: &Arc<Self>, store: &Arc<SessionStore>) {
        let mut attachment = self.lock_attachment();
        if attachment.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        let subscription = store.events().subscribe(move |event: &StoreEvent| {
            if let Some(manager) = weak.upgrade() {
                manager.on_store_event(event);
            }
        });

        *attachment = Some(StoreAttachment {
            store: Arc::downgrade(store),
            subscription,
        });
    }

    /// Whether store listeners are currently attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.lock_attachment().is_some()
    }

    /// Detach from the store, drop every observer, and empty the queue.
    pub fn destroy(&self) {
        if let Some(attachment) = self.lock_attachment().take() {
            if let Some(store) = attachment.store.upgrade() {
                store.events().unsubscribe(attachment.subscription);
            }
        }
        self.bus.clear();
        self.lock_queue().entries.clear();
    }

    fn on_store_event(&self, event: &StoreEvent) {
        if let Some((level, title, message)) = describe(event) {
            self.notify(level, title, message);
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_attachment(&self) -> std::sync::MutexGuard<'_, Option<StoreAttachment>> {
        self.attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Map a store event to `(level, title, message)`.
fn describe(event: &StoreEvent) -> Option<(NotificationLevel, &'static str, String)> {
    let described = match event {
        StoreEvent::SessionCreated(session) => (
            NotificationLevel::Info,
            "Session Created",
            format!("\"{}\" added to workspace", session.name),
        ),
        StoreEvent::SessionUpdated(session) => match session.status {
            SessionStatus::Running => (
                NotificationLevel::Success,
                "Session Started",
                format!(
                    "\"{}\" is now running (PID: {})",
                    session.name,
                    session
                        .pid
                        .map_or_else(|| "unknown".to_owned(), |pid| pid.to_string())
                ),
            ),
            SessionStatus::Stopped => (
                NotificationLevel::Info,
                "Session Stopped",
                format!("\"{}\" has stopped", session.name),
            ),
            SessionStatus::Error => (
                NotificationLevel::Error,
                "Session Error",
                format!("\"{}\" encountered an error", session.name),
            ),
            SessionStatus::Idle => return None,
        },
        StoreEvent::SessionDeleted { id } => (
            NotificationLevel::Warning,
            "Session Deleted",
            format!("Session {} was removed", short_id(id)),
        ),
        StoreEvent::WorkspaceCreated(workspace) => (
            NotificationLevel::Success,
            "Workspace Created",
            format!("\"{}\" workspace is ready", workspace.name),
        ),
        StoreEvent::WorkspaceDeleted { id } => (
            NotificationLevel::Warning,
            "Workspace Deleted",
            format!("Workspace {} was removed", short_id(id)),
        ),
        StoreEvent::WorkspaceActivated(workspace) => (
            NotificationLevel::Info,
            "Workspace Switched",
            format!("Active workspace: \"{}\"", workspace.name),
        ),
        StoreEvent::Error { kind, error } => (
            NotificationLevel::Error,
            "Store Error",
            format!("{kind}: {error}"),
        ),
    };
    Some(described)
}
