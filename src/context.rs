//! Shared supervision context.
//!
//! [`SupervisorContext`] bundles the configuration, store, tracker, and
//! notification manager. `main` builds one, hands clones of its parts to
//! background tasks, and disposes of it at shutdown.

use std::sync::Arc;

use tracing::info;

use crate::config::GlobalConfig;
use crate::persistence::db::{self, Database};
use crate::persistence::session_store::SessionStore;
use crate::supervisor::notifications::NotificationManager;
use crate::supervisor::probe::{LivenessProbe, SystemProbe};
use crate::supervisor::process_tracker::ProcessTracker;
use crate::Result;

/// Long-lived handles shared by every supervision component.
#[derive(Debug, Clone)]
pub struct SupervisorContext {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Session record store.
    pub store: Arc<SessionStore>,
    /// Registry of watched processes.
    pub tracker: Arc<ProcessTracker>,
    /// Notification queue attached to the store.
    pub notifications: Arc<NotificationManager>,
    /// Liveness probe shared by the tracker and recovery.
    pub probe: Arc<dyn LivenessProbe>,
}

impl SupervisorContext {
    /// Open the database under `config.data_dir` and wire up the components.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database cannot be opened.
    pub async fn open(config: GlobalConfig) -> Result<Self> {
        let path = config.db_path();
        let pool = db::connect(&path).await?;
        info!(path = %path.display(), "session database ready");
        Ok(Self::with_database(config, pool, Arc::new(SystemProbe)))
    }

    /// Wire up the components over an already-open database.
    #[must_use]
    pub fn with_database(
        config: GlobalConfig,
        db: Database,
        probe: Arc<dyn LivenessProbe>,
    ) -> Self {
        let store = Arc::new(SessionStore::new(
            Arc::new(db),
            config.supervisor.max_session_logs,
        ));
        let tracker = Arc::new(ProcessTracker::new(Arc::clone(&store), Arc::clone(&probe)));
        let notifications = Arc::new(NotificationManager::new());
        notifications.attach_store_listeners(&store);

        Self {
            config: Arc::new(config),
            store,
            tracker,
            notifications,
            probe,
        }
    }

    /// Persist the effective `auto_recover` policy.
    ///
    /// `cli_override` wins over the config file; with neither set the stored
    /// setting is left as is. Returns the policy now in effect.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the setting cannot be read or written.
    pub async fn apply_recovery_policy(&self, cli_override: Option<bool>) -> Result<bool> {
        match cli_override.or(self.config.recovery.auto_recover) {
            Some(enabled) => {
                self.store.set_auto_recover(enabled).await?;
                Ok(enabled)
            }
            None => Ok(self.store.settings().await?.auto_recover),
        }
    }

    /// Detach observers and empty the notification queue.
    pub fn dispose(&self) {
        self.notifications.destroy();
    }
}
