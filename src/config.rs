//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Supervision sweep and session log tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Seconds between liveness sweeps over tracked processes.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Maximum log entries kept per session; oldest are trimmed first.
    #[serde(default = "default_max_session_logs")]
    pub max_session_logs: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval(),
            max_session_logs: default_max_session_logs(),
        }
    }
}

/// Startup recovery policy.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RecoveryConfig {
    /// When set, overrides the persisted `auto_recover` setting at startup.
    #[serde(default)]
    pub auto_recover: Option<bool>,
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_max_session_logs() -> u32 {
    100
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the session database.
    pub data_dir: PathBuf,
    /// Port for the local observer HTTP surface; absent disables it.
    #[serde(default)]
    pub http_port: Option<u16>,
    /// Sweep interval and log bounds.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Startup recovery policy.
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the `SQLite` database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }

    /// Interval between liveness sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor.sweep_interval_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.supervisor.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "sweep_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.supervisor.max_session_logs == 0 {
            return Err(AppError::Config(
                "max_session_logs must be greater than zero".into(),
            ));
        }

        fs::create_dir_all(&self.data_dir)
            .map_err(|err| AppError::Config(format!("data_dir not creatable: {err}")))?;
        self.data_dir = self
            .data_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("data_dir invalid: {err}")))?;

        Ok(())
    }
}
