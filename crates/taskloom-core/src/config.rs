//! Taskloom configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LoomError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoomConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for LoomConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            jobs: JobsConfig::default(),
            push: PushConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl LoomConfig {
    /// Load config from the default path (~/.taskloom/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoomError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LoomError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LoomError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the taskloom home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskloom")
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Database path; empty means ~/.taskloom/taskloom.db.
    #[serde(default)]
    pub path: String,
}

fn default_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: String::new(),
        }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        if self.path.is_empty() {
            LoomConfig::home_dir().join("taskloom.db")
        } else {
            PathBuf::from(&self.path)
        }
    }
}

/// Scheduled detection job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// How often the overdue scan runs.
    #[serde(default = "default_overdue_interval")]
    pub overdue_interval_secs: u64,
    /// Dedup window for task_overdue notifications.
    #[serde(default = "default_overdue_dedup")]
    pub overdue_dedup_secs: u64,
    /// How often the deadline-approaching scan runs.
    #[serde(default = "default_deadline_interval")]
    pub deadline_interval_secs: u64,
    /// Dedup window for deadline_approaching notifications.
    #[serde(default = "default_deadline_dedup")]
    pub deadline_dedup_secs: u64,
    /// How far ahead the deadline scan looks.
    #[serde(default = "default_deadline_horizon")]
    pub deadline_horizon_hours: u64,
}

fn default_overdue_interval() -> u64 {
    3600
}
fn default_overdue_dedup() -> u64 {
    3600
}
fn default_deadline_interval() -> u64 {
    21600
}
fn default_deadline_dedup() -> u64 {
    21600
}
fn default_deadline_horizon() -> u64 {
    24
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            overdue_interval_secs: default_overdue_interval(),
            overdue_dedup_secs: default_overdue_dedup(),
            deadline_interval_secs: default_deadline_interval(),
            deadline_dedup_secs: default_deadline_dedup(),
            deadline_horizon_hours: default_deadline_horizon(),
        }
    }
}

/// Push channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Per-endpoint delivery timeout.
    #[serde(default = "default_push_timeout")]
    pub timeout_secs: u64,
    /// Icon URL included in push payloads.
    #[serde(default)]
    pub icon: Option<String>,
}

fn bool_true() -> bool {
    true
}
fn default_push_timeout() -> u64 {
    10
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: bool_true(),
            timeout_secs: default_push_timeout(),
            icon: None,
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded retries for version-conflicted task updates before the
    /// conflict is surfaced to the caller.
    #[serde(default = "default_update_retries")]
    pub max_update_retries: u32,
}

fn default_update_retries() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_update_retries: default_update_retries(),
        }
    }
}
