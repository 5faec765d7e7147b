//! Configuration types for the tool router.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Result, RouterError};

/// Top-level configuration for the tool router.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Retention policy for finished invocation records.
    pub retention: RetentionConfig,
}

/// Retention policy for the task table.
///
/// Only records in a terminal state are ever evicted; Pending and Running
/// records stay in the table regardless of the cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum number of terminal records kept in the task table.
    ///
    /// When set, the oldest terminal records beyond the cap are evicted
    /// after each completion. `None` keeps every record for the lifetime
    /// of the router.
    pub max_terminal_records: Option<usize>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_terminal_records: None,
        }
    }
}

impl RouterConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| RouterError::Config(e.to_string()))
    }

    /// Load from the default path, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("cannot load router config from {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Default path for the router config file.
    pub fn default_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var_os("LOCALAPPDATA")
                .map(|d| PathBuf::from(d).join("wisp").join("router.toml"))
        }
        #[cfg(not(target_os = "windows"))]
        {
            std::env::var_os("HOME").map(|h| {
                PathBuf::from(h)
                    .join(".config")
                    .join("wisp")
                    .join("router.toml")
            })
        }
    }
}
