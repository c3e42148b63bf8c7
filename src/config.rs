// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for caseindex
//!
//! Loads configuration from .caseindexrc.toml in the project root or ~/.config/caseindex/config.toml

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::errors::{IndexError, Result};

/// Directory (relative to the project root) holding all index state.
pub const INDEX_DIR: &str = ".caseindex";
/// Cache directory below [`INDEX_DIR`] with the SQLite databases.
pub const CACHE_DIR: &str = "cache";

const PROJECT_CONFIG_FILE: &str = ".caseindexrc.toml";

/// Index, search and watcher tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    /// File extension of test-case documents (without the dot)
    pub extension: String,
    /// Extra directory names skipped while scanning
    pub exclude_dirs: Vec<String>,
    /// Apply .gitignore rules while scanning
    pub respect_gitignore: bool,
    /// Files committed per build transaction
    pub batch_size: usize,
    /// Watcher re-scan interval
    pub poll_interval_ms: u64,
    /// Quiet period before a changed file is re-indexed
    pub debounce_ms: u64,
    /// Attempts for a single-file update that hits lock contention
    pub update_retries: u32,
    /// First backoff delay, doubled after every locked attempt
    pub retry_backoff_ms: u64,
    /// SQLite busy timeout
    pub lock_timeout_secs: u64,
    /// Full-text hit count below which the substring scan also runs
    pub fallback_threshold: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            extension: "md".to_string(),
            exclude_dirs: Vec::new(),
            respect_gitignore: false,
            batch_size: 100,
            poll_interval_ms: 2_000,
            debounce_ms: 1_000,
            update_retries: 3,
            retry_backoff_ms: 500,
            lock_timeout_secs: 30,
            fallback_threshold: 3,
        }
    }
}

impl IndexConfig {
    /// Load configuration for a project
    ///
    /// Precedence (highest to lowest):
    /// 1. .caseindexrc.toml in the project root
    /// 2. ~/.config/caseindex/config.toml
    /// 3. built-in defaults
    pub fn load(root: &Path) -> Self {
        if let Some(config) = Self::load_from_path(&root.join(PROJECT_CONFIG_FILE)) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("caseindex").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let config: Self = match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config");
                return None;
            }
        };
        match config.validate() {
            Ok(()) => Some(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config");
                None
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.extension.trim().is_empty() {
            return Err(IndexError::Config("extension must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(IndexError::Config("batch_size must be > 0".into()));
        }
        if self.poll_interval_ms == 0 || self.debounce_ms == 0 {
            return Err(IndexError::Config(
                "poll_interval_ms and debounce_ms must be > 0".into(),
            ));
        }
        if self.update_retries == 0 {
            return Err(IndexError::Config("update_retries must be > 0".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Extension without a leading dot, lowercased.
    pub fn normalized_extension(&self) -> String {
        self.extension.trim_start_matches('.').to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = IndexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.fallback_threshold, 3);
        assert_eq!(config.debounce(), Duration::from_secs(1));
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            "debounce_ms = 250\nexclude_dirs = [\"drafts\"]\n",
        )
        .expect("write config");

        let config = IndexConfig::load(dir.path());
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.exclude_dirs, vec!["drafts".to_string()]);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = IndexConfig {
            batch_size: 0,
            ..IndexConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn extension_is_normalized() {
        let config = IndexConfig {
            extension: ".MD".into(),
            ..IndexConfig::default()
        };
        assert_eq!(config.normalized_extension(), "md");
    }
}
