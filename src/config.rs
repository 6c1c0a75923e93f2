//! TOML configuration for the cache, its sync feeds and write destinations.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::sync::{StreamKinds, SyncOptions};

/// Environment variable naming a config file to load.
pub const CONFIG_ENV_VAR: &str = "NOSTRUM_CONFIG";
const CONFIG_FILE_NAME: &str = "config.toml";
const DATABASE_FILE_NAME: &str = "cache.duckdb";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "nostrum", "nostrum")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub write: WriteConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = project_dirs()
            .map(|dirs| dirs.data_dir().join(DATABASE_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(DATABASE_FILE_NAME));
        Self { path }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Community scope to sync.
    pub scope: String,
    pub sources: Vec<String>,
    pub streams: Vec<String>,
    pub stream_kinds: StreamKinds,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scope: String::new(),
            sources: Vec::new(),
            streams: vec!["forum".to_string(), "general".to_string()],
            stream_kinds: StreamKinds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WriteConfig {
    /// Where locally authored events are published.
    pub destinations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CacheConfig {
    /// Resolve configuration from, in order: `explicit`, the file named by
    /// `NOSTRUM_CONFIG`, the platform config directory. Falls back to
    /// defaults when none exists. An explicitly named file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
            return Self::from_file(Path::new(&path));
        }
        if let Some(path) = Self::default_config_path().filter(|p| p.exists()) {
            return Self::from_file(&path);
        }
        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        debug!("Loading config from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CacheError::Config(e.to_string()))
    }

    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Sync options for the configured scope and feeds.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            scope: self.sync.scope.clone(),
            sources: self.sync.sources.clone(),
            streams: self.sync.streams.clone(),
        }
    }
}
