//! Engine configuration, read from YAML.
//!
//! ```yaml
//! storage:
//!   path: data/app.db
//!   busy_timeout_ms: 5000
//! history:
//!   entities:
//!     TestModel:
//!       modified_timestamp_field: modified
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use changelog_core::HistoryMeta;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {source}")]
    Yaml { source: serde_yml::Error },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub history: HistoryConfig,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Database file. In-memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

const fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Per-entity history options that override what the entity definition declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub entities: BTreeMap<String, HistoryMeta>,
}

impl HistoryConfig {
    /// Override for `entity`. Names match case-insensitively, like type names
    /// everywhere else.
    pub fn meta_for(&self, entity: &str) -> Option<&HistoryMeta> {
        self.entities
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(entity))
            .map(|(_, meta)| meta)
    }
}
