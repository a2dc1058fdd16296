//! Engine configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use formkeep_storage::{MemoryStore, SnapshotStore, SqliteSnapshotStore};

use crate::error::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosaveConfig {
    /// Whether edit sessions snapshot dirty sections at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Snapshot interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sqlite file for snapshots; in-memory when absent
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Byte quota for the in-memory store
    #[serde(default)]
    pub quota_bytes: Option<usize>,
}

impl StorageConfig {
    /// Open the configured snapshot store.
    pub fn open_store(&self) -> Result<Box<dyn SnapshotStore>, EngineError> {
        match &self.path {
            Some(path) => {
                let path = path
                    .to_str()
                    .ok_or_else(|| EngineError::Config(format!("non-utf8 path: {}", path.display())))?;
                Ok(Box::new(SqliteSnapshotStore::open(path)?))
            }
            None => Ok(Box::new(match self.quota_bytes {
                Some(quota) => MemoryStore::with_quota(quota),
                None => MemoryStore::new(),
            })),
        }
    }
}

fn default_true() -> bool { true }
fn default_interval_ms() -> u64 { 5_000 }

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.autosave.interval_ms == 0 {
            return Err(EngineError::Config("autosave.interval_ms must be positive".into()));
        }
        Ok(())
    }
}
