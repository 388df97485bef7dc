//! Coordinator configuration
//!
//! Plain structs with defaults. A JSON file may override any subset of
//! the fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::multisig::MAX_MEMO_LENGTH;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub file_name: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".coordinator_data"),
            file_name: "proposals.json".to_string(),
            backup_enabled: true,
            max_backups: 5,
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Buffered events per subscriber before the slowest one lags
    pub event_capacity: usize,
    /// Longest accepted memo in bytes
    pub max_memo_length: usize,
    pub storage: StorageConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            max_memo_length: MAX_MEMO_LENGTH,
            storage: StorageConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_memo_length == 0 || self.max_memo_length > MAX_MEMO_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "max_memo_length must be between 1 and {}",
                MAX_MEMO_LENGTH
            )));
        }
        if self.storage.file_name.is_empty() {
            return Err(ConfigError::Invalid("storage.file_name is empty".to_string()));
        }
        Ok(())
    }
}
