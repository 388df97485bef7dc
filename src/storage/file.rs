//! File-backed store
//!
//! Keeps the ordered map in memory and writes a JSON snapshot after every
//! committed batch. Snapshots are written to a temporary file and renamed
//! into place, with optional backup rotation. Disk work runs on the
//! blocking pool.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::kv::{scan, Batch, Store};
use super::StorageError;
use crate::config::StorageConfig;

const SNAPSHOT_VERSION: u32 = 1;

/// On-disk form: hex keys and values
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: BTreeMap<String, String>,
}

impl Snapshot {
    fn from_map(map: &BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            entries: map
                .iter()
                .map(|(k, v)| (hex::encode(k), hex::encode(v)))
                .collect(),
        }
    }

    fn into_map(self) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(StorageError::InvalidData(format!(
                "Unsupported snapshot version {}",
                self.version
            )));
        }
        self.entries
            .into_iter()
            .map(|(k, v)| {
                let key = hex::decode(&k).map_err(|e| StorageError::InvalidData(e.to_string()))?;
                let value =
                    hex::decode(&v).map_err(|e| StorageError::InvalidData(e.to_string()))?;
                Ok((key, value))
            })
            .collect()
    }
}

/// Store persisted as a snapshot file
pub struct FileStore {
    config: StorageConfig,
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl FileStore {
    /// Open the store, loading the existing snapshot if there is one
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        let path = snapshot_path(&config);
        let map = if path.exists() {
            let map = read_snapshot(&path)?;
            log::info!("Loaded {} entries from {}", map.len(), path.display());
            map
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            config,
            map: RwLock::new(map),
        })
    }

    /// Write `map` as the new snapshot on the blocking pool, handing it
    /// back once it is on disk
    async fn persist(
        &self,
        map: BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || save(&config, &map).map(|()| map))
            .await
            .map_err(|e| StorageError::IoError(std::io::Error::other(e)))?
    }

    /// List available backups
    pub fn list_backups(&self) -> Vec<usize> {
        (0..self.config.max_backups)
            .filter(|i| backup_path(&self.config, *i).exists())
            .collect()
    }

    /// Replace the current contents with a backup
    pub async fn restore_backup(&self, index: usize) -> Result<(), StorageError> {
        let backup = backup_path(&self.config, index);
        if !backup.exists() {
            return Err(StorageError::InvalidData(format!(
                "Backup {} not found",
                index
            )));
        }

        let restored = tokio::task::spawn_blocking(move || read_snapshot(&backup))
            .await
            .map_err(|e| StorageError::IoError(std::io::Error::other(e)))??;
        let mut map = self.map.write().await;
        *map = self.persist(restored).await?;
        log::warn!("Restored store from backup {}", index);
        Ok(())
    }
}

/// Get the snapshot file path
fn snapshot_path(config: &StorageConfig) -> PathBuf {
    config.data_dir.join(&config.file_name)
}

/// Get a backup file path
fn backup_path(config: &StorageConfig, index: usize) -> PathBuf {
    config
        .data_dir
        .join(format!("{}.backup.{}", config.file_name, index))
}

fn save(config: &StorageConfig, map: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), StorageError> {
    let path = snapshot_path(config);

    if config.backup_enabled && config.max_backups > 0 && path.exists() {
        rotate_backups(config)?;
        fs::copy(&path, backup_path(config, 0))?;
    }

    // Write to temporary file first
    let temp_path = config.data_dir.join(format!("{}.tmp", config.file_name));
    let file = fs::File::create(&temp_path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer(writer, &Snapshot::from_map(map))?;

    // Atomic rename
    fs::rename(&temp_path, &path)?;
    log::debug!("Wrote snapshot of {} entries", map.len());
    Ok(())
}

/// Rotate backup files
fn rotate_backups(config: &StorageConfig) -> Result<(), StorageError> {
    // Delete oldest backup
    let oldest = backup_path(config, config.max_backups - 1);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    // Shift existing backups
    for i in (0..config.max_backups - 1).rev() {
        let current = backup_path(config, i);
        if current.exists() {
            fs::rename(&current, backup_path(config, i + 1))?;
        }
    }
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let snapshot: Snapshot = serde_json::from_reader(reader)?;
    snapshot.into_map()
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        Ok(scan(&*self.map.read().await, prefix))
    }

    async fn write(&self, batch: Batch) -> Result<(), StorageError> {
        let mut map = self.map.write().await;
        let mut next = map.clone();
        batch.apply_to(&mut next);
        // Memory only changes once the snapshot is on disk
        *map = self.persist(next).await?;
        Ok(())
    }
}
