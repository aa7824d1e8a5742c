//! Durable slot for the operation log.
//!
//! A slot holds the whole ordered array of records and is overwritten wholesale on every
//! write, so a failed write is repaired by the next successful one.

use crate::error::{RecorderError, Result};
use crate::events::OperationRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Read a slot. A missing slot is `Ok(None)`.
    async fn load(&self, key: &str) -> Result<Option<Vec<OperationRecord>>>;

    /// Overwrite a slot with the full record array
    async fn save(&self, key: &str, records: &[OperationRecord]) -> Result<()>;

    /// Delete a slot. Removing a missing slot is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Storage kept in process memory, with failure injection for tests
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, Vec<OperationRecord>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save`/`remove` fail until switched off again
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `save` calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn slot(&self, key: &str) -> Option<Vec<OperationRecord>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn insert_slot(&self, key: &str, records: Vec<OperationRecord>) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), records);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RecorderError::PersistenceFailure(
                "storage rejected the write".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LogStorage for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<Vec<OperationRecord>>> {
        Ok(self.slot(key))
    }

    async fn save(&self, key: &str, records: &[OperationRecord]) -> Result<()> {
        self.check_writable()?;
        self.insert_slot(key, records.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// One pretty-printed `<key>.json` file per slot inside a directory
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn slot_path(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

#[async_trait]
impl LogStorage for JsonFileStorage {
    async fn load(&self, key: &str) -> Result<Option<Vec<OperationRecord>>> {
        let path = self.slot_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RecorderError::PersistenceFailure(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn save(&self, key: &str, records: &[OperationRecord]) -> Result<()> {
        let path = self.slot_path(key);
        let json = serde_json::to_vec_pretty(records)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        // readers only ever see a complete slot
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(|e| {
            RecorderError::PersistenceFailure(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            RecorderError::PersistenceFailure(format!("Failed to replace {}: {e}", path.display()))
        })?;

        debug!("Persisted {} records to {}", records.len(), path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.slot_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RecorderError::PersistenceFailure(format!(
                "Failed to remove {}: {e}",
                path.display()
            ))),
        }
    }
}
