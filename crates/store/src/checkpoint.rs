//! Checkpoint persistence.
//!
//! Logical keys (`position_<job>_<interval>`) are stored under an opaque
//! SHA-256 hex digest so arbitrary job names map to safe file names.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use tally_core::Checkpoint;

use crate::error::StoreError;

/// Opaque storage key for a logical checkpoint key.
pub fn storage_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{digest:x}")
}

/// Durable key-value store for job checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read a checkpoint. `Ok(None)` when nothing was ever stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Durably store a checkpoint, replacing any previous value.
    async fn put(&self, key: &str, checkpoint: &Checkpoint) -> Result<(), StoreError>;
}

// ── File-backed store ─────────────────────────────────────────

/// One JSON file per checkpoint under `<base_dir>/<storage_name>/`.
///
/// Writes go to a temp file that is flushed to disk and then renamed over
/// the target, so a crash mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(base_dir: impl AsRef<Path>, storage_name: &str) -> Result<Self, StoreError> {
        if storage_name.trim().is_empty() {
            return Err(StoreError::InvalidName("storage name must not be empty".into()));
        }
        let dir = base_dir.as_ref().join(storage_name);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", storage_key(key)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<Checkpoint>, StoreError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint = serde_json::from_slice(&bytes)?;
        Ok(Some(checkpoint))
    }

    async fn put(&self, key: &str, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(checkpoint)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        debug!(key, path = %path.display(), position = %checkpoint.position, "checkpoint stored");
        Ok(())
    }
}

// ── In-memory store ───────────────────────────────────────────

/// Process-local checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<Checkpoint>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Decode(format!("checkpoint map lock poisoned: {e}")))?;
        Ok(entries.get(&storage_key(key)).cloned())
    }

    async fn put(&self, key: &str, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Decode(format!("checkpoint map lock poisoned: {e}")))?;
        entries.insert(storage_key(key), checkpoint.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn storage_key_is_stable_and_opaque() {
        let a = storage_key("position_jobs_day");
        assert_eq!(a, storage_key("position_jobs_day"));
        assert_ne!(a, storage_key("position_other_day"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(tmp.path(), "jobs").unwrap();

        assert!(store.get("position_a_day").await.unwrap().is_none());

        let cp = Checkpoint::new(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        store.put("position_a_day", &cp).await.unwrap();
        assert_eq!(store.get("position_a_day").await.unwrap(), Some(cp.clone()));

        // A second handle on the same directory sees the value.
        let reopened = FileCheckpointStore::new(tmp.path(), "jobs").unwrap();
        assert_eq!(reopened.get("position_a_day").await.unwrap(), Some(cp));
    }

    #[tokio::test]
    async fn file_store_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(tmp.path(), "jobs").unwrap();
        let first = Checkpoint::new(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        let second = Checkpoint::new(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());
        store.put("k", &first).await.unwrap();
        store.put("k", &second).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().position, second.position);
    }

    #[tokio::test]
    async fn put_replaces_stale_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(tmp.path(), "jobs").unwrap();
        let target = store.path_for("k");
        let leftover = target.with_extension("json.tmp");
        // Truncated write left behind by an earlier crash.
        std::fs::write(&leftover, b"{\"posi").unwrap();

        let cp = Checkpoint::new(Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap());
        store.put("k", &cp).await.unwrap();

        assert!(!leftover.exists());
        let on_disk: Checkpoint = serde_json::from_slice(&std::fs::read(&target).unwrap()).unwrap();
        assert_eq!(on_disk, cp);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(tmp.path(), "jobs").unwrap();
        std::fs::write(store.path_for("k"), b"not json").unwrap();
        assert!(store.get("k").await.is_err());
    }

    #[test]
    fn empty_storage_name_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileCheckpointStore::new(tmp.path(), "  "),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryCheckpointStore::new();
        assert!(store.is_empty());
        let cp = Checkpoint::new(Utc::now());
        store.put("k", &cp).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(cp));
        assert_eq!(store.len(), 1);
    }
}
