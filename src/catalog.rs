//! The file catalog: file-ID -> ordered chunk list + status.
//!
//! SPEC_FULL.md §6.1 gives this external collaborator a concrete
//! implementation: an in-process map behind a trait, optionally mirrored
//! to a JSON file on disk so a restarted process can recover in-flight
//! records. A durable database-backed implementation is a drop-in
//! replacement of the same trait and out of this crate's scope.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, StorageError};
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    New,
    Complete,
    Purge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub status: FileStatus,
    pub created_at: u64,
    pub updated_at: u64,
    pub chunks: Vec<Fingerprint>,
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Create a NEW record for `file_id`. Fails `AlreadyExists` if one is
    /// already present.
    async fn insert(&self, file_id: &str, chunks: Vec<Fingerprint>) -> Result<()>;

    async fn set_status(&self, file_id: &str, status: FileStatus) -> Result<()>;

    /// Fails `NotFound` if there is no record for `file_id`.
    async fn chunks_of(&self, file_id: &str) -> Result<Vec<Fingerprint>>;

    async fn by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>>;

    /// NEW records whose `updated_at` predates `threshold_millis`.
    async fn stale_new_before(&self, threshold_millis: u64) -> Result<Vec<FileRecord>>;

    async fn delete(&self, file_id: &str) -> Result<()>;
}

/// In-process `Catalog`, optionally mirrored to a single JSON file.
pub struct MemCatalog {
    records: RwLock<HashMap<String, FileRecord>>,
    persist_path: Option<PathBuf>,
}

impl MemCatalog {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            persist_path: None,
        }
    }

    /// Load (or create) a catalog mirrored to `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StorageError::Io(e)),
        };
        Ok(Self {
            records: RwLock::new(records),
            persist_path: Some(path),
        })
    }

    async fn persist(&self, records: &HashMap<String, FileRecord>) -> Result<()> {
        let path = match &self.persist_path {
            Some(p) => p,
            None => return Ok(()),
        };
        let json = serde_json::to_vec_pretty(records).expect("FileRecord always serializes");
        write_atomic(path, &json).await
    }
}

impl Default for MemCatalog {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    tokio::fs::write(tmp.path(), data).await?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl Catalog for MemCatalog {
    async fn insert(&self, file_id: &str, chunks: Vec<Fingerprint>) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(file_id) {
            return Err(StorageError::AlreadyExists);
        }
        let now = now_millis();
        records.insert(
            file_id.to_string(),
            FileRecord {
                file_id: file_id.to_string(),
                status: FileStatus::New,
                created_at: now,
                updated_at: now,
                chunks,
            },
        );
        self.persist(&records).await
    }

    async fn set_status(&self, file_id: &str, status: FileStatus) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(file_id).ok_or(StorageError::NotFound)?;
        record.status = status;
        record.updated_at = now_millis();
        self.persist(&records).await
    }

    async fn chunks_of(&self, file_id: &str) -> Result<Vec<Fingerprint>> {
        let records = self.records.read().await;
        records
            .get(file_id)
            .map(|r| r.chunks.clone())
            .ok_or(StorageError::NotFound)
    }

    async fn by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn stale_new_before(&self, threshold_millis: u64) -> Result<Vec<FileRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.status == FileStatus::New && r.updated_at < threshold_millis)
            .cloned()
            .collect())
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(file_id);
        self.persist(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_is_rejected_for_a_duplicate_file_id() {
        let catalog = MemCatalog::new();
        catalog.insert("f1", vec![]).await.unwrap();
        let err = catalog.insert("f1", vec![]).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists));
    }

    #[tokio::test]
    async fn status_transitions_and_chunk_lookup() {
        let catalog = MemCatalog::new();
        let chunks = vec![Fingerprint::new("f1", "c1")];
        catalog.insert("f1", chunks.clone()).await.unwrap();
        assert_eq!(catalog.chunks_of("f1").await.unwrap(), chunks);

        catalog.set_status("f1", FileStatus::Complete).await.unwrap();
        let complete = catalog.by_status(FileStatus::Complete).await.unwrap();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].file_id, "f1");
    }

    #[tokio::test]
    async fn survives_a_restart_when_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        {
            let catalog = MemCatalog::open(&path).await.unwrap();
            catalog.insert("f1", vec![Fingerprint::new("f1", "c1")]).await.unwrap();
            catalog.set_status("f1", FileStatus::Complete).await.unwrap();
        }

        let reloaded = MemCatalog::open(&path).await.unwrap();
        let chunks = reloaded.chunks_of("f1").await.unwrap();
        assert_eq!(chunks, vec![Fingerprint::new("f1", "c1")]);
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let catalog = MemCatalog::new();
        catalog.insert("f1", vec![]).await.unwrap();
        catalog.delete("f1").await.unwrap();
        assert!(matches!(
            catalog.chunks_of("f1").await.unwrap_err(),
            StorageError::NotFound
        ));
    }
}
