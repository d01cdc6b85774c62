//! Processed-set manifest: the record of which documents completed ingestion.
//!
//! Stored as a JSON array of document stems. Presence means ingestion is
//! skipped (the idempotence guard); absence means re-ingestion is mandatory.
//! Writes are serialized behind an async mutex so concurrent pipelines never
//! lose an update to a read-modify-write race.

use crate::storage::StorageError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const MANIFEST_FILE: &str = "processed_documents.json";

/// File-backed set of processed document stems.
pub struct ProcessedManifest {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProcessedManifest {
    /// Open the manifest under the data directory. The file is created lazily
    /// on first insert; a missing file reads as the empty set.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(MANIFEST_FILE),
            lock: Mutex::new(()),
        })
    }

    /// Whether `stem` has completed ingestion at least once.
    pub async fn contains(&self, stem: &str) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_set().await?.contains(stem))
    }

    /// Record `stem` as processed. Inserting an already-present stem is a
    /// no-op, keeping retries idempotent.
    pub async fn insert(&self, stem: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut set = self.read_set().await?;
        if set.insert(stem.to_string()) {
            self.write_set(&set).await?;
        }
        Ok(())
    }

    /// Remove `stem` from the processed set. Returns `false` when it was
    /// already absent.
    pub async fn remove(&self, stem: &str) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().await;
        let mut set = self.read_set().await?;
        let removed = set.remove(stem);
        if removed {
            self.write_set(&set).await?;
        }
        Ok(removed)
    }

    /// Drop every entry. Used by the full reprocessing sweep so documents are
    /// genuinely re-ingested instead of skipped against an empty index.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        self.write_set(&BTreeSet::new()).await
    }

    /// Snapshot of all processed stems.
    pub async fn all(&self) -> Result<BTreeSet<String>, StorageError> {
        let _guard = self.lock.lock().await;
        self.read_set().await
    }

    async fn read_set(&self) -> Result<BTreeSet<String>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_set(&self, set: &BTreeSet<String>) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec_pretty(set)?;
        tokio::fs::write(&self.path, encoded).await?;
        Ok(())
    }
}
