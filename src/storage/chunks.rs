//! Derived chunk storage: one directory per document holding individually
//! addressable chunk files plus a small manifest describing them.

use crate::storage::{StorageError, validate_name};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "metadata.json";

/// Per-document manifest written alongside the chunk files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkManifest {
    /// Owning document stem.
    pub document: String,
    /// Total number of chunks produced for the document.
    pub total_chunks: usize,
    /// Ordered chunk file names, `chunk_1.txt` first.
    pub chunk_files: Vec<String>,
}

/// One chunk read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// 1-based position within the document.
    pub ordinal: usize,
    /// Chunk text content.
    pub text: String,
}

/// Store for derived text chunks, keyed by document stem.
///
/// Writes are full-replace: re-processing a document discards its previous
/// chunk directory before writing, so a crash mid-write is recovered by
/// simply re-running ingestion.
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Open (and create if needed) the chunk store under `data_dir/processed`.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        let root = data_dir.join("processed");
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Persist the ordered chunk sequence for `stem`, replacing any previous
    /// set, and write the per-document manifest last.
    pub async fn write(&self, stem: &str, chunks: &[String]) -> Result<ChunkManifest, StorageError> {
        validate_name(stem)?;
        let dir = self.document_dir(stem);
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;

        let mut chunk_files = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let file_name = format!("chunk_{}.txt", index + 1);
            tokio::fs::write(dir.join(&file_name), chunk).await?;
            chunk_files.push(file_name);
        }

        let manifest = ChunkManifest {
            document: stem.to_string(),
            total_chunks: chunks.len(),
            chunk_files,
        };
        let encoded = serde_json::to_vec_pretty(&manifest)?;
        tokio::fs::write(dir.join(MANIFEST_FILE), encoded).await?;
        tracing::debug!(document = stem, chunks = manifest.total_chunks, "Chunks persisted");
        Ok(manifest)
    }

    /// Load the ordered chunks for `stem` as described by its manifest.
    pub async fn load(&self, stem: &str) -> Result<Vec<ChunkRecord>, StorageError> {
        validate_name(stem)?;
        let dir = self.document_dir(stem);
        let manifest_bytes = match tokio::fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(stem.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let manifest: ChunkManifest = serde_json::from_slice(&manifest_bytes)?;

        let mut records = Vec::with_capacity(manifest.chunk_files.len());
        for (index, file_name) in manifest.chunk_files.iter().enumerate() {
            let text = tokio::fs::read_to_string(dir.join(file_name)).await?;
            records.push(ChunkRecord {
                ordinal: index + 1,
                text,
            });
        }
        Ok(records)
    }

    /// Whether a chunk set exists for `stem`.
    pub async fn has(&self, stem: &str) -> Result<bool, StorageError> {
        validate_name(stem)?;
        Ok(tokio::fs::try_exists(self.document_dir(stem).join(MANIFEST_FILE)).await?)
    }

    /// Remove the chunk directory for `stem`. Returns `false` when nothing
    /// was there to remove.
    pub async fn delete(&self, stem: &str) -> Result<bool, StorageError> {
        validate_name(stem)?;
        match tokio::fs::remove_dir_all(self.document_dir(stem)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Discard every stored chunk set. Used by the full reprocessing sweep.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.metadata().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            }
        }
        Ok(())
    }

    fn document_dir(&self, stem: &str) -> PathBuf {
        self.root.join(stem)
    }
}
