//! Raw document storage: the authoritative copy of uploaded bytes.

use crate::storage::{StorageError, validate_name};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Name and size of one raw document, as returned by listings.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Uploaded file name, extension included.
    pub name: String,
    /// Size of the raw bytes on disk.
    pub size_bytes: u64,
}

/// Create-only store for uploaded document bytes.
pub struct RawDocumentStore {
    root: PathBuf,
}

impl RawDocumentStore {
    /// Open (and create if needed) the raw store under `data_dir/raw`.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        let root = data_dir.join("raw");
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Persist uploaded bytes under `file_name`. Uploads are create-only:
    /// an existing document of the same name is never overwritten.
    pub async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<u64, StorageError> {
        validate_name(file_name)?;
        let path = self.path_for(file_name);
        if tokio::fs::try_exists(&path).await? {
            return Err(StorageError::AlreadyExists(file_name.to_string()));
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(document = file_name, size = bytes.len(), "Raw document stored");
        Ok(bytes.len() as u64)
    }

    /// Read the raw bytes for `file_name`.
    pub async fn read(&self, file_name: &str) -> Result<Vec<u8>, StorageError> {
        validate_name(file_name)?;
        let path = self.path_for(file_name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(file_name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Whether a raw document with this exact file name exists.
    pub async fn exists(&self, file_name: &str) -> Result<bool, StorageError> {
        validate_name(file_name)?;
        Ok(tokio::fs::try_exists(self.path_for(file_name)).await?)
    }

    /// Remove the raw bytes for `file_name`. Returns `false` when the file
    /// was already absent; absence is not an error.
    pub async fn delete(&self, file_name: &str) -> Result<bool, StorageError> {
        validate_name(file_name)?;
        match tokio::fs::remove_file(self.path_for(file_name)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// File name of the stored document whose stem matches, if any. The stem
    /// is the shared key for every derived store, so at most one raw document
    /// per stem may exist.
    pub async fn find_by_stem(&self, stem: &str) -> Result<Option<String>, StorageError> {
        for info in self.list().await? {
            if document_stem(&info.name) == stem {
                return Ok(Some(info.name));
            }
        }
        Ok(None)
    }

    /// List stored documents with sizes, sorted by name for stable output.
    pub async fn list(&self) -> Result<Vec<DocumentInfo>, StorageError> {
        let mut documents = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            documents.push(DocumentInfo {
                name,
                size_bytes: metadata.len(),
            });
        }
        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(documents)
    }

    fn path_for(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}

/// Internal document identity: the uploaded file name with its extension
/// stripped. Chunk directories, index metadata, and the processed manifest
/// are all keyed by this stem.
pub fn document_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name)
        .to_string()
}
