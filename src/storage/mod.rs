//! Durable on-disk stores: raw documents, derived chunks, and the
//! processed-set manifest.
//!
//! Layout under the configured data directory:
//!
//! ```text
//! data/
//!   raw/<file>                      raw uploaded bytes, create-only
//!   processed/<stem>/chunk_<i>.txt  derived chunks, full-replace writes
//!   processed/<stem>/metadata.json  per-document chunk manifest
//!   processed_documents.json        processed-set manifest
//! ```

pub mod chunks;
pub mod manifest;
pub mod raw;

use thiserror::Error;

pub use chunks::{ChunkManifest, ChunkRecord, ChunkStore};
pub use manifest::ProcessedManifest;
pub use raw::{DocumentInfo, RawDocumentStore, document_stem};

/// Errors raised by the on-disk stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem operation failed.
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// A create-only write targeted an existing document.
    #[error("Document already exists: {0}")]
    AlreadyExists(String),
    /// The referenced document or chunk set is not present.
    #[error("Document not found: {0}")]
    NotFound(String),
    /// The supplied name would escape the store directory or is empty.
    #[error("Invalid document name: {0}")]
    InvalidName(String),
    /// A manifest record could not be encoded or decoded.
    #[error("Malformed store record: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Reject names that are empty or contain path separators; every store keys
/// records by a flat file name.
pub(crate) fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rejects_traversal() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("a/b.txt").is_err());
        assert!(validate_name("").is_err());
    }
}
