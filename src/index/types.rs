//! Shared types used by the Qdrant client and the index synchronizer.

use crate::{embedding::EmbeddingClientError, storage::StorageError};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Errors emitted by the index synchronizer.
#[derive(Debug, Error)]
pub enum IndexError {
    /// No embedding credential is configured; indexing and retrieval are
    /// unavailable while structural operations (reset, delete) still work.
    #[error("Embedding backend unavailable: no credential configured")]
    BackendUnavailable,
    /// Qdrant interaction failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Embedding provider failed to produce vectors.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Chunk store read failed while gathering the document's chunks.
    #[error("Chunk store read failed: {0}")]
    Storage(#[from] StorageError),
}

/// Deterministic identity of one (document, chunk content) pair.
///
/// The hex digest is stored in each point's payload for duplicate
/// suppression; the UUID form (first 16 digest bytes) doubles as the Qdrant
/// point id, so re-indexing identical content upserts in place instead of
/// creating a duplicate entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Full SHA-256 digest, hex encoded.
    pub hex: String,
    /// Point id derived from the digest prefix.
    pub point_id: Uuid,
}

const FINGERPRINT_PREFIX_CHARS: usize = 20;

/// Compute the fingerprint for a chunk: SHA-256 over the owning document
/// stem plus the first 20 characters of the chunk text.
pub fn compute_fingerprint(document: &str, text: &str) -> Fingerprint {
    let prefix_end = text
        .char_indices()
        .nth(FINGERPRINT_PREFIX_CHARS)
        .map(|(index, _)| index)
        .unwrap_or(text.len());

    let mut hasher = Sha256::new();
    hasher.update(document.as_bytes());
    hasher.update(text[..prefix_end].as_bytes());
    let digest = hasher.finalize();

    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&digest[..16]);

    Fingerprint {
        hex: hex::encode(digest),
        point_id: Uuid::from_bytes(id_bytes),
    }
}

/// Prepared point ready for indexing.
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    /// Deterministic identity for the point.
    pub fingerprint: Fingerprint,
    /// Owning document stem.
    pub document: String,
    /// 1-based position within the document.
    pub ordinal: usize,
    /// Raw chunk text.
    pub text: String,
    /// Embedding vector produced for the chunk.
    pub vector: Vec<f32>,
}

/// Scored chunk returned by index queries.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Owning document stem.
    pub document: String,
    /// Stored chunk text.
    pub text: String,
    /// Similarity score computed by Qdrant.
    pub score: f32,
    /// Stored vector, present only when the query asked for vectors (MMR).
    pub vector: Option<Vec<f32>>,
}

/// Chunk handed to the answer engine after retrieval-mode selection.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Owning document stem.
    pub document: String,
    /// Chunk text used as answer context.
    pub text: String,
    /// Similarity score against the question.
    pub score: f32,
}

/// Summary of one `add_document_chunks` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    /// Number of new chunks embedded and inserted.
    pub indexed: usize,
    /// Chunks skipped because their fingerprint was already present.
    pub skipped_duplicates: usize,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
    #[serde(default)]
    pub(crate) vector: Option<Vec<f32>>,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResponse {
    pub(crate) result: ScrollResult,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResult {
    #[serde(default)]
    pub(crate) points: Vec<ScrollPoint>,
    #[serde(default)]
    pub(crate) next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct ScrollPoint {
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}
