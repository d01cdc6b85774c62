//! Ingestion pipeline: extract, split, persist, and record as processed.

pub mod chunking;

use crate::{
    config::Config,
    extract::{ExtractionError, TextExtractor},
    storage::{ChunkStore, ProcessedManifest, RawDocumentStore, StorageError, document_stem},
};
use std::sync::Arc;
use thiserror::Error;

/// Errors emitted while ingesting a single document.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Extraction produced no usable text; the document stays un-processed
    /// so a future retry (after replacing the file) can succeed.
    #[error("No extractable text in document: {0}")]
    NoExtractableText(String),
    /// Extraction itself failed.
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    /// A store read or write failed.
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),
}

/// Result of running the pipeline for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The document was extracted, split, and persisted.
    Processed {
        /// Number of chunks written to the chunk store.
        chunk_count: usize,
    },
    /// The document was already in the processed manifest; no side effects.
    Skipped,
}

/// Turns one raw document into persisted chunks and a manifest entry.
///
/// The manifest add is deliberately the last step: a crash between the chunk
/// write and the manifest update leaves the document un-manifested, and the
/// next run simply re-writes the chunk set (chunk writes are full-replace).
pub struct IngestionPipeline {
    raw: Arc<RawDocumentStore>,
    chunks: Arc<ChunkStore>,
    manifest: Arc<ProcessedManifest>,
    extractor: Box<dyn TextExtractor>,
    config: Arc<Config>,
}

impl IngestionPipeline {
    /// Assemble the pipeline from shared store handles.
    pub fn new(
        raw: Arc<RawDocumentStore>,
        chunks: Arc<ChunkStore>,
        manifest: Arc<ProcessedManifest>,
        extractor: Box<dyn TextExtractor>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            raw,
            chunks,
            manifest,
            extractor,
            config,
        }
    }

    /// Ingest the raw document stored under `file_name`.
    ///
    /// Skips (without side effects) when the document is already in the
    /// processed manifest — the idempotence guard against redundant
    /// extraction and embedding cost.
    pub async fn process(&self, file_name: &str) -> Result<IngestOutcome, IngestError> {
        let stem = document_stem(file_name);

        if self.manifest.contains(&stem).await? {
            tracing::debug!(document = %stem, "Already processed; skipping ingestion");
            return Ok(IngestOutcome::Skipped);
        }

        let bytes = self.raw.read(file_name).await?;
        let text = self
            .extractor
            .extract(file_name, &bytes)?
            .ok_or_else(|| IngestError::NoExtractableText(file_name.to_string()))?;

        let chunks = chunking::split_text(&text, self.config.chunk_size, self.config.chunk_overlap);
        if chunks.is_empty() {
            return Err(IngestError::NoExtractableText(file_name.to_string()));
        }

        self.chunks.write(&stem, &chunks).await?;
        self.manifest.insert(&stem).await?;

        tracing::info!(
            document = %stem,
            chunks = chunks.len(),
            chunk_size = self.config.chunk_size,
            "Document ingested"
        );
        Ok(IngestOutcome::Processed {
            chunk_count: chunks.len(),
        })
    }
}
