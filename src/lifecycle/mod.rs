//! Document lifecycle coordination across the four stores.
//!
//! The manager is the only component allowed to mutate more than one store
//! (raw bytes, chunk store, vector index, processed manifest) per operation,
//! which keeps the consistency rules in a single place: ingestion marks the
//! manifest last, deletion is best-effort with explicit warnings, and the
//! full reprocessing sweep resets every derived store before rebuilding.

use crate::{
    extract::is_supported_document,
    index::{DocumentIndex, IndexError, IndexOutcome},
    ingest::{IngestError, IngestOutcome, IngestionPipeline},
    storage::{
        ChunkStore, DocumentInfo, ProcessedManifest, RawDocumentStore, StorageError, document_stem,
    },
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Errors surfaced by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Uploaded file has an extension no extractor handles.
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
    /// A document with this name, or another extension sharing its stem,
    /// already exists.
    #[error("Document already exists: {0}")]
    AlreadyExists(String),
    /// The named document is not stored.
    #[error("Document not found: {0}")]
    NotFound(String),
    /// Ingestion failed for the document.
    #[error(transparent)]
    Ingest(#[from] IngestError),
    /// Index synchronization failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// A store operation failed.
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for LifecycleError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::AlreadyExists(name) => LifecycleError::AlreadyExists(name),
            StorageError::NotFound(name) => LifecycleError::NotFound(name),
            other => LifecycleError::Storage(other),
        }
    }
}

/// Result of uploading and processing one document.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    /// Uploaded file name.
    pub file_name: String,
    /// Bytes written to the raw store.
    pub size_bytes: u64,
    /// Chunks persisted during ingestion.
    pub chunk_count: usize,
    /// Chunks embedded and inserted into the index.
    pub indexed: usize,
}

/// Result of the full reprocessing sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Documents rebuilt, with their chunk counts.
    pub processed: Vec<SweepEntry>,
    /// Documents that failed, with the failure message.
    pub failures: Vec<SweepFailure>,
}

/// One successfully rebuilt document in a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepEntry {
    /// Uploaded file name.
    pub file_name: String,
    /// Chunks persisted for the document.
    pub chunk_count: usize,
    /// Chunks inserted into the index.
    pub indexed: usize,
}

/// One failed document in a sweep. A failure never aborts the sweep; the
/// remaining documents are still rebuilt.
#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    /// Uploaded file name.
    pub file_name: String,
    /// Human-readable failure description.
    pub error: String,
}

/// Result of deleting a document. Removal is best-effort: each store is
/// attempted independently and failures become warnings instead of aborting,
/// so one unreachable store never strands data in the others.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    /// Deleted file name.
    pub file_name: String,
    /// Stores that still hold data for the document, with the reason.
    pub warnings: Vec<String>,
}

impl DeleteReport {
    /// Whether every store was cleaned successfully.
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Coordinates uploads, ingestion, indexing, and deletion.
pub struct DocumentLifecycleManager {
    raw: Arc<RawDocumentStore>,
    chunks: Arc<ChunkStore>,
    manifest: Arc<ProcessedManifest>,
    pipeline: IngestionPipeline,
    index: Arc<dyn DocumentIndex>,
    // One async mutex per document stem; concurrent operations on different
    // documents proceed in parallel. Entries are evicted after a delete once
    // no other task holds them.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // The reprocessing sweep takes this exclusively so its clear-and-rebuild
    // phase cannot interleave with uploads or deletes, which take the read
    // side. Always acquired before any per-stem lock.
    sweep_gate: RwLock<()>,
}

impl DocumentLifecycleManager {
    /// Assemble the manager from shared store handles and the index seam.
    pub fn new(
        raw: Arc<RawDocumentStore>,
        chunks: Arc<ChunkStore>,
        manifest: Arc<ProcessedManifest>,
        pipeline: IngestionPipeline,
        index: Arc<dyn DocumentIndex>,
    ) -> Self {
        Self {
            raw,
            chunks,
            manifest,
            pipeline,
            index,
            locks: Mutex::new(HashMap::new()),
            sweep_gate: RwLock::new(()),
        }
    }

    async fn lock_for(&self, stem: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(stem.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the lock entry for `stem` unless another task still holds a
    /// clone. Callers must have released their own clone first, so a map
    /// strong count of one means nobody is waiting.
    async fn evict_lock(&self, stem: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(stem)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(stem);
        }
    }

    #[cfg(test)]
    async fn stem_lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Store an uploaded document and run it through ingestion and indexing.
    ///
    /// Uploads are create-only, and uniqueness is enforced on the stem, not
    /// just the full name: every derived store is keyed by the stem, so
    /// `report.md` alongside an existing `report.txt` would silently share
    /// one chunk directory and manifest entry. Such uploads are rejected
    /// before any bytes are written. If ingestion or indexing fails the raw
    /// bytes stay in place so a later `process_all` can retry.
    pub async fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<UploadReport, LifecycleError> {
        if !is_supported_document(file_name) {
            return Err(LifecycleError::UnsupportedFormat(file_name.to_string()));
        }

        let stem = document_stem(file_name);
        let _sweep = self.sweep_gate.read().await;
        let lock = self.lock_for(&stem).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self
            .raw
            .find_by_stem(&stem)
            .await
            .map_err(LifecycleError::from)?
        {
            return Err(LifecycleError::AlreadyExists(existing));
        }

        let size_bytes = self.raw.save(file_name, bytes).await?;
        let (chunk_count, outcome) = self.ingest_and_index(file_name, &stem).await?;

        tracing::info!(
            document = %stem,
            size = size_bytes,
            chunks = chunk_count,
            indexed = outcome.indexed,
            "Document uploaded"
        );

        Ok(UploadReport {
            file_name: file_name.to_string(),
            size_bytes,
            chunk_count,
            indexed: outcome.indexed,
        })
    }

    /// Rebuild every derived store from the raw documents.
    ///
    /// The sweep clears the vector index, the chunk store, and the processed
    /// manifest before re-ingesting, so stale or drifted derived state cannot
    /// survive it. With no raw documents stored the sweep is a no-op and the
    /// index is left untouched.
    pub async fn process_all(&self) -> Result<SweepReport, LifecycleError> {
        // Exclusive for the whole sweep: an upload landing between the clear
        // phase and the rebuild would have its fresh chunks wiped while its
        // manifest entry survived.
        let _sweep = self.sweep_gate.write().await;
        let documents = self.raw.list().await.map_err(LifecycleError::from)?;
        if documents.is_empty() {
            tracing::info!("No documents stored; skipping reprocessing sweep");
            return Ok(SweepReport::default());
        }

        self.index.reset().await?;
        self.chunks.clear().await.map_err(LifecycleError::from)?;
        self.manifest.clear().await.map_err(LifecycleError::from)?;

        let mut report = SweepReport::default();
        for document in documents {
            let stem = document_stem(&document.name);
            let lock = self.lock_for(&stem).await;
            let _guard = lock.lock().await;

            match self.ingest_and_index(&document.name, &stem).await {
                Ok((chunk_count, outcome)) => report.processed.push(SweepEntry {
                    file_name: document.name,
                    chunk_count,
                    indexed: outcome.indexed,
                }),
                Err(error) => {
                    tracing::warn!(document = %document.name, error = %error, "Sweep failed for document");
                    report.failures.push(SweepFailure {
                        file_name: document.name,
                        error: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            processed = report.processed.len(),
            failures = report.failures.len(),
            "Reprocessing sweep finished"
        );
        Ok(report)
    }

    /// Remove a document from every store.
    ///
    /// Returns `NotFound` when the raw document does not exist. Otherwise the
    /// removal is best-effort across all four stores; per-store failures are
    /// reported as warnings in the returned report.
    pub async fn delete(&self, file_name: &str) -> Result<DeleteReport, LifecycleError> {
        let stem = document_stem(file_name);
        let _sweep = self.sweep_gate.read().await;
        let lock = self.lock_for(&stem).await;
        let result = {
            let _guard = lock.lock().await;
            self.delete_locked(file_name, &stem).await
        };
        drop(lock);
        self.evict_lock(&stem).await;
        result
    }

    async fn delete_locked(
        &self,
        file_name: &str,
        stem: &str,
    ) -> Result<DeleteReport, LifecycleError> {
        if !self.raw.exists(file_name).await.map_err(LifecycleError::from)? {
            return Err(LifecycleError::NotFound(file_name.to_string()));
        }

        let mut report = DeleteReport {
            file_name: file_name.to_string(),
            warnings: Vec::new(),
        };

        if let Err(error) = self.index.remove_document(stem).await {
            report
                .warnings
                .push(format!("vector index entries not removed: {error}"));
        }
        if let Err(error) = self.chunks.delete(stem).await {
            report
                .warnings
                .push(format!("chunk files not removed: {error}"));
        }
        if let Err(error) = self.manifest.remove(stem).await {
            report
                .warnings
                .push(format!("processed record not removed: {error}"));
        }
        if let Err(error) = self.raw.delete(file_name).await {
            report
                .warnings
                .push(format!("raw document not removed: {error}"));
        }

        if report.is_complete() {
            tracing::info!(document = %stem, "Document deleted");
        } else {
            tracing::warn!(
                document = %stem,
                warnings = report.warnings.len(),
                "Document deletion left residue"
            );
        }
        Ok(report)
    }

    /// List stored documents with sizes.
    pub async fn list_documents(&self) -> Result<Vec<DocumentInfo>, LifecycleError> {
        self.raw.list().await.map_err(LifecycleError::from)
    }

    async fn ingest_and_index(
        &self,
        file_name: &str,
        stem: &str,
    ) -> Result<(usize, IndexOutcome), LifecycleError> {
        let chunk_count = match self.pipeline.process(file_name).await? {
            IngestOutcome::Processed { chunk_count } => chunk_count,
            IngestOutcome::Skipped => self.chunks.load(stem).await.map(|records| records.len())?,
        };

        // An indexing failure (including a missing embedding credential) is
        // surfaced to the caller. The raw bytes and chunks stay in place, so
        // a later sweep re-indexes the document once the backend is back.
        let outcome = self.index.add_document_chunks(stem).await?;
        Ok((chunk_count, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RetrievalMode};
    use crate::extract::DocumentExtractor;
    use crate::index::RetrievedChunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Index stub that records calls and can be told to fail removals.
    #[derive(Default)]
    struct StubIndex {
        resets: AtomicUsize,
        adds: AtomicUsize,
        removals: AtomicUsize,
        fail_adds: bool,
        fail_removals: bool,
    }

    #[async_trait]
    impl DocumentIndex for StubIndex {
        async fn add_document_chunks(&self, _stem: &str) -> Result<IndexOutcome, IndexError> {
            self.adds.fetch_add(1, Ordering::SeqCst);
            if self.fail_adds {
                return Err(IndexError::BackendUnavailable);
            }
            Ok(IndexOutcome {
                indexed: 1,
                skipped_duplicates: 0,
            })
        }

        async fn remove_document(&self, _stem: &str) -> Result<(), IndexError> {
            self.removals.fetch_add(1, Ordering::SeqCst);
            if self.fail_removals {
                return Err(IndexError::BackendUnavailable);
            }
            Ok(())
        }

        async fn reset(&self) -> Result<(), IndexError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn retrieve(&self, _question: &str) -> Result<Vec<RetrievedChunk>, IndexError> {
            Ok(Vec::new())
        }
    }

    fn test_config(data_dir: &std::path::Path) -> Arc<Config> {
        Arc::new(Config {
            data_dir: data_dir.to_path_buf(),
            qdrant_url: "http://127.0.0.1:6333".into(),
            qdrant_collection_name: "test".into(),
            qdrant_api_key: None,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com".into(),
            embedding_model: "test-embed".into(),
            embedding_dimension: 8,
            generation_model: "test-chat".into(),
            system_prompt: "You are a helpful AI assistant.".into(),
            chunk_size: 40,
            chunk_overlap: 8,
            retrieval_mode: RetrievalMode::TopK,
            search_top_k: 3,
            search_fetch_k: 100,
            search_mmr_k: 20,
            generation_timeout_secs: 5,
            server_port: None,
        })
    }

    fn manager(dir: &TempDir, index: Arc<dyn DocumentIndex>) -> DocumentLifecycleManager {
        let config = test_config(dir.path());
        let raw = Arc::new(RawDocumentStore::open(dir.path()).expect("raw"));
        let chunks = Arc::new(ChunkStore::open(dir.path()).expect("chunks"));
        let manifest = Arc::new(ProcessedManifest::open(dir.path()).expect("manifest"));
        let pipeline = IngestionPipeline::new(
            Arc::clone(&raw),
            Arc::clone(&chunks),
            Arc::clone(&manifest),
            Box::new(DocumentExtractor::new()),
            config,
        );
        DocumentLifecycleManager::new(raw, chunks, manifest, pipeline, index)
    }

    #[tokio::test]
    async fn upload_rejects_unsupported_formats() {
        let dir = TempDir::new().expect("tempdir");
        let manager = manager(&dir, Arc::new(StubIndex::default()));

        let error = manager.upload("image.png", b"bytes").await.unwrap_err();
        assert!(matches!(error, LifecycleError::UnsupportedFormat(_)));
        assert!(manager.list_documents().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn upload_rejects_duplicate_names() {
        let dir = TempDir::new().expect("tempdir");
        let manager = manager(&dir, Arc::new(StubIndex::default()));

        manager
            .upload("notes.txt", b"meaningful text to be chunked and stored")
            .await
            .expect("first upload");
        let error = manager
            .upload("notes.txt", b"different content")
            .await
            .unwrap_err();
        assert!(matches!(error, LifecycleError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn upload_rejects_stem_collisions_across_extensions() {
        let dir = TempDir::new().expect("tempdir");
        let manager = manager(&dir, Arc::new(StubIndex::default()));

        manager
            .upload("report.txt", b"ALPHA content for the text file")
            .await
            .expect("first upload");
        let error = manager
            .upload("report.md", b"BRAVO content for the markdown file")
            .await
            .unwrap_err();
        assert!(matches!(error, LifecycleError::AlreadyExists(_)));

        // the first document still owns the shared stem directory; nothing
        // from the rejected upload replaced or joined its chunks
        let chunks = ChunkStore::open(dir.path()).expect("chunks");
        let text: String = chunks
            .load("report")
            .await
            .expect("load")
            .into_iter()
            .map(|record| record.text)
            .collect();
        assert!(text.contains("ALPHA"));
        assert!(!text.contains("BRAVO"));

        let listing = manager.list_documents().await.expect("list");
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "report.txt");
    }

    #[tokio::test]
    async fn upload_ingests_and_indexes() {
        let dir = TempDir::new().expect("tempdir");
        let index = Arc::new(StubIndex::default());
        let manager = manager(&dir, Arc::clone(&index) as Arc<dyn DocumentIndex>);

        let report = manager
            .upload("notes.txt", b"meaningful text to be chunked and stored")
            .await
            .expect("upload");

        assert_eq!(report.file_name, "notes.txt");
        assert!(report.chunk_count > 0);
        assert_eq!(index.adds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sweep_with_no_documents_leaves_the_index_alone() {
        let dir = TempDir::new().expect("tempdir");
        let index = Arc::new(StubIndex::default());
        let manager = manager(&dir, Arc::clone(&index) as Arc<dyn DocumentIndex>);

        let report = manager.process_all().await.expect("sweep");
        assert!(report.processed.is_empty());
        assert_eq!(index.resets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sweep_resets_then_rebuilds_every_document() {
        let dir = TempDir::new().expect("tempdir");
        let index = Arc::new(StubIndex::default());
        let manager = manager(&dir, Arc::clone(&index) as Arc<dyn DocumentIndex>);

        manager
            .upload("a.txt", b"first document with enough text to chunk")
            .await
            .expect("upload a");
        manager
            .upload("b.txt", b"second document with enough text to chunk")
            .await
            .expect("upload b");

        let report = manager.process_all().await.expect("sweep");
        assert_eq!(report.processed.len(), 2);
        assert!(report.failures.is_empty());
        assert_eq!(index.resets.load(Ordering::SeqCst), 1);
        // two from uploads, two more from the sweep rebuild
        assert_eq!(index.adds.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn sweep_records_per_document_failures_without_aborting() {
        let dir = TempDir::new().expect("tempdir");
        let index = Arc::new(StubIndex::default());
        let manager = manager(&dir, Arc::clone(&index) as Arc<dyn DocumentIndex>);

        manager
            .upload("good.txt", b"plenty of text for this document to chunk")
            .await
            .expect("upload good");
        // An empty document ingests at upload time only if it has text; write
        // a blank file directly so the sweep encounters the failure.
        tokio::fs::write(dir.path().join("raw/blank.txt"), b"   ")
            .await
            .expect("write blank");

        let report = manager.process_all().await.expect("sweep");
        assert_eq!(report.processed.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].file_name, "blank.txt");
    }

    #[tokio::test]
    async fn indexing_failure_surfaces_but_keeps_the_raw_bytes() {
        let dir = TempDir::new().expect("tempdir");
        let index = Arc::new(StubIndex {
            fail_adds: true,
            ..StubIndex::default()
        });
        let manager = manager(&dir, Arc::clone(&index) as Arc<dyn DocumentIndex>);

        let error = manager
            .upload("notes.txt", b"meaningful text to be chunked and stored")
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            LifecycleError::Index(IndexError::BackendUnavailable)
        ));

        // the document stays stored; a later sweep can index it
        let listing = manager.list_documents().await.expect("list");
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "notes.txt");
    }

    /// Index whose `reset` blocks until the test releases a gate, so a sweep
    /// can be held open while other operations arrive.
    #[derive(Default)]
    struct GatedResetIndex {
        gate: Mutex<()>,
        reset_entered: AtomicBool,
    }

    #[async_trait]
    impl DocumentIndex for GatedResetIndex {
        async fn add_document_chunks(&self, _stem: &str) -> Result<IndexOutcome, IndexError> {
            Ok(IndexOutcome {
                indexed: 1,
                skipped_duplicates: 0,
            })
        }

        async fn remove_document(&self, _stem: &str) -> Result<(), IndexError> {
            Ok(())
        }

        async fn reset(&self) -> Result<(), IndexError> {
            self.reset_entered.store(true, Ordering::SeqCst);
            let _released = self.gate.lock().await;
            Ok(())
        }

        async fn retrieve(&self, _question: &str) -> Result<Vec<RetrievedChunk>, IndexError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn uploads_wait_for_an_in_flight_sweep() {
        let dir = TempDir::new().expect("tempdir");
        let index = Arc::new(GatedResetIndex::default());
        let manager = Arc::new(manager(&dir, Arc::clone(&index) as Arc<dyn DocumentIndex>));

        manager
            .upload("a.txt", b"first document with enough text to chunk")
            .await
            .expect("upload a");

        // hold the sweep open inside its reset phase
        let held = index.gate.lock().await;
        let sweep = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.process_all().await }
        });
        while !index.reset_entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // this upload must not interleave with the clear-and-rebuild phase
        let upload = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move {
                manager
                    .upload("b.txt", b"second document with enough text to chunk")
                    .await
            }
        });

        drop(held);
        sweep.await.expect("join sweep").expect("sweep");
        upload.await.expect("join upload").expect("upload b");

        // the late upload's derived state survived the sweep's clear phase
        let chunks = ChunkStore::open(dir.path()).expect("chunks");
        assert!(!chunks.load("b").await.expect("load").is_empty());
        let manifest = ProcessedManifest::open(dir.path()).expect("manifest");
        assert!(manifest.contains("b").await.expect("contains"));
    }

    #[tokio::test]
    async fn delete_unknown_document_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let manager = manager(&dir, Arc::new(StubIndex::default()));

        let error = manager.delete("ghost.txt").await.unwrap_err();
        assert!(matches!(error, LifecycleError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_all_stores() {
        let dir = TempDir::new().expect("tempdir");
        let index = Arc::new(StubIndex::default());
        let manager = manager(&dir, Arc::clone(&index) as Arc<dyn DocumentIndex>);

        manager
            .upload("notes.txt", b"meaningful text to be chunked and stored")
            .await
            .expect("upload");
        let report = manager.delete("notes.txt").await.expect("delete");

        assert!(report.is_complete());
        assert_eq!(index.removals.load(Ordering::SeqCst), 1);
        assert!(manager.list_documents().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn delete_releases_the_per_document_lock_entry() {
        let dir = TempDir::new().expect("tempdir");
        let manager = manager(&dir, Arc::new(StubIndex::default()));

        manager
            .upload("notes.txt", b"meaningful text to be chunked and stored")
            .await
            .expect("upload");
        assert_eq!(manager.stem_lock_count().await, 1);

        manager.delete("notes.txt").await.expect("delete");
        assert_eq!(manager.stem_lock_count().await, 0);
    }

    #[tokio::test]
    async fn delete_reports_partial_cleanup_as_warnings() {
        let dir = TempDir::new().expect("tempdir");
        let index = Arc::new(StubIndex {
            fail_removals: true,
            ..StubIndex::default()
        });
        let manager = manager(&dir, Arc::clone(&index) as Arc<dyn DocumentIndex>);

        manager
            .upload("notes.txt", b"meaningful text to be chunked and stored")
            .await
            .expect("upload");
        let report = manager.delete("notes.txt").await.expect("delete");

        assert!(!report.is_complete());
        assert_eq!(report.warnings.len(), 1);
        // the other stores were still cleaned
        assert!(manager.list_documents().await.expect("list").is_empty());
    }
}
