//! Vector index synchronization and retrieval.
//!
//! The synchronizer owns every interaction with the Qdrant collection and
//! keeps it consistent with the chunk store: chunks flow in through
//! [`DocumentIndex::add_document_chunks`], leave through
//! [`DocumentIndex::remove_document`], and a full [`DocumentIndex::reset`]
//! wipes the collection for the reprocessing sweep. A `tokio::sync::RwLock`
//! gate serializes resets against in-flight reads and writes.

pub mod client;
pub mod mmr;
pub mod types;

pub use client::QdrantCollection;
pub use types::{
    ChunkPoint, Fingerprint, IndexError, IndexOutcome, QdrantError, RetrievedChunk, ScoredChunk,
    compute_fingerprint,
};

use crate::config::{Config, RetrievalMode};
use crate::embedding::EmbeddingClient;
use crate::storage::ChunkStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Index-facing operations used by the lifecycle manager and answer engine.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Embed and upsert the stored chunks of `stem`, skipping chunks whose
    /// fingerprint is already indexed.
    async fn add_document_chunks(&self, stem: &str) -> Result<IndexOutcome, IndexError>;

    /// Remove every indexed entry belonging to `stem`.
    async fn remove_document(&self, stem: &str) -> Result<(), IndexError>;

    /// Drop and recreate the collection, discarding all entries.
    async fn reset(&self) -> Result<(), IndexError>;

    /// Retrieve the chunks most relevant to `question` per the configured
    /// retrieval mode.
    async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>, IndexError>;
}

/// Production [`DocumentIndex`] backed by Qdrant and an embedding client.
pub struct IndexSynchronizer {
    client: QdrantCollection,
    embedder: Option<Box<dyn EmbeddingClient>>,
    chunks: Arc<ChunkStore>,
    config: Arc<Config>,
    // Write side is taken only by reset; everything else shares read access.
    gate: RwLock<()>,
}

impl IndexSynchronizer {
    /// Assemble the synchronizer. `embedder` may be `None` when no embedding
    /// credential is configured; structural operations still work.
    pub fn new(
        client: QdrantCollection,
        embedder: Option<Box<dyn EmbeddingClient>>,
        chunks: Arc<ChunkStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            client,
            embedder,
            chunks,
            config,
            gate: RwLock::new(()),
        }
    }

    /// Verify the collection exists (creating it if needed) and that the
    /// payload indexes used by filters are in place. Called once at startup.
    pub async fn ensure_ready(&self) -> Result<(), IndexError> {
        self.client.ensure_collection().await?;
        self.client.ensure_payload_indexes().await?;
        Ok(())
    }

    fn embedder(&self) -> Result<&dyn EmbeddingClient, IndexError> {
        self.embedder
            .as_deref()
            .ok_or(IndexError::BackendUnavailable)
    }

    async fn retrieve_top_k(&self, vector: Vec<f32>) -> Result<Vec<ScoredChunk>, IndexError> {
        let hits = self
            .client
            .query(vector, self.config.search_top_k, false)
            .await?;
        Ok(hits)
    }

    async fn retrieve_mmr(&self, vector: Vec<f32>) -> Result<Vec<ScoredChunk>, IndexError> {
        let candidates = self
            .client
            .query(vector.clone(), self.config.search_fetch_k, true)
            .await?;
        Ok(mmr::select_mmr(
            &vector,
            candidates,
            self.config.search_mmr_k,
            0.5,
        ))
    }
}

#[async_trait]
impl DocumentIndex for IndexSynchronizer {
    async fn add_document_chunks(&self, stem: &str) -> Result<IndexOutcome, IndexError> {
        let _guard = self.gate.read().await;
        let embedder = self.embedder()?;

        let records = self.chunks.load(stem).await?;
        if records.is_empty() {
            return Ok(IndexOutcome::default());
        }

        let existing = self.client.existing_fingerprints(stem).await?;
        let mut fresh = Vec::new();
        let mut skipped = 0usize;
        for record in records {
            let fingerprint = compute_fingerprint(stem, &record.text);
            if existing.contains(&fingerprint.hex) {
                skipped += 1;
                continue;
            }
            fresh.push((fingerprint, record));
        }

        if fresh.is_empty() {
            tracing::debug!(document = stem, skipped, "All chunks already indexed");
            return Ok(IndexOutcome {
                indexed: 0,
                skipped_duplicates: skipped,
            });
        }

        let texts: Vec<String> = fresh.iter().map(|(_, r)| r.text.clone()).collect();
        let vectors = embedder.generate_embeddings(texts).await?;

        let points: Vec<ChunkPoint> = fresh
            .into_iter()
            .zip(vectors)
            .map(|((fingerprint, record), vector)| ChunkPoint {
                fingerprint,
                document: stem.to_string(),
                ordinal: record.ordinal,
                text: record.text,
                vector,
            })
            .collect();

        let indexed = self.client.upsert_points(points).await?;
        tracing::info!(document = stem, indexed, skipped, "Document chunks indexed");

        Ok(IndexOutcome {
            indexed,
            skipped_duplicates: skipped,
        })
    }

    async fn remove_document(&self, stem: &str) -> Result<(), IndexError> {
        let _guard = self.gate.read().await;
        self.client.delete_by_document(stem).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), IndexError> {
        let _guard = self.gate.write().await;
        self.client.recreate_collection().await?;
        tracing::info!("Vector index reset");
        Ok(())
    }

    async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>, IndexError> {
        let _guard = self.gate.read().await;
        let embedder = self.embedder()?;

        let mut vectors = embedder.generate_embeddings(vec![question.to_string()]).await?;
        let vector = vectors.pop().ok_or_else(|| {
            IndexError::Embedding(crate::embedding::EmbeddingClientError::InvalidResponse(
                "no embedding returned for the question".into(),
            ))
        })?;

        let hits = match self.config.retrieval_mode {
            RetrievalMode::TopK => self.retrieve_top_k(vector).await?,
            RetrievalMode::Mmr => self.retrieve_mmr(vector).await?,
        };

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                document: hit.document,
                text: hit.text,
                score: hit.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClientError;
    use httpmock::{Method::POST, Method::PUT, MockServer};
    use serde_json::json;
    use tempfile::TempDir;

    struct FixedEmbedder {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts
                .iter()
                .map(|text| {
                    let mut vector = vec![0.0; self.dimension];
                    vector[0] = text.len() as f32;
                    vector
                })
                .collect())
        }
    }

    fn test_config(data_dir: &std::path::Path, qdrant_url: &str) -> Arc<Config> {
        Arc::new(Config {
            data_dir: data_dir.to_path_buf(),
            qdrant_url: qdrant_url.to_string(),
            qdrant_collection_name: "docs".into(),
            qdrant_api_key: None,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com".into(),
            embedding_model: "test-embed".into(),
            embedding_dimension: 2,
            generation_model: "test-chat".into(),
            system_prompt: "You are a helpful AI assistant.".into(),
            chunk_size: 40,
            chunk_overlap: 8,
            retrieval_mode: crate::config::RetrievalMode::TopK,
            search_top_k: 3,
            search_fetch_k: 100,
            search_mmr_k: 20,
            generation_timeout_secs: 5,
            server_port: None,
        })
    }

    async fn synchronizer(
        dir: &TempDir,
        server: &MockServer,
        embedder: Option<Box<dyn EmbeddingClient>>,
    ) -> (IndexSynchronizer, Arc<ChunkStore>) {
        let config = test_config(dir.path(), &server.base_url());
        let chunks = Arc::new(ChunkStore::open(dir.path()).expect("chunk store"));
        let client = QdrantCollection::new(&config).expect("client");
        let sync = IndexSynchronizer::new(client, embedder, Arc::clone(&chunks), config);
        (sync, chunks)
    }

    #[tokio::test]
    async fn missing_embedder_reports_backend_unavailable() {
        let dir = TempDir::new().expect("tempdir");
        let server = MockServer::start_async().await;
        let (sync, chunks) = synchronizer(&dir, &server, None).await;
        chunks
            .write("report", &["chunk one".to_string()])
            .await
            .expect("write");

        let error = sync.add_document_chunks("report").await.unwrap_err();
        assert!(matches!(error, IndexError::BackendUnavailable));

        let error = sync.retrieve("question").await.unwrap_err();
        assert!(matches!(error, IndexError::BackendUnavailable));
    }

    #[tokio::test]
    async fn reset_works_without_an_embedder() {
        let dir = TempDir::new().expect("tempdir");
        let server = MockServer::start_async().await;
        let (sync, _chunks) = synchronizer(&dir, &server, None).await;

        let delete = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::DELETE).path("/collections/docs");
                then.status(200).json_body(json!({ "status": "ok", "result": true }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs");
                then.status(200).json_body(json!({ "status": "ok", "result": true }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs/index");
                then.status(200).json_body(json!({ "status": "ok", "result": {} }));
            })
            .await;

        sync.reset().await.expect("reset");
        delete.assert();
        create.assert();
    }

    #[tokio::test]
    async fn duplicate_fingerprints_are_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let server = MockServer::start_async().await;
        let embedder: Box<dyn EmbeddingClient> = Box::new(FixedEmbedder { dimension: 2 });
        let (sync, chunks) = synchronizer(&dir, &server, Some(embedder)).await;

        let texts = vec!["already indexed chunk".to_string(), "new chunk".to_string()];
        chunks.write("report", &texts).await.expect("write");
        let known = compute_fingerprint("report", "already indexed chunk");

        let scroll = server
            .mock_async(move |when, then| {
                when.method(POST).path("/collections/docs/points/scroll");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "result": {
                        "points": [
                            { "id": known.point_id.to_string(), "payload": { "fingerprint": known.hex } }
                        ],
                        "next_page_offset": null
                    }
                }));
            })
            .await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/docs/points")
                    .body_contains("new chunk");
                then.status(200).json_body(json!({ "status": "ok", "result": {} }));
            })
            .await;

        let outcome = sync.add_document_chunks("report").await.expect("index");
        scroll.assert();
        upsert.assert();
        assert_eq!(outcome.indexed, 1);
        assert_eq!(outcome.skipped_duplicates, 1);
    }

    #[tokio::test]
    async fn retrieve_returns_top_k_hits() {
        let dir = TempDir::new().expect("tempdir");
        let server = MockServer::start_async().await;
        let embedder: Box<dyn EmbeddingClient> = Box::new(FixedEmbedder { dimension: 2 });
        let (sync, _chunks) = synchronizer(&dir, &server, Some(embedder)).await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docs/points/query");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "result": {
                        "points": [
                            {
                                "id": "11111111-2222-3333-4444-555555555555",
                                "score": 0.9,
                                "payload": { "document": "report", "text": "relevant text" }
                            }
                        ]
                    }
                }));
            })
            .await;

        let hits = sync.retrieve("what happened?").await.expect("retrieve");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document, "report");
        assert_eq!(hits[0].text, "relevant text");
    }
}
