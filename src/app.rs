//! Application assembly: builds every component once at startup and owns the
//! question-answer flow that ties sessions to the answer engine.

use crate::{
    answer::AnswerEngine,
    chat::{ChatMessage, ChatSessionStore, ChatStoreError, Sender},
    config::Config,
    embedding::embedding_client,
    extract::DocumentExtractor,
    generation::generation_client,
    index::{DocumentIndex, IndexSynchronizer, QdrantCollection},
    ingest::IngestionPipeline,
    lifecycle::DocumentLifecycleManager,
    storage::{ChunkStore, ProcessedManifest, RawDocumentStore},
};
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Answer to one question, tagged with the session it was recorded in.
#[derive(Debug, Clone, Serialize)]
pub struct AskOutcome {
    /// Session the exchange was appended to; freshly minted when the request
    /// carried none.
    pub session_id: String,
    /// Generated answer text.
    pub answer: String,
}

/// Long-lived application state shared by every request handler.
pub struct AppContext {
    /// Resolved configuration.
    pub config: Arc<Config>,
    /// Multi-store document coordinator.
    pub lifecycle: DocumentLifecycleManager,
    /// Conversation persistence.
    pub sessions: ChatSessionStore,
    answers: AnswerEngine,
}

impl AppContext {
    /// Build the full component graph from configuration: stores, the Qdrant
    /// synchronizer (verified reachable), the ingestion pipeline, and the
    /// answer engine.
    pub async fn initialize(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let raw = Arc::new(
            RawDocumentStore::open(&config.data_dir).context("opening raw document store")?,
        );
        let chunks =
            Arc::new(ChunkStore::open(&config.data_dir).context("opening chunk store")?);
        let manifest = Arc::new(
            ProcessedManifest::open(&config.data_dir).context("opening processed manifest")?,
        );
        let sessions =
            ChatSessionStore::open(&config.data_dir).context("opening session store")?;

        let qdrant = QdrantCollection::new(&config).context("building Qdrant client")?;
        let synchronizer = IndexSynchronizer::new(
            qdrant,
            embedding_client(&config),
            Arc::clone(&chunks),
            Arc::clone(&config),
        );
        synchronizer
            .ensure_ready()
            .await
            .context("preparing the Qdrant collection")?;
        let index: Arc<dyn DocumentIndex> = Arc::new(synchronizer);

        let pipeline = IngestionPipeline::new(
            Arc::clone(&raw),
            Arc::clone(&chunks),
            Arc::clone(&manifest),
            Box::new(DocumentExtractor::new()),
            Arc::clone(&config),
        );
        let lifecycle = DocumentLifecycleManager::new(
            raw,
            chunks,
            manifest,
            pipeline,
            Arc::clone(&index),
        );

        let answers = AnswerEngine::new(index, generation_client(&config), Arc::clone(&config));

        if config.openai_api_key.is_none() {
            tracing::warn!(
                "No language model credential configured; questions will receive the \
                 not-configured answer"
            );
        }

        Ok(Self {
            config,
            lifecycle,
            sessions,
            answers,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        config: Arc<Config>,
        lifecycle: DocumentLifecycleManager,
        sessions: ChatSessionStore,
        answers: AnswerEngine,
    ) -> Self {
        Self {
            config,
            lifecycle,
            sessions,
            answers,
        }
    }

    /// Answer a question within a session, minting a new session when the
    /// caller did not supply one. Both the question and the answer are
    /// appended to the session history.
    pub async fn ask(
        &self,
        question: &str,
        session_id: Option<String>,
    ) -> Result<AskOutcome, ChatStoreError> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let history = self.sessions.history(&session_id).await?;
        self.sessions
            .append(
                &session_id,
                ChatMessage {
                    sender: Sender::User,
                    text: question.to_string(),
                },
            )
            .await?;

        let answer = self.answers.answer(question, &history).await;

        self.sessions
            .append(
                &session_id,
                ChatMessage {
                    sender: Sender::Assistant,
                    text: answer.clone(),
                },
            )
            .await?;

        tracing::info!(session = %session_id, "Question answered");
        Ok(AskOutcome { session_id, answer })
    }
}
