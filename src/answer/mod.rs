//! Retrieval-augmented answer synthesis.
//!
//! The engine never propagates backend failures to its caller: a question
//! always yields an answer string. Missing credentials produce a stable
//! "not configured" sentinel, and provider errors degrade to an apology so
//! the conversation survives transient outages.

pub mod prompt;

pub use prompt::REFUSAL_PHRASE;

use crate::chat::ChatMessage;
use crate::config::Config;
use crate::generation::{GenerationClient, GenerationRequest};
use crate::index::{DocumentIndex, IndexError};
use std::sync::Arc;

/// Answer returned when no generation or embedding credential is configured.
pub const NOT_CONFIGURED_ANSWER: &str =
    "The assistant is not configured yet: no language model credential is available. \
     Documents can still be uploaded and stored.";

/// Answer returned when retrieval or generation fails at request time.
const BACKEND_FAILURE_ANSWER: &str =
    "Sorry, I was unable to answer that right now. Please try again in a moment.";

/// Produces grounded answers from the index and a generation backend.
pub struct AnswerEngine {
    index: Arc<dyn DocumentIndex>,
    generator: Option<Box<dyn GenerationClient>>,
    config: Arc<Config>,
}

impl AnswerEngine {
    /// Assemble the engine. `generator` may be `None` when no credential is
    /// configured; every question then gets the sentinel answer.
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        generator: Option<Box<dyn GenerationClient>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            index,
            generator,
            config,
        }
    }

    /// Answer `question` against the indexed documents, using `history` as
    /// conversational context. Infallible by design: failures become
    /// user-facing answer strings.
    pub async fn answer(&self, question: &str, history: &[ChatMessage]) -> String {
        let Some(generator) = self.generator.as_deref() else {
            return NOT_CONFIGURED_ANSWER.to_string();
        };

        let context = match self.index.retrieve(question).await {
            Ok(chunks) => chunks,
            Err(IndexError::BackendUnavailable) => {
                return NOT_CONFIGURED_ANSWER.to_string();
            }
            Err(error) => {
                tracing::error!(error = %error, "Retrieval failed while answering");
                return BACKEND_FAILURE_ANSWER.to_string();
            }
        };

        let request = GenerationRequest {
            system: prompt::build_system_prompt(&self.config.system_prompt, &context),
            user: prompt::build_user_prompt(history, question),
        };

        match generator.complete(request).await {
            Ok(answer) => answer,
            Err(error) => {
                tracing::error!(error = %error, "Generation failed while answering");
                BACKEND_FAILURE_ANSWER.to_string()
            }
        }
    }
}
