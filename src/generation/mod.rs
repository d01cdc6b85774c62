//! Generation client abstraction for answer synthesis.
//!
//! The client is built once at startup and owned by the application context;
//! a missing credential means the capability is absent, not broken, and the
//! answer engine degrades to its sentinel response.

use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while attempting answer generation.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    /// Provider could not be reached or the call timed out; retryable.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// A fully assembled generation request: one system instruction and one user
/// turn carrying the retrieved context and conversation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System instruction including the document context.
    pub system: String,
    /// User content: formatted conversation plus the new question.
    pub user: String,
}

/// Interface implemented by generation backends.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Produce an answer for the assembled request.
    async fn complete(&self, request: GenerationRequest)
    -> Result<String, GenerationClientError>;
}

/// Build a generation client when a credential is configured.
pub fn generation_client(config: &Config) -> Option<Box<dyn GenerationClient>> {
    let api_key = config.openai_api_key.clone()?;
    Some(Box::new(OpenAiGenerationClient::new(
        config.openai_base_url.clone(),
        api_key,
        config.generation_model.clone(),
        Duration::from_secs(config.generation_timeout_secs),
    )))
}

/// Generation adapter speaking the OpenAI `/v1/chat/completions` protocol.
pub struct OpenAiGenerationClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerationClient {
    /// Construct an adapter with the configured request timeout. Timeouts are
    /// surfaced as `ProviderUnavailable` so callers treat them as retryable.
    pub fn new(base_url: String, api_key: String, model: String, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("docuchat/generation")
            .timeout(timeout)
            .build()
            .expect("Failed to construct reqwest::Client for generation");
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn complete(
        &self,
        request: GenerationRequest,
    ) -> Result<String, GenerationClientError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": 0.7,
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    GenerationClientError::ProviderUnavailable(format!(
                        "generation call timed out: {error}"
                    ))
                } else {
                    GenerationClientError::ProviderUnavailable(format!(
                        "failed to reach provider at {}: {error}",
                        self.base_url
                    ))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationClientError::GenerationFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode completion response: {error}"
            ))
        })?;

        let answer = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                GenerationClientError::InvalidResponse("completion had no choices".into())
            })?;

        Ok(answer.trim().to_string())
    }
}
