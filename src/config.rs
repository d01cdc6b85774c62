//! Environment-driven configuration.
//!
//! Configuration is resolved once at startup (after loading `.env` when
//! present) and handed to the application context by `Arc`; nothing reads
//! the environment after boot.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Retrieval policy applied when the answer engine queries the index.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Plain top-k similarity: small candidate set, lowest latency.
    TopK,
    /// Maximal marginal relevance: over-fetch a large pool, then select a
    /// subset balancing relevance against inter-result redundancy.
    Mmr,
}

impl std::str::FromStr for RetrievalMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "top_k" | "topk" => Ok(Self::TopK),
            "mmr" => Ok(Self::Mmr),
            _ => Err(()),
        }
    }
}

/// Runtime configuration for the docuchat server.
///
/// Built once in `main` and passed by `Arc` into the application context;
/// reconfiguration means restarting with a fresh context rather than mutating
/// shared state under in-flight requests.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Root directory holding raw documents, derived chunks, the processed
    /// manifest, and chat session records.
    pub data_dir: PathBuf,
    /// Base URL of the Qdrant instance that stores chunk embeddings.
    pub qdrant_url: String,
    /// Name of the Qdrant collection used for chunk storage.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Optional API key for the embedding/generation provider. When absent
    /// the server still ingests and stores chunks but cannot embed or answer.
    pub openai_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible provider endpoint.
    pub openai_base_url: String,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Chat model used to generate answers.
    pub generation_model: String,
    /// Instruction prepended to every generation request.
    pub system_prompt: String,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Character overlap carried between adjacent chunks.
    pub chunk_overlap: usize,
    /// Retrieval policy used by the answer engine.
    pub retrieval_mode: RetrievalMode,
    /// Candidate count for plain top-k retrieval.
    pub search_top_k: usize,
    /// Pool size over-fetched before MMR selection.
    pub search_fetch_k: usize,
    /// Number of candidates MMR keeps from the over-fetched pool.
    pub search_mmr_k: usize,
    /// Upper bound, in seconds, on a single generation call.
    pub generation_timeout_secs: u64,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

impl Config {
    /// Load configuration from environment variables, performing validation
    /// along the way. Only `QDRANT_URL` is mandatory; everything else falls
    /// back to defaults mirroring a local single-user deployment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            data_dir: PathBuf::from(
                load_env_optional("DOCUCHAT_DATA_DIR").unwrap_or_else(|| "data".to_string()),
            ),
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "document_chunks".to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-large".to_string()),
            embedding_dimension: parse_or("EMBEDDING_DIMENSION", 3072)?,
            generation_model: load_env_optional("GENERATION_MODEL")
                .unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            system_prompt: load_env_optional("SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            chunk_size: parse_or("CHUNK_SIZE", 500)?,
            chunk_overlap: parse_or("CHUNK_OVERLAP", 50)?,
            retrieval_mode: match load_env_optional("RETRIEVAL_MODE") {
                Some(value) => value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("RETRIEVAL_MODE".to_string()))?,
                None => RetrievalMode::TopK,
            },
            search_top_k: parse_or("SEARCH_TOP_K", 3)?,
            search_fetch_k: parse_or("SEARCH_FETCH_K", 100)?,
            search_mmr_k: parse_or("SEARCH_MMR_K", 20)?,
            generation_timeout_secs: parse_or("GENERATION_TIMEOUT_SECS", 60)?,
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

/// Load `.env` (when present) and build the configuration.
pub fn load() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        retrieval_mode = ?config.retrieval_mode,
        credentials_configured = config.openai_api_key.is_some(),
        "Loaded configuration"
    );
    Ok(config)
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_mode_parses_known_values() {
        assert_eq!("top_k".parse::<RetrievalMode>(), Ok(RetrievalMode::TopK));
        assert_eq!("MMR".parse::<RetrievalMode>(), Ok(RetrievalMode::Mmr));
        assert!("cosine".parse::<RetrievalMode>().is_err());
    }
}
