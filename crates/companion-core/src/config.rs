//! ============================================================================
//! Engine Configuration
//! ============================================================================
//! Environment-driven settings for the memory engine. Binaries load a .env
//! file first; every knob has a default suitable for local development.
//! ============================================================================

use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::memory::archive::{DEFAULT_CHUNK_CHARS, DEFAULT_RECALL_K};
use crate::memory::embeddings::{EmbeddingService, DEFAULT_EMBEDDING_MODEL};
use crate::memory::history::DEFAULT_RECENT_LIMIT;
use crate::rate_guard::{DEFAULT_QUOTA, DEFAULT_WINDOW};

/// Configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Database file path; None uses COMPANION_DB_PATH or the default
    /// ~/.companion location.
    pub db_path: Option<String>,
    /// Qdrant endpoint for the archive collection.
    pub qdrant_url: String,
    /// API key for the embeddings endpoint.
    pub embeddings_api_key: Option<String>,
    /// Custom OpenAI-compatible base URL; None uses the OpenAI API.
    pub embeddings_base_url: Option<String>,
    /// Embedding model override.
    pub embeddings_model: Option<String>,
    /// Model name recorded in every conversation key.
    pub model_name: String,
    /// Admissions per subject per window.
    pub rate_quota: u32,
    /// Trailing rate window length.
    pub rate_window: Duration,
    /// Turns included in the recent-history window.
    pub recent_limit: usize,
    /// Nearest chunks retrieved per recall query.
    pub recall_k: u64,
    /// Maximum characters per archive chunk.
    pub chunk_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            qdrant_url: "http://localhost:6334".to_string(),
            embeddings_api_key: None,
            embeddings_base_url: None,
            embeddings_model: None,
            model_name: "gemini-2.5-flash".to_string(),
            rate_quota: DEFAULT_QUOTA,
            rate_window: DEFAULT_WINDOW,
            recent_limit: DEFAULT_RECENT_LIMIT,
            recall_k: DEFAULT_RECALL_K,
            chunk_chars: DEFAULT_CHUNK_CHARS,
        }
    }
}

impl EngineConfig {
    /// Build configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            db_path: std::env::var("COMPANION_DB_PATH").ok(),
            qdrant_url: std::env::var("QDRANT_URL").unwrap_or(defaults.qdrant_url),
            embeddings_api_key: std::env::var("EMBEDDINGS_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok(),
            embeddings_base_url: std::env::var("EMBEDDINGS_BASE_URL").ok(),
            embeddings_model: std::env::var("EMBEDDINGS_MODEL").ok(),
            model_name: std::env::var("COMPANION_MODEL_NAME").unwrap_or(defaults.model_name),
            rate_quota: env_parse("RATE_QUOTA").unwrap_or(defaults.rate_quota),
            rate_window: env_parse("RATE_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_window),
            recent_limit: env_parse("RECENT_LIMIT").unwrap_or(defaults.recent_limit),
            recall_k: env_parse("RECALL_K").unwrap_or(defaults.recall_k),
            chunk_chars: env_parse("CHUNK_CHARS").unwrap_or(defaults.chunk_chars),
        }
    }

    /// Construct the embedding client this configuration describes.
    pub fn embedding_service(&self) -> Result<EmbeddingService> {
        let api_key = self
            .embeddings_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("No embedding API key configured"))?;

        Ok(match &self.embeddings_base_url {
            Some(base_url) => EmbeddingService::new_custom(
                api_key,
                base_url.clone(),
                self.embeddings_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            ),
            None => EmbeddingService::new_openai(api_key),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
