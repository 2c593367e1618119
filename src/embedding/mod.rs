//! Query embedding providers.
//!
//! Provides the [`EmbeddingProvider`] trait and the implementations selected
//! by `embedding.provider` in configuration: `none` (no vectors; recall runs
//! on keyword overlap), `ollama` and `openai` (remote HTTP services). The
//! provider is created once via [`create_provider`].

pub mod http;

use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::{Error, Result};

/// Trait for embedding text into vectors.
///
/// All methods are synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`. Failures surface as
/// [`Error::EmbeddingUnavailable`]; recall treats that as "no vector" and
/// falls back to keyword matching.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Identifier recorded in the database's `embedding_model` metadata.
    fn model_name(&self) -> &str;
}

/// Provider for deployments without an embedding service.
pub struct NoEmbedding;

impl EmbeddingProvider for NoEmbedding {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::EmbeddingUnavailable(
            "no embedding provider configured".into(),
        ))
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

/// Create an embedding provider from config.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "none" => Ok(Arc::new(NoEmbedding)),
        "ollama" => Ok(Arc::new(http::OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(http::OpenAiEmbedder::new(config)?)),
        other => Err(Error::InvalidConfig(format!(
            "unknown embedding provider: {other}. Supported: none, ollama, openai"
        ))),
    }
}
