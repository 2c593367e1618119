//! Remote embedding services over blocking HTTP.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::{Error, Result};

fn build_client(timeout_secs: u64) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))
}

fn classify(provider: &'static str, model: &str, e: reqwest::Error) -> Error {
    let error_kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_decode() {
        "decode"
    } else {
        "request"
    };
    tracing::warn!(provider, model, error = %e, error_kind, "embedding request failed");
    Error::EmbeddingUnavailable(format!("{provider} {error_kind} error: {e}"))
}

fn check_status(
    provider: &'static str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    tracing::warn!(provider, status = %status, body = %body, "embedding API returned error status");
    Err(Error::EmbeddingUnavailable(format!(
        "{provider} returned status {status}"
    )))
}

fn non_empty(provider: &'static str, embedding: Vec<f32>) -> Result<Vec<f32>> {
    if embedding.is_empty() {
        Err(Error::EmbeddingUnavailable(format!(
            "{provider} returned an empty embedding"
        )))
    } else {
        Ok(embedding)
    }
}

// ── Ollama ───────────────────────────────────────────────────────────────────

/// `POST {base_url}/api/embeddings`.
pub struct OllamaEmbedder {
    endpoint: String,
    model: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            endpoint: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client: build_client(config.timeout_secs)?,
        })
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.endpoint))
            .json(&OllamaRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .map_err(|e| classify("ollama", &self.model, e))?;

        let parsed: OllamaResponse = check_status("ollama", response)?
            .json()
            .map_err(|e| classify("ollama", &self.model, e))?;
        non_empty("ollama", parsed.embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ── OpenAI-compatible ────────────────────────────────────────────────────────

/// `POST {base_url}/embeddings` with a bearer key read from `api_key_env`.
pub struct OpenAiEmbedder {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// A missing key is not a configuration error: every call reports the
    /// provider unavailable and recall degrades to keywords.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "OpenAI API key not set");
        }
        Ok(Self {
            endpoint: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            api_key_env: config.api_key_env.clone(),
            client: build_client(config.timeout_secs)?,
        })
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(Error::EmbeddingUnavailable(format!(
                "{} is not set",
                self.api_key_env
            )));
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .bearer_auth(api_key)
            .json(&OpenAiRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .map_err(|e| classify("openai", &self.model, e))?;

        let parsed: OpenAiResponse = check_status("openai", response)?
            .json()
            .map_err(|e| classify("openai", &self.model, e))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .unwrap_or_default();
        non_empty("openai", embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_without_key_is_unavailable() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_key_env: "MNEMO_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..EmbeddingConfig::default()
        };
        let embedder = OpenAiEmbedder::new(&config).unwrap();
        assert!(matches!(
            embedder.embed("hi"),
            Err(Error::EmbeddingUnavailable(_))
        ));
    }

    #[test]
    fn unreachable_ollama_is_unavailable() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            // nothing listens on the discard port
            base_url: "http://127.0.0.1:9/".into(),
            timeout_secs: 2,
            ..EmbeddingConfig::default()
        };
        let embedder = OllamaEmbedder::new(&config).unwrap();
        assert!(matches!(
            embedder.embed("hi"),
            Err(Error::EmbeddingUnavailable(_))
        ));
    }

    #[test]
    fn openai_response_shape_parses() {
        let parsed: OpenAiResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[0.5,-0.5]}],"model":"m"}"#).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.5, -0.5]);
    }
}
