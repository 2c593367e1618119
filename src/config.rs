use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MnemoConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub decay: DecayConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `none`, `ollama` or `openai`.
    pub provider: String,
    pub model: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key (openai only).
    pub api_key_env: String,
    pub timeout_secs: u64,
}

/// Spreading-activation knobs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    /// Seeds fetched per requested result.
    pub overfetch_factor: usize,
    pub spread_hops: usize,
    pub hop_decay: f64,
    /// Concepts at or below this activation do not propagate.
    pub activation_threshold: f64,
}

/// Usage-based decay and rejuvenation.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayConfig {
    pub enabled: bool,
    /// A decay pass runs every `interval` recalls.
    pub interval: u64,
    pub rate: f64,
    pub rejuvenation_max_boost: f64,
    pub grace_window_seconds: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mnemo_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            model: "nomic-embed-text".into(),
            base_url: "http://localhost:11434".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            overfetch_factor: 2,
            spread_hops: 2,
            hop_decay: 0.5,
            activation_threshold: 0.05,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 20,
            rate: 0.1,
            rejuvenation_max_boost: 0.3,
            grace_window_seconds: 60,
        }
    }
}

/// Returns `~/.mnemo/`
pub fn default_mnemo_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mnemo")
}

/// Returns the default config file path: `~/.mnemo/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnemo_dir().join("config.toml")
}

impl MnemoConfig {
    /// Load config from TOML file (if it exists), apply env var overrides, validate.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides and validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemoConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMO_DB, MNEMO_LOG_LEVEL,
    /// MNEMO_DECAY_ENABLED, MNEMO_EMBEDDING_PROVIDER).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMO_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMO_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MNEMO_DECAY_ENABLED") {
            match val.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.decay.enabled = true,
                "0" | "false" | "no" | "off" => self.decay.enabled = false,
                other => tracing::warn!(value = other, "ignoring unparseable MNEMO_DECAY_ENABLED"),
            }
        }
        if let Ok(val) = std::env::var("MNEMO_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
    }

    /// Reject out-of-range values up front so engines never see them.
    pub fn validate(&self) -> crate::Result<()> {
        self.retrieval.validate()?;
        self.decay.validate()
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error::InvalidConfig;

        if self.default_k == 0 {
            return Err(InvalidConfig("retrieval.default_k must be at least 1".into()));
        }
        if self.overfetch_factor == 0 {
            return Err(InvalidConfig(
                "retrieval.overfetch_factor must be at least 1".into(),
            ));
        }
        if self.spread_hops > 8 {
            return Err(InvalidConfig(format!(
                "retrieval.spread_hops must be at most 8, got {}",
                self.spread_hops
            )));
        }
        if !(self.hop_decay > 0.0 && self.hop_decay < 1.0) {
            return Err(InvalidConfig(format!(
                "retrieval.hop_decay must be in (0, 1), got {}",
                self.hop_decay
            )));
        }
        if !(0.0..1.0).contains(&self.activation_threshold) {
            return Err(InvalidConfig(format!(
                "retrieval.activation_threshold must be in [0, 1), got {}",
                self.activation_threshold
            )));
        }
        Ok(())
    }
}

impl DecayConfig {
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error::InvalidConfig;

        if self.interval == 0 {
            return Err(InvalidConfig("decay.interval must be at least 1".into()));
        }
        if !(self.rate > 0.0 && self.rate <= 1.0) {
            return Err(InvalidConfig(format!(
                "decay.rate must be in (0, 1], got {}",
                self.rate
            )));
        }
        if !(0.0..=1.0).contains(&self.rejuvenation_max_boost) {
            return Err(InvalidConfig(format!(
                "decay.rejuvenation_max_boost must be in [0, 1], got {}",
                self.rejuvenation_max_boost
            )));
        }
        if self.grace_window_seconds < 0 {
            return Err(InvalidConfig(
                "decay.grace_window_seconds must not be negative".into(),
            ));
        }
        Ok(())
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
