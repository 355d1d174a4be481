use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SapaError};

/// Top-level configuration for Sapa.
///
/// Loaded from `~/.sapa/config.toml` by default. Every section falls back to
/// its defaults when omitted, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SapaConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl SapaConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SapaConfig = toml::from_str(&content)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load config, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Check cross-field constraints. Failures are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(SapaError::Config(
                "embedding.dimension must be greater than zero".into(),
            ));
        }
        if self.retrieval.max_top_k == 0 {
            return Err(SapaError::Config(
                "retrieval.max_top_k must be greater than zero".into(),
            ));
        }
        if self.retrieval.top_k == 0 || self.retrieval.top_k > self.retrieval.max_top_k {
            return Err(SapaError::Config(format!(
                "retrieval.top_k must be in 1..={}, got {}",
                self.retrieval.max_top_k, self.retrieval.top_k
            )));
        }
        if self.retrieval.metric != "cosine" {
            return Err(SapaError::Config(format!(
                "unsupported retrieval.metric '{}'",
                self.retrieval.metric
            )));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(SapaError::Config(format!(
                "generation.temperature must be in 0.0..=2.0, got {}",
                self.generation.temperature
            )));
        }
        if self.chat.max_query_chars == 0 {
            return Err(SapaError::Config(
                "chat.max_query_chars must be greater than zero".into(),
            ));
        }
        if self.chat.max_follow_ups > 3 {
            return Err(SapaError::Config(format!(
                "chat.max_follow_ups must be at most 3, got {}",
                self.chat.max_follow_ups
            )));
        }
        if self.embedding.timeout_secs == 0 || self.generation.timeout_secs == 0 {
            return Err(SapaError::Config("provider timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Absolute path of the session database.
    pub fn database_path(&self) -> PathBuf {
        let file = Path::new(&self.storage.database_file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            expand_home(&self.general.data_dir).join(file)
        }
    }
}

/// Expand a leading `~/` using `$HOME`. Other paths are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Read the API key named by `var`. A missing or empty variable is a
/// configuration error.
pub fn api_key_from_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(SapaError::Config(format!(
            "environment variable {} is not set",
            var
        ))),
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the session database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.sapa/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Embedding provider settings (OpenAI-compatible `/embeddings`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "SAPA_EMBEDDING_API_KEY".to_string(),
            dimension: 1536,
            timeout_secs: 10,
        }
    }
}

/// Generative model settings (OpenAI-compatible `/chat/completions`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "SAPA_GENERATION_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            timeout_secs: 30,
        }
    }
}

/// Semantic retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of passages retrieved per query.
    pub top_k: usize,
    /// Upper bound for `top_k`; larger requests are clamped.
    pub max_top_k: usize,
    /// Passages scoring below this are discarded.
    pub min_score: f32,
    /// Similarity metric. Only "cosine" is supported.
    pub metric: String,
    /// JSON Lines file of pre-embedded chunks produced by ingestion.
    pub chunks_path: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_top_k: 5,
            min_score: 0.0,
            metric: "cosine".to_string(),
            chunks_path: "data/chunks.jsonl".to_string(),
        }
    }
}

/// Conversation orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Number of most recent turns replayed into the prompt.
    pub history_window: usize,
    /// Maximum executed tool calls per turn.
    pub max_tool_rounds: usize,
    /// Queries longer than this many grapheme clusters are truncated.
    pub max_query_chars: usize,
    /// Retries after the first failed provider call.
    pub provider_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_follow_ups: usize,
}

impl ChatConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: 5,
            max_tool_rounds: 2,
            max_query_chars: 2000,
            provider_retries: 1,
            retry_backoff_ms: 250,
            max_follow_ups: 3,
        }
    }
}

/// Session persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name, relative to `general.data_dir` unless absolute.
    pub database_file: String,
    /// Background retries for a failed session write.
    pub persist_retry_attempts: u32,
    pub persist_retry_backoff_ms: u64,
}

impl StorageConfig {
    pub fn persist_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_retry_backoff_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "sessions.db".to_string(),
            persist_retry_attempts: 3,
            persist_retry_backoff_ms: 500,
        }
    }
}

/// Tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// JSON file mapping topics to external links.
    pub links_path: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            links_path: "data/mock_links.json".to_string(),
        }
    }
}
