//! TOML configuration parsing and validation.
//!
//! Only `[db]` is required; every other section falls back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/kb.sqlite"
//!
//! [chunking]
//! max_chunk_size = 1000
//!
//! [ingestion]
//! reingest_policy = "queue"
//!
//! [scoring]
//! backend = "substring"
//! match_score = 0.8
//! timeout_ms = 10000
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length in characters (oversized paragraphs excepted).
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    1000
}

/// What to do when a re-ingestion arrives while another one of the same
/// document is still running.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReingestPolicy {
    /// Wait for the in-flight re-ingestion, then run.
    #[default]
    Queue,
    /// Fail immediately with a conflict error.
    Reject,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_max_name_chars")]
    pub max_name_chars: usize,
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,
    #[serde(default)]
    pub reingest_policy: ReingestPolicy,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_name_chars: default_max_name_chars(),
            max_content_bytes: default_max_content_bytes(),
            reingest_policy: ReingestPolicy::default(),
        }
    }
}

fn default_max_name_chars() -> usize {
    100
}
fn default_max_content_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_limit() -> usize {
    knowledge_engine_core::models::DEFAULT_QUERY_LIMIT
}
fn default_max_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScorerBackend {
    #[default]
    Substring,
    Embedding,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default)]
    pub backend: ScorerBackend,
    /// Score assigned to a substring match.
    #[serde(default = "default_match_score")]
    pub match_score: f64,
    /// Upper bound on a single scorer call.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            backend: ScorerBackend::default(),
            match_score: default_match_score(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ScoringConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_match_score() -> f64 {
    knowledge_engine_core::scorer::DEFAULT_MATCH_SCORE
}
fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            base_url: default_base_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_embed_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chunk_size == 0 {
        bail!("chunking.max_chunk_size must be > 0");
    }

    if config.ingestion.max_name_chars == 0 {
        bail!("ingestion.max_name_chars must be > 0");
    }
    if config.ingestion.max_content_bytes == 0 {
        bail!("ingestion.max_content_bytes must be > 0");
    }

    if config.retrieval.default_limit == 0 {
        bail!("retrieval.default_limit must be >= 1");
    }
    if config.retrieval.max_limit < config.retrieval.default_limit {
        bail!("retrieval.max_limit must be >= retrieval.default_limit");
    }

    if !(config.scoring.match_score > 0.0 && config.scoring.match_score <= 1.0) {
        bail!("scoring.match_score must be in (0.0, 1.0]");
    }
    if config.scoring.timeout_ms == 0 {
        bail!("scoring.timeout_ms must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    if config.scoring.backend == ScorerBackend::Embedding && !config.embedding.is_enabled() {
        bail!("scoring.backend = \"embedding\" requires an [embedding] provider");
    }

    Ok(())
}
