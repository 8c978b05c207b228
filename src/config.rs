use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::EMBEDDING_DIMS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Fragments per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Attempts per request (the first try included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// API base URL; defaults to `https://api.openai.com`.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    EMBEDDING_DIMS
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Fixed-window admission control for outbound embedding requests.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            poll_ms: default_poll_ms(),
        }
    }
}

fn default_max_requests() -> u32 {
    7
}
fn default_window_secs() -> u64 {
    60
}
fn default_poll_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Prepended as a system message to every reconstructed thread.
    #[serde(default)]
    pub initial_system: Option<String>,
    /// Word budget for the thread sent to the model; 0 means unlimited.
    #[serde(default)]
    pub max_words: i64,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            initial_system: None,
            max_words: 0,
            stream: false,
            timeout_secs: default_chat_timeout_secs(),
            url: None,
        }
    }
}

fn default_chat_timeout_secs() -> u64 {
    120
}

impl ChatConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Results kept after exclusion filtering.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Candidates fetched before filtering. Must be >= `k`.
    #[serde(default = "default_n")]
    pub n: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            n: default_n(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_n() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Approximate fragment size.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.rs".to_string(),
        "**/*.go".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
    ]
}
fn default_max_tokens() -> usize {
    300
}

impl Config {
    /// Defaults for everything, with the database under `./.loom-data/`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./.loom-data/loom.sqlite"),
            },
            embedding: EmbeddingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            chat: ChatConfig::default(),
            retrieval: RetrievalConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate embedding
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_retries == 0 {
        anyhow::bail!("embedding.max_retries must be >= 1");
    }
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate rate limit
    if config.rate_limit.max_requests == 0 {
        anyhow::bail!("rate_limit.max_requests must be >= 1");
    }

    // Validate chat
    if config.chat.max_words < 0 {
        anyhow::bail!(
            "chat.max_words is {}; set it above 0, or to 0 for no limit",
            config.chat.max_words
        );
    }
    if config.chat.is_enabled() && config.chat.model.is_none() {
        anyhow::bail!(
            "chat.model must be specified when provider is '{}'",
            config.chat.provider
        );
    }
    match config.chat.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown chat provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate retrieval
    if config.retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if config.retrieval.n < config.retrieval.k {
        anyhow::bail!(
            "retrieval.n ({}) must be >= retrieval.k ({}); exclusion filtering needs headroom",
            config.retrieval.n,
            config.retrieval.k
        );
    }

    // Validate index
    if config.index.max_tokens == 0 {
        anyhow::bail!("index.max_tokens must be > 0");
    }

    Ok(())
}
