//! Embedding providers and the rate-limited, retrying fetcher built on them.
//!
//! - **[`OpenAiEmbedder`]** calls `POST /v1/embeddings`, one request per call.
//! - **[`RateLimitedEmbedder`]** wraps any [`Embedder`] with a
//!   [`FixedWindowLimiter`] and a [`RetryPolicy`].
//! - **[`DisabledFetcher`]** fails every request; used when
//!   `embedding.provider = "disabled"`.
//!
//! # Retry Strategy
//!
//! - HTTP 401 → fatal, no retry and no wait
//! - HTTP 429 and 5xx, network errors → wait `retry_delay`, retry
//! - any other status → fail this request only
//! - attempts exhausted → fail this request only

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::{Config, EmbeddingConfig};
use crate::error::{FetchError, ServiceError};
use crate::rate_limit::FixedWindowLimiter;
use crate::traits::{Embedder, EmbeddingFetcher};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Build the fetcher selected by `embedding.provider`.
pub fn create_fetcher(config: &Config) -> Result<Arc<dyn EmbeddingFetcher>> {
    match config.embedding.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledFetcher)),
        "openai" => {
            let embedder = OpenAiEmbedder::new(&config.embedding)?;
            Ok(Arc::new(RateLimitedEmbedder::new(
                embedder,
                FixedWindowLimiter::from_config(&config.rate_limit),
                RetryPolicy::from_config(&config.embedding),
            )))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

/// Fetcher used when no embedding provider is configured.
pub struct DisabledFetcher;

#[async_trait]
impl EmbeddingFetcher for DisabledFetcher {
    fn dims(&self) -> usize {
        0
    }

    async fn fetch(&self, _fragments: &[String]) -> Result<Vec<Vec<f32>>, FetchError> {
        Err(FetchError::Failed(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI ============

/// Embedder backed by the OpenAI embeddings API.
///
/// Reads the API key from `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, fragments: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": fragments,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Server(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Server(format!("unreadable response: {}", e)))?;
        parse_openai_response(&json).map_err(|e| ServiceError::Other(e.to_string()))
    }
}

/// Extract `data[].embedding` arrays, ordered by their `index` field.
pub fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(position as u64);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    // Sort by index to ensure order matches input
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Rate limiting and retries ============

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            attempts: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// An [`EmbeddingFetcher`] that admits each request through a limiter and
/// retries transient failures.
pub struct RateLimitedEmbedder<E> {
    inner: E,
    limiter: FixedWindowLimiter,
    policy: RetryPolicy,
}

impl<E: Embedder> RateLimitedEmbedder<E> {
    pub fn new(inner: E, limiter: FixedWindowLimiter, policy: RetryPolicy) -> Self {
        Self {
            inner,
            limiter,
            policy,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    fn check_shape(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<(), FetchError> {
        if vectors.len() != expected {
            return Err(FetchError::Failed(format!(
                "expected {} embeddings, got {}",
                expected,
                vectors.len()
            )));
        }
        let dims = self.inner.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(FetchError::Failed(format!(
                "expected {} dimensions, got {}",
                dims,
                bad.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<E: Embedder> EmbeddingFetcher for RateLimitedEmbedder<E> {
    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn fetch(&self, fragments: &[String]) -> Result<Vec<Vec<f32>>, FetchError> {
        if fragments.is_empty() {
            return Ok(Vec::new());
        }

        let attempts = self.policy.attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            self.limiter.acquire().await;

            match self.inner.embed(fragments).await {
                Ok(vectors) => {
                    self.check_shape(fragments.len(), &vectors)?;
                    return Ok(vectors);
                }
                Err(e @ ServiceError::Auth(_)) => {
                    error!(model = self.inner.model_name(), error = %e, "embedding authentication failed");
                    return Err(FetchError::Fatal(e));
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        attempt,
                        attempts,
                        error = %e,
                        "embedding request failed; retrying in {:?}",
                        self.policy.retry_delay
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
                Err(e) => return Err(FetchError::Failed(e.to_string())),
            }
        }

        Err(FetchError::Failed(match last_err {
            Some(e) => format!("gave up after {} attempts: {}", attempts, e),
            None => format!("gave up after {} attempts", attempts),
        }))
    }
}

// ============ Vector math ============

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
///
/// # Formula
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
