//! Capability traits for the external services a workflow can use.
//!
//! Each capability is a separate, narrow trait so a workflow runner can
//! inject exactly the implementations it has (a real OpenAI client, a
//! disabled stub, or a test fake) without a catch-all forwarding type.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ExecutionContext               │
//! │  ┌──────────────┐ ┌──────────────┐ ┌───────┐ │
//! │  │ChatCompletion│ │EmbeddingFetch│ │Vector │ │
//! │  │  (OpenAI)    │ │ (rate-limit) │ │Search │ │
//! │  └──────────────┘ └──────┬───────┘ └───────┘ │
//! └──────────────────────────┼───────────────────┘
//!                            ▼
//!                     Embedder (raw API)
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use crate::error::{FetchError, ServiceError};
use crate::models::{Message, SearchHit};

/// A language-model chat completion service.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Complete a conversation.
    ///
    /// When `stream` is true, implementations may echo partial output as it
    /// arrives; the full text is still returned.
    async fn complete(&self, messages: &[Message], stream: bool) -> Result<String, ServiceError>;
}

/// A raw embedding generation service.
///
/// Implementations make exactly one request per call and classify failures
/// into [`ServiceError`]; rate limiting and retries are layered on top by
/// [`RateLimitedEmbedder`](crate::embedding::RateLimitedEmbedder).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed `fragments`, returning one vector per fragment in input order.
    async fn embed(&self, fragments: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

/// An embedding source that is safe to call from a pipeline: admission
/// control and retries are already handled.
#[async_trait]
pub trait EmbeddingFetcher: Send + Sync {
    fn dims(&self) -> usize;
    async fn fetch(&self, fragments: &[String]) -> Result<Vec<Vec<f32>>, FetchError>;
}

/// Top-N similarity search over stored vectors.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Return up to `n` hits, most similar first.
    async fn search(&self, query: &[f32], n: usize) -> Result<Vec<SearchHit>>;
}

/// Read-only access to file modification times.
pub trait FileMetadata: Send + Sync {
    /// Modification time of `path`, in nanoseconds since the Unix epoch.
    fn modified_nanos(&self, path: &str) -> Result<i64>;
}

/// [`FileMetadata`] backed by the local filesystem.
///
/// Paths are resolved relative to `root`, matching how the indexer records
/// filenames.
#[derive(Debug, Clone)]
pub struct FsMetadata {
    root: PathBuf,
}

impl FsMetadata {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileMetadata for FsMetadata {
    fn modified_nanos(&self, path: &str) -> Result<i64> {
        let full = self.root.join(path);
        let modified = std::fs::metadata(&full)
            .and_then(|m| m.modified())
            .map_err(|e| anyhow::anyhow!("Failed to stat {}: {}", full.display(), e))?;
        let nanos = modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        Ok(i64::try_from(nanos).unwrap_or(i64::MAX))
    }
}
