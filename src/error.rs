//! Typed error kinds for the places where callers branch on *what* failed.
//!
//! Command-level code uses `anyhow`; these enums exist so the fetcher can
//! tell a bad API key from a rate limit, and so the workflow runner can tell
//! a fatal cache corruption from a fragment that merely failed to embed.

use crate::engine::NodeId;

/// Errors raised by node-tree operations. All of them indicate a bug in the
/// calling workflow rather than a runtime condition.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("node {0} is already registered")]
    AlreadyRegistered(NodeId),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("re-parenting node {replacement} under {parent} would create a cycle")]
    WouldCycle { replacement: NodeId, parent: NodeId },

    #[error("node {0} has no execution context")]
    MissingContext(NodeId),
}

#[derive(Debug, thiserror::Error)]
pub enum TruncateError {
    #[error("word limit is {0}; set it above 0, or to 0 for no limit")]
    NegativeBudget(i64),
}

/// Failure classes surfaced by an external language-model or embedding
/// service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let detail = format!("HTTP {}: {}", status, body.into());
        match status {
            401 => ServiceError::Auth(detail),
            429 => ServiceError::RateLimited(detail),
            500..=599 => ServiceError::Server(detail),
            _ => ServiceError::Other(detail),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_) | ServiceError::Server(_))
    }
}

/// Outcome of a rate-limited, retried embedding fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The run cannot continue (bad credentials).
    #[error("fatal embedding error: {0}")]
    Fatal(#[source] ServiceError),

    /// This fetch failed; other batches may still succeed.
    #[error("embedding failed: {0}")]
    Failed(String),
}

impl FetchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Fatal(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("stored vector for {key:?} has {found} values, expected {expected}")]
    MalformedVector {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("stored vector for {key:?} is not decodable: {detail}")]
    Undecodable { key: String, detail: String },

    #[error(
        "failed to commit {what} after a successful fetch; the embedding cache and \
         file timestamps may be out of sync: {detail}"
    )]
    Corruption { what: &'static str, detail: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
