//! Core data models used throughout threadloom.
//!
//! These types represent the messages that flow through a conversation
//! thread and the embedding vectors that flow through the retrieval
//! pipeline.

use serde::{Deserialize, Serialize};

/// Default embedding dimensionality (OpenAI `text-embedding-ada-002`).
pub const EMBEDDING_DIMS: usize = 1536;

/// Speaker of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single role-tagged unit of conversation text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A message with empty content counts as "no message".
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Where a fragment came from and the fragment text itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    /// Source file path, relative to the index root. Empty for ad-hoc
    /// fragments such as search queries.
    pub filename: String,
    /// Exact fragment text; doubles as the embedding cache key.
    pub split_part: String,
}

/// An embedded fragment.
///
/// `values` is empty until the fragment has been embedded (or found in
/// the cache).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub id: String,
    /// Unix seconds at which the values were produced (0 if unknown).
    pub timestamp: i64,
    pub metadata: VectorMetadata,
    pub values: Vec<f32>,
}

impl Vector {
    /// A not-yet-embedded fragment.
    pub fn fragment(
        id: impl Into<String>,
        filename: impl Into<String>,
        split_part: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: 0,
            metadata: VectorMetadata {
                filename: filename.into(),
                split_part: split_part.into(),
            },
            values: Vec::new(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.metadata.filename
    }

    pub fn split_part(&self) -> &str {
        &self.metadata.split_part
    }
}

/// A vector-store match returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub filename: String,
    pub split_part: String,
    /// Cosine similarity to the query, in `[-1.0, 1.0]`.
    pub score: f32,
}
