use std::fmt;
use std::sync::Arc;

use crate::chat::DisabledChat;
use crate::embedding::DisabledFetcher;
use crate::search::DisabledSearch;
use crate::traits::{ChatCompletion, EmbeddingFetcher, VectorSearch};

/// Service handles a node runs with.
///
/// Copied onto each node at registration (from the parent when the node
/// does not bring its own). Ancestry and context are separate relations:
/// [`NodeTree::hijack`](super::NodeTree::hijack) can move a node under a
/// new parent and hand it a different context independently.
#[derive(Clone)]
pub struct ExecutionContext {
    pub chat: Arc<dyn ChatCompletion>,
    pub embeddings: Arc<dyn EmbeddingFetcher>,
    pub search: Arc<dyn VectorSearch>,
    /// Prepended as a system message to every reconstructed thread.
    pub initial_system: Option<String>,
}

impl ExecutionContext {
    /// A context whose capabilities all fail with a "not configured" error.
    pub fn disabled() -> Self {
        Self {
            chat: Arc::new(DisabledChat),
            embeddings: Arc::new(DisabledFetcher),
            search: Arc::new(DisabledSearch),
            initial_system: None,
        }
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatCompletion>) -> Self {
        self.chat = chat;
        self
    }

    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingFetcher>) -> Self {
        self.embeddings = embeddings;
        self
    }

    pub fn with_search(mut self, search: Arc<dyn VectorSearch>) -> Self {
        self.search = search;
        self
    }

    pub fn with_initial_system(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.initial_system = (!content.is_empty()).then_some(content);
        self
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("chat", &self.chat.model_name())
            .field("embedding_dims", &self.embeddings.dims())
            .field("initial_system", &self.initial_system)
            .finish()
    }
}
