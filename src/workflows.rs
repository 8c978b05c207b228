//! Retrieval-augmented workflow steps.
//!
//! | Step | Kind | Adds |
//! |------|------|------|
//! | [`EmbedQuery`] | [`Workflow`] | `queryEmbedding` node carrying the query vector |
//! | [`SearchFiles`] | [`Workflow`] | `searchResults` node carrying the top hits |
//! | [`IncludeFiles`] | [`Workflow`] | system message with whole file contents |
//! | [`InjectSearchResults`] | [`Workflow`] | system message with the hit fragments |
//! | [`CompleteThread`] | [`ErrorWorkflow`] | assistant message from the chat model |
//!
//! Each step reads the services it needs from the node's
//! [`ExecutionContext`](crate::engine::ExecutionContext).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::EmbeddingCache;
use crate::engine::{ErrorNode, ErrorWorkflow, Node, NodeId, NodeTree, Workflow};
use crate::models::{Message, SearchHit, Vector};
use crate::search::filter_results;
use crate::truncate::truncate_to_max_words;

/// Data key holding the query embedding (`Vec<f32>`).
pub const QUERY_VECTOR_KEY: &str = "queryVector";
/// Data key holding search hits (`Vec<SearchHit>`).
pub const SEARCH_RESULTS_KEY: &str = "searchResults";

/// Nearest node on the path from `node` to the root whose data has `key`.
fn find_data<T: serde::de::DeserializeOwned>(
    tree: &NodeTree,
    node: NodeId,
    key: &str,
) -> Result<Option<T>> {
    for id in tree.ancestry(node)? {
        if let Some(value) = tree.get(id)?.data_as(key)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Embed a free-text query through the cache, so repeating a query costs
/// nothing.
pub struct EmbedQuery {
    query: String,
    cache: Arc<EmbeddingCache>,
}

impl EmbedQuery {
    pub fn new(query: impl Into<String>, cache: Arc<EmbeddingCache>) -> Self {
        Self {
            query: query.into(),
            cache,
        }
    }
}

#[async_trait]
impl Workflow for EmbedQuery {
    fn name(&self) -> &str {
        "embedQuery"
    }

    async fn run(&self, tree: &mut NodeTree, node: NodeId) -> Result<NodeId> {
        if self.query.trim().is_empty() {
            bail!("query is empty");
        }
        let context = tree.context(node)?;

        let fragment = Vector::fragment("query", "", self.query.clone());
        let embedded = self
            .cache
            .embed_with_cache(vec![fragment], context.embeddings.as_ref())
            .await?;
        let query = embedded
            .into_iter()
            .next()
            .context("query could not be embedded")?;

        let child = Node::named("queryEmbedding")
            .with_data(QUERY_VECTOR_KEY, serde_json::to_value(&query.values)?);
        Ok(tree.add_child(node, child)?)
    }
}

/// Top-`k` similarity search that skips fragments from `exclude_files`.
pub struct SearchFiles {
    exclude_files: Vec<String>,
    k: usize,
    n: usize,
}

impl SearchFiles {
    /// Fetch `n` candidates and keep the first `k` that are not excluded.
    pub fn new(exclude_files: Vec<String>, k: usize, n: usize) -> Self {
        Self {
            exclude_files,
            k,
            n: n.max(k),
        }
    }
}

#[async_trait]
impl Workflow for SearchFiles {
    fn name(&self) -> &str {
        "searchFiles"
    }

    async fn run(&self, tree: &mut NodeTree, node: NodeId) -> Result<NodeId> {
        let query: Vec<f32> = find_data(tree, node, QUERY_VECTOR_KEY)?
            .context("no query embedding on this thread")?;
        let context = tree.context(node)?;

        let candidates = context.search.search(&query, self.n).await?;
        let results = filter_results(candidates, &self.exclude_files, self.k);
        debug!(hits = results.len(), k = self.k, n = self.n, "search finished");

        let child = Node::named("searchResults")
            .with_data(SEARCH_RESULTS_KEY, serde_json::to_value(&results)?);
        Ok(tree.add_child(node, child)?)
    }
}

/// Add the full contents of `files` as one system message.
pub struct IncludeFiles {
    root: PathBuf,
    files: Vec<String>,
}

impl IncludeFiles {
    pub fn new(root: impl Into<PathBuf>, files: Vec<String>) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }
}

#[async_trait]
impl Workflow for IncludeFiles {
    fn name(&self) -> &str {
        "includeFiles"
    }

    async fn run(&self, tree: &mut NodeTree, node: NodeId) -> Result<NodeId> {
        if self.files.is_empty() {
            return Ok(node);
        }
        let mut content = String::from("Files for reference:\n");
        for file in &self.files {
            let path = self.root.join(file);
            let body = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            content.push_str(&format!("\n### {}\n{}\n", file, body));
        }
        Ok(tree.add_system_message(node, content)?)
    }
}

/// Turn the nearest search results into a system message.
pub struct InjectSearchResults;

#[async_trait]
impl Workflow for InjectSearchResults {
    fn name(&self) -> &str {
        "injectSearchResults"
    }

    async fn run(&self, tree: &mut NodeTree, node: NodeId) -> Result<NodeId> {
        let hits: Vec<SearchHit> = find_data(tree, node, SEARCH_RESULTS_KEY)?.unwrap_or_default();
        if hits.is_empty() {
            return Ok(node);
        }
        let mut content = String::from("Relevant file fragments:\n");
        for hit in &hits {
            content.push_str(&format!("\n### {}\n{}\n", hit.filename, hit.split_part));
        }
        Ok(tree.add_system_message(node, content)?)
    }
}

/// Send the thread (trimmed to `max_words`) to the chat model and append
/// the reply.
pub struct CompleteThread {
    max_words: i64,
    stream: bool,
}

impl CompleteThread {
    pub fn new(max_words: i64, stream: bool) -> Self {
        Self { max_words, stream }
    }

    async fn complete(&self, tree: &mut NodeTree, node: NodeId) -> Result<NodeId> {
        let context = tree.context(node)?;
        let thread = tree.thread(node)?;
        let trimmed = truncate_to_max_words(&thread, self.max_words)?;
        if trimmed.is_empty() {
            bail!(
                "the newest message alone exceeds the {} word limit",
                self.max_words
            );
        }
        if trimmed.len() < thread.len() {
            info!(
                dropped = thread.len() - trimmed.len(),
                kept = trimmed.len(),
                "trimmed thread to word limit"
            );
        }

        let reply = context.chat.complete(&trimmed, self.stream).await?;
        Ok(tree.add_message(node, Message::assistant(reply))?)
    }
}

#[async_trait]
impl ErrorWorkflow for CompleteThread {
    fn name(&self) -> &str {
        "completeThread"
    }

    async fn run(&self, tree: &mut NodeTree, node: NodeId) -> ErrorNode {
        match self.complete(tree, node).await {
            Ok(reply) => ErrorNode::ok(reply),
            Err(e) => ErrorNode::err(node, e),
        }
    }
}
