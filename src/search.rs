//! Similarity search over indexed fragments.
//!
//! A query is embedded (through the cache), the top `n` stored vectors are
//! ranked by cosine similarity, fragments from excluded files are dropped,
//! and the first `k` survivors are returned. Fetching `n >= k` candidates
//! leaves headroom for the exclusion filter.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding;
use crate::engine::{ExecutionContext, Flow, NodeTree};
use crate::models::SearchHit;
use crate::traits::VectorSearch;
use crate::workflows::{EmbedQuery, SearchFiles, SEARCH_RESULTS_KEY};
use crate::workspace::Workspace;

/// Drop hits from `exclude_files`, keep order, stop after `k`.
pub fn filter_results(results: Vec<SearchHit>, exclude_files: &[String], k: usize) -> Vec<SearchHit> {
    results
        .into_iter()
        .filter(|hit| !exclude_files.iter().any(|f| *f == hit.filename))
        .take(k)
        .collect()
}

/// Search backend used when nothing has been configured.
pub struct DisabledSearch;

#[async_trait]
impl VectorSearch for DisabledSearch {
    async fn search(&self, _query: &[f32], _n: usize) -> Result<Vec<SearchHit>> {
        bail!("Vector search is not configured")
    }
}

pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    n: Option<usize>,
    exclude: Vec<String>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let k = k.unwrap_or(config.retrieval.k);
    let n = n.unwrap_or(config.retrieval.n).max(k);

    let fetcher = embedding::create_fetcher(config)?;
    let workspace = Workspace::open(config).await?;
    let context = Arc::new(
        ExecutionContext::disabled()
            .with_embeddings(fetcher)
            .with_search(Arc::new(workspace.vectors.clone())),
    );

    let mut tree = NodeTree::new();
    let root = tree.new_root_with(context);
    let embed = EmbedQuery::new(query, workspace.cache.clone());
    let search = SearchFiles::new(exclude, k, n);
    let leaf = Flow::start(&mut tree, root)
        .apply(&embed)
        .await
        .apply(&search)
        .await
        .finish()?;

    let results: Vec<SearchHit> = tree
        .get(leaf)?
        .data_as(SEARCH_RESULTS_KEY)?
        .unwrap_or_default();

    if results.is_empty() {
        println!("No results.");
    }
    for (i, hit) in results.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, hit.score, hit.filename);
        println!(
            "    excerpt: \"{}\"",
            excerpt(&hit.split_part, 240).replace('\n', " ").trim()
        );
        println!("    id: {}", hit.id);
        println!();
    }

    workspace.close().await;
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
