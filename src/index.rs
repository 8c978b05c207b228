//! Indexing local files into the vector store.
//!
//! Files under `index.root` matching the include globs (and none of the
//! exclude globs) are split into fragments, embedded through the
//! [`EmbeddingCache`], and upserted into the [`VectorStore`]. Filenames are
//! recorded relative to the root with `/` separators.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::io::{BufRead, Write};
use walkdir::WalkDir;

use crate::cache::EmbeddingCache;
use crate::chunk::split_text;
use crate::config::{Config, IndexConfig};
use crate::embedding;
use crate::models::Vector;
use crate::traits::EmbeddingFetcher;
use crate::vector_store::VectorStore;
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the index root.
    pub path: String,
    pub body: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexReport {
    pub files: usize,
    pub fragments: usize,
    pub stored: usize,
    pub missing: usize,
}

pub fn scan_files(index: &IndexConfig) -> Result<Vec<SourceFile>> {
    let root = &index.root;
    if !root.exists() {
        bail!("Index root does not exist: {}", root.display());
    }

    let include_set = build_globset(&index.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/.loom-data/**".to_string(),
    ];
    default_excludes.extend(index.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(index.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        // Binary or non-UTF-8 files are not indexable text.
        let Ok(body) = std::fs::read_to_string(path) else {
            tracing::debug!(file = %rel_str, "skipping unreadable file");
            continue;
        };
        files.push(SourceFile {
            path: rel_str,
            body,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Stable id for fragment `index` of `path`.
pub fn vector_id(path: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split a file into not-yet-embedded fragments.
pub fn fragments_for(file: &SourceFile, max_tokens: usize) -> Vec<Vector> {
    split_text(&file.body, max_tokens)
        .into_iter()
        .enumerate()
        .map(|(i, text)| Vector::fragment(vector_id(&file.path, i, &text), &file.path, text))
        .collect()
}

/// Embed `fragments` through the cache and store every vector that got
/// values.
pub async fn index_fragments(
    fragments: Vec<Vector>,
    cache: &EmbeddingCache,
    vectors: &VectorStore,
    fetcher: &dyn EmbeddingFetcher,
) -> Result<IndexReport> {
    let total = fragments.len();
    let now = chrono::Utc::now().timestamp();

    let mut embedded = cache.embed_with_cache(fragments, fetcher).await?;
    for vector in &mut embedded {
        vector.timestamp = now;
    }
    let stored = vectors.upsert(&embedded).await?;

    Ok(IndexReport {
        files: 0,
        fragments: total,
        stored,
        missing: total - embedded.len(),
    })
}

pub async fn run_index(config: &Config, yes: bool) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let fetcher = embedding::create_fetcher(config)?;
    let workspace = Workspace::open(config).await?;

    let files = scan_files(&config.index)?;
    let fragments: Vec<Vector> = files
        .iter()
        .flat_map(|f| fragments_for(f, config.index.max_tokens))
        .collect();

    // Counting only reads the cache; file times are recorded once the run
    // is agreed to.
    let (cached, uncached) = workspace.cache.count_cached(&fragments).await?;

    if uncached > 0 && !yes && !confirm(uncached, cached)? {
        println!("index cancelled");
        workspace.close().await;
        return Ok(());
    }

    let mut report = index_fragments(
        fragments,
        &workspace.cache,
        &workspace.vectors,
        fetcher.as_ref(),
    )
    .await?;
    report.files = files.len();

    println!("index");
    println!("  files: {}", report.files);
    println!("  fragments: {}", report.fragments);
    println!("  stored: {}", report.stored);
    if report.missing > 0 {
        println!("  missing embeddings: {}", report.missing);
    }

    workspace.close().await;
    Ok(())
}

fn confirm(uncached: usize, cached: usize) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        bail!(
            "{} fragments need embedding; pass --yes to confirm when not running interactively",
            uncached
        );
    }
    print!(
        "{} fragments need embedding ({} already cached). Continue? [y/N] ",
        uncached, cached
    );
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

pub async fn run_stale(config: &Config) -> Result<()> {
    let workspace = Workspace::open(config).await?;
    let stale = workspace.staleness.stale_files().await?;

    if stale.is_empty() {
        println!("All indexed files are up to date.");
    } else {
        println!("Stale files ({}):", stale.len());
        for file in &stale {
            println!("  {}", file);
        }
    }

    workspace.close().await;
    Ok(())
}
