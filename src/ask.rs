//! `loom ask`: retrieval-augmented chat over the indexed files.
//!
//! ```text
//! root ─▶ (resumed thread) ─▶ includeFiles ─▶ user prompt ─▶ embedQuery ─▶ searchFiles
//!      ─▶ injectSearchResults ─▶ completeThread
//! ```
//!
//! Retrieval steps run only when an embedding provider is configured.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::chat;
use crate::config::Config;
use crate::embedding;
use crate::engine::{load_thread, propagate, store_thread, ExecutionContext, Flow, NodeTree};
use crate::workflows::{CompleteThread, EmbedQuery, IncludeFiles, InjectSearchResults, SearchFiles};
use crate::workspace::Workspace;

pub struct AskOptions {
    pub prompt: String,
    pub k: Option<usize>,
    pub n: Option<usize>,
    /// Files included whole; also excluded from search results.
    pub files: Vec<String>,
    pub exclude: Vec<String>,
    pub max_words: Option<i64>,
    /// Continue a thread saved by an earlier `--save`.
    pub resume: Option<PathBuf>,
    /// Write the finished thread here as JSON.
    pub save: Option<PathBuf>,
}

pub async fn run_ask(config: &Config, options: AskOptions) -> Result<()> {
    if options.prompt.trim().is_empty() {
        bail!("Prompt is empty");
    }
    if !config.chat.is_enabled() {
        bail!("Chat provider is disabled. Set [chat] provider in config.");
    }
    let max_words = options.max_words.unwrap_or(config.chat.max_words);
    let k = options.k.unwrap_or(config.retrieval.k);
    let n = options.n.unwrap_or(config.retrieval.n).max(k);

    let workspace = Workspace::open(config).await?;
    let mut context = ExecutionContext::disabled().with_chat(chat::create_chat(config)?);
    if let Some(system) = &config.chat.initial_system {
        context = context.with_initial_system(system.clone());
    }
    let retrieval = config.embedding.is_enabled();
    if retrieval {
        context = context
            .with_embeddings(embedding::create_fetcher(config)?)
            .with_search(Arc::new(workspace.vectors.clone()));
    }

    let mut exclude = options.exclude.clone();
    exclude.extend(options.files.iter().cloned());

    let include = IncludeFiles::new(&config.index.root, options.files.clone());
    let embed = EmbedQuery::new(options.prompt.clone(), workspace.cache.clone());
    let search = SearchFiles::new(exclude, k, n);
    let complete = CompleteThread::new(max_words, config.chat.stream);

    let mut tree = NodeTree::new();
    let mut root = tree.new_root_with(Arc::new(context));
    if let Some(path) = &options.resume {
        root = load_thread(&mut tree, root, path)?;
    }
    let prompt = options.prompt.clone();

    let mut flow = Flow::start(&mut tree, root)
        .apply(&include)
        .await
        .then(|tree, node| Ok(tree.add_user_message(node, prompt)?));
    if retrieval {
        flow = flow
            .apply(&embed)
            .await
            .apply(&search)
            .await
            .apply(&InjectSearchResults)
            .await;
    }
    let leaf = flow
        .apply_error_branch(&complete, propagate)
        .await
        .finish()?;

    if !config.chat.stream {
        if let Some(reply) = tree.get(leaf)?.thread_message() {
            println!("{}", reply.content);
        }
    }
    if let Some(path) = &options.save {
        store_thread(&tree, leaf, path)?;
        eprintln!("Saved thread to {}", path.display());
    }

    workspace.close().await;
    Ok(())
}
