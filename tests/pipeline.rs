//! Integration tests for the embedding pipeline: cache, staleness, rate
//! limiting, retries, storage and similarity search.
//!
//! A keyword embedder stands in for the remote service so that similarity
//! results are predictable.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

use threadloom::cache::EmbeddingCache;
use threadloom::config::Config;
use threadloom::db;
use threadloom::embedding::{RateLimitedEmbedder, RetryPolicy};
use threadloom::engine::{ExecutionContext, Flow, NodeTree};
use threadloom::error::{CacheError, FetchError, ServiceError};
use threadloom::index::{fragments_for, index_fragments, SourceFile};
use threadloom::migrate;
use threadloom::models::{SearchHit, Vector};
use threadloom::rate_limit::FixedWindowLimiter;
use threadloom::search::filter_results;
use threadloom::staleness::StalenessTracker;
use threadloom::store::{KeyValueStore, MemoryKv};
use threadloom::traits::{EmbeddingFetcher, FsMetadata};
use threadloom::vector_store::VectorStore;
use threadloom::workflows::{EmbedQuery, SearchFiles, SEARCH_RESULTS_KEY};
use threadloom::workspace::Workspace;

const KEYWORDS: [&str; 3] = ["tree", "cache", "limit"];

// ─── Fakes ──────────────────────────────────────────────────────────

/// One dimension per keyword, plus a constant so no vector is all zeros.
struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut values: Vec<f32> = KEYWORDS
        .iter()
        .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
        .collect();
    values.push(0.1);
    values
}

#[async_trait]
impl threadloom::traits::Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len() + 1
    }

    async fn embed(&self, fragments: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(fragments.iter().map(|f| keyword_vector(f)).collect())
    }
}

/// Fails every request with a fixed error.
struct BrokenEmbedder {
    error: ServiceError,
    calls: AtomicUsize,
}

#[async_trait]
impl threadloom::traits::Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len() + 1
    }

    async fn embed(&self, _fragments: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

fn fast_limiter() -> FixedWindowLimiter {
    FixedWindowLimiter::new(100, Duration::from_secs(60), Duration::from_millis(1))
}

fn no_delay() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        retry_delay: Duration::ZERO,
    }
}

fn fetcher<E: threadloom::traits::Embedder>(inner: E) -> RateLimitedEmbedder<E> {
    RateLimitedEmbedder::new(inner, fast_limiter(), no_delay())
}

/// In-memory cache over real files under `root`.
fn memory_cache(root: &std::path::Path) -> (EmbeddingCache, Arc<MemoryKv<String>>) {
    let store = Arc::new(MemoryKv::<String>::new());
    let staleness = StalenessTracker::new(
        Arc::new(MemoryKv::<i64>::new()),
        Arc::new(FsMetadata::new(root)),
    );
    let cache = EmbeddingCache::new(store.clone(), staleness, KEYWORDS.len() + 1, 2);
    (cache, store)
}

fn write_file(root: &std::path::Path, name: &str, body: &str, mtime_secs: u64) {
    let path = root.join(name);
    std::fs::write(&path, body).unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs))
        .unwrap();
}

// ─── Cache and staleness ────────────────────────────────────────────

#[tokio::test]
async fn second_run_is_served_entirely_from_cache() {
    let tmp = TempDir::new().unwrap();
    write_file(tmp.path(), "a.md", "tree", 1_000);
    write_file(tmp.path(), "b.md", "cache", 1_000);
    let (cache, _) = memory_cache(tmp.path());
    let fetcher = fetcher(KeywordEmbedder::new());

    let fragments = vec![
        Vector::fragment("1", "a.md", "the node tree"),
        Vector::fragment("2", "b.md", "the embedding cache"),
        Vector::fragment("3", "b.md", "the rate limit"),
    ];

    let first = cache
        .embed_with_cache(fragments.clone(), &fetcher)
        .await
        .unwrap();
    assert_eq!(first.len(), 3);
    let calls_after_first = fetcher.inner().calls();
    assert_eq!(calls_after_first, 2, "batch size 2 means two requests");

    let second = cache.embed_with_cache(fragments, &fetcher).await.unwrap();
    assert_eq!(second.len(), 3);
    assert_eq!(fetcher.inner().calls(), calls_after_first);
    assert_eq!(second[0].values, keyword_vector("the node tree"));
}

#[tokio::test]
async fn staleness_follows_file_modifications() {
    let tmp = TempDir::new().unwrap();
    write_file(tmp.path(), "a.md", "tree", 1_000);
    write_file(tmp.path(), "b.md", "cache", 1_000);
    let (cache, _) = memory_cache(tmp.path());
    let fetcher = fetcher(KeywordEmbedder::new());

    let fragments = vec![
        Vector::fragment("1", "a.md", "the node tree"),
        Vector::fragment("2", "b.md", "the embedding cache"),
    ];
    cache.embed_with_cache(fragments, &fetcher).await.unwrap();
    assert!(cache.staleness().stale_files().await.unwrap().is_empty());

    write_file(tmp.path(), "a.md", "tree, edited", 2_000);
    assert_eq!(cache.staleness().stale_files().await.unwrap(), vec!["a.md"]);
    assert!(cache.staleness().is_stale("a.md").await.unwrap());
    assert!(!cache.staleness().is_stale("b.md").await.unwrap());

    // An older time never overwrites a newer one
    let recorded = cache.staleness().last_seen("b.md").await.unwrap().unwrap();
    cache
        .staleness()
        .commit(&[("b.md".to_string(), recorded - 1)])
        .await
        .unwrap();
    assert_eq!(
        cache.staleness().last_seen("b.md").await.unwrap(),
        Some(recorded)
    );
}

#[tokio::test]
async fn counting_before_a_refused_index_keeps_edits_stale() {
    let tmp = TempDir::new().unwrap();
    write_file(tmp.path(), "a.md", "tree", 1_000);
    let (cache, _) = memory_cache(tmp.path());
    let fetcher = fetcher(KeywordEmbedder::new());

    let fragments = vec![Vector::fragment("1", "a.md", "the node tree")];
    cache
        .embed_with_cache(fragments.clone(), &fetcher)
        .await
        .unwrap();

    write_file(tmp.path(), "a.md", "tree, edited", 2_000);
    assert_eq!(cache.count_cached(&fragments).await.unwrap(), (1, 0));
    assert_eq!(cache.staleness().stale_files().await.unwrap(), vec!["a.md"]);

    std::fs::remove_file(tmp.path().join("a.md")).unwrap();
    assert!(cache.staleness().is_stale("a.md").await.unwrap());
    assert_eq!(cache.staleness().stale_files().await.unwrap(), vec!["a.md"]);
}

#[tokio::test]
async fn auth_failure_aborts_without_retry_or_writes() {
    let tmp = TempDir::new().unwrap();
    let (cache, store) = memory_cache(tmp.path());
    let fetcher = fetcher(BrokenEmbedder {
        error: ServiceError::Auth("HTTP 401: invalid key".to_string()),
        calls: AtomicUsize::new(0),
    });

    let err = cache
        .fetch_then_cache(&[Vector::fragment("1", "a.md", "tree")], &fetcher)
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Fetch(FetchError::Fatal(_))));
    assert_eq!(fetcher.inner().calls.load(Ordering::SeqCst), 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn server_errors_are_retried_then_skipped() {
    let tmp = TempDir::new().unwrap();
    let (cache, store) = memory_cache(tmp.path());
    let fetcher = fetcher(BrokenEmbedder {
        error: ServiceError::Server("HTTP 503: busy".to_string()),
        calls: AtomicUsize::new(0),
    });

    let report = cache
        .fetch_then_cache(&[Vector::fragment("1", "a.md", "tree")], &fetcher)
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.embedded, 0);
    assert_eq!(fetcher.inner().calls.load(Ordering::SeqCst), 3);
    assert!(store.is_empty());
}

#[tokio::test]
async fn malformed_cache_entry_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let (cache, store) = memory_cache(tmp.path());
    store
        .batch_set(&[("tree".to_string(), "[1.0, 2.0]".to_string())])
        .await
        .unwrap();

    let err = cache
        .partition(vec![Vector::fragment("1", "a.md", "tree")])
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::MalformedVector { found: 2, .. }));
}

// ─── Rate limiting and filtering ────────────────────────────────────

#[test]
fn limiter_admits_a_burst_then_waits_a_full_window() {
    let limiter = FixedWindowLimiter::new(7, Duration::from_secs(60), Duration::from_millis(10));
    let start = Instant::now();

    for _ in 0..7 {
        assert!(limiter.try_acquire_at(start));
    }
    assert!(!limiter.try_acquire_at(start));
    assert!(!limiter.try_acquire_at(start + Duration::from_secs(30)));
    assert!(limiter.try_acquire_at(start + Duration::from_secs(60)));
}

#[test]
fn exclusion_happens_before_truncation() {
    let hit = |id: &str, file: &str| SearchHit {
        id: id.to_string(),
        filename: file.to_string(),
        split_part: String::new(),
        score: 1.0,
    };
    let hits = vec![hit("1", "a"), hit("2", "b"), hit("3", "a"), hit("4", "c")];

    let kept = filter_results(hits, &["a".to_string()], 2);
    let ids: Vec<&str> = kept.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "4"]);
}

// ─── Storage and search ─────────────────────────────────────────────

#[tokio::test]
async fn indexed_fragments_are_searchable_through_the_flow() {
    let tmp = TempDir::new().unwrap();
    write_file(tmp.path(), "tree.md", "", 1_000);
    write_file(tmp.path(), "cache.md", "", 1_000);
    let (cache, _) = memory_cache(tmp.path());
    let cache = Arc::new(cache);
    let vectors = VectorStore::new(Arc::new(MemoryKv::<String>::new()));
    let fetcher: Arc<dyn EmbeddingFetcher> = Arc::new(fetcher(KeywordEmbedder::new()));

    let files = vec![
        SourceFile {
            path: "tree.md".to_string(),
            body: "How the node tree rebuilds a thread.".to_string(),
        },
        SourceFile {
            path: "cache.md".to_string(),
            body: "The embedding cache avoids refetching.".to_string(),
        },
    ];
    let fragments: Vec<Vector> = files.iter().flat_map(|f| fragments_for(f, 300)).collect();
    let report = index_fragments(fragments, &cache, &vectors, fetcher.as_ref())
        .await
        .unwrap();
    assert_eq!(report.stored, 2);
    assert_eq!(report.missing, 0);

    let context = Arc::new(
        ExecutionContext::disabled()
            .with_embeddings(fetcher)
            .with_search(Arc::new(vectors)),
    );
    let mut tree = NodeTree::new();
    let root = tree.new_root_with(context);
    let leaf = Flow::start(&mut tree, root)
        .apply(&EmbedQuery::new("where is the tree?", cache.clone()))
        .await
        .apply(&SearchFiles::new(Vec::new(), 1, 5))
        .await
        .finish()
        .unwrap();

    let hits: Vec<SearchHit> = tree
        .get(leaf)
        .unwrap()
        .data_as(SEARCH_RESULTS_KEY)
        .unwrap()
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].filename, "tree.md");

    // The same search with tree.md excluded falls through to the other file
    let leaf = Flow::start(&mut tree, root)
        .apply(&EmbedQuery::new("where is the tree?", cache))
        .await
        .apply(&SearchFiles::new(vec!["tree.md".to_string()], 1, 5))
        .await
        .finish()
        .unwrap();
    let hits: Vec<SearchHit> = tree
        .get(leaf)
        .unwrap()
        .data_as(SEARCH_RESULTS_KEY)
        .unwrap()
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].filename, "cache.md");
}

#[tokio::test]
async fn sqlite_workspace_persists_across_connections() {
    let tmp = TempDir::new().unwrap();
    let files = tmp.path().join("files");
    std::fs::create_dir_all(&files).unwrap();
    write_file(&files, "notes.md", "limit", 1_000);

    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data/loom.sqlite");
    config.index.root = files.clone();
    config.embedding.dims = KEYWORDS.len() + 1;

    let fetcher = fetcher(KeywordEmbedder::new());
    let fragment = Vector::fragment("v1", "notes.md", "about the rate limit");

    {
        let pool = db::connect_path(&config.db.path).await.unwrap();
        migrate::create_tables(&pool).await.unwrap();
        let workspace = Workspace::from_pool(pool, &config);
        let report = index_fragments(
            vec![fragment.clone()],
            &workspace.cache,
            &workspace.vectors,
            &fetcher,
        )
        .await
        .unwrap();
        assert_eq!(report.stored, 1);
        workspace.close().await;
    }

    let workspace = Workspace::open(&config).await.unwrap();
    let cached = workspace.cache.lookup("about the rate limit").await.unwrap();
    assert_eq!(cached, Some(keyword_vector("about the rate limit")));
    let stored = workspace.vectors.get("v1").await.unwrap().unwrap();
    assert_eq!(stored.filename(), "notes.md");
    assert!(stored.timestamp > 0);
    assert_eq!(
        workspace.staleness.last_seen("notes.md").await.unwrap(),
        Some(1_000 * 1_000_000_000)
    );

    // Re-embedding the same fragment is a cache hit
    workspace
        .cache
        .embed_with_cache(vec![fragment], &fetcher)
        .await
        .unwrap();
    assert_eq!(fetcher.inner().calls(), 1);
    workspace.close().await;
}
