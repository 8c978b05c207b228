//! Embedding cache keyed by fragment text.
//!
//! Fetching an embedding is slow and billed, so every vector ever fetched
//! is stored under its exact `split_part`. Incoming fragments are first
//! [partitioned](EmbeddingCache::partition) into cached and uncached; only
//! the uncached ones are sent to the fetcher, in batches, and each batch is
//! committed together with the modification times of its source files.
//!
//! ```text
//!   fragments ──▶ partition ──▶ cached ─────────────────────────┐
//!                    │                                          ▼
//!                    └──▶ uncached ──▶ batch ──▶ fetch ──▶ commit ──▶ re-partition
//! ```
//!
//! The cache and the timestamp table are committed in separate
//! transactions. A crash between the two leaves a cached vector whose file
//! time was never recorded; the file then simply reads as stale.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{CacheError, FetchError};
use crate::models::Vector;
use crate::staleness::StalenessTracker;
use crate::store::KeyValueStore;
use crate::traits::EmbeddingFetcher;

/// Fragments split by whether their values were found in the cache.
#[derive(Debug, Default)]
pub struct Partition {
    /// Vectors with `values` filled from the cache.
    pub cached: Vec<Vector>,
    /// Vectors left untouched.
    pub uncached: Vec<Vector>,
}

/// Counts from one [`EmbeddingCache::fetch_then_cache`] run, in distinct
/// fragments.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchReport {
    pub embedded: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct EmbeddingCache {
    store: Arc<dyn KeyValueStore<String>>,
    staleness: StalenessTracker,
    dims: usize,
    batch_size: usize,
}

impl EmbeddingCache {
    pub fn new(
        store: Arc<dyn KeyValueStore<String>>,
        staleness: StalenessTracker,
        dims: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            staleness,
            dims,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn staleness(&self) -> &StalenessTracker {
        &self.staleness
    }

    /// Cached values for `split_part`. An absent or empty entry is a miss.
    pub async fn lookup(&self, split_part: &str) -> Result<Option<Vec<f32>>, CacheError> {
        let raw = match self.store.get(split_part).await? {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(None),
        };
        let values: Vec<f32> =
            serde_json::from_str(&raw).map_err(|e| CacheError::Undecodable {
                key: split_part.to_string(),
                detail: e.to_string(),
            })?;
        if values.len() != self.dims {
            error!(
                key = split_part,
                expected = self.dims,
                found = values.len(),
                "malformed vector in embedding cache"
            );
            return Err(CacheError::MalformedVector {
                key: split_part.to_string(),
                expected: self.dims,
                found: values.len(),
            });
        }
        Ok(Some(values))
    }

    /// Split `vectors` into cached and uncached, preserving input order
    /// within each side.
    ///
    /// The current modification time of every distinct file among the
    /// cached vectors is recorded.
    pub async fn partition(&self, vectors: Vec<Vector>) -> Result<Partition, CacheError> {
        let mut partition = Partition::default();
        for mut vector in vectors {
            match self.lookup(vector.split_part()).await? {
                Some(values) => {
                    vector.values = values;
                    partition.cached.push(vector);
                }
                None => partition.uncached.push(vector),
            }
        }

        let cached_files: Vec<&str> = partition.cached.iter().map(|v| v.filename()).collect();
        self.staleness.record(cached_files).await?;
        Ok(partition)
    }

    /// Number of `vectors` that would be cached and uncached, without
    /// recording any file times.
    pub async fn count_cached(&self, vectors: &[Vector]) -> Result<(usize, usize), CacheError> {
        let mut cached = 0;
        for vector in vectors {
            if self.lookup(vector.split_part()).await?.is_some() {
                cached += 1;
            }
        }
        Ok((cached, vectors.len() - cached))
    }

    /// Fetch and store embeddings for `uncached`.
    ///
    /// Fragments are deduplicated by text and sent in batches. A batch the
    /// fetcher cannot embed is logged and skipped; a fatal fetch error or a
    /// failed commit ends the run with an error.
    pub async fn fetch_then_cache(
        &self,
        uncached: &[Vector],
        fetcher: &dyn EmbeddingFetcher,
    ) -> Result<FetchReport, CacheError> {
        let mut report = FetchReport::default();

        // distinct fragment text -> files it appears in, first-seen order
        let mut order: Vec<&str> = Vec::new();
        let mut files: HashMap<&str, Vec<&str>> = HashMap::new();
        for vector in uncached {
            let text = vector.split_part();
            if text.is_empty() {
                warn!(id = %vector.id, file = vector.filename(), "skipping empty fragment");
                report.skipped += 1;
                continue;
            }
            let entry = files.entry(text).or_insert_with(|| {
                order.push(text);
                Vec::new()
            });
            entry.push(vector.filename());
        }

        let total_batches = order.len().div_ceil(self.batch_size);
        for (batch_no, batch) in order.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|t| t.to_string()).collect();

            let embeddings = match fetcher.fetch(&texts).await {
                Ok(embeddings) => embeddings,
                Err(e @ FetchError::Fatal(_)) => {
                    error!(error = %e, "aborting embedding run");
                    return Err(CacheError::Fetch(e));
                }
                Err(FetchError::Failed(detail)) => {
                    warn!(
                        batch = batch_no + 1,
                        total_batches,
                        fragments = batch.len(),
                        "embedding batch failed: {}",
                        detail
                    );
                    report.failed += batch.len();
                    continue;
                }
            };

            if let Some(bad) = embeddings.iter().find(|v| v.len() != self.dims) {
                warn!(
                    batch = batch_no + 1,
                    expected = self.dims,
                    found = bad.len(),
                    "embedding batch has the wrong dimensions"
                );
                report.failed += batch.len();
                continue;
            }

            let mut pairs = Vec::with_capacity(batch.len());
            for (text, values) in batch.iter().zip(&embeddings) {
                let json = serde_json::to_string(values).map_err(|e| CacheError::Corruption {
                    what: "embedding cache",
                    detail: e.to_string(),
                })?;
                pairs.push((text.to_string(), json));
            }
            self.store
                .batch_set(&pairs)
                .await
                .map_err(|e| CacheError::Corruption {
                    what: "embedding cache",
                    detail: format!("{:#}", e),
                })?;

            let batch_files: Vec<&str> = batch
                .iter()
                .flat_map(|t| files.get(t).into_iter().flatten().copied())
                .collect();
            self.staleness
                .record(batch_files)
                .await
                .map_err(|e| CacheError::Corruption {
                    what: "file timestamps",
                    detail: format!("{:#}", e),
                })?;

            report.embedded += batch.len();
            info!(
                batch = batch_no + 1,
                total_batches,
                embedded = report.embedded,
                "committed embedding batch"
            );
        }

        Ok(report)
    }

    /// Fill in values for `vectors` from the cache, fetching what is
    /// missing.
    ///
    /// Returns every vector that ended up with values: cached ones first,
    /// then newly fetched ones. Vectors still missing after the fetch are
    /// logged and left out.
    pub async fn embed_with_cache(
        &self,
        vectors: Vec<Vector>,
        fetcher: &dyn EmbeddingFetcher,
    ) -> Result<Vec<Vector>, CacheError> {
        let Partition {
            mut cached,
            uncached,
        } = self.partition(vectors).await?;
        if uncached.is_empty() {
            return Ok(cached);
        }

        self.fetch_then_cache(&uncached, fetcher).await?;

        let second = self.partition(uncached).await?;
        for missing in &second.uncached {
            warn!(
                id = %missing.id,
                file = missing.filename(),
                "fragment has no embedding; leaving it out"
            );
        }
        cached.extend(second.cached);
        Ok(cached)
    }
}
