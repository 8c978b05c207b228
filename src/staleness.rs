//! Last-seen modification times of indexed files.
//!
//! A cached fragment is trusted only as long as the file it came from has
//! not been modified since the time recorded here. Records are upserted,
//! never deleted, and a file's recorded time only moves forward.

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

use crate::store::KeyValueStore;
use crate::traits::FileMetadata;

#[derive(Clone)]
pub struct StalenessTracker {
    store: Arc<dyn KeyValueStore<i64>>,
    files: Arc<dyn FileMetadata>,
}

impl StalenessTracker {
    pub fn new(store: Arc<dyn KeyValueStore<i64>>, files: Arc<dyn FileMetadata>) -> Self {
        Self { store, files }
    }

    /// Current modification times of the distinct, non-empty `filenames`.
    ///
    /// Files that cannot be stat'ed are left out; they will read as stale.
    pub fn snapshot<'a, I>(&self, filenames: I) -> Vec<(String, i64)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = filenames.into_iter().filter(|f| !f.is_empty()).collect();
        distinct
            .into_iter()
            .filter_map(|f| match self.files.modified_nanos(f) {
                Ok(nanos) => Some((f.to_string(), nanos)),
                Err(e) => {
                    warn!(file = f, error = %e, "cannot read modification time");
                    None
                }
            })
            .collect()
    }

    /// Record `pairs`, never moving a file's time backwards.
    pub async fn commit(&self, pairs: &[(String, i64)]) -> Result<usize> {
        let mut forward = Vec::with_capacity(pairs.len());
        for (file, nanos) in pairs {
            match self.store.get(file).await? {
                Some(seen) if seen >= *nanos => {}
                _ => forward.push((file.clone(), *nanos)),
            }
        }
        if forward.is_empty() {
            return Ok(0);
        }
        self.store.batch_set(&forward).await
    }

    /// Snapshot and commit in one step.
    pub async fn record<'a, I>(&self, filenames: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let pairs = self.snapshot(filenames);
        self.commit(&pairs).await
    }

    pub async fn last_seen(&self, file: &str) -> Result<Option<i64>> {
        self.store.get(file).await
    }

    /// True if `file` was never recorded, has been modified since, or can
    /// no longer be read. Agrees with [`StalenessTracker::stale_files`].
    pub async fn is_stale(&self, file: &str) -> Result<bool> {
        let Some(seen) = self.store.get(file).await? else {
            return Ok(true);
        };
        match self.files.modified_nanos(file) {
            Ok(now) => Ok(now > seen),
            Err(e) => {
                warn!(file, error = %e, "cannot read modification time");
                Ok(true)
            }
        }
    }

    /// Every recorded file that changed (or can no longer be read) since it
    /// was last seen, ordered by path.
    pub async fn stale_files(&self) -> Result<Vec<String>> {
        let mut stale = Vec::new();
        for (file, seen) in self.store.scan().await? {
            match self.files.modified_nanos(&file) {
                Ok(now) if now <= seen => {}
                _ => stale.push(file),
            }
        }
        Ok(stale)
    }
}
