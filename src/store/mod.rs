//! Key/value storage abstraction.
//!
//! The embedding cache, the file-timestamp table and the vector store are
//! all plain key/value maps with string keys. The [`KeyValueStore`] trait
//! captures the three operations they need, enabling pluggable backends
//! (SQLite for the CLI, in-memory for tests).
//!
//! Stores are single-writer: one process owns the backing file for its
//! lifetime. Concurrent processes sharing a store are not supported.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

/// Abstract key/value backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](KeyValueStore::get) | Point lookup by exact key |
/// | [`batch_set`](KeyValueStore::batch_set) | Atomic multi-key upsert |
/// | [`scan`](KeyValueStore::scan) | Full scan of every entry |
#[async_trait]
pub trait KeyValueStore<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Look up `key`. `Ok(None)` means the key is absent.
    async fn get(&self, key: &str) -> Result<Option<V>>;

    /// Upsert all `pairs` as one unit: either every pair is written or none.
    ///
    /// Returns the number of pairs written.
    async fn batch_set(&self, pairs: &[(String, V)]) -> Result<usize>;

    /// Every entry, ordered by key.
    async fn scan(&self) -> Result<Vec<(String, V)>>;
}
