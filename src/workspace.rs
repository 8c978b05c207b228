//! The persistent stores a command works against, opened from one SQLite
//! pool.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::staleness::StalenessTracker;
use crate::store::SqliteKv;
use crate::traits::FsMetadata;
use crate::vector_store::VectorStore;

pub struct Workspace {
    pool: SqlitePool,
    pub cache: Arc<EmbeddingCache>,
    pub staleness: StalenessTracker,
    pub vectors: VectorStore,
}

impl Workspace {
    /// Connect to the configured database, creating its tables if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_tables(&pool).await?;
        Ok(Self::from_pool(pool, config))
    }

    pub fn from_pool(pool: SqlitePool, config: &Config) -> Self {
        let staleness = StalenessTracker::new(
            Arc::new(SqliteKv::file_timestamps(pool.clone())),
            Arc::new(FsMetadata::new(&config.index.root)),
        );
        let cache = Arc::new(EmbeddingCache::new(
            Arc::new(SqliteKv::embedding_cache(pool.clone())),
            staleness.clone(),
            config.embedding.dims,
            config.embedding.batch_size,
        ));
        let vectors = VectorStore::new(Arc::new(SqliteKv::vectors(pool.clone())));

        Self {
            pool,
            cache,
            staleness,
            vectors,
        }
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
