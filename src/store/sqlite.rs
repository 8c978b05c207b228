//! SQLite-backed [`KeyValueStore`] implementation.
//!
//! Each logical store is one two-column table (`key TEXT PRIMARY KEY,
//! value`). The same [`SqliteKv`] type serves text-valued tables (embedding
//! cache, vectors) and integer-valued tables (file timestamps).

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::KeyValueStore;

/// Table holding `split_part -> JSON vector values`.
pub const EMBEDDING_CACHE_TABLE: &str = "embedding_cache";
/// Table holding `file path -> modification time (ns)`.
pub const FILE_TIMESTAMPS_TABLE: &str = "file_timestamps";
/// Table holding `vector id -> JSON Vector record`.
pub const VECTORS_TABLE: &str = "vectors";

/// SQLite implementation of [`KeyValueStore`] over a single table.
#[derive(Clone)]
pub struct SqliteKv {
    pool: SqlitePool,
    table: &'static str,
}

impl SqliteKv {
    pub fn new(pool: SqlitePool, table: &'static str) -> Self {
        Self { pool, table }
    }

    pub fn embedding_cache(pool: SqlitePool) -> Self {
        Self::new(pool, EMBEDDING_CACHE_TABLE)
    }

    pub fn file_timestamps(pool: SqlitePool) -> Self {
        Self::new(pool, FILE_TIMESTAMPS_TABLE)
    }

    pub fn vectors(pool: SqlitePool) -> Self {
        Self::new(pool, VECTORS_TABLE)
    }

    pub fn table(&self) -> &str {
        self.table
    }

    fn select_sql(&self) -> String {
        format!("SELECT value FROM {} WHERE key = ?", self.table)
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            self.table
        )
    }

    fn scan_sql(&self) -> String {
        format!("SELECT key, value FROM {} ORDER BY key", self.table)
    }
}

#[async_trait]
impl KeyValueStore<String> for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let sql = self.select_sql();
        let value: Option<String> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn batch_set(&self, pairs: &[(String, String)]) -> Result<usize> {
        let sql = self.upsert_sql();
        let mut tx = self.pool.begin().await?;
        for (key, value) in pairs {
            sqlx::query(&sql)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(pairs.len())
    }

    async fn scan(&self) -> Result<Vec<(String, String)>> {
        let sql = self.scan_sql();
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect())
    }
}

#[async_trait]
impl KeyValueStore<i64> for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let sql = self.select_sql();
        let value: Option<i64> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn batch_set(&self, pairs: &[(String, i64)]) -> Result<usize> {
        let sql = self.upsert_sql();
        let mut tx = self.pool.begin().await?;
        for (key, value) in pairs {
            sqlx::query(&sql)
                .bind(key)
                .bind(*value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(pairs.len())
    }

    async fn scan(&self) -> Result<Vec<(String, i64)>> {
        let sql = self.scan_sql();
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect())
    }
}
