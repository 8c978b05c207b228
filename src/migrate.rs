use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::store::sqlite::{EMBEDDING_CACHE_TABLE, FILE_TIMESTAMPS_TABLE, VECTORS_TABLE};

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_tables(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the key/value tables. Idempotent.
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    // split_part -> JSON-encoded vector values
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        EMBEDDING_CACHE_TABLE
    ))
    .execute(pool)
    .await?;

    // file path -> modification time in nanoseconds
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value INTEGER NOT NULL)",
        FILE_TIMESTAMPS_TABLE
    ))
    .execute(pool)
    .await?;

    // vector id -> JSON-encoded Vector record
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        VECTORS_TABLE
    ))
    .execute(pool)
    .await?;

    Ok(())
}
