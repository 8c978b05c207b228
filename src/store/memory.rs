//! In-memory [`KeyValueStore`] implementation for testing.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock` so scans come back in key
//! order, matching the SQLite backend.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::KeyValueStore;

/// In-memory key/value store.
pub struct MemoryKv<V> {
    entries: RwLock<BTreeMap<String, V>>,
}

impl<V> MemoryKv<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for MemoryKv<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for MemoryKv<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        Ok(self.entries.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    async fn batch_set(&self, pairs: &[(String, V)]) -> Result<usize> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for (key, value) in pairs {
            entries.insert(key.clone(), value.clone());
        }
        Ok(pairs.len())
    }

    async fn scan(&self) -> Result<Vec<(String, V)>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
