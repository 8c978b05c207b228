//! Embedded fragments keyed by vector id, with linear-scan similarity
//! search.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::warn;

use crate::embedding::cosine_similarity;
use crate::models::{SearchHit, Vector};
use crate::store::KeyValueStore;
use crate::traits::VectorSearch;

#[derive(Clone)]
pub struct VectorStore {
    store: Arc<dyn KeyValueStore<String>>,
}

impl VectorStore {
    pub fn new(store: Arc<dyn KeyValueStore<String>>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Vector>> {
        match self.store.get(id).await? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw)
                    .with_context(|| format!("Stored vector {} is not decodable", id))?,
            )),
            None => Ok(None),
        }
    }

    /// Insert or replace `vectors` in one transaction.
    pub async fn upsert(&self, vectors: &[Vector]) -> Result<usize> {
        let pairs = vectors
            .iter()
            .map(|v| Ok((v.id.clone(), serde_json::to_string(v)?)))
            .collect::<Result<Vec<_>>>()?;
        self.store.batch_set(&pairs).await
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.store.scan().await?.len())
    }

    pub async fn all(&self) -> Result<Vec<Vector>> {
        self.store
            .scan()
            .await?
            .into_iter()
            .map(|(id, raw)| {
                serde_json::from_str(&raw)
                    .with_context(|| format!("Stored vector {} is not decodable", id))
            })
            .collect()
    }
}

#[async_trait]
impl VectorSearch for VectorStore {
    async fn search(&self, query: &[f32], n: usize) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for vector in self.all().await? {
            if vector.values.len() != query.len() {
                warn!(
                    id = %vector.id,
                    expected = query.len(),
                    found = vector.values.len(),
                    "skipping vector with mismatched dimensions"
                );
                continue;
            }
            hits.push(SearchHit {
                score: cosine_similarity(query, &vector.values),
                id: vector.id,
                filename: vector.metadata.filename,
                split_part: vector.metadata.split_part,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(n);
        Ok(hits)
    }
}
