//! In-memory `VectorStore` fake used by indexer/retrieval/query-engine
//! tests (§9: no network calls in tests). Cosine similarity computed
//! directly over stored f32 vectors.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::{CoreError, CoreResult};

use super::{MetadataFilter, VectorItem, VectorMatch, VectorStats, VectorStore};

#[derive(Clone)]
struct StoredItem {
    vector: Vec<f32>,
    metadata: HashMap<String, String>,
}

pub struct InMemoryVectorStore {
    namespaces: RwLock<HashMap<String, HashMap<String, StoredItem>>>,
    dims: RwLock<HashMap<String, usize>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        InMemoryVectorStore {
            namespaces: RwLock::new(HashMap::new()),
            dims: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_index(&self, namespace: &str, dim: usize, _metric: &str) -> CoreResult<()> {
        let mut dims = self.dims.write().unwrap();
        if let Some(existing) = dims.get(namespace) {
            if *existing != dim {
                return Err(CoreError::DimensionMismatch {
                    expected: *existing,
                    actual: dim,
                });
            }
        } else {
            dims.insert(namespace.to_string(), dim);
        }
        self.namespaces
            .write()
            .unwrap()
            .entry(namespace.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, namespace: &str, items: Vec<VectorItem>) -> CoreResult<()> {
        let mut namespaces = self.namespaces.write().unwrap();
        let table = namespaces.entry(namespace.to_string()).or_default();
        for item in items {
            table.insert(
                item.id,
                StoredItem {
                    vector: item.vector,
                    metadata: item.metadata,
                },
            );
        }
        Ok(())
    }

    async fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> CoreResult<()> {
        if let Some(table) = self.namespaces.write().unwrap().get_mut(namespace) {
            for id in ids {
                table.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_by_filter(&self, namespace: &str, filter: MetadataFilter<'_>) -> CoreResult<()> {
        if let Some(table) = self.namespaces.write().unwrap().get_mut(namespace) {
            table.retain(|_, item| !filter(&item.metadata));
        }
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> CoreResult<()> {
        self.namespaces.write().unwrap().remove(namespace);
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<MetadataFilter<'_>>,
    ) -> CoreResult<Vec<VectorMatch>> {
        let namespaces = self.namespaces.read().unwrap();
        let Some(table) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<VectorMatch> = table
            .iter()
            .filter(|(_, item)| filter.map(|f| f(&item.metadata)).unwrap_or(true))
            .map(|(id, item)| VectorMatch {
                id: id.clone(),
                score: cosine(vector, &item.vector),
                metadata: item.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn get_by_ids(&self, namespace: &str, ids: &[String]) -> CoreResult<Vec<VectorMatch>> {
        let namespaces = self.namespaces.read().unwrap();
        let Some(table) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                table.get(id).map(|item| VectorMatch {
                    id: id.clone(),
                    score: 0.0,
                    metadata: item.metadata.clone(),
                })
            })
            .collect())
    }

    async fn stats(&self, namespace: &str) -> CoreResult<VectorStats> {
        let count = self
            .namespaces
            .read()
            .unwrap()
            .get(namespace)
            .map(|t| t.len())
            .unwrap_or(0);
        Ok(VectorStats { vector_count: count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, vector: Vec<f32>) -> VectorItem {
        VectorItem {
            id: id.to_string(),
            vector,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn upsert_then_query_returns_in_score_order() {
        let store = InMemoryVectorStore::new();
        store.ensure_index("ns", 2, "cosine").await.unwrap();
        store
            .upsert(
                "ns",
                vec![item("a", vec![1.0, 0.0]), item("b", vec![0.0, 1.0]), item("c", vec![0.9, 0.1])],
            )
            .await
            .unwrap();

        let results = store.query("ns", &[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn idempotent_upsert_keeps_single_entry() {
        let store = InMemoryVectorStore::new();
        store.ensure_index("ns", 2, "cosine").await.unwrap();
        store.upsert("ns", vec![item("a", vec![1.0, 0.0])]).await.unwrap();
        store.upsert("ns", vec![item("a", vec![1.0, 0.0])]).await.unwrap();
        let stats = store.stats("ns").await.unwrap();
        assert_eq!(stats.vector_count, 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = InMemoryVectorStore::new();
        store.ensure_index("ns", 2, "cosine").await.unwrap();
        let err = store.ensure_index("ns", 3, "cosine").await.unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_namespace_clears_all_vectors() {
        let store = InMemoryVectorStore::new();
        store.ensure_index("ns", 2, "cosine").await.unwrap();
        store.upsert("ns", vec![item("a", vec![1.0, 0.0])]).await.unwrap();
        store.delete_namespace("ns").await.unwrap();
        let stats = store.stats("ns").await.unwrap();
        assert_eq!(stats.vector_count, 0);
    }
}
