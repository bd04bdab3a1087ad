//! C7: Vector Store interface (§4.7).

pub mod lance;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::CoreResult;

#[derive(Debug, Clone)]
pub struct VectorItem {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct VectorStats {
    pub vector_count: usize,
}

/// A predicate over item metadata, used by `delete_by_filter`. Kept as a
/// closure rather than a query language, since the core has exactly one
/// caller (deleting vectors for a document within an upload namespace).
pub type MetadataFilter<'a> = &'a dyn Fn(&HashMap<String, String>) -> bool;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent: creates the index/table for `namespace` if absent,
    /// verifying `dim` against any pre-existing table.
    async fn ensure_index(&self, namespace: &str, dim: usize, metric: &str) -> CoreResult<()>;

    /// Batched internally to provider limits.
    async fn upsert(&self, namespace: &str, items: Vec<VectorItem>) -> CoreResult<()>;

    async fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> CoreResult<()>;

    async fn delete_by_filter(&self, namespace: &str, filter: MetadataFilter<'_>) -> CoreResult<()>;

    async fn delete_namespace(&self, namespace: &str) -> CoreResult<()>;

    /// Ordered list, score monotone in similarity (highest first).
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<MetadataFilter<'_>>,
    ) -> CoreResult<Vec<VectorMatch>>;

    /// Bulk fetch by id, used by MMR (§4.13) to avoid one `query`-style
    /// lookup per candidate.
    async fn get_by_ids(&self, namespace: &str, ids: &[String]) -> CoreResult<Vec<VectorMatch>>;

    async fn stats(&self, namespace: &str) -> CoreResult<VectorStats>;
}
