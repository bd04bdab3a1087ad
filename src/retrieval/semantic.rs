//! C11: Semantic Retriever (§4.11).

use std::sync::Arc;

use uuid::Uuid;

use crate::errors::CoreResult;
use crate::providers::{EmbedTaskType, EmbeddingProvider};
use crate::vectorstore::VectorStore;

use super::ScoredChunk;

pub struct SemanticRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
}

impl SemanticRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, vectors: Arc<dyn VectorStore>) -> Self {
        SemanticRetriever { embedder, vectors }
    }

    /// Embeds `query_text` with the query task type (when the provider
    /// distinguishes it), then queries C7 and recovers `chunk_id` from
    /// each match's metadata (§4.11 steps 1-3).
    pub async fn search(&self, query_text: &str, top_k: usize, namespace: &str) -> CoreResult<Vec<ScoredChunk>> {
        let embedding = self
            .embedder
            .embed(&[query_text.to_string()], EmbedTaskType::Query)
            .await?;
        let Some(vector) = embedding.vectors.into_iter().next() else {
            return Ok(Vec::new());
        };

        let matches = self.vectors.query(namespace, &vector, top_k, None).await?;
        Ok(matches
            .into_iter()
            .filter_map(|m| {
                m.metadata
                    .get("chunk_id")
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .map(|chunk_id| ScoredChunk { chunk_id, score: m.score })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::FakeEmbeddingProvider;
    use crate::vectorstore::memory::InMemoryVectorStore;
    use crate::vectorstore::VectorItem;
    use std::collections::HashMap;

    #[tokio::test]
    async fn search_recovers_chunk_ids_from_metadata() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FakeEmbeddingProvider::new(8));
        let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        vectors.ensure_index("ns", 8, "cosine").await.unwrap();

        let chunk_id = Uuid::new_v4();
        let vector = embedder
            .embed(&["hello world".to_string()], EmbedTaskType::Document)
            .await
            .unwrap()
            .vectors
            .remove(0);
        let mut metadata = HashMap::new();
        metadata.insert("chunk_id".to_string(), chunk_id.to_string());
        vectors
            .upsert(
                "ns",
                vec![VectorItem {
                    id: "chunk:1".into(),
                    vector,
                    metadata,
                }],
            )
            .await
            .unwrap();

        let retriever = SemanticRetriever::new(embedder, vectors);
        let results = retriever.search("hello world", 5, "ns").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, chunk_id);
    }
}
