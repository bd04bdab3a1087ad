//! C8: Indexer.
//!
//! Orchestrates chunker output (already persisted by C9) through the
//! embedding provider into the vector store, updating C5's embedding_key
//! column. Idempotent: vector ids are deterministic (`"chunk:{chunk_id}"`),
//! so re-running step 3c is always safe (§4.8 step 5).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::providers::{EmbedTaskType, EmbeddingProvider};
use crate::store::MetadataStore;
use crate::types::{upload_namespace, Chunk};
use crate::vectorstore::{VectorItem, VectorStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct IndexingStatus {
    pub total_chunks: usize,
    pub indexed_chunks: usize,
    pub pending_chunks: usize,
    pub percent: f32,
}

pub struct Indexer {
    store: Arc<MetadataStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    cfg: Config,
    in_flight: Mutex<HashSet<Uuid>>,
    in_flight_notify: Notify,
}

/// Removes `doc_id` from the in-flight set and wakes `wait_until_idle`
/// callers on every exit path of `index_document`, including the early
/// returns on a missing document or empty chunk list.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    notify: &'a Notify,
    doc_id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.doc_id);
        self.notify.notify_waiters();
    }
}

impl Indexer {
    pub fn new(
        store: Arc<MetadataStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        cfg: Config,
    ) -> Self {
        Indexer {
            store,
            embedder,
            vectors,
            cfg,
            in_flight: Mutex::new(HashSet::new()),
            in_flight_notify: Notify::new(),
        }
    }

    /// Blocks until `doc_id` has no `index_document` call in flight. A
    /// delete that arrives mid-index must not race the indexer's vector
    /// upserts and `set_chunk_embedding_keys` writes against rows the
    /// delete is about to remove (§5).
    pub async fn wait_until_idle(&self, doc_id: Uuid) {
        loop {
            let notified = self.in_flight_notify.notified();
            if !self.in_flight.lock().unwrap().contains(&doc_id) {
                return;
            }
            notified.await;
        }
    }

    pub async fn index_document(&self, doc_id: Uuid, force: bool) -> IndexOutcome {
        self.in_flight.lock().unwrap().insert(doc_id);
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            notify: &self.in_flight_notify,
            doc_id,
        };

        let doc = match self.store.get_document(doc_id) {
            Ok(d) => d,
            Err(_) => return IndexOutcome::default(),
        };
        let chunks = match self.store.list_chunks(doc_id, None, None) {
            Ok(c) => c,
            Err(_) => return IndexOutcome::default(),
        };
        if chunks.is_empty() {
            return IndexOutcome::default();
        }

        let (targets, skipped): (Vec<Chunk>, Vec<Chunk>) = chunks
            .into_iter()
            .partition(|c| force || c.embedding_key.is_none());

        let namespace = upload_namespace(&doc.upload_id);
        if let Err(e) = self
            .vectors
            .ensure_index(&namespace, self.embedder.dimension(), &self.cfg.vector_metric)
            .await
        {
            warn!(document_id = %doc_id, error = %e, "ensure_index failed, aborting index_document");
            return IndexOutcome {
                indexed: 0,
                skipped: skipped.len(),
                failed: targets.len(),
            };
        }

        let mut outcome = IndexOutcome {
            skipped: skipped.len(),
            ..Default::default()
        };

        // Batches are processed sequentially within a document to preserve
        // the order of metadata updates (§4.8 concurrency note).
        for group in targets.chunks(self.cfg.embed_batch_size) {
            match self.index_group(&doc, group, &namespace).await {
                Ok(n) => outcome.indexed += n,
                Err(e) => {
                    warn!(document_id = %doc_id, error = %e, "embedding batch exhausted retries, marking chunks failed");
                    outcome.failed += group.len();
                }
            }
        }

        info!(document_id = %doc_id, indexed = outcome.indexed, skipped = outcome.skipped, failed = outcome.failed, "index_document complete");
        outcome
    }

    pub async fn reindex_document(&self, doc_id: Uuid) -> IndexOutcome {
        self.index_document(doc_id, true).await
    }

    async fn index_group(
        &self,
        doc: &crate::types::Document,
        group: &[Chunk],
        namespace: &str,
    ) -> anyhow::Result<usize> {
        let texts: Vec<String> = group.iter().map(|c| c.content.clone()).collect();
        let embedding = self
            .embedder
            .embed(&texts, EmbedTaskType::Document)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        if embedding.vectors.len() != group.len() {
            return Err(anyhow::anyhow!(
                "embedding provider returned {} vectors for {} inputs",
                embedding.vectors.len(),
                group.len()
            ));
        }

        let items: Vec<VectorItem> = group
            .iter()
            .zip(embedding.vectors.into_iter())
            .map(|(chunk, vector)| {
                let mut metadata = HashMap::new();
                metadata.insert("doc_id".to_string(), doc.id.to_string());
                metadata.insert("chunk_id".to_string(), chunk.id.to_string());
                metadata.insert(
                    "page".to_string(),
                    chunk.page_number.map(|p| p.to_string()).unwrap_or_default(),
                );
                metadata.insert("filename".to_string(), doc.filename.clone());
                metadata.insert("upload_id".to_string(), doc.upload_id.to_string());
                metadata.insert("content_hash".to_string(), doc.content_hash.clone());
                metadata.insert("created_at".to_string(), Utc::now().to_rfc3339());
                VectorItem {
                    id: chunk.vector_id(),
                    vector,
                    metadata,
                }
            })
            .collect();

        for sub_batch in items.chunks(self.cfg.upsert_batch_size) {
            self.vectors
                .upsert(namespace, sub_batch.to_vec())
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }

        let pairs: Vec<(Uuid, String)> = group.iter().map(|c| (c.id, c.vector_id())).collect();
        self.store
            .set_chunk_embedding_keys(&pairs)
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(group.len())
    }

    pub async fn delete_document_vectors(&self, doc_id: Uuid, upload_id: Uuid, chunk_ids: &[Uuid]) {
        let namespace = upload_namespace(&upload_id);
        let ids: Vec<String> = chunk_ids.iter().map(|id| format!("chunk:{id}")).collect();
        if let Err(e) = self.vectors.delete_by_ids(&namespace, &ids).await {
            warn!(document_id = %doc_id, error = %e, "failed to delete document vectors");
        }
    }

    pub async fn delete_upload_vectors(&self, upload_id: Uuid) {
        let namespace = upload_namespace(&upload_id);
        if let Err(e) = self.vectors.delete_namespace(&namespace).await {
            warn!(upload_id = %upload_id, error = %e, "failed to delete upload namespace");
        }
    }

    pub fn status(&self, doc_id: Uuid) -> IndexingStatus {
        let (total, indexed) = self.store.count_indexed(doc_id).unwrap_or((0, 0));
        let pending = total.saturating_sub(indexed);
        let percent = if total == 0 {
            100.0
        } else {
            (indexed as f32 / total as f32) * 100.0
        };
        IndexingStatus {
            total_chunks: total,
            indexed_chunks: indexed,
            pending_chunks: pending,
            percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::FakeEmbeddingProvider;
    use crate::types::{Document, DocumentStatus, FileType, Upload};
    use crate::vectorstore::memory::InMemoryVectorStore;

    fn setup() -> (Arc<MetadataStore>, Indexer, Uuid, Uuid) {
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FakeEmbeddingProvider::new(8));
        let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let cfg = Config::default();
        let indexer = Indexer::new(store.clone(), embedder, vectors, cfg);

        let upload = Upload::new("batch".into(), 1);
        store.create_upload(&upload).unwrap();
        let doc = Document {
            id: Uuid::new_v4(),
            upload_id: upload.id,
            filename: "a.txt".into(),
            file_type: FileType::Txt,
            byte_size: 10,
            page_count: 1,
            content_hash: "hash".into(),
            storage_path: "/tmp/a.txt".into(),
            status: DocumentStatus::Completed,
            error_message: None,
            created_at: Utc::now(),
        };
        store.append_document(&doc).unwrap();

        let chunks: Vec<Chunk> = (0..5)
            .map(|i| Chunk {
                id: Uuid::new_v4(),
                document_id: doc.id,
                chunk_index: i,
                content: format!("chunk text number {i}"),
                token_count: 4,
                start_char: 0,
                end_char: 10,
                page_number: Some(1),
                embedding_key: None,
                created_at: Utc::now(),
            })
            .collect();
        store.bulk_insert_chunks(doc.id, &chunks).unwrap();

        (store, indexer, doc.id, upload.id)
    }

    #[tokio::test]
    async fn first_index_indexes_all_chunks() {
        let (store, indexer, doc_id, _upload_id) = setup();
        let outcome = indexer.index_document(doc_id, false).await;
        assert_eq!(outcome.indexed, 5);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.failed, 0);

        let chunks = store.list_chunks(doc_id, None, None).unwrap();
        assert!(chunks.iter().all(|c| c.embedding_key.is_some()));
    }

    #[tokio::test]
    async fn second_index_skips_already_indexed_chunks() {
        let (_store, indexer, doc_id, _upload_id) = setup();
        indexer.index_document(doc_id, false).await;
        let second = indexer.index_document(doc_id, false).await;
        assert_eq!(second, IndexOutcome { indexed: 0, skipped: 5, failed: 0 });
    }

    #[tokio::test]
    async fn status_reports_percent_complete() {
        let (_store, indexer, doc_id, _upload_id) = setup();
        indexer.index_document(doc_id, false).await;
        let status = indexer.status(doc_id);
        assert_eq!(status.percent, 100.0);
        assert_eq!(status.pending_chunks, 0);
    }

    #[tokio::test]
    async fn reindex_forces_reembedding() {
        let (_store, indexer, doc_id, _upload_id) = setup();
        indexer.index_document(doc_id, false).await;
        let outcome = indexer.reindex_document(doc_id).await;
        assert_eq!(outcome.indexed, 5);
        assert_eq!(outcome.skipped, 0);
    }

    #[tokio::test]
    async fn wait_until_idle_returns_immediately_when_not_indexing() {
        let (_store, indexer, doc_id, _upload_id) = setup();
        tokio::time::timeout(std::time::Duration::from_millis(50), indexer.wait_until_idle(doc_id))
            .await
            .expect("wait_until_idle must not block on an idle document");
    }

    #[tokio::test]
    async fn wait_until_idle_blocks_until_indexing_finishes() {
        let (_store, indexer, doc_id, _upload_id) = setup();
        let indexer = Arc::new(indexer);
        indexer.in_flight.lock().unwrap().insert(doc_id);

        let waiter_indexer = indexer.clone();
        let waiter = tokio::spawn(async move { waiter_indexer.wait_until_idle(doc_id).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "waiter must still be parked while the document is in flight");

        indexer.in_flight.lock().unwrap().remove(&doc_id);
        indexer.in_flight_notify.notify_waiters();

        tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .expect("waiter must wake up once the document leaves the in-flight set")
            .unwrap();
    }
}
