//! Background indexing queue: indexing runs as an explicit background job
//! queue with bounded worker concurrency rather than inline on the request
//! path. A fixed pool of `IndexConcurrency` workers is fed by a bounded
//! `tokio::mpsc` channel, with explicit per-job acknowledgement (the
//! worker logs the `IndexOutcome` before looping).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::indexer::Indexer;

/// Channel depth before `schedule` blocks the caller. Generous relative to
/// `IndexConcurrency` since a single document's job is cheap to queue even
/// if workers are still draining a burst from a prior large batch.
const QUEUE_DEPTH: usize = 1024;

pub struct JobQueue {
    sender: mpsc::Sender<Uuid>,
    workers: Vec<JoinHandle<()>>,
}

impl JobQueue {
    /// Spawns `worker_count` background workers pulling document ids off a
    /// shared channel and indexing them via `indexer`.
    pub fn spawn(indexer: Arc<Indexer>, worker_count: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Uuid>(QUEUE_DEPTH);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let worker_count = worker_count.max(1);

        let workers = (0..worker_count)
            .map(|worker_id| {
                let indexer = indexer.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(doc_id) = job else {
                            break;
                        };
                        let outcome = indexer.index_document(doc_id, false).await;
                        info!(
                            worker = worker_id,
                            document_id = %doc_id,
                            indexed = outcome.indexed,
                            skipped = outcome.skipped,
                            failed = outcome.failed,
                            "background indexing job acknowledged"
                        );
                    }
                })
            })
            .collect();

        JobQueue { sender, workers }
    }

    /// Runs jobs synchronously on the caller's task instead of a worker
    /// pool. Used by tests and by the CLI's one-shot ingest command, where
    /// there is no long-lived server process to host background workers.
    pub fn new_inline(indexer: Arc<Indexer>) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::channel::<Uuid>(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(doc_id) = receiver.recv().await {
                indexer.index_document(doc_id, false).await;
            }
        });
        Arc::new(JobQueue {
            sender,
            workers: Vec::new(),
        })
    }

    /// Enqueues a document for background indexing. Never blocks the
    /// ingestion request path on embedding/upsert latency (§9).
    pub fn schedule(&self, doc_id: Uuid) {
        if let Err(e) = self.sender.try_send(doc_id) {
            warn!(document_id = %doc_id, error = %e, "job queue saturated, falling back to blocking send");
            let sender = self.sender.clone();
            tokio::spawn(async move {
                let _ = sender.send(doc_id).await;
            });
        }
    }

    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::providers::fakes::FakeEmbeddingProvider;
    use crate::providers::EmbeddingProvider;
    use crate::store::MetadataStore;
    use crate::types::{Chunk, Document, DocumentStatus, FileType, Upload};
    use crate::vectorstore::memory::InMemoryVectorStore;
    use crate::vectorstore::VectorStore;
    use chrono::Utc;

    #[tokio::test]
    async fn scheduled_document_gets_indexed_by_a_worker() {
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FakeEmbeddingProvider::new(8));
        let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let indexer = Arc::new(Indexer::new(store.clone(), embedder, vectors, Config::default()));

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
        let chunk = Chunk {
            id: Uuid::new_v4(),
            document_id: doc.id,
            chunk_index: 0,
            content: "hello world".into(),
            token_count: 2,
            start_char: 0,
            end_char: 11,
            page_number: Some(1),
            embedding_key: None,
            created_at: Utc::now(),
        };
        store.bulk_insert_chunks(doc.id, &[chunk]).unwrap();

        let queue = JobQueue::spawn(indexer.clone(), 2);
        queue.schedule(doc.id);
        // Give the worker a chance to drain the channel.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        queue.shutdown().await;

        let status = indexer.status(doc.id);
        assert_eq!(status.indexed_chunks, 1);
    }
}
