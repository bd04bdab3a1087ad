//! C9: Ingestion Orchestrator (§4.9).
//!
//! Validates the batch, creates the Upload row, then processes each file
//! with bounded parallelism: validate -> hash/store -> duplicate-check ->
//! extract -> chunk -> atomic Document+chunks insert -> schedule indexing.
//! A single file's failure never aborts its siblings; the Upload's terminal
//! status is derived once every file has reported an outcome (§4.9 step 4).

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chunking::{self, RawChunk};
use crate::config::Config;
use crate::errors::{CoreError, CoreResult};
use crate::extract;
use crate::indexer::Indexer;
use crate::jobqueue::JobQueue;
use crate::store::MetadataStore;
use crate::tokenizer::TokenizerRegistry;
use crate::types::{Chunk, Document, DocumentStatus, Upload};
use crate::validate::{self, ValidatedFile};

/// One file as handed to `ingest_batch`: the caller already has the bytes
/// in memory (an HTTP multipart part, a CLI-read file, ...).
pub struct IncomingFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

pub struct IngestOutcome {
    pub upload: Upload,
    pub documents: Vec<Document>,
}

pub struct IngestionOrchestrator {
    store: Arc<MetadataStore>,
    tokenizers: Arc<TokenizerRegistry>,
    indexer: Arc<Indexer>,
    jobs: Arc<JobQueue>,
    cfg: Config,
}

impl IngestionOrchestrator {
    pub fn new(
        store: Arc<MetadataStore>,
        tokenizers: Arc<TokenizerRegistry>,
        indexer: Arc<Indexer>,
        jobs: Arc<JobQueue>,
        cfg: Config,
    ) -> Self {
        IngestionOrchestrator {
            store,
            tokenizers,
            indexer,
            jobs,
            cfg,
        }
    }

    pub async fn ingest_batch(&self, batch_label: String, files: Vec<IncomingFile>) -> CoreResult<IngestOutcome> {
        validate::validate_batch(files.len(), &self.cfg)?;

        let upload = Upload::new(batch_label, files.len());
        self.store.create_upload(&upload)?;
        info!(upload_id = %upload.id, files = files.len(), "ingest batch started");

        let upload_id = upload.id;
        let concurrency = self.cfg.ingest_concurrency.max(1);
        let documents: Vec<Document> = stream::iter(files.into_iter())
            .map(|file| self.process_one(upload_id, file))
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;

        let final_upload = self.store.get_upload(upload_id)?;
        Ok(IngestOutcome {
            upload: final_upload,
            documents,
        })
    }

    async fn process_one(&self, upload_id: Uuid, file: IncomingFile) -> Document {
        let filename = file.filename.clone();
        match self.process_one_inner(upload_id, file).await {
            Ok(doc) => {
                let succeeded = doc.status == DocumentStatus::Completed;
                if let Err(e) = self.store.record_document_outcome(upload_id, succeeded) {
                    error!(upload_id = %upload_id, error = %e, "failed to record document outcome");
                }
                doc
            }
            Err(e) => {
                warn!(upload_id = %upload_id, filename = %filename, error = %e, "file ingestion failed before a document row could be created");
                let doc = Document {
                    id: Uuid::new_v4(),
                    upload_id,
                    filename: filename.clone(),
                    file_type: crate::types::FileType::Txt,
                    byte_size: 0,
                    page_count: 0,
                    content_hash: String::new(),
                    storage_path: String::new(),
                    status: DocumentStatus::Failed,
                    error_message: Some(e.to_string()),
                    created_at: chrono::Utc::now(),
                };
                if let Err(persist_err) = self.store.append_document(&doc) {
                    error!(error = %persist_err, "failed to persist rejected-document record");
                }
                if let Err(e) = self.store.record_document_outcome(upload_id, false) {
                    error!(upload_id = %upload_id, error = %e, "failed to record document outcome");
                }
                doc
            }
        }
    }

    /// Returns `Ok` for every file that reached validation (including
    /// documents marked `Failed` for extraction/page-limit/duplicate
    /// reasons, which still get a persisted Document row); returns `Err`
    /// only when validation itself rejected the file outright, before any
    /// row could be created.
    async fn process_one_inner(&self, upload_id: Uuid, file: IncomingFile) -> CoreResult<Document> {
        let byte_size = file.bytes.len() as u64;
        let validated: ValidatedFile =
            validate::validate_file(&file.filename, byte_size, Cursor::new(&file.bytes), &self.cfg)?;

        let storage_path = self.persist_bytes(upload_id, &validated, &file.bytes)?;

        if let Some(existing_id) = validate::check_duplicate(
            &self.store,
            &validated.content_hash,
            &upload_id.to_string(),
            self.cfg.duplicate_scope,
        )? {
            return Ok(self.failed_document(
                upload_id,
                &validated,
                storage_path,
                CoreError::DuplicateDocument {
                    existing_doc_id: existing_id,
                },
            ));
        }

        let doc_id = Uuid::new_v4();
        let extraction = match extract::extract(
            &PathBuf::from(&storage_path),
            &validated.filename,
            validated.file_type,
            self.cfg.max_pages,
        ) {
            Ok(e) => e,
            Err(e) => return Ok(self.failed_document(upload_id, &validated, storage_path, e)),
        };

        let raw_chunks: Vec<RawChunk> = match chunking::chunk_text(
            &extraction.text,
            validated.file_type,
            extraction.per_page_breaks.as_deref(),
            &self.cfg.tokenizer_name,
            &self.tokenizers,
            &self.cfg,
        ) {
            Ok(c) => c,
            Err(e) => return Ok(self.failed_document(upload_id, &validated, storage_path, e)),
        };

        let document = Document {
            id: doc_id,
            upload_id,
            filename: validated.filename.clone(),
            file_type: validated.file_type,
            byte_size: validated.byte_size,
            page_count: extraction.page_count,
            content_hash: validated.content_hash.clone(),
            storage_path,
            status: DocumentStatus::Completed,
            error_message: None,
            created_at: chrono::Utc::now(),
        };

        let chunks: Vec<Chunk> = raw_chunks
            .into_iter()
            .enumerate()
            .map(|(i, raw)| Chunk {
                id: Uuid::new_v4(),
                document_id: doc_id,
                chunk_index: i as u32,
                content: raw.content,
                token_count: raw.token_count,
                start_char: raw.start_char,
                end_char: raw.end_char,
                page_number: raw.page_number,
                embedding_key: None,
                created_at: chrono::Utc::now(),
            })
            .collect();

        // Document and its chunks become visible atomically (§4.9's
        // "create row, fill later" prohibition): there is no window where
        // a reader can see the document without its chunks.
        self.store.append_document(&document)?;
        self.store.bulk_insert_chunks(doc_id, &chunks)?;

        self.jobs.schedule(doc_id);

        Ok(document)
    }

    fn failed_document(
        &self,
        upload_id: Uuid,
        validated: &ValidatedFile,
        storage_path: String,
        error: CoreError,
    ) -> Document {
        let doc = Document {
            id: Uuid::new_v4(),
            upload_id,
            filename: validated.filename.clone(),
            file_type: validated.file_type,
            byte_size: validated.byte_size,
            page_count: 0,
            content_hash: validated.content_hash.clone(),
            storage_path,
            status: DocumentStatus::Failed,
            error_message: Some(error.to_string()),
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = self.store.append_document(&doc) {
            error!(error = %e, "failed to persist failed-document record");
        }
        doc
    }

    fn persist_bytes(&self, upload_id: Uuid, validated: &ValidatedFile, bytes: &[u8]) -> CoreResult<String> {
        let dir = self.cfg.upload_storage_dir(&upload_id.to_string());
        std::fs::create_dir_all(&dir)?;
        let safe_name = validate::sanitize_filename(&validated.filename);
        let path = dir.join(format!("{}-{safe_name}", Uuid::new_v4()));
        std::fs::write(&path, bytes)?;
        Ok(path.to_string_lossy().to_string())
    }
}

/// Deletes a document, its chunks (cascaded by C5), and its vectors in C7.
/// Waits for any in-flight `index_document` run on this document to finish
/// first, so the indexer never upserts vectors or embedding keys for rows
/// this call is about to remove (§5).
pub async fn delete_document(store: &MetadataStore, indexer: &Indexer, doc_id: Uuid) -> CoreResult<()> {
    indexer.wait_until_idle(doc_id).await;
    let (upload_id, chunk_ids) = store.delete_document(doc_id)?;
    indexer.delete_document_vectors(doc_id, upload_id, &chunk_ids).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::FakeEmbeddingProvider;
    use crate::providers::EmbeddingProvider;
    use crate::vectorstore::memory::InMemoryVectorStore;
    use crate::vectorstore::VectorStore;

    fn test_setup() -> (Arc<MetadataStore>, IngestionOrchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let mut cfg = Config::default();
        cfg.data_dir = dir.path().to_path_buf();
        cfg.max_chunk_tokens = 100;
        cfg.min_chunk_tokens = 10;
        cfg.overlap_tokens = 20;

        let tokenizers = Arc::new(TokenizerRegistry::new());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FakeEmbeddingProvider::new(8));
        let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let indexer = Arc::new(Indexer::new(store.clone(), embedder, vectors, cfg.clone()));
        let jobs = Arc::new(JobQueue::new_inline(indexer.clone()));

        let orchestrator = IngestionOrchestrator::new(store.clone(), tokenizers, indexer, jobs, cfg);
        (store, orchestrator, dir)
    }

    #[tokio::test]
    async fn batch_over_limit_is_rejected_before_any_row_is_created() {
        let (store, orchestrator, _dir) = test_setup();
        let files: Vec<IncomingFile> = (0..(orchestrator.cfg.max_docs_per_batch + 1))
            .map(|i| IncomingFile {
                filename: format!("f{i}.txt"),
                bytes: b"hello world".to_vec(),
            })
            .collect();
        let err = orchestrator.ingest_batch("batch".into(), files).await.unwrap_err();
        assert!(matches!(err, CoreError::BatchTooLarge { .. }));
        assert_eq!(store.list_uploads(0, 10).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn happy_path_small_document_is_chunked_and_completed() {
        let (store, orchestrator, _dir) = test_setup();
        let text = "Sentence one is here. ".repeat(40);
        let outcome = orchestrator
            .ingest_batch(
                "batch".into(),
                vec![IncomingFile {
                    filename: "doc.txt".into(),
                    bytes: text.into_bytes(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.documents[0].status, DocumentStatus::Completed);
        let chunks = store.list_chunks(outcome.documents[0].id, None, None).unwrap();
        assert!(!chunks.is_empty());
    }

    #[tokio::test]
    async fn duplicate_upload_is_marked_failed() {
        let (store, orchestrator, _dir) = test_setup();
        let bytes = b"duplicate content, same every time.".to_vec();
        orchestrator
            .ingest_batch(
                "batch-1".into(),
                vec![IncomingFile {
                    filename: "a.txt".into(),
                    bytes: bytes.clone(),
                }],
            )
            .await
            .unwrap();

        let second = orchestrator
            .ingest_batch(
                "batch-2".into(),
                vec![IncomingFile {
                    filename: "b.txt".into(),
                    bytes,
                }],
            )
            .await
            .unwrap();
        assert_eq!(second.documents[0].status, DocumentStatus::Failed);
        assert!(store.list_chunks(second.documents[0].id, None, None).unwrap().is_empty());
    }
}
