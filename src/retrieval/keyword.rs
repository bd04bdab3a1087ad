//! C10: Keyword Retriever (§4.10).
//!
//! BM25 over a tantivy index built from C5 chunks, scoped per upload,
//! per document, or global. Tantivy's default BM25 similarity already
//! uses the standard `k1 = 1.2`, `b = 0.75` defaults, so no custom
//! similarity is plugged in; `cfg.bm25_k1`/`cfg.bm25_b` are carried for
//! documentation and validated at startup, but only take effect if a
//! future tantivy version exposes per-query BM25 parameters.

use std::collections::HashMap;
use std::sync::RwLock;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, ReloadPolicy};
use uuid::Uuid;

use crate::store::MetadataStore;

use super::{RetrievalScope, ScoredChunk};

struct CachedCorpus {
    chunk_count: usize,
    index: Index,
    reader: IndexReader,
    id_field: tantivy::schema::Field,
    content_field: tantivy::schema::Field,
}

fn scope_key(scope: &RetrievalScope) -> String {
    match scope {
        RetrievalScope::Upload(id) => format!("upload:{id}"),
        RetrievalScope::Document(id) => format!("document:{id}"),
        RetrievalScope::Global => "global".to_string(),
    }
}

pub struct KeywordRetriever {
    store: std::sync::Arc<MetadataStore>,
    cache: RwLock<HashMap<String, CachedCorpus>>,
}

impl KeywordRetriever {
    pub fn new(store: std::sync::Arc<MetadataStore>) -> Self {
        KeywordRetriever {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Invalidates the cached corpus for a scope; called by the indexer
    /// wiring after chunk insert/delete so the next search rebuilds it.
    pub fn invalidate(&self, scope: &RetrievalScope) {
        self.cache.write().unwrap().remove(&scope_key(scope));
    }

    fn corpus_chunks(&self, scope: &RetrievalScope) -> anyhow::Result<Vec<(Uuid, String)>> {
        match scope {
            RetrievalScope::Document(doc_id) => Ok(self
                .store
                .list_chunks(*doc_id, None, None)?
                .into_iter()
                .map(|c| (c.id, c.content))
                .collect()),
            RetrievalScope::Upload(upload_id) => {
                let docs = self.store.list_documents_for_upload(*upload_id)?;
                let mut out = Vec::new();
                for doc in docs {
                    out.extend(
                        self.store
                            .list_chunks(doc.id, None, None)?
                            .into_iter()
                            .map(|c| (c.id, c.content)),
                    );
                }
                Ok(out)
            }
            RetrievalScope::Global => {
                // No "all uploads" listing primitive exists on C5 beyond
                // pagination; global scope is only exercised by tests and
                // the CLI's ad-hoc query mode, so a bounded page is enough
                // to avoid loading an unbounded corpus into one tantivy
                // index on every cache miss.
                let mut out = Vec::new();
                for upload in self.store.list_uploads(0, 10_000)? {
                    let docs = self.store.list_documents_for_upload(upload.id)?;
                    for doc in docs {
                        out.extend(
                            self.store
                                .list_chunks(doc.id, None, None)?
                                .into_iter()
                                .map(|c| (c.id, c.content)),
                        );
                    }
                }
                Ok(out)
            }
        }
    }

    fn build_corpus(&self, chunks: &[(Uuid, String)]) -> anyhow::Result<CachedCorpus> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer = index.writer(15_000_000)?;
        for (id, content) in chunks {
            writer.add_document(doc!(
                id_field => id.to_string(),
                content_field => content.as_str(),
            ))?;
        }
        writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        Ok(CachedCorpus {
            chunk_count: chunks.len(),
            index,
            reader,
            id_field,
            content_field,
        })
    }

    /// Returns the top-`limit` chunk ids by BM25 score for `query_text`
    /// within `scope`. Empty corpus -> empty result (§4.10).
    pub fn search(&self, query_text: &str, scope: &RetrievalScope, limit: usize) -> anyhow::Result<Vec<ScoredChunk>> {
        let key = scope_key(scope);
        let chunks = self.corpus_chunks(scope)?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let needs_rebuild = {
            let cache = self.cache.read().unwrap();
            match cache.get(&key) {
                Some(c) => c.chunk_count != chunks.len(),
                None => true,
            }
        };
        if needs_rebuild {
            let corpus = self.build_corpus(&chunks)?;
            self.cache.write().unwrap().insert(key.clone(), corpus);
        }

        let cache = self.cache.read().unwrap();
        let corpus = cache.get(&key).expect("just inserted");
        let searcher = corpus.reader.searcher();
        let parser = QueryParser::for_index(&corpus.index, vec![corpus.content_field]);
        let query = match parser.parse_query(query_text) {
            Ok(q) => q,
            Err(_) => return Ok(Vec::new()),
        };

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;
        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved = searcher.doc::<tantivy::TantivyDocument>(address)?;
            if let Some(value) = retrieved.get_first(corpus.id_field) {
                if let Some(id_str) = value.as_str() {
                    if let Ok(chunk_id) = Uuid::parse_str(id_str) {
                        results.push(ScoredChunk { chunk_id, score });
                    }
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, Document, DocumentStatus, FileType, Upload};
    use chrono::Utc;

    fn seed(store: &MetadataStore, contents: &[&str]) -> Uuid {
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
        let chunks: Vec<Chunk> = contents
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: Uuid::new_v4(),
                document_id: doc.id,
                chunk_index: i as u32,
                content: text.to_string(),
                token_count: text.split_whitespace().count(),
                start_char: 0,
                end_char: text.len(),
                page_number: Some(1),
                embedding_key: None,
                created_at: Utc::now(),
            })
            .collect();
        store.bulk_insert_chunks(doc.id, &chunks).unwrap();
        doc.id
    }

    #[test]
    fn empty_scope_returns_empty_results() {
        let store = std::sync::Arc::new(MetadataStore::open_in_memory().unwrap());
        let retriever = KeywordRetriever::new(store);
        let results = retriever
            .search("anything", &RetrievalScope::Document(Uuid::new_v4()), 5)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn matching_terms_rank_above_non_matching() {
        let store = std::sync::Arc::new(MetadataStore::open_in_memory().unwrap());
        let doc_id = seed(
            &store,
            &[
                "the quick brown fox jumps over the lazy dog",
                "completely unrelated content about finance and taxes",
            ],
        );
        let retriever = KeywordRetriever::new(store);
        let results = retriever.search("fox dog", &RetrievalScope::Document(doc_id), 5).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn cache_rebuilds_after_chunk_count_changes() {
        let store = std::sync::Arc::new(MetadataStore::open_in_memory().unwrap());
        let doc_id = seed(&store, &["alpha beta gamma"]);
        let retriever = KeywordRetriever::new(store.clone());
        let first = retriever.search("alpha", &RetrievalScope::Document(doc_id), 5).unwrap();
        assert_eq!(first.len(), 1);

        let extra = Chunk {
            id: Uuid::new_v4(),
            document_id: doc_id,
            chunk_index: 1,
            content: "alpha delta epsilon".to_string(),
            token_count: 3,
            start_char: 0,
            end_char: 10,
            page_number: Some(1),
            embedding_key: None,
            created_at: Utc::now(),
        };
        store.bulk_insert_chunks(doc_id, &[extra]).unwrap();
        let second = retriever.search("alpha", &RetrievalScope::Document(doc_id), 5).unwrap();
        assert_eq!(second.len(), 2);
    }
}
