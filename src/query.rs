//! C15: Query Engine (§4.15).
//!
//! Orchestrates C10/C11 -> C12 -> C13 -> context assembly -> C14 ->
//! citation extraction -> persistence. The only component that touches
//! every other one; kept deliberately thin, delegating scoring logic to
//! `retrieval::{keyword, semantic, hybrid, mmr}`.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::info;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::config::{Config, RetrievalMethod};
use crate::errors::{CoreError, CoreResult};
use crate::providers::{EmbedTaskType, EmbeddingProvider, GenerationParams, LlmProvider};
use crate::retrieval::hybrid::{convex_fusion, reciprocal_rank_fusion};
use crate::retrieval::keyword::KeywordRetriever;
use crate::retrieval::mmr;
use crate::retrieval::semantic::SemanticRetriever;
use crate::retrieval::{RetrievalScope, ScoredChunk};
use crate::store::MetadataStore;
use crate::tokenizer::TokenizerRegistry;
use crate::types::{upload_namespace, Chunk, Citation, Query, RetrievalStats};

const MIN_QUERY_LEN: usize = 3;
const MAX_QUERY_LEN: usize = 1000;
const MAX_SNIPPET_CHARS: usize = 150;

const SYSTEM_PROMPT: &str = "You are a document question-answering assistant. Answer the user's \
question using ONLY the information in the provided context. After every \
claim, cite the source it came from using the exact form [Source N], \
where N is the number given in that context block. If the context does \
not contain enough information to answer, respond exactly with: \"I don't \
have enough information to answer this question.\" Do not use any \
knowledge beyond the provided context.";

const FALLBACK_ANSWER: &str = "I don't have enough information to answer this question.";

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub upload_filter: Option<Uuid>,
    pub retrieval_method: Option<RetrievalMethod>,
    pub top_k: Option<usize>,
    pub mmr_lambda: Option<f32>,
}

pub struct QueryEngine {
    store: Arc<MetadataStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    keyword: Arc<KeywordRetriever>,
    semantic: Arc<SemanticRetriever>,
    tokenizers: Arc<TokenizerRegistry>,
    cfg: Config,
    citation_re: Regex,
}

impl QueryEngine {
    pub fn new(
        store: Arc<MetadataStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        keyword: Arc<KeywordRetriever>,
        semantic: Arc<SemanticRetriever>,
        tokenizers: Arc<TokenizerRegistry>,
        cfg: Config,
    ) -> Self {
        QueryEngine {
            store,
            embedder,
            llm,
            keyword,
            semantic,
            tokenizers,
            cfg,
            citation_re: Regex::new(r"\[Source (\d+)\]").expect("static regex"),
        }
    }

    pub async fn answer(&self, query_text: &str, opts: QueryOptions) -> CoreResult<Query> {
        let started = std::time::Instant::now();
        let query_text = query_text.trim();
        if query_text.chars().count() < MIN_QUERY_LEN || query_text.chars().count() > MAX_QUERY_LEN {
            return Err(CoreError::InvalidQuery(format!(
                "query_text must be between {MIN_QUERY_LEN} and {MAX_QUERY_LEN} characters"
            )));
        }

        let method = opts.retrieval_method.unwrap_or(self.cfg.retrieval_method);
        let top_k = opts.top_k.unwrap_or(self.cfg.top_k);
        let fetch_k = top_k * 2;
        let lambda = opts.mmr_lambda.unwrap_or(self.cfg.mmr_lambda);

        let retrieval_started = std::time::Instant::now();
        let candidates = self.retrieve_candidates(query_text, method, opts.upload_filter, top_k, fetch_k).await?;
        let chunks_retrieved = candidates.len();
        tracing::debug!(retrieval_ms = retrieval_started.elapsed().as_millis() as u64, chunks_retrieved, "retrieval stage complete");

        if candidates.is_empty() {
            let query = Query {
                id: Uuid::new_v4(),
                query_text: query_text.to_string(),
                upload_filter: opts.upload_filter,
                answer_text: FALLBACK_ANSWER.to_string(),
                citations: Vec::new(),
                used_chunk_ids: Vec::new(),
                latency_ms: started.elapsed().as_millis() as u64,
                retrieval_stats: RetrievalStats {
                    top_k,
                    chunks_retrieved: 0,
                    chunks_used: 0,
                    retrieval_method: method,
                },
                created_at: chrono::Utc::now(),
            };
            self.store.persist_query(&query)?;
            return Ok(query);
        }

        let chunk_ids: Vec<Uuid> = candidates.iter().map(|c| c.chunk_id).collect();
        let bodies = self.store.get_chunks_by_ids(&chunk_ids)?;
        let body_by_id: HashMap<Uuid, Chunk> = bodies.into_iter().map(|c| (c.id, c)).collect();

        // MMR needs vectors per candidate; the vector store's query/get_by_ids
        // results don't carry embeddings back out, so candidate vectors are
        // re-embedded lazily from chunk text (§4.13's documented fallback).
        let contents: Vec<String> = chunk_ids
            .iter()
            .filter_map(|id| body_by_id.get(id).map(|c| c.content.clone()))
            .collect();
        let present_ids: Vec<Uuid> = chunk_ids.iter().filter(|id| body_by_id.contains_key(id)).copied().collect();
        let content_vectors = self.embedder.embed(&contents, EmbedTaskType::Document).await?.vectors;
        let query_vector = self
            .embedder
            .embed(&[query_text.to_string()], EmbedTaskType::Query)
            .await?
            .vectors
            .remove(0);

        let vector_candidates: Vec<(Uuid, Vec<f32>)> = present_ids.into_iter().zip(content_vectors).collect();
        let final_k = top_k;
        let selections = mmr::select(&vector_candidates, &query_vector, lambda, final_k);

        let mut ordered: Vec<&mmr::MmrSelection> = selections.iter().collect();
        ordered.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));

        let selected_chunks: Vec<Chunk> = ordered
            .iter()
            .filter_map(|s| body_by_id.get(&s.chunk_id).cloned())
            .collect();

        let context = self.assemble_context(&selected_chunks)?;
        let used_chunk_ids: Vec<Uuid> = selected_chunks.iter().take(context.len()).map(|c| c.id).collect();

        let generation_started = std::time::Instant::now();
        let prompt = self.build_prompt(query_text, &context);
        let params = GenerationParams {
            temperature: 0.1,
            ..Default::default()
        };
        let generation = self.llm.generate(&prompt, &params).await?;
        tracing::debug!(generation_ms = generation_started.elapsed().as_millis() as u64, "generation stage complete");

        let citations = self.extract_citations(&generation.text, &selected_chunks[..context.len()]);

        let query = Query {
            id: Uuid::new_v4(),
            query_text: query_text.to_string(),
            upload_filter: opts.upload_filter,
            answer_text: generation.text,
            citations,
            used_chunk_ids,
            latency_ms: started.elapsed().as_millis() as u64,
            retrieval_stats: RetrievalStats {
                top_k,
                chunks_retrieved,
                chunks_used: context.len(),
                retrieval_method: method,
            },
            created_at: chrono::Utc::now(),
        };
        self.store.persist_query(&query)?;
        info!(query_id = %query.id, latency_ms = query.latency_ms, "query answered");
        Ok(query)
    }

    async fn retrieve_candidates(
        &self,
        query_text: &str,
        method: RetrievalMethod,
        upload_filter: Option<Uuid>,
        top_k: usize,
        fetch_k: usize,
    ) -> CoreResult<Vec<ScoredChunk>> {
        match method {
            RetrievalMethod::Semantic => self.semantic_search(query_text, upload_filter, fetch_k).await,
            RetrievalMethod::Keyword => {
                let scope = upload_filter.map(RetrievalScope::Upload).unwrap_or(RetrievalScope::Global);
                self.keyword
                    .search(query_text, &scope, fetch_k)
                    .map_err(|e| CoreError::internal(e))
            }
            RetrievalMethod::Hybrid => {
                let semantic = self.semantic_search(query_text, upload_filter, fetch_k).await?;
                let scope = upload_filter.map(RetrievalScope::Upload).unwrap_or(RetrievalScope::Global);
                let keyword = self
                    .keyword
                    .search(query_text, &scope, fetch_k)
                    .map_err(|e| CoreError::internal(e))?;
                let fused = match self.cfg.fusion_strategy {
                    crate::config::FusionStrategy::Rrf => {
                        reciprocal_rank_fusion(&semantic, &keyword, self.cfg.rrf_k, top_k)
                    }
                    crate::config::FusionStrategy::ConvexCombination => convex_fusion(&semantic, &keyword, top_k),
                };
                Ok(fused)
            }
        }
    }

    async fn semantic_search(
        &self,
        query_text: &str,
        upload_filter: Option<Uuid>,
        fetch_k: usize,
    ) -> CoreResult<Vec<ScoredChunk>> {
        match upload_filter {
            Some(upload_id) => {
                let namespace = upload_namespace(&upload_id);
                self.semantic.search(query_text, fetch_k, &namespace).await
            }
            None => {
                // No single namespace spans every upload; merge per-namespace
                // results across all known uploads and keep the overall
                // top-`fetch_k` by score.
                let mut merged = Vec::new();
                for upload in self.store.list_uploads(0, 10_000)? {
                    let namespace = upload_namespace(&upload.id);
                    let results = self.semantic.search(query_text, fetch_k, &namespace).await?;
                    merged.extend(results);
                }
                merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                merged.truncate(fetch_k);
                Ok(merged)
            }
        }
    }

    fn assemble_context(&self, chunks: &[Chunk]) -> CoreResult<Vec<String>> {
        let mut blocks = Vec::new();
        let mut running_tokens = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            let doc = self.store.get_document(chunk.document_id)?;
            let page = chunk.page_number.map(|p| p.to_string()).unwrap_or_else(|| "n/a".to_string());
            let mut block = format!(
                "[Source {}]\nDocument: {}\nPage: {}\nContent: {}\n---",
                i + 1,
                doc.filename,
                page,
                chunk.content
            );
            let block_tokens = self.tokenizers.count(&self.cfg.tokenizer_name, &block)?;

            if running_tokens + block_tokens > self.cfg.max_context_tokens {
                let remaining = self.cfg.max_context_tokens.saturating_sub(running_tokens);
                if remaining == 0 {
                    break;
                }
                let truncated_content = self
                    .tokenizers
                    .truncate(&self.cfg.tokenizer_name, &chunk.content, remaining)?;
                block = format!(
                    "[Source {}]\nDocument: {}\nPage: {}\nContent: {}…\n---",
                    i + 1,
                    doc.filename,
                    page,
                    truncated_content
                );
                blocks.push(block);
                break;
            }

            running_tokens += block_tokens;
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn build_prompt(&self, query_text: &str, context: &[String]) -> String {
        format!(
            "{SYSTEM_PROMPT}\n\nContext:\n{}\n\nQuestion: {query_text}\n\nAnswer:",
            context.join("\n")
        )
    }

    fn extract_citations(&self, answer: &str, context_chunks: &[Chunk]) -> Vec<Citation> {
        let answer_words = word_set(answer);
        let mut seen = std::collections::HashSet::new();
        let mut citations = Vec::new();
        for capture in self.citation_re.captures_iter(answer) {
            let Ok(n) = capture[1].parse::<usize>() else { continue };
            if n == 0 || n > context_chunks.len() || !seen.insert(n) {
                continue;
            }
            let chunk = &context_chunks[n - 1];
            let snippet = best_overlap_snippet(&chunk.content, &answer_words);
            citations.push(Citation {
                document_id: chunk.document_id,
                page_number: chunk.page_number,
                snippet,
                chunk_id: chunk.id,
            });
        }
        citations
    }
}

fn word_set(text: &str) -> std::collections::HashSet<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

/// Finds the sentence in `chunk_text` with the most lowercased-word-type
/// overlap with `answer_words`, truncated to `MAX_SNIPPET_CHARS` (§4.15
/// step 9).
fn best_overlap_snippet(chunk_text: &str, answer_words: &std::collections::HashSet<String>) -> String {
    let mut best: Option<(usize, &str)> = None;
    for sentence in chunk_text.unicode_sentences() {
        let words = word_set(sentence);
        let overlap = words.intersection(answer_words).count();
        if best.map(|(score, _)| overlap > score).unwrap_or(true) {
            best = Some((overlap, sentence));
        }
    }
    let chosen = best.map(|(_, s)| s).unwrap_or(chunk_text);
    truncate_chars(chosen.trim(), MAX_SNIPPET_CHARS)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::{FakeEmbeddingProvider, FakeLlmProvider};
    use crate::types::{Document, DocumentStatus, FileType, Upload};
    use crate::vectorstore::memory::InMemoryVectorStore;
    use crate::vectorstore::{VectorItem, VectorStore};
    use chrono::Utc;

    async fn seed_doc(store: &MetadataStore, contents: &[&str]) -> (Uuid, Uuid, Vec<Chunk>) {
        let upload = Upload::new("batch".into(), 1);
        store.create_upload(&upload).unwrap();
        let doc = Document {
            id: Uuid::new_v4(),
            upload_id: upload.id,
            filename: "handbook.txt".into(),
            file_type: FileType::Txt,
            byte_size: 100,
            page_count: 1,
            content_hash: "hash".into(),
            storage_path: "/tmp/handbook.txt".into(),
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
        (upload.id, doc.id, chunks)
    }

    fn engine_with(
        store: Arc<MetadataStore>,
        tokenizers: Arc<TokenizerRegistry>,
        llm_answer: &str,
    ) -> QueryEngine {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FakeEmbeddingProvider::new(8));
        let llm: Arc<dyn LlmProvider> = Arc::new(FakeLlmProvider::new(llm_answer));
        let keyword = Arc::new(KeywordRetriever::new(store.clone()));
        let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let semantic = Arc::new(SemanticRetriever::new(embedder.clone(), vectors));
        let mut cfg = Config::default();
        cfg.tokenizer_name = "ws".into();
        QueryEngine::new(store, embedder, llm, keyword, semantic, tokenizers, cfg)
    }

    fn whitespace_tokenizer() -> tokenizers::Tokenizer {
        use tokenizers::models::wordlevel::WordLevel;
        use tokenizers::pre_tokenizers::whitespace::Whitespace;
        use tokenizers::TokenizerImpl;
        let vocab: HashMap<String, u32> = (0..10000).enumerate().map(|(i, _)| (format!("w{i}"), i as u32)).collect();
        let model = WordLevel::builder().vocab(vocab).unk_token("[UNK]".to_string()).build().unwrap();
        let mut tokenizer: TokenizerImpl<_, _, _, _, _> = TokenizerImpl::new(model);
        tokenizer.with_pre_tokenizer(Some(Whitespace {}));
        tokenizers::Tokenizer::from(tokenizer)
    }

    #[tokio::test]
    async fn rejects_too_short_query() {
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let tokenizers = Arc::new(TokenizerRegistry::new());
        tokenizers.register("ws", whitespace_tokenizer());
        let engine = engine_with(store, tokenizers, "answer");
        let err = engine.answer("ok", QueryOptions::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn empty_retrieval_returns_fallback_answer() {
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let tokenizers = Arc::new(TokenizerRegistry::new());
        tokenizers.register("ws", whitespace_tokenizer());
        let engine = engine_with(store, tokenizers, "should not be used");
        let result = engine.answer("what is the refund policy?", QueryOptions::default()).await.unwrap();
        assert_eq!(result.answer_text, FALLBACK_ANSWER);
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn keyword_query_with_citation_is_parsed_and_persisted() {
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let tokenizers = Arc::new(TokenizerRegistry::new());
        tokenizers.register("ws", whitespace_tokenizer());
        let (_, _doc_id, _chunks) = seed_doc(
            &store,
            &["Refunds are processed within 30 days of purchase.", "Shipping takes five to seven business days."],
        )
        .await;

        let engine = engine_with(store.clone(), tokenizers, "Refunds take 30 days. [Source 1]");
        let mut opts = QueryOptions::default();
        opts.retrieval_method = Some(RetrievalMethod::Keyword);
        let result = engine.answer("how long do refunds take?", opts).await.unwrap();

        assert!(result.answer_text.contains("[Source 1]"));
        assert_eq!(result.citations.len(), 1);
        assert!(result.retrieval_stats.chunks_retrieved > 0);
        let persisted = store.get_query(result.id).unwrap();
        assert_eq!(persisted.id, result.id);
    }
}
