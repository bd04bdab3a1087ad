//! Process configuration.
//!
//! Loaded from environment variables first, then a `config.toml` default
//! file in the data directory (via the `toml` crate). Validated once at
//! startup: an invalid or missing required value is a fatal config error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

/// Which duplicate-detection scope content_hash collisions are checked
/// against (§9 open question: repo hashes globally but never documents
/// tenancy — made an explicit configuration choice here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateScope {
    Global,
    PerUpload,
    PerTenant,
}

impl Default for DuplicateScope {
    fn default() -> Self {
        DuplicateScope::Global
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Semantic,
    Keyword,
    Hybrid,
}

impl Default for RetrievalMethod {
    fn default() -> Self {
        RetrievalMethod::Hybrid
    }
}

/// Hybrid fusion strategy. RRF is the default; a min-max-normalized
/// weighted sum is kept as a documented alternative behind this flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    Rrf,
    ConvexCombination,
}

impl Default for FusionStrategy {
    fn default() -> Self {
        FusionStrategy::Rrf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    Local,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    Http,
    Fake,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Limits (§6)
    pub max_docs_per_batch: usize,
    pub max_file_bytes: u64,
    pub max_pages: usize,
    pub max_chunk_tokens: usize,
    pub min_chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub max_context_tokens: usize,

    // Retrieval
    pub top_k: usize,
    pub mmr_lambda: f32,
    pub retrieval_method: RetrievalMethod,
    pub rrf_k: u32,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub fusion_strategy: FusionStrategy,

    // Providers
    pub embedding_provider: EmbeddingProviderKind,
    pub llm_provider: LlmProviderKind,
    pub embedding_model_name: String,
    pub llm_model_name: String,
    pub embedding_api_key: Option<String>,
    pub llm_api_key: Option<String>,
    pub embedding_endpoint: Option<String>,
    pub llm_endpoint: Option<String>,
    pub vector_dimension: usize,
    pub vector_metric: String,

    // Concurrency / retry
    pub ingest_concurrency: usize,
    pub index_concurrency: usize,
    pub embed_batch_size: usize,
    pub upsert_batch_size: usize,
    pub embed_retry_max: u32,
    pub embed_retry_delay_ms: u64,
    pub llm_timeout_seconds: u64,

    // Ambient: data directory and duplicate scope, not part of spec §6's
    // table but required to stand the process up.
    pub data_dir: PathBuf,
    pub duplicate_scope: DuplicateScope,
    pub tokenizer_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_docs_per_batch: 20,
            max_file_bytes: 50 * 1024 * 1024,
            max_pages: 1000,
            max_chunk_tokens: 1000,
            min_chunk_tokens: 100,
            overlap_tokens: 150,
            max_context_tokens: 6000,

            top_k: 10,
            mmr_lambda: 0.5,
            retrieval_method: RetrievalMethod::Hybrid,
            rrf_k: 60,
            bm25_k1: 1.2,
            bm25_b: 0.75,
            fusion_strategy: FusionStrategy::Rrf,

            embedding_provider: EmbeddingProviderKind::Local,
            llm_provider: LlmProviderKind::Http,
            embedding_model_name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            embedding_api_key: None,
            llm_api_key: None,
            embedding_endpoint: None,
            llm_endpoint: None,
            vector_dimension: 384,
            vector_metric: "cosine".to_string(),

            ingest_concurrency: 5,
            index_concurrency: 4,
            embed_batch_size: 32,
            upsert_batch_size: 100,
            embed_retry_max: 3,
            embed_retry_delay_ms: 500,
            llm_timeout_seconds: 30,

            data_dir: PathBuf::from("./data"),
            duplicate_scope: DuplicateScope::Global,
            tokenizer_name: "bert-base-uncased".to_string(),
        }
    }
}

fn env_usize(name: &str, default: usize) -> CoreResult<usize> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| CoreError::internal(anyhow::anyhow!("{name} must be an integer, got {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn env_u64(name: &str, default: u64) -> CoreResult<u64> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| CoreError::internal(anyhow::anyhow!("{name} must be an integer, got {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn env_u32(name: &str, default: u32) -> CoreResult<u32> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| CoreError::internal(anyhow::anyhow!("{name} must be an integer, got {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn env_f32(name: &str, default: f32) -> CoreResult<f32> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| CoreError::internal(anyhow::anyhow!("{name} must be a float, got {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("config.toml")
    }

    pub fn exists(data_dir: &Path) -> bool {
        Self::path(data_dir).exists()
    }

    /// Load from `config.toml` in `data_dir` if present, then overlay any
    /// environment variables named in §6. Environment wins over the file,
    /// matching the precedence documented in SPEC_FULL.md's ambient config
    /// section.
    pub fn load(data_dir: &Path) -> CoreResult<Self> {
        let mut cfg = if Self::exists(data_dir) {
            let raw = std::fs::read_to_string(Self::path(data_dir))?;
            toml::from_str(&raw).map_err(|e| CoreError::internal(anyhow::anyhow!(e)))?
        } else {
            Config::default()
        };
        cfg.data_dir = data_dir.to_path_buf();
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> CoreResult<()> {
        self.max_docs_per_batch = env_usize("MaxDocsPerBatch", self.max_docs_per_batch)?;
        self.max_file_bytes = env_u64("MaxFileBytes", self.max_file_bytes)?;
        self.max_pages = env_usize("MaxPages", self.max_pages)?;
        self.max_chunk_tokens = env_usize("MaxChunkTokens", self.max_chunk_tokens)?;
        self.min_chunk_tokens = env_usize("MinChunkTokens", self.min_chunk_tokens)?;
        self.overlap_tokens = env_usize("OverlapTokens", self.overlap_tokens)?;
        self.max_context_tokens = env_usize("MaxContextTokens", self.max_context_tokens)?;

        self.top_k = env_usize("TopK", self.top_k)?;
        self.mmr_lambda = env_f32("MMRLambda", self.mmr_lambda)?;
        self.rrf_k = env_u32("RRFk", self.rrf_k)?;
        self.bm25_k1 = env_f32("BM25k1", self.bm25_k1)?;
        self.bm25_b = env_f32("BM25b", self.bm25_b)?;

        self.embedding_model_name = env_string("EmbeddingModelName", &self.embedding_model_name);
        self.llm_model_name = env_string("LLMModelName", &self.llm_model_name);
        if let Ok(key) = std::env::var("EmbeddingApiKey") {
            self.embedding_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("LLMApiKey") {
            self.llm_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("EmbeddingEndpoint") {
            self.embedding_endpoint = Some(url);
        }
        if let Ok(url) = std::env::var("LLMEndpoint") {
            self.llm_endpoint = Some(url);
        }
        self.vector_dimension = env_usize("VectorDimension", self.vector_dimension)?;

        self.ingest_concurrency = env_usize("IngestConcurrency", self.ingest_concurrency)?;
        self.index_concurrency = env_usize("IndexConcurrency", self.index_concurrency)?;
        self.embed_batch_size = env_usize("EmbedBatchSize", self.embed_batch_size)?;
        self.upsert_batch_size = env_usize("UpsertBatchSize", self.upsert_batch_size)?;
        self.embed_retry_max = env_u32("EmbedRetryMax", self.embed_retry_max)?;
        self.embed_retry_delay_ms = env_u64("EmbedRetryDelay", self.embed_retry_delay_ms)?;
        self.llm_timeout_seconds = env_u64("LLMTimeoutSeconds", self.llm_timeout_seconds)?;

        if let Ok(v) = std::env::var("RetrievalMethod") {
            self.retrieval_method = match v.as_str() {
                "semantic" => RetrievalMethod::Semantic,
                "keyword" => RetrievalMethod::Keyword,
                "hybrid" => RetrievalMethod::Hybrid,
                other => {
                    return Err(CoreError::internal(anyhow::anyhow!(
                        "invalid RetrievalMethod: {other}"
                    )))
                }
            };
        }
        if let Ok(v) = std::env::var("EmbeddingProvider") {
            self.embedding_provider = match v.as_str() {
                "local" => EmbeddingProviderKind::Local,
                "http" => EmbeddingProviderKind::Http,
                other => {
                    return Err(CoreError::internal(anyhow::anyhow!(
                        "invalid EmbeddingProvider: {other}"
                    )))
                }
            };
        }
        if let Ok(v) = std::env::var("LLMProvider") {
            self.llm_provider = match v.as_str() {
                "http" => LlmProviderKind::Http,
                "fake" => LlmProviderKind::Fake,
                other => {
                    return Err(CoreError::internal(anyhow::anyhow!("invalid LLMProvider: {other}")))
                }
            };
        }
        Ok(())
    }

    fn validate(&self) -> CoreResult<()> {
        if self.min_chunk_tokens == 0 || self.min_chunk_tokens > self.max_chunk_tokens {
            return Err(CoreError::internal(anyhow::anyhow!(
                "MinChunkTokens must be > 0 and <= MaxChunkTokens"
            )));
        }
        if self.overlap_tokens >= self.max_chunk_tokens {
            return Err(CoreError::internal(anyhow::anyhow!(
                "OverlapTokens must be < MaxChunkTokens"
            )));
        }
        if self.max_docs_per_batch == 0 {
            return Err(CoreError::internal(anyhow::anyhow!(
                "MaxDocsPerBatch must be > 0"
            )));
        }
        Ok(())
    }

    pub fn save(&self, data_dir: &Path) -> CoreResult<()> {
        std::fs::create_dir_all(data_dir)?;
        let raw = toml::to_string_pretty(self).map_err(|e| CoreError::internal(anyhow::anyhow!(e)))?;
        std::fs::write(Self::path(data_dir), raw)?;
        Ok(())
    }

    pub fn upload_storage_dir(&self, upload_id: &str) -> PathBuf {
        self.data_dir.join("uploads").join(upload_id)
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("metadata.sqlite3")
    }

    pub fn lance_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn tantivy_dir(&self) -> PathBuf {
        self.data_dir.join("bm25")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_docs_per_batch, 20);
        assert_eq!(cfg.max_file_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.max_pages, 1000);
        assert_eq!(cfg.min_chunk_tokens, 100);
        assert_eq!(cfg.max_chunk_tokens, 1000);
        assert_eq!(cfg.overlap_tokens, 150);
        assert_eq!(cfg.rrf_k, 60);
        assert_eq!(cfg.bm25_k1, 1.2);
        assert_eq!(cfg.bm25_b, 0.75);
    }

    #[test]
    fn validate_rejects_inverted_chunk_bounds() {
        let mut cfg = Config::default();
        cfg.min_chunk_tokens = 2000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_without_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.top_k, 10);
        assert_eq!(cfg.data_dir, dir.path());
    }
}
