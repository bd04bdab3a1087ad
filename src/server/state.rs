//! Shared application state: one struct of `Arc`-wrapped components, built
//! once at startup and cloned into every handler. There is no interactive
//! model picker here, only a fixed provider chosen by configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{Config, EmbeddingProviderKind, LlmProviderKind};
use crate::errors::CoreError;
use crate::indexer::Indexer;
use crate::ingest::IngestionOrchestrator;
use crate::jobqueue::JobQueue;
use crate::providers::embedding_candle::CandleEmbeddingProvider;
use crate::providers::embedding_http::HttpEmbeddingProvider;
use crate::providers::fakes::FakeLlmProvider;
use crate::providers::llm_http::HttpLlmProvider;
use crate::providers::{EmbeddingProvider, LlmProvider};
use crate::query::QueryEngine;
use crate::retrieval::keyword::KeywordRetriever;
use crate::retrieval::semantic::SemanticRetriever;
use crate::store::MetadataStore;
use crate::tokenizer::TokenizerRegistry;
use crate::vectorstore::lance::LanceVectorStore;
use crate::vectorstore::VectorStore;

pub struct AppState {
    pub cfg: Config,
    pub store: Arc<MetadataStore>,
    pub tokenizers: Arc<TokenizerRegistry>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vectors: Arc<dyn VectorStore>,
    pub indexer: Arc<Indexer>,
    pub ingestion: Arc<IngestionOrchestrator>,
    pub jobs: Arc<JobQueue>,
    pub keyword: Arc<KeywordRetriever>,
    pub query_engine: Arc<QueryEngine>,
}

fn build_embedder(cfg: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match cfg.embedding_provider {
        EmbeddingProviderKind::Local => {
            let provider = CandleEmbeddingProvider::load(&cfg.embedding_model_name)?;
            Ok(Arc::new(provider))
        }
        EmbeddingProviderKind::Http => {
            let endpoint = cfg
                .embedding_endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("EmbeddingEndpoint is required for the http embedding provider"))?;
            let api_key = cfg.embedding_api_key.clone().unwrap_or_default();
            Ok(Arc::new(HttpEmbeddingProvider::new(
                endpoint,
                api_key,
                cfg.embedding_model_name.clone(),
                cfg.vector_dimension,
                cfg.embed_retry_max,
                Duration::from_millis(cfg.embed_retry_delay_ms),
            )))
        }
    }
}

fn build_llm(cfg: &Config) -> anyhow::Result<Arc<dyn LlmProvider>> {
    match cfg.llm_provider {
        LlmProviderKind::Http => {
            let endpoint = cfg
                .llm_endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("LLMEndpoint is required for the http llm provider"))?;
            let api_key = cfg.llm_api_key.clone().unwrap_or_default();
            let provider = HttpLlmProvider::new(
                endpoint,
                api_key,
                cfg.llm_model_name.clone(),
                Duration::from_secs(cfg.llm_timeout_seconds),
                cfg.embed_retry_max,
                Duration::from_millis(cfg.embed_retry_delay_ms),
            )?;
            Ok(Arc::new(provider))
        }
        LlmProviderKind::Fake => Ok(Arc::new(FakeLlmProvider::new(
            "I don't have enough information to answer this question.",
        ))),
    }
}

/// Downloads (or reuses the cached copy of) `tokenizer.json` for
/// `cfg.tokenizer_name` via `hf_hub`, the same mechanism used to fetch
/// embedding model weights.
fn bootstrap_tokenizer(cfg: &Config) -> anyhow::Result<TokenizerRegistry> {
    let registry = TokenizerRegistry::new();
    let api = hf_hub::api::sync::ApiBuilder::new().with_progress(false).build()?;
    let repo = api.repo(hf_hub::Repo::new(cfg.tokenizer_name.clone(), hf_hub::RepoType::Model));
    let tokenizer_path = repo.get("tokenizer.json")?;
    registry.register_from_file(&cfg.tokenizer_name, &tokenizer_path)?;
    Ok(registry)
}

impl AppState {
    pub async fn build(cfg: Config) -> anyhow::Result<Arc<Self>> {
        std::fs::create_dir_all(&cfg.data_dir)?;

        let store = Arc::new(MetadataStore::open(&cfg.sqlite_path())?);
        let tokenizers = Arc::new(bootstrap_tokenizer(&cfg)?);

        let embedder = build_embedder(&cfg)?;
        if embedder.dimension() != cfg.vector_dimension {
            return Err(CoreError::DimensionMismatch {
                expected: cfg.vector_dimension,
                actual: embedder.dimension(),
            }
            .into());
        }
        let llm = build_llm(&cfg)?;
        let vectors: Arc<dyn VectorStore> = Arc::new(LanceVectorStore::open(&cfg.lance_dir()).await?);

        let indexer = Arc::new(Indexer::new(store.clone(), embedder.clone(), vectors.clone(), cfg.clone()));
        let jobs = JobQueue::spawn(indexer.clone(), cfg.index_concurrency.max(1));
        let ingestion = Arc::new(IngestionOrchestrator::new(
            store.clone(),
            tokenizers.clone(),
            indexer.clone(),
            jobs.clone(),
            cfg.clone(),
        ));

        let keyword = Arc::new(KeywordRetriever::new(store.clone()));
        let semantic = Arc::new(SemanticRetriever::new(embedder.clone(), vectors.clone()));
        let query_engine = Arc::new(QueryEngine::new(
            store.clone(),
            embedder.clone(),
            llm.clone(),
            keyword.clone(),
            semantic,
            tokenizers.clone(),
            cfg.clone(),
        ));

        info!(
            data_dir = %cfg.data_dir.display(),
            embedding_model = %embedder.model_name(),
            "application state initialized"
        );

        Ok(Arc::new(AppState {
            cfg,
            store,
            tokenizers,
            embedder,
            vectors,
            indexer,
            ingestion,
            jobs,
            keyword,
            query_engine,
        }))
    }
}
