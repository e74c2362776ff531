//! Local XLM-RoBERTa family embedder (BGE-M3 and friends) on candle.
//!
//! Expects `tokenizer.json`, `config.json` and either `model.safetensors` or
//! `pytorch_model.bin` in the model directory. Inference runs on the blocking
//! pool so async callers are never stalled by a forward pass.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokenizers::Tokenizer;

use ragdb_core::config::expand_path;
use ragdb_core::error::{RagError, Result};
use ragdb_core::traits::EmbedProvider;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

struct Inner {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
}

pub struct CandleEmbedder {
    inner: Arc<Inner>,
    id: String,
    dim: usize,
}

impl CandleEmbedder {
    pub fn load(model_dir: Option<&str>, max_len: usize) -> Result<Self> {
        Self::load_inner(model_dir, max_len)
            .map_err(|e| RagError::config(format!("failed to load embedding model: {e:#}")))
    }

    fn load_inner(model_dir: Option<&str>, max_len: usize) -> anyhow::Result<Self> {
        let device = select_device();
        let model_dir = resolve_model_dir(model_dir)?;
        tracing::info!(dir = %model_dir.display(), "loading embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", tokenizer_path.display()))?;

        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(
            &std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?,
        )?;

        let weights: HashMap<String, Tensor> = {
            let safetensors = model_dir.join("model.safetensors");
            if safetensors.exists() {
                candle_core::safetensors::load(&safetensors, &device)?
            } else {
                candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?.into_iter().collect()
            }
        };
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;

        let dim = config.hidden_size;
        let name = model_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "model".into());
        tracing::info!(dim, max_len, "embedding model loaded");
        let inner = Arc::new(Inner { model, tokenizer, device, max_len });
        Ok(Self { inner, id: format!("candle:{name}:d{dim}"), dim })
    }
}

impl Inner {
    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = Tensor::zeros((texts.len(), self.max_len), DType::U32, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let out: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        let elapsed = start.elapsed().as_millis();
        if elapsed > 1_000 {
            tracing::warn!(batch = texts.len(), elapsed_ms = elapsed as u64, "slow embedding batch");
        }
        Ok(out)
    }
}

#[async_trait]
impl EmbedProvider for CandleEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.inner.max_len
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || inner.embed(&texts))
            .await
            .map_err(|e| RagError::Provider(format!("embedding task failed: {e}")))?
            .map_err(|e| RagError::Provider(format!("{e:#}")))
    }
}

fn resolve_model_dir(configured: Option<&str>) -> anyhow::Result<PathBuf> {
    let candidates = configured
        .map(expand_path)
        .into_iter()
        .chain(std::env::var("RAGDB_MODEL_DIR").ok().map(expand_path))
        .chain([Path::new("models/bge-m3").to_path_buf(), Path::new("../models/bge-m3").to_path_buf()]);
    for dir in candidates {
        if dir.exists() {
            return Ok(dir);
        }
    }
    Err(anyhow!("could not locate an embedding model directory (set embedding.model_dir)"))
}
