//! BGE-M3 (XLM-RoBERTa) sentence embeddings via candle.
//!
//! Expects `tokenizer.json`, `config.json` and `pytorch_model.bin` in the model
//! directory. The directory is taken from `embedding.model_dir`, then
//! `APP_MODEL_DIR`, then `models/bge-m3`.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use claimdex_core::config::expand_path;
use claimdex_core::traits::Embedder;
use claimdex_core::{Error, Result};

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

const DIM: usize = 1024;
const MAX_LEN: usize = 512;

pub(crate) fn candle_err(e: impl Display) -> Error { Error::Embedding(e.to_string()) }

pub struct BgeM3Embedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl BgeM3Embedder {
    pub fn load(model_dir: Option<&str>) -> Result<Self> {
        let device = select_device();
        let model_dir = resolve_model_dir(model_dir)?;
        info!(dir = %model_dir.display(), "loading BGE-M3");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::Embedding(format!("failed to load tokenizer from {}: {}", tokenizer_path.display(), e)))?;

        let config_path = model_dir.join("config.json");
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| Error::NotFound(format!("{}: {}", config_path.display(), e)))?;
        let config: XLMRobertaConfig = serde_json::from_str(&raw).map_err(candle_err)?;

        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin")).map_err(candle_err)?;
        let weights: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(candle_err)?;
        info!("BGE-M3 loaded");
        Ok(Self { model, tokenizer, device })
    }
}

impl Embedder for BgeM3Embedder {
    fn dim(&self) -> usize { DIM }

    fn max_len(&self) -> usize { MAX_LEN }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, MAX_LEN, &self.device)?;
        let token_type_ids = input_ids.zeros_like().and_then(|t| t.to_dtype(DType::I64)).map_err(candle_err)?;
        let hidden = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)
            .map_err(candle_err)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu).and_then(|t| t.to_vec2()).map_err(candle_err)?;
        if let Some(bad) = rows.iter().find(|r| r.len() != DIM) {
            return Err(Error::Embedding(format!("expected {}-dim vectors, got {}", DIM, bad.len())));
        }
        debug!(batch = texts.len(), ms = start.elapsed().as_millis() as u64, "embedded batch");
        Ok(rows)
    }
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let candidates = configured
        .map(expand_path)
        .into_iter()
        .chain(std::env::var("APP_MODEL_DIR").ok().map(expand_path))
        .chain([Path::new("models/bge-m3").to_path_buf(), Path::new("../models/bge-m3").to_path_buf()]);
    for dir in candidates {
        if dir.exists() {
            return Ok(dir);
        }
    }
    Err(Error::NotFound("BGE-M3 model directory".to_string()))
}
