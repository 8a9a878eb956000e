//! Embedders for chunk and summary text.
//!
//! `HashEmbedder` is a deterministic bag-of-words projection used by tests and
//! offline runs. The BGE-M3 model lives behind the `model` feature.

use std::hash::{Hash, Hasher};
use tracing::info;
use twox_hash::XxHash64;

use claimdex_core::config::{EmbeddingConfig, EmbeddingProvider};
use claimdex_core::traits::Embedder;
use claimdex_core::{Error, Result};

#[cfg(feature = "model")]
mod device;
#[cfg(feature = "model")]
mod model;
#[cfg(feature = "model")]
mod pool;
#[cfg(feature = "model")]
mod tokenize;

#[cfg(feature = "model")]
pub use model::BgeM3Embedder;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it", "its", "of", "on",
    "that", "the", "to", "was", "will", "with", "or", "but", "not", "this", "these", "they", "them", "their", "there",
    "then", "than", "so", "if", "where", "why", "how", "what", "which", "whose", "can", "could", "should", "would",
    "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having",
];

/// Lowercased alphanumeric terms with stop words removed.
pub fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
}

/// Hashed term-frequency vector, L2-normalized. Identical text always maps to
/// the identical vector and shared vocabulary raises cosine similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1) } }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for term in terms(text) {
            let mut hasher = XxHash64::with_seed(0);
            term.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dim;
            v[idx] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v { *x /= norm; }
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self { Self::new(1024) }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize { self.dim }

    fn max_len(&self) -> usize { usize::MAX }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { Ok(texts.iter().map(|t| self.embed_text(t)).collect()) }
}

/// Embedder selected by `[embedding] provider`.
pub fn default_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Hash => {
            info!(dim = config.dimension, "using hash embedder");
            Ok(Box::new(HashEmbedder::new(config.dimension)))
        }
        EmbeddingProvider::BgeM3 => load_model(config),
    }
}

#[cfg(feature = "model")]
fn load_model(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    let embedder = BgeM3Embedder::load(config.model_dir.as_deref())?;
    if embedder.dim() != config.dimension {
        return Err(Error::InvalidConfig(format!(
            "embedding.dimension is {} but the model produces {}",
            config.dimension,
            embedder.dim()
        )));
    }
    Ok(Box::new(embedder))
}

#[cfg(not(feature = "model"))]
fn load_model(_config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    Err(Error::InvalidConfig("provider 'bge-m3' needs claimdex-embed built with the `model` feature".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_drop_stop_words_and_punctuation() {
        let t: Vec<String> = terms("What was the Rental-car amount? $1,250.00").collect();
        assert_eq!(t, vec!["rental", "car", "amount", "1", "250", "00"]);
    }
}
