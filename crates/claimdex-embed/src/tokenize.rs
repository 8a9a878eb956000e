use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use claimdex_core::{Error, Result};

use crate::model::candle_err;

const PAD_ID: u32 = 1;

/// Encode a batch padded to its longest member, capped at `max_len` tokens.
/// Returns `(input_ids, attention_mask)`, both `[B,T]`.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| Error::Embedding(format!("tokenization failed: {}", e)))?;
    let width = encodings.iter().map(|e| e.get_ids().len().min(max_len)).max().unwrap_or(1).max(1);

    let mut ids = Vec::with_capacity(encodings.len() * width);
    let mut mask = Vec::with_capacity(encodings.len() * width);
    for enc in &encodings {
        let n = enc.get_ids().len().min(width);
        ids.extend_from_slice(&enc.get_ids()[..n]);
        mask.extend_from_slice(&enc.get_attention_mask()[..n]);
        ids.extend(std::iter::repeat(PAD_ID).take(width - n));
        mask.extend(std::iter::repeat(0u32).take(width - n));
    }
    let rows = encodings.len();
    let input_ids = Tensor::from_iter(ids, device).and_then(|t| t.reshape((rows, width))).map_err(candle_err)?;
    let attention_mask = Tensor::from_iter(mask, device).and_then(|t| t.reshape((rows, width))).map_err(candle_err)?;
    Ok((input_ids, attention_mask))
}
