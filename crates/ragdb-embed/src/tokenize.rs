use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// XLM-R `<pad>` token id.
const PAD_ID: u32 = 1;

/// Tokenize `texts` into `[B, max_len]` id and attention-mask tensors,
/// truncating long inputs and right-padding short ones.
pub fn tokenize_batch(
    tokenizer: &Tokenizer,
    texts: &[String],
    max_len: usize,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let mut ids = Vec::with_capacity(texts.len() * max_len);
    let mut mask = Vec::with_capacity(texts.len() * max_len);
    for text in texts {
        let enc = tokenizer.encode(text.as_str(), true).map_err(|e| anyhow!("tokenization failed: {e}"))?;
        let take = enc.get_ids().len().min(max_len);
        ids.extend_from_slice(&enc.get_ids()[..take]);
        mask.extend_from_slice(&enc.get_attention_mask()[..take]);
        ids.extend(std::iter::repeat(PAD_ID).take(max_len - take));
        mask.extend(std::iter::repeat(0u32).take(max_len - take));
    }
    let input_ids = Tensor::from_vec(ids, (texts.len(), max_len), device)?;
    let attention_mask = Tensor::from_vec(mask, (texts.len(), max_len), device)?;
    Ok((input_ids, attention_mask))
}
