use async_trait::async_trait;
use std::hash::Hasher;
use twox_hash::XxHash64;

use ragdb_core::distance::normalize;
use ragdb_core::error::{RagError, Result};
use ragdb_core::traits::EmbedProvider;

/// Deterministic bag-of-words hashing embedder.
///
/// Each lowercase alphanumeric token lands in one of `dim` buckets; the result
/// is L2-normalized. Texts sharing vocabulary score high under cosine, which
/// is enough for offline runs and tests without model weights.
pub struct HashEmbedder {
    dim: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(RagError::config("hash embedder dimensionality must be > 0"));
        }
        Ok(Self { dim, id: format!("hash:d{dim}") })
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.to_lowercase().as_bytes());
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            v[idx] += 0.5 + ((h >> 32) as u32 as f32) / (u32::MAX as f32);
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbedProvider for HashEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
