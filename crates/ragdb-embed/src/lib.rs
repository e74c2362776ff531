//! Embedding providers and the caching/batching embedding service.

pub mod device;
pub mod hash;
pub mod model;
pub mod pool;
pub mod service;
pub mod tokenize;

use std::sync::Arc;

use ragdb_core::config::EmbeddingSettings;
use ragdb_core::error::{RagError, Result};
use ragdb_core::traits::EmbedProvider;

pub use hash::HashEmbedder;
pub use model::CandleEmbedder;
pub use pool::masked_mean_l2;
pub use service::{EmbedOutcome, EmbeddingService};

/// Build the provider named by `embedding.provider`.
///
/// `RAGDB_USE_FAKE_EMBEDDINGS=1` forces the hash embedder regardless of
/// configuration, which keeps CI runs free of model weights.
pub fn open_provider(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbedProvider>> {
    let force_fake = std::env::var("RAGDB_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let provider = if force_fake { "hash" } else { settings.provider.as_str() };
    match provider {
        "hash" | "fake" => {
            tracing::info!(dim = settings.dimensionality, "using hash embedder");
            Ok(Arc::new(HashEmbedder::new(settings.dimensionality)?))
        }
        "candle" | "local" => Ok(Arc::new(CandleEmbedder::load(settings.model_dir.as_deref(), settings.max_len)?)),
        other => Err(RagError::config(format!("unknown embedding provider '{other}'"))),
    }
}
