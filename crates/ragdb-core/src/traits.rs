use async_trait::async_trait;

use crate::error::Result;
use crate::filter::MetadataFilter;
use crate::types::{Chunk, ChunkId, HealthStatus, IndexSpec, KeywordHit, SearchMatch, VectorRecord};

#[async_trait]
pub trait EmbedProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g., `hash:d384`).
    fn embedder_id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// Maximum input length the provider accepts, in its own units.
    fn max_len(&self) -> usize;
    /// Compute embeddings for a batch of input texts, one per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Uniform capability set over vector backends.
///
/// Scores returned by `search` are "higher is better" and comparable within a
/// single call only. Backend tuning knobs never cross this interface.
#[async_trait]
pub trait VectorStoreAdapter: Send + Sync {
    /// Short backend identifier used in logs and errors.
    fn backend_name(&self) -> &str;

    /// Whether `search` applies the metadata filter itself.
    fn supports_filter_pushdown(&self) -> bool {
        false
    }

    /// Idempotent for an identical spec; a same-named index with a different
    /// dimensionality or metric is a configuration error.
    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexSpec>;

    /// Insert or replace records by chunk id. Returns the number written.
    async fn upsert(&self, index: &str, records: &[VectorRecord]) -> Result<usize>;

    /// Remove records by chunk id; unknown ids are ignored. Returns the number removed.
    async fn delete(&self, index: &str, chunk_ids: &[ChunkId]) -> Result<usize>;

    async fn search(
        &self,
        index: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchMatch>>;

    async fn health(&self) -> Result<HealthStatus>;
}

/// Lexical index mirrored alongside a vector index for hybrid retrieval.
pub trait KeywordIndex: Send + Sync {
    /// Insert or replace chunks by id.
    fn index(&self, chunks: &[Chunk]) -> Result<()>;
    fn delete(&self, chunk_ids: &[ChunkId]) -> Result<()>;
    fn search(&self, query: &str, k: usize) -> Result<Vec<KeywordHit>>;
}
