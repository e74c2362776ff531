#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ragdb_core::cancel::CancellationToken;
use ragdb_core::chunker::ChunkingConfig;
use ragdb_core::config::{BackendConfig, RagSettings, RetrySettings};
use ragdb_core::error::{RagError, Result};
use ragdb_core::filter::MetadataFilter;
use ragdb_core::traits::{KeywordIndex, VectorStoreAdapter};
use ragdb_core::types::{
    Chunk, ChunkId, HealthStatus, IndexSpec, KeywordHit, Metric, SearchMatch, VectorRecord,
};
use ragdb_embed::HashEmbedder;
use ragdb_pipeline::RagPipeline;
use ragdb_vector::MemoryStore;

pub const DIM: usize = 64;

pub fn settings() -> RagSettings {
    let mut settings = RagSettings::default();
    settings.chunking = ChunkingConfig::fixed(1000, 200);
    settings.embedding.dimensionality = DIM;
    settings.embedding.retry = RetrySettings { max_attempts: 2, initial_backoff_ms: 1, max_backoff_ms: 2 };
    settings.ingestion.retry = RetrySettings { max_attempts: 2, initial_backoff_ms: 1, max_backoff_ms: 2 };
    settings.ingestion.default_index = "docs".to_string();
    settings.retrieval.index_timeout_ms = 500;
    settings
}

pub fn memory_backend() -> BackendConfig {
    BackendConfig::memory(DIM, Metric::Cosine)
}

pub async fn pipeline_with(settings: RagSettings, indexes: &[&str]) -> RagPipeline {
    let provider = Arc::new(HashEmbedder::new(DIM).unwrap());
    let pipeline = RagPipeline::in_memory(settings, provider).await.unwrap();
    for name in indexes {
        pipeline.create_index(name, memory_backend()).await.unwrap();
    }
    pipeline
}

pub async fn pipeline(indexes: &[&str]) -> RagPipeline {
    pipeline_with(settings(), indexes).await
}

/// ASCII text of exactly `len` characters made of distinct words.
pub fn words(prefix: &str, len: usize) -> String {
    let mut out = String::new();
    let mut i = 0;
    while out.len() < len {
        out.push_str(&format!("{prefix}{i} "));
        i += 1;
    }
    out.truncate(len);
    out
}

pub fn chunk(id: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        doc_id: id.split(':').next().unwrap_or(id).to_string(),
        ordinal: 0,
        text: format!("scripted {id}"),
        start_char: 0,
        end_char: 0,
        start_byte: 0,
        end_byte: 0,
        metadata: Default::default(),
    }
}

/// Memory store with injectable faults.
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_search: bool,
    pub search_delay: Option<Duration>,
    pub fail_upsert_for: Option<String>,
    pub health: Mutex<HealthStatus>,
    pub health_delay: Option<Duration>,
    /// Cancelled right after the first successful upsert.
    pub cancel_after_upsert: Option<CancellationToken>,
    pub upserts: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_search: false,
            search_delay: None,
            fail_upsert_for: None,
            health: Mutex::new(HealthStatus::Healthy),
            health_delay: None,
            cancel_after_upsert: None,
            upserts: AtomicUsize::new(0),
        }
    }

    pub fn set_health(&self, health: HealthStatus) {
        *self.health.lock().unwrap() = health;
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStoreAdapter for FaultyStore {
    fn backend_name(&self) -> &str {
        "faulty"
    }

    fn supports_filter_pushdown(&self) -> bool {
        self.inner.supports_filter_pushdown()
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexSpec> {
        self.inner.create_index(spec).await
    }

    async fn upsert(&self, index: &str, records: &[VectorRecord]) -> Result<usize> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if let Some(bad) = &self.fail_upsert_for {
            if records.iter().any(|r| r.chunk_id() == bad) {
                return Err(RagError::backend("faulty", format!("rejected batch containing {bad}")));
            }
        }
        let written = self.inner.upsert(index, records).await?;
        if let Some(token) = &self.cancel_after_upsert {
            token.cancel();
        }
        Ok(written)
    }

    async fn delete(&self, index: &str, chunk_ids: &[ChunkId]) -> Result<usize> {
        self.inner.delete(index, chunk_ids).await
    }

    async fn search(
        &self,
        index: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchMatch>> {
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_search {
            return Err(RagError::backend("faulty", "search exploded"));
        }
        self.inner.search(index, query, top_k, filter).await
    }

    async fn health(&self) -> Result<HealthStatus> {
        if let Some(delay) = self.health_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.health.lock().unwrap().clone())
    }
}

/// Adapter answering every search with a fixed ranking.
pub struct ScriptedStore {
    pub matches: Vec<SearchMatch>,
}

#[async_trait]
impl VectorStoreAdapter for ScriptedStore {
    fn backend_name(&self) -> &str {
        "scripted"
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexSpec> {
        Ok(spec.clone())
    }

    async fn upsert(&self, _index: &str, records: &[VectorRecord]) -> Result<usize> {
        Ok(records.len())
    }

    async fn delete(&self, _index: &str, _chunk_ids: &[ChunkId]) -> Result<usize> {
        Ok(0)
    }

    async fn search(
        &self,
        _index: &str,
        _query: &[f32],
        top_k: usize,
        _filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchMatch>> {
        Ok(self.matches.iter().take(top_k).cloned().collect())
    }

    async fn health(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }
}

pub struct ScriptedKeyword {
    pub hits: Vec<KeywordHit>,
}

impl KeywordIndex for ScriptedKeyword {
    fn index(&self, _chunks: &[Chunk]) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _chunk_ids: &[ChunkId]) -> Result<()> {
        Ok(())
    }

    fn search(&self, _query: &str, k: usize) -> Result<Vec<KeywordHit>> {
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

pub fn spec(name: &str) -> IndexSpec {
    IndexSpec::new(name, DIM, Metric::Cosine).unwrap()
}
