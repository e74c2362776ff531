//! Batching, caching and retrying front end over an [`EmbedProvider`].
//!
//! Cache entries are keyed by `blake3(embedder_id || 0x00 || text)`, so a
//! provider swap never serves stale vectors. Misses are deduplicated, split into
//! `batch_size` batches and sent with at most `max_concurrency` calls in flight.
//! A batch that exhausts its retries fails every chunk it carried; the rest
//! of the call is unaffected.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ragdb_core::cache::EmbeddingCache;
use ragdb_core::cancel::CancellationToken;
use ragdb_core::config::EmbeddingSettings;
use ragdb_core::error::{RagError, Result};
use ragdb_core::retry::with_retry;
use ragdb_core::traits::EmbedProvider;
use ragdb_core::types::{Chunk, IndexSpec};

/// Per-input result of [`EmbeddingService::embed_texts`].
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutcome {
    Embedded(Arc<Vec<f32>>),
    Failed(RagError),
}

impl EmbedOutcome {
    pub fn vector(&self) -> Option<&[f32]> {
        match self {
            Self::Embedded(v) => Some(v.as_slice()),
            Self::Failed(_) => None,
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::Embedded(_))
    }
}

pub struct EmbeddingService {
    provider: Arc<dyn EmbedProvider>,
    cache: Arc<EmbeddingCache>,
    settings: EmbeddingSettings,
}

impl EmbeddingService {
    pub fn new(
        provider: Arc<dyn EmbedProvider>,
        cache: Arc<EmbeddingCache>,
        settings: EmbeddingSettings,
    ) -> Result<Self> {
        settings.validate()?;
        if provider.dim() != settings.dimensionality {
            return Err(RagError::DimensionMismatch {
                index: format!("embedder '{}'", provider.embedder_id()),
                expected: settings.dimensionality,
                actual: provider.dim(),
            });
        }
        Ok(Self { provider, cache, settings })
    }

    pub fn embedder_id(&self) -> &str {
        self.provider.embedder_id()
    }

    pub fn dim(&self) -> usize {
        self.provider.dim()
    }

    pub fn cache_key(&self, text: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.provider.embedder_id().as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Embed chunk texts for `spec`; one outcome per chunk, in order.
    pub async fn embed_batch(
        &self,
        chunks: &[Chunk],
        spec: &IndexSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<EmbedOutcome>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        self.embed_texts(&texts, Some(spec), cancel).await
    }

    /// Embed `texts`, returning one outcome per input in input order.
    ///
    /// Errors (rather than per-chunk failures) are reserved for conditions
    /// that invalidate the whole call: a provider whose dimensionality does
    /// not match `target`, or cancellation.
    pub async fn embed_texts(
        &self,
        texts: &[String],
        target: Option<&IndexSpec>,
        cancel: &CancellationToken,
    ) -> Result<Vec<EmbedOutcome>> {
        if let Some(spec) = target {
            self.check_dim(spec, self.provider.dim())?;
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = texts.iter().map(|t| self.cache_key(t)).collect();
        let mut slots: Vec<Option<EmbedOutcome>> = vec![None; texts.len()];
        // key -> positions waiting on it; first position carries the text.
        let mut pending: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            if let Some(hit) = self.cache.get(key) {
                slots[i] = Some(EmbedOutcome::Embedded(hit));
                continue;
            }
            let waiting = pending.entry(key.as_str()).or_default();
            if waiting.is_empty() {
                order.push(key.as_str());
            }
            waiting.push(i);
        }

        let hits = texts.len() - pending.values().map(Vec::len).sum::<usize>();
        tracing::debug!(total = texts.len(), hits, unique_misses = order.len(), "embedding batch");

        if !order.is_empty() {
            let batches: Vec<Vec<&str>> = order.chunks(self.settings.batch_size).map(<[&str]>::to_vec).collect();
            let calls = stream::iter(batches.into_iter().map(|keys| {
                let inputs: Vec<String> = keys.iter().map(|k| texts[pending[k][0]].clone()).collect();
                async move {
                    let result = self.call_provider(&inputs).await;
                    (keys, result)
                }
            }))
            .buffer_unordered(self.settings.max_concurrency)
            .collect::<Vec<_>>();
            let results = cancel.run(async { Ok(calls.await) }).await?;

            for (batch_keys, result) in results {
                match result {
                    Ok(vectors) => {
                        for (key, vector) in batch_keys.iter().zip(vectors) {
                            if vector.len() != self.provider.dim() {
                                return Err(RagError::DimensionMismatch {
                                    index: format!("embedder '{}'", self.provider.embedder_id()),
                                    expected: self.provider.dim(),
                                    actual: vector.len(),
                                });
                            }
                            let vector = Arc::new(vector);
                            if let Err(e) = self.cache.put((*key).to_string(), Arc::clone(&vector)) {
                                tracing::warn!(error = %e, "embedding cache write failed");
                            }
                            for &i in &pending[key] {
                                slots[i] = Some(EmbedOutcome::Embedded(Arc::clone(&vector)));
                            }
                        }
                    }
                    Err(e) if matches!(e, RagError::Cancelled) || e.is_configuration() => return Err(e),
                    Err(e) => {
                        tracing::warn!(chunks = batch_keys.len(), error = %e, "embedding batch failed");
                        for key in &batch_keys {
                            for &i in &pending[key] {
                                slots[i] = Some(EmbedOutcome::Failed(e.clone()));
                            }
                        }
                    }
                }
            }
        }

        Ok(slots
            .into_iter()
            .map(|s| s.unwrap_or_else(|| EmbedOutcome::Failed(RagError::Provider("no embedding produced".into()))))
            .collect())
    }

    /// Embed a single query string. Any failure is returned as an error.
    pub async fn embed_query(&self, text: &str, cancel: &CancellationToken) -> Result<Arc<Vec<f32>>> {
        let mut out = self.embed_texts(&[text.to_string()], None, cancel).await?;
        match out.pop() {
            Some(EmbedOutcome::Embedded(v)) => Ok(v),
            Some(EmbedOutcome::Failed(e)) => Err(e),
            None => Err(RagError::Provider("no embedding produced".into())),
        }
    }

    pub fn check_dim(&self, spec: &IndexSpec, actual: usize) -> Result<()> {
        if spec.dimensionality != actual {
            return Err(RagError::DimensionMismatch {
                index: spec.name.clone(),
                expected: spec.dimensionality,
                actual,
            });
        }
        Ok(())
    }

    async fn call_provider(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let timeout = Duration::from_millis(self.settings.timeout_ms);
        let vectors =
            with_retry(&self.settings.retry, timeout, "embed_batch", || self.provider.embed_batch(inputs)).await?;
        if vectors.len() != inputs.len() {
            return Err(RagError::config(format!(
                "provider returned {} embeddings for {} inputs",
                vectors.len(),
                inputs.len()
            )));
        }
        Ok(vectors)
    }
}
