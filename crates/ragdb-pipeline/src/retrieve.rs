//! Query-time retrieval over one or more registered indexes.
//!
//! Each target index is health-checked and searched concurrently under its own
//! timeout. An unavailable, failing or slow index contributes nothing and is
//! reported in [`RetrievalResult::failed_indexes`]; the remaining indexes
//! still answer.
//! Only complete results are cached.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use ragdb_core::cache::QueryCache;
use ragdb_core::cancel::CancellationToken;
use ragdb_core::config::RetrievalSettings;
use ragdb_core::error::{RagError, Result};
use ragdb_core::filter::MetadataFilter;
use ragdb_core::query::Query;
use ragdb_core::traits::KeywordIndex;
use ragdb_core::types::{HealthStatus, IndexFailure, KeywordHit, RetrievalResult, ScoredChunk, SearchMatch};
use ragdb_embed::EmbeddingService;
use ragdb_vector::{IndexRegistry, RegisteredIndex};

use crate::fusion;

pub struct RetrievalEngine {
    registry: Arc<IndexRegistry>,
    embedder: Arc<EmbeddingService>,
    cache: Arc<QueryCache>,
    settings: RetrievalSettings,
}

impl RetrievalEngine {
    pub fn new(
        registry: Arc<IndexRegistry>,
        embedder: Arc<EmbeddingService>,
        cache: Arc<QueryCache>,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self { registry, embedder, cache, settings })
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Cache key covering every query field that affects the result.
    pub fn cache_key(query: &Query) -> String {
        let filter = query.filter.as_ref().map(|f| serde_json::to_string(f).unwrap_or_default()).unwrap_or_default();
        let indexes = match &query.indexes {
            Some(names) => {
                let mut names = names.clone();
                names.sort();
                names.dedup();
                names.join(",")
            }
            None => "*".to_string(),
        };
        let weights = query.hybrid.map(|w| format!("{}:{}", w.vector, w.keyword)).unwrap_or_default();
        format!(
            "{}\u{1f}{filter}\u{1f}{indexes}\u{1f}{}\u{1f}{}\u{1f}{weights}",
            query.normalized_text(),
            query.top_k,
            query.score_threshold
        )
    }

    pub async fn retrieve(&self, query: &Query, cancel: &CancellationToken) -> Result<RetrievalResult> {
        query.validate()?;
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }

        let key = Self::cache_key(query);
        if let Some(mut cached) = self.cache.get(&key) {
            tracing::debug!(query = %query.text, "query cache hit");
            cached.from_cache = true;
            return Ok(cached);
        }

        let targets = self.resolve_targets(query)?;
        if targets.is_empty() {
            tracing::debug!("no target indexes; returning empty result");
            return Ok(RetrievalResult::empty());
        }

        let query_vec = self.embedder.embed_query(&query.text, cancel).await?;
        for target in &targets {
            self.embedder.check_dim(&target.spec, query_vec.len())?;
        }

        let timeout = Duration::from_millis(self.settings.index_timeout_ms);
        let searches = stream::iter(targets.iter().map(|target| {
            let query_vec = query_vec.as_slice();
            async move {
                let outcome = match tokio::time::timeout(timeout, self.search_index(target, query, query_vec)).await {
                    Ok(result) => result,
                    Err(_) => Err(RagError::Timeout(timeout)),
                };
                (target.spec.name.clone(), outcome)
            }
        }))
        .buffer_unordered(targets.len())
        .collect::<Vec<_>>();
        let outcomes = cancel.run(async { Ok(searches.await) }).await?;

        let mut candidates = Vec::new();
        let mut failed_indexes = Vec::new();
        for (index, outcome) in outcomes {
            match outcome {
                Ok(hits) => {
                    tracing::debug!(index = %index, candidates = hits.len(), "index searched");
                    candidates.extend(hits);
                }
                Err(e) => {
                    tracing::warn!(index = %index, error = %e, "index search failed; continuing without it");
                    failed_indexes.push(IndexFailure { index, error: (&e).into() });
                }
            }
        }
        failed_indexes.sort_by(|a, b| a.index.cmp(&b.index));

        let hits = fusion::merge(candidates, query.top_k, query.score_threshold);
        let partial = !failed_indexes.is_empty();
        let result = RetrievalResult { hits, failed_indexes, partial, from_cache: false };

        if !partial {
            if let Err(e) = self.cache.put(key, result.clone()) {
                tracing::warn!(error = %e, "query cache write failed");
            }
        }
        tracing::info!(
            indexes = targets.len(),
            hits = result.hits.len(),
            partial = result.partial,
            "retrieval complete"
        );
        Ok(result)
    }

    fn resolve_targets(&self, query: &Query) -> Result<Vec<RegisteredIndex>> {
        match &query.indexes {
            Some(names) => {
                let mut names = names.clone();
                names.sort();
                names.dedup();
                names.iter().map(|name| self.registry.get(name)).collect()
            }
            None => Ok(self.registry.all()),
        }
    }

    async fn search_index(
        &self,
        target: &RegisteredIndex,
        query: &Query,
        query_vec: &[f32],
    ) -> Result<Vec<ScoredChunk>> {
        check_health(target).await?;
        let wanted = self.candidate_count(query.top_k);
        let filter = query.filter.as_ref();
        let vector = self.vector_candidates(target, query_vec, wanted, filter).await?;

        let Some(weights) = query.hybrid else {
            return Ok(fusion::vector_only(&target.spec.name, vector));
        };
        let keyword = match &target.keyword {
            Some(keyword) => self.keyword_candidates(target, keyword, &query.text, wanted, filter).await?,
            None => {
                tracing::debug!(index = %target.spec.name, "no keyword index; hybrid uses vector scores only");
                Vec::new()
            }
        };
        Ok(fusion::fuse_hybrid(&target.spec.name, vector, keyword, weights, self.settings.normalization))
    }

    /// Candidates fetched per index: `top_k` times the multiplier, capped at
    /// `max_candidates`. A `top_k` above the cap gets at most `max_candidates`
    /// hits from each index.
    fn candidate_count(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.settings.candidate_multiplier).min(self.settings.max_candidates)
    }

    /// Top `wanted` filtered vector matches.
    ///
    /// Without backend push-down the candidate pool doubles (bounded by
    /// `max_candidates`) until enough matches survive the post-filter or the
    /// index runs out, so both paths return the same ids.
    async fn vector_candidates(
        &self,
        target: &RegisteredIndex,
        query_vec: &[f32],
        wanted: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchMatch>> {
        let name = target.spec.name.as_str();
        let Some(filter) = filter else {
            return target.store.search(name, query_vec, wanted, None).await;
        };
        if target.store.supports_filter_pushdown() {
            let mut matches = target.store.search(name, query_vec, wanted, Some(filter)).await?;
            matches.truncate(wanted);
            return Ok(matches);
        }

        let mut fetch = wanted;
        loop {
            let raw = target.store.search(name, query_vec, fetch, None).await?;
            let exhausted = raw.len() < fetch;
            let mut kept: Vec<SearchMatch> = raw.into_iter().filter(|m| filter.matches(&m.chunk.metadata)).collect();
            if kept.len() >= wanted || exhausted || fetch >= self.settings.max_candidates {
                kept.truncate(wanted);
                return Ok(kept);
            }
            tracing::debug!(index = name, fetch, kept = kept.len(), "widening post-filter candidate pool");
            fetch = fetch.saturating_mul(2).min(self.settings.max_candidates);
        }
    }

    /// Top `wanted` filtered keyword hits, widened like the vector side when a
    /// filter drops candidates.
    async fn keyword_candidates(
        &self,
        target: &RegisteredIndex,
        keyword: &Arc<dyn KeywordIndex>,
        text: &str,
        wanted: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<KeywordHit>> {
        let Some(filter) = filter else {
            return keyword_search(Arc::clone(keyword), text, wanted).await;
        };
        let mut fetch = wanted;
        loop {
            let raw = keyword_search(Arc::clone(keyword), text, fetch).await?;
            let exhausted = raw.len() < fetch;
            let mut kept: Vec<KeywordHit> = raw.into_iter().filter(|h| filter.matches(&h.chunk.metadata)).collect();
            if kept.len() >= wanted || exhausted || fetch >= self.settings.max_candidates {
                kept.truncate(wanted);
                return Ok(kept);
            }
            tracing::debug!(index = %target.spec.name, fetch, kept = kept.len(), "widening keyword candidate pool");
            fetch = fetch.saturating_mul(2).min(self.settings.max_candidates);
        }
    }
}

async fn keyword_search(keyword: Arc<dyn KeywordIndex>, text: &str, limit: usize) -> Result<Vec<KeywordHit>> {
    let text = text.to_string();
    tokio::task::spawn_blocking(move || keyword.search(&text, limit))
        .await
        .map_err(|e| RagError::backend("keyword", e))?
}

/// Fail the index up front when its backend reports itself unavailable.
async fn check_health(target: &RegisteredIndex) -> Result<()> {
    match target.store.health().await? {
        HealthStatus::Healthy => Ok(()),
        HealthStatus::Degraded(reason) => {
            tracing::debug!(index = %target.spec.name, reason = %reason, "searching degraded backend");
            Ok(())
        }
        HealthStatus::Unavailable(reason) => Err(RagError::Provider(format!(
            "backend '{}' for index '{}' is unavailable: {reason}",
            target.store.backend_name(),
            target.spec.name
        ))),
    }
}
