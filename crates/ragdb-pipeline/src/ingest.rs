//! Document ingestion: chunk, embed, store, mirror, supersede, record.
//!
//! A run never fails as a whole because some chunks could not be embedded or
//! stored; those chunks are reported per chunk in the [`IngestReport`]. Whole
//! runs fail on configuration errors, an unavailable backend, or cancellation.
//! Cancellation leaves batches that were already upserted in place and records
//! them in the document's lineage.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use ragdb_core::cache::QueryCache;
use ragdb_core::cancel::CancellationToken;
use ragdb_core::chunker::Chunker;
use ragdb_core::config::IngestionSettings;
use ragdb_core::error::{RagError, Result};
use ragdb_core::retry::with_retry;
use ragdb_core::types::{
    Chunk, ChunkId, ChunkStatus, Document, DocumentStatus, HealthStatus, IngestReport, VectorRecord,
};
use ragdb_embed::{EmbedOutcome, EmbeddingService};
use ragdb_vector::{DocumentLineage, IndexRegistry, RegisteredIndex};

pub struct IngestionOrchestrator {
    registry: Arc<IndexRegistry>,
    chunker: Chunker,
    embedder: Arc<EmbeddingService>,
    query_cache: Arc<QueryCache>,
    settings: IngestionSettings,
}

impl IngestionOrchestrator {
    pub fn new(
        registry: Arc<IndexRegistry>,
        chunker: Chunker,
        embedder: Arc<EmbeddingService>,
        query_cache: Arc<QueryCache>,
        settings: IngestionSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self { registry, chunker, embedder, query_cache, settings })
    }

    fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.backend_timeout_ms)
    }

    /// Index a document is routed to when the caller names none.
    pub fn route(&self, doc: &Document) -> String {
        self.settings.route(&doc.content_type).to_string()
    }

    pub async fn ingest(&self, doc: Document, index: Option<&str>, cancel: &CancellationToken) -> Result<IngestReport> {
        if doc.id.trim().is_empty() {
            return Err(RagError::config("document id must not be empty"));
        }
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        let index_name = index.map(str::to_string).unwrap_or_else(|| self.route(&doc));
        let target = self.registry.get(&index_name)?;
        self.check_health(&target).await?;

        let chunks = self.chunker.chunk(&doc);
        tracing::debug!(doc = %doc.id, index = %index_name, chunks = chunks.len(), "chunked document");

        let outcomes = self.embedder.embed_batch(&chunks, &target.spec, cancel).await?;
        let mut statuses: Vec<ChunkStatus> = Vec::with_capacity(chunks.len());
        let mut records: Vec<VectorRecord> = Vec::new();
        for (chunk, outcome) in chunks.iter().zip(outcomes) {
            let mut status = ChunkStatus { chunk_id: chunk.id.clone(), embedded: false, stored: false, error: None };
            match outcome {
                EmbedOutcome::Embedded(vector) => {
                    match VectorRecord::new(&target.spec, chunk.clone(), vector.to_vec()) {
                        Ok(record) => {
                            status.embedded = true;
                            records.push(record);
                        }
                        Err(e) => status.error = Some(e.to_string()),
                    }
                }
                EmbedOutcome::Failed(e) => status.error = Some(e.to_string()),
            }
            statuses.push(status);
        }

        let (stored_ids, cancelled) = self.upsert_batches(&target, &records, &mut statuses, cancel).await;

        if let Some(keyword) = &target.keyword {
            let stored: Vec<Chunk> = chunks.iter().filter(|c| stored_ids.contains(&c.id)).cloned().collect();
            if !stored.is_empty() {
                if let Err(e) = keyword.index(&stored) {
                    tracing::warn!(doc = %doc.id, index = %index_name, error = %e, "keyword mirror failed");
                }
            }
        }

        if cancelled {
            self.record_interrupted(&doc, &index_name, stored_ids)?;
            return Err(RagError::Cancelled);
        }

        let previous = self.registry.lineage(&doc.id);
        let produced: BTreeSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<ChunkId> = previous
            .as_ref()
            .and_then(|l| l.chunks_by_index.get(&index_name))
            .map(|ids| ids.iter().filter(|id| !produced.contains(id.as_str())).cloned().collect())
            .unwrap_or_default();
        let (superseded, lingering) = self.remove_stale(&target, &stale).await;

        // Chunks still held by the index: stored now, left over from the last
        // version after a failed upsert, or stale ones that could not be removed.
        let previous_ids: BTreeSet<&str> = previous
            .as_ref()
            .and_then(|l| l.chunks_by_index.get(&index_name))
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let mut held: BTreeSet<ChunkId> = stored_ids;
        held.extend(
            statuses
                .iter()
                .filter(|s| !s.stored && previous_ids.contains(s.chunk_id.as_str()))
                .map(|s| s.chunk_id.clone()),
        );
        held.extend(lingering);

        let report = IngestReport {
            doc_id: doc.id.clone(),
            index: index_name.clone(),
            version: previous.as_ref().map_or(1, |l| l.version + 1),
            chunks: statuses,
            superseded,
        };

        let mut lineage = previous.unwrap_or_else(|| DocumentLineage::new(doc.id.clone()));
        lineage.version = report.version;
        lineage.content_hash = blake3::hash(doc.text.as_bytes()).to_hex().to_string();
        if held.is_empty() {
            lineage.chunks_by_index.remove(&index_name);
            lineage.versions_by_index.remove(&index_name);
        } else {
            lineage.chunks_by_index.insert(index_name.clone(), held.into_iter().collect());
            lineage.versions_by_index.insert(index_name.clone(), report.version);
        }
        lineage.status = report.status();
        lineage.updated_at = Utc::now();
        self.registry.record_lineage(lineage)?;
        self.query_cache.invalidate_all();

        tracing::info!(
            doc = %report.doc_id,
            index = %report.index,
            version = report.version,
            stored = report.stored_count(),
            failed = report.failed_count(),
            superseded = report.superseded,
            "document ingested"
        );
        Ok(report)
    }

    /// Ingest documents concurrently, each routed by content type. Results
    /// come back in input order.
    pub async fn ingest_many(&self, docs: Vec<Document>, cancel: &CancellationToken) -> Vec<Result<IngestReport>> {
        stream::iter(docs.into_iter().map(|doc| self.ingest(doc, None, cancel)))
            .buffered(self.settings.max_concurrent_documents)
            .collect()
            .await
    }

    /// Remove every chunk of `doc_id` from every index that holds it and drop
    /// its lineage. Returns the number of vector records removed.
    pub async fn delete_document(&self, doc_id: &str) -> Result<usize> {
        let lineage = self.registry.lineage(doc_id).ok_or_else(|| RagError::NotFound(format!("document '{doc_id}'")))?;
        let mut removed = 0;
        for (index, ids) in &lineage.chunks_by_index {
            let target = match self.registry.get(index) {
                Ok(target) => target,
                Err(_) => {
                    tracing::warn!(doc = doc_id, index = %index, "index no longer registered; skipping");
                    continue;
                }
            };
            removed += self.delete_chunks(&target, ids).await?;
            if let Some(keyword) = &target.keyword {
                keyword.delete(ids)?;
            }
        }
        self.registry.remove_lineage(doc_id)?;
        self.query_cache.invalidate_all();
        tracing::info!(doc = doc_id, removed, "document deleted");
        Ok(removed)
    }

    pub fn document_status(&self, doc_id: &str) -> Result<DocumentLineage> {
        self.registry.lineage(doc_id).ok_or_else(|| RagError::NotFound(format!("document '{doc_id}'")))
    }

    /// Lineage for a run cancelled mid-upsert: batches already written stay
    /// owned by the document so a later delete can find them. Nothing is
    /// superseded.
    fn record_interrupted(&self, doc: &Document, index: &str, stored: BTreeSet<ChunkId>) -> Result<()> {
        if stored.is_empty() {
            return Ok(());
        }
        let mut lineage = self.registry.lineage(&doc.id).unwrap_or_else(|| DocumentLineage::new(doc.id.clone()));
        let mut held: BTreeSet<ChunkId> =
            lineage.chunks_by_index.remove(index).unwrap_or_default().into_iter().collect();
        held.extend(stored);
        lineage.version += 1;
        lineage.content_hash = blake3::hash(doc.text.as_bytes()).to_hex().to_string();
        lineage.chunks_by_index.insert(index.to_string(), held.into_iter().collect());
        lineage.versions_by_index.insert(index.to_string(), lineage.version);
        lineage.status = DocumentStatus::Partial;
        lineage.updated_at = Utc::now();
        let version = lineage.version;
        self.registry.record_lineage(lineage)?;
        self.query_cache.invalidate_all();
        tracing::warn!(doc = %doc.id, index, version, "ingest cancelled; keeping chunks already stored");
        Ok(())
    }

    async fn check_health(&self, target: &RegisteredIndex) -> Result<()> {
        let health = match tokio::time::timeout(self.backend_timeout(), target.store.health()).await {
            Ok(result) => result?,
            Err(_) => return Err(RagError::Timeout(self.backend_timeout())),
        };
        match health {
            HealthStatus::Healthy => Ok(()),
            HealthStatus::Degraded(reason) => {
                tracing::warn!(index = %target.spec.name, reason = %reason, "backend degraded; ingesting anyway");
                Ok(())
            }
            HealthStatus::Unavailable(reason) => Err(RagError::Provider(format!(
                "backend '{}' for index '{}' is unavailable: {reason}",
                target.store.backend_name(),
                target.spec.name
            ))),
        }
    }

    /// Upsert in `upsert_batch_size` batches; a failed batch marks its chunks
    /// unstored and the run moves on. Returns the ids that were stored and
    /// whether the run stopped on cancellation.
    async fn upsert_batches(
        &self,
        target: &RegisteredIndex,
        records: &[VectorRecord],
        statuses: &mut [ChunkStatus],
        cancel: &CancellationToken,
    ) -> (BTreeSet<ChunkId>, bool) {
        let position: HashMap<String, usize> =
            statuses.iter().enumerate().map(|(i, s)| (s.chunk_id.clone(), i)).collect();
        let mut stored = BTreeSet::new();
        let name = target.spec.name.as_str();

        for batch in records.chunks(self.settings.upsert_batch_size) {
            let upsert =
                with_retry(&self.settings.retry, self.backend_timeout(), "upsert", || target.store.upsert(name, batch));
            match cancel.run(upsert).await {
                Ok(written) => {
                    tracing::debug!(index = name, written, "upserted batch");
                    for record in batch {
                        if let Some(&i) = position.get(record.chunk_id()) {
                            statuses[i].stored = true;
                        }
                        stored.insert(record.chunk_id().to_string());
                    }
                }
                Err(RagError::Cancelled) => return (stored, true),
                Err(e) => {
                    tracing::warn!(index = name, chunks = batch.len(), error = %e, "upsert batch failed");
                    for record in batch {
                        if let Some(&i) = position.get(record.chunk_id()) {
                            statuses[i].error = Some(e.to_string());
                        }
                    }
                }
            }
        }
        (stored, false)
    }

    /// Delete superseded chunk ids. Returns `(removed, still_held)`; ids whose
    /// delete failed stay in the lineage so a later delete can retry them.
    async fn remove_stale(&self, target: &RegisteredIndex, stale: &[ChunkId]) -> (usize, Vec<ChunkId>) {
        if stale.is_empty() {
            return (0, Vec::new());
        }
        match self.delete_chunks(target, stale).await {
            Ok(removed) => {
                if let Some(keyword) = &target.keyword {
                    if let Err(e) = keyword.delete(stale) {
                        tracing::warn!(
                            index = %target.spec.name,
                            error = %e,
                            "keyword delete of superseded chunks failed"
                        );
                    }
                }
                (removed, Vec::new())
            }
            Err(e) => {
                tracing::warn!(
                    index = %target.spec.name,
                    chunks = stale.len(),
                    error = %e,
                    "could not remove superseded chunks"
                );
                (0, stale.to_vec())
            }
        }
    }

    async fn delete_chunks(&self, target: &RegisteredIndex, ids: &[ChunkId]) -> Result<usize> {
        let name = target.spec.name.as_str();
        with_retry(&self.settings.retry, self.backend_timeout(), "delete", || target.store.delete(name, ids)).await
    }
}
