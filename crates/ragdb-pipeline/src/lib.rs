//! Ingestion and retrieval over registered indexes, plus the [`RagPipeline`]
//! facade that wires configuration, providers, backends and caches together.

pub mod fusion;
pub mod ingest;
pub mod retrieve;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ragdb_core::cache::CacheLayer;
use ragdb_core::cancel::CancellationToken;
use ragdb_core::chunker::Chunker;
use ragdb_core::config::{BackendConfig, RagSettings};
use ragdb_core::error::{RagError, Result};
use ragdb_core::query::Query;
use ragdb_core::traits::{EmbedProvider, KeywordIndex, VectorStoreAdapter};
use ragdb_core::types::{Document, HealthStatus, IndexSpec, IngestReport, RetrievalResult};
use ragdb_embed::EmbeddingService;
use ragdb_text::TantivyKeywordIndex;
use ragdb_vector::{open_backend, DocumentLineage, IndexRegistry};

pub use ingest::IngestionOrchestrator;
pub use retrieve::RetrievalEngine;

const KEYWORD_DIR: &str = "keyword";

pub struct RagPipeline {
    settings: RagSettings,
    data_dir: Option<PathBuf>,
    registry: Arc<IndexRegistry>,
    embedder: Arc<EmbeddingService>,
    caches: CacheLayer,
    ingestor: IngestionOrchestrator,
    retriever: RetrievalEngine,
}

impl RagPipeline {
    /// Open a persistent pipeline under `storage.data_dir`: load the catalog,
    /// reattach every cataloged index and create any configured index that
    /// does not exist yet.
    pub async fn open(settings: RagSettings) -> Result<Self> {
        settings.validate()?;
        let provider = ragdb_embed::open_provider(&settings.embedding)?;
        let data_dir = settings.storage.data_path();
        std::fs::create_dir_all(&data_dir)?;
        let registry = IndexRegistry::open(&data_dir)?;
        let pipeline = Self::assemble(settings, provider, registry, Some(data_dir))?;

        for entry in pipeline.registry.catalog_entries() {
            pipeline.create_index(&entry.spec.name, entry.backend).await?;
        }
        pipeline.create_configured_indexes().await?;
        tracing::info!(indexes = pipeline.registry.names().len(), "pipeline opened");
        Ok(pipeline)
    }

    /// Pipeline with nothing on disk: in-memory catalog and keyword indexes.
    /// Configured indexes are created on their declared backends.
    pub async fn in_memory(settings: RagSettings, provider: Arc<dyn EmbedProvider>) -> Result<Self> {
        settings.validate()?;
        let pipeline = Self::assemble(settings, provider, IndexRegistry::in_memory(), None)?;
        pipeline.create_configured_indexes().await?;
        Ok(pipeline)
    }

    fn assemble(
        settings: RagSettings,
        provider: Arc<dyn EmbedProvider>,
        registry: IndexRegistry,
        data_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let caches = CacheLayer::new(&settings.cache)?;
        let registry = Arc::new(registry);
        let embedder =
            Arc::new(EmbeddingService::new(provider, Arc::clone(&caches.embeddings), settings.embedding.clone())?);
        let ingestor = IngestionOrchestrator::new(
            Arc::clone(&registry),
            Chunker::new(settings.chunking.clone())?,
            Arc::clone(&embedder),
            Arc::clone(&caches.queries),
            settings.ingestion.clone(),
        )?;
        let retriever = RetrievalEngine::new(
            Arc::clone(&registry),
            Arc::clone(&embedder),
            Arc::clone(&caches.queries),
            settings.retrieval.clone(),
        )?;
        tracing::debug!(embedder = embedder.embedder_id(), dim = embedder.dim(), "pipeline assembled");
        Ok(Self { settings, data_dir, registry, embedder, caches, ingestor, retriever })
    }

    async fn create_configured_indexes(&self) -> Result<()> {
        for index in self.settings.indexes.clone() {
            self.create_index(&index.name, index.backend).await?;
        }
        Ok(())
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    pub fn embedder(&self) -> &Arc<EmbeddingService> {
        &self.embedder
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Open the backend named by `backend`, attach a keyword index and
    /// register the index. Idempotent for an identical spec.
    pub async fn create_index(&self, name: &str, backend: BackendConfig) -> Result<IndexSpec> {
        let spec = backend.spec(name)?;
        if let Ok(live) = self.registry.get(name) {
            if live.spec.is_compatible(&spec) && live.backend.backend == backend.backend {
                return Ok(live.spec);
            }
            return Err(RagError::config(format!("index '{name}' already exists with a different backend or spec")));
        }
        self.embedder.check_dim(&spec, self.embedder.dim())?;
        let store = open_backend(&backend, self.data_dir.as_deref()).await?;
        let keyword: Arc<dyn KeywordIndex> = match &self.data_dir {
            Some(dir) => Arc::new(TantivyKeywordIndex::open(&dir.join(KEYWORD_DIR).join(name))?),
            None => Arc::new(TantivyKeywordIndex::in_memory()?),
        };
        self.register_index(spec, backend, store, Some(keyword)).await
    }

    /// Register an index over an already constructed adapter.
    pub async fn register_index(
        &self,
        spec: IndexSpec,
        backend: BackendConfig,
        store: Arc<dyn VectorStoreAdapter>,
        keyword: Option<Arc<dyn KeywordIndex>>,
    ) -> Result<IndexSpec> {
        self.embedder.check_dim(&spec, self.embedder.dim())?;
        let spec = self.registry.register(spec, backend, store, keyword).await?;
        self.caches.queries.invalidate_all();
        Ok(spec)
    }

    pub fn list_indexes(&self) -> Vec<IndexSpec> {
        self.registry.all().into_iter().map(|i| i.spec).collect()
    }

    /// A query pre-filled with the configured `top_k`, threshold and weights.
    pub fn new_query(&self, text: impl Into<String>) -> Query {
        let retrieval = &self.settings.retrieval;
        let mut query = Query::new(text).with_top_k(retrieval.top_k).with_threshold(retrieval.score_threshold);
        query.hybrid = retrieval.hybrid;
        query
    }

    pub async fn ingest(&self, doc: Document, index: Option<&str>, cancel: &CancellationToken) -> Result<IngestReport> {
        self.ingestor.ingest(doc, index, cancel).await
    }

    pub async fn ingest_many(&self, docs: Vec<Document>, cancel: &CancellationToken) -> Vec<Result<IngestReport>> {
        self.ingestor.ingest_many(docs, cancel).await
    }

    pub async fn query(&self, query: &Query, cancel: &CancellationToken) -> Result<RetrievalResult> {
        self.retriever.retrieve(query, cancel).await
    }

    pub async fn delete_document(&self, doc_id: &str) -> Result<usize> {
        self.ingestor.delete_document(doc_id).await
    }

    pub fn document_status(&self, doc_id: &str) -> Result<DocumentLineage> {
        self.ingestor.document_status(doc_id)
    }

    pub fn documents(&self) -> Vec<DocumentLineage> {
        self.registry.documents()
    }

    /// Health of every live index's backend. Checks that error or
    /// outlast the backend timeout report as unavailable.
    pub async fn health(&self) -> BTreeMap<String, HealthStatus> {
        let timeout = Duration::from_millis(self.settings.ingestion.backend_timeout_ms);
        let mut out = BTreeMap::new();
        for index in self.registry.all() {
            let status = match tokio::time::timeout(timeout, index.store.health()).await {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => HealthStatus::Unavailable(e.to_string()),
                Err(_) => HealthStatus::Unavailable(RagError::Timeout(timeout).to_string()),
            };
            out.insert(index.spec.name, status);
        }
        out
    }
}
