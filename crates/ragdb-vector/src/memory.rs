//! Exact-scan in-process vector store.
//!
//! The reference backend: brute-force similarity over every record, optional
//! metadata filter push-down, and an optional JSON snapshot written after
//! each mutation so a process restart keeps its data.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use ragdb_core::config::resolve_with_base;
use ragdb_core::distance::similarity;
use ragdb_core::error::{RagError, Result};
use ragdb_core::filter::MetadataFilter;
use ragdb_core::traits::VectorStoreAdapter;
use ragdb_core::types::{Chunk, ChunkId, HealthStatus, IndexSpec, SearchMatch, VectorRecord};

const BACKEND: &str = "memory";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemIndex {
    spec: IndexSpec,
    records: BTreeMap<ChunkId, (Chunk, Vec<f32>)>,
}

/// `connection` object accepted by the memory backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConnection {
    /// Snapshot file; relative paths resolve against the data directory.
    pub path: Option<String>,
    pub filter_pushdown: bool,
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self { path: None, filter_pushdown: true }
    }
}

pub struct MemoryStore {
    indexes: RwLock<HashMap<String, MemIndex>>,
    pushdown: bool,
    snapshot: Option<PathBuf>,
    // Serializes snapshot writers so files land in commit order.
    writer: tokio::sync::Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            pushdown: true,
            snapshot: None,
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Disable push-down so callers must post-filter.
    pub fn without_pushdown(mut self) -> Self {
        self.pushdown = false;
        self
    }

    /// Back the store with a snapshot file, loading it when present.
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let loaded: Vec<MemIndex> = serde_json::from_str(&raw)?;
            let mut indexes = self.indexes.write();
            for idx in loaded {
                indexes.insert(idx.spec.name.clone(), idx);
            }
            tracing::debug!(path = %path.display(), indexes = indexes.len(), "loaded memory snapshot");
        }
        self.snapshot = Some(path);
        Ok(self)
    }

    pub fn from_connection(connection: &serde_json::Value, data_dir: Option<&Path>) -> Result<Self> {
        let conn: MemoryConnection = if connection.is_null() {
            MemoryConnection::default()
        } else {
            serde_json::from_value(connection.clone())
                .map_err(|e| RagError::config(format!("memory backend connection: {e}")))?
        };
        let store = if conn.filter_pushdown { Self::new() } else { Self::new().without_pushdown() };
        match conn.path {
            Some(p) => {
                let path = match data_dir {
                    Some(base) => resolve_with_base(base, &p),
                    None => ragdb_core::config::expand_path(&p),
                };
                store.with_snapshot(path)
            }
            None => Ok(store),
        }
    }

    pub fn len(&self, index: &str) -> usize {
        self.indexes.read().get(index).map(|i| i.records.len()).unwrap_or(0)
    }

    /// Apply `change` to the named index. With a snapshot configured the
    /// change is made on a copy, written to disk off the runtime, and only
    /// then made visible, so a failed write leaves the store unchanged.
    async fn mutate<T>(&self, index: &str, change: impl FnOnce(&mut MemIndex) -> Result<T>) -> Result<T> {
        if self.snapshot.is_none() {
            let mut indexes = self.indexes.write();
            let idx = indexes.get_mut(index).ok_or_else(|| missing(index))?;
            return change(idx);
        }
        let _writer = self.writer.lock().await;
        let mut staged = self.indexes.read().get(index).cloned().ok_or_else(|| missing(index))?;
        let out = change(&mut staged)?;
        self.write_through(staged).await?;
        Ok(out)
    }

    /// Persist the store with `staged` in place of its namesake, then commit
    /// it. Callers hold the writer lock.
    async fn write_through(&self, staged: MemIndex) -> Result<()> {
        if let Some(path) = self.snapshot.clone() {
            let json = {
                let indexes = self.indexes.read();
                let mut ordered: Vec<&MemIndex> =
                    indexes.values().filter(|i| i.spec.name != staged.spec.name).collect();
                ordered.push(&staged);
                ordered.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
                serde_json::to_string(&ordered)?
            };
            tokio::task::spawn_blocking(move || write_snapshot(&path, &json))
                .await
                .map_err(|e| RagError::Io(e.to_string()))??;
        }
        self.indexes.write().insert(staged.spec.name.clone(), staged);
        Ok(())
    }
}

fn write_snapshot(path: &Path, json: &str) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(path).map_err(|e| RagError::Io(e.to_string()))?;
    Ok(())
}

fn missing(index: &str) -> RagError {
    RagError::NotFound(format!("index '{index}'"))
}

#[async_trait]
impl VectorStoreAdapter for MemoryStore {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    fn supports_filter_pushdown(&self) -> bool {
        self.pushdown
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexSpec> {
        let _writer = self.writer.lock().await;
        if let Some(existing) = self.indexes.read().get(&spec.name) {
            if existing.spec.is_compatible(spec) {
                return Ok(existing.spec.clone());
            }
            return Err(RagError::config(format!(
                "index '{}' exists with dimensionality {} / {}; requested {} / {}",
                spec.name, existing.spec.dimensionality, existing.spec.metric, spec.dimensionality, spec.metric
            )));
        }
        self.write_through(MemIndex { spec: spec.clone(), records: BTreeMap::new() }).await?;
        Ok(spec.clone())
    }

    async fn upsert(&self, index: &str, records: &[VectorRecord]) -> Result<usize> {
        self.mutate(index, |idx| {
            for r in records {
                if r.vector().len() != idx.spec.dimensionality {
                    return Err(RagError::DimensionMismatch {
                        index: index.to_string(),
                        expected: idx.spec.dimensionality,
                        actual: r.vector().len(),
                    });
                }
            }
            for r in records {
                idx.records.insert(r.chunk_id().to_string(), (r.chunk().clone(), r.vector().to_vec()));
            }
            Ok(records.len())
        })
        .await
    }

    async fn delete(&self, index: &str, chunk_ids: &[ChunkId]) -> Result<usize> {
        let held = {
            let indexes = self.indexes.read();
            let idx = indexes.get(index).ok_or_else(|| missing(index))?;
            chunk_ids.iter().any(|id| idx.records.contains_key(id.as_str()))
        };
        if !held {
            return Ok(0);
        }
        self.mutate(index, |idx| {
            Ok(chunk_ids.iter().filter(|id| idx.records.remove(id.as_str()).is_some()).count())
        })
        .await
    }

    async fn search(
        &self,
        index: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchMatch>> {
        let indexes = self.indexes.read();
        let idx = indexes.get(index).ok_or_else(|| missing(index))?;
        if query.len() != idx.spec.dimensionality {
            return Err(RagError::DimensionMismatch {
                index: index.to_string(),
                expected: idx.spec.dimensionality,
                actual: query.len(),
            });
        }
        let filter = if self.pushdown { filter.filter(|f| !f.is_empty()) } else { None };
        let mut matches: Vec<SearchMatch> = idx
            .records
            .values()
            .filter(|(chunk, _)| filter.map_or(true, |f| f.matches(&chunk.metadata)))
            .map(|(chunk, v)| SearchMatch { chunk: chunk.clone(), score: similarity(idx.spec.metric, query, v) })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn health(&self) -> Result<HealthStatus> {
        match &self.snapshot {
            Some(path) if path.parent().is_some_and(|p| !p.as_os_str().is_empty() && !p.exists()) => {
                Ok(HealthStatus::Degraded(format!("snapshot directory missing for {}", path.display())))
            }
            _ => Ok(HealthStatus::Healthy),
        }
    }
}
