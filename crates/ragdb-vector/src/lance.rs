//! LanceDB-backed vector store.
//!
//! One table per index, written with `merge_insert` keyed on chunk id. Index
//! specs live in a small metadata table so a reopened database can verify
//! dimensionality and metric without inspecting the data. Metadata filters
//! are not pushed down; the retrieval engine post-filters.

use arrow_array::{Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ragdb_core::config::resolve_with_base;
use ragdb_core::error::{RagError, Result};
use ragdb_core::filter::MetadataFilter;
use ragdb_core::traits::VectorStoreAdapter;
use ragdb_core::types::{Chunk, ChunkId, HealthStatus, IndexSpec, Metric, SearchMatch, VectorRecord};

use crate::schema::build_chunk_schema;
use crate::table::{ensure_table, get_meta, lance_err, open_db, set_meta, sql_quote, table_exists};

#[derive(Debug, Clone, Deserialize)]
pub struct LanceConnection {
    /// Database URI or directory; relative paths resolve against the data directory.
    #[serde(default = "default_uri")]
    pub uri: String,
}

fn default_uri() -> String {
    "lancedb".to_string()
}

/// Backend-specific search knobs, taken from the index `tuning` object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LanceTuning {
    pub nprobes: Option<usize>,
    pub refine_factor: Option<u32>,
}

pub struct LanceStore {
    conn: Connection,
    uri: String,
    tuning: LanceTuning,
    specs: RwLock<HashMap<String, IndexSpec>>,
}

fn spec_key(name: &str) -> String {
    format!("index:{name}")
}

fn distance_type(metric: Metric) -> DistanceType {
    match metric {
        Metric::Cosine => DistanceType::Cosine,
        Metric::Dot => DistanceType::Dot,
        Metric::Euclidean => DistanceType::L2,
    }
}

/// Lance distances to "higher is better" scores. L2 distances are squared.
fn score(metric: Metric, distance: f32) -> f32 {
    match metric {
        Metric::Cosine | Metric::Dot => 1.0 - distance,
        Metric::Euclidean => 1.0 / (1.0 + distance.max(0.0).sqrt()),
    }
}

impl LanceStore {
    pub async fn connect(uri: &str, tuning: LanceTuning) -> Result<Self> {
        let conn = open_db(uri).await?;
        tracing::info!(uri, "opened lancedb");
        Ok(Self { conn, uri: uri.to_string(), tuning, specs: RwLock::new(HashMap::new()) })
    }

    pub async fn from_config(
        connection: &serde_json::Value,
        tuning: &serde_json::Value,
        data_dir: Option<&Path>,
    ) -> Result<Self> {
        let conn: LanceConnection = if connection.is_null() {
            LanceConnection { uri: default_uri() }
        } else {
            serde_json::from_value(connection.clone())
                .map_err(|e| RagError::config(format!("lancedb backend connection: {e}")))?
        };
        let tuning: LanceTuning = if tuning.is_null() {
            LanceTuning::default()
        } else {
            serde_json::from_value(tuning.clone()).map_err(|e| RagError::config(format!("lancedb tuning: {e}")))?
        };
        let uri = match data_dir {
            Some(base) if !conn.uri.contains("://") => resolve_with_base(base, &conn.uri).to_string_lossy().to_string(),
            _ => conn.uri,
        };
        Self::connect(&uri, tuning).await
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    async fn spec(&self, index: &str) -> Result<IndexSpec> {
        let cached = self.specs.read().get(index).cloned();
        if let Some(spec) = cached {
            return Ok(spec);
        }
        let raw = get_meta(&self.conn, &spec_key(index))
            .await?
            .ok_or_else(|| RagError::NotFound(format!("index '{index}'")))?;
        let spec: IndexSpec = serde_json::from_str(&raw)?;
        self.specs.write().insert(index.to_string(), spec.clone());
        Ok(spec)
    }

    fn to_record_batch(spec: &IndexSpec, records: &[VectorRecord]) -> Result<RecordBatch> {
        let dim = i32::try_from(spec.dimensionality).map_err(|_| RagError::config("dimensionality exceeds i32"))?;
        let mut ids = Vec::with_capacity(records.len());
        let mut doc_ids = Vec::with_capacity(records.len());
        let mut ordinals = Vec::with_capacity(records.len());
        let mut payloads = Vec::with_capacity(records.len());
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(records.len());
        for r in records {
            let chunk = r.chunk();
            ids.push(chunk.id.clone());
            doc_ids.push(chunk.doc_id.clone());
            ordinals.push(i32::try_from(chunk.ordinal).unwrap_or(i32::MAX));
            payloads.push(serde_json::to_string(chunk)?);
            vectors.push(Some(r.vector().iter().map(|&x| Some(x)).collect()));
        }
        RecordBatch::try_new(
            build_chunk_schema(dim),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(doc_ids)),
                Arc::new(Int32Array::from(ordinals)),
                Arc::new(StringArray::from(payloads)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                    vectors, dim,
                )),
            ],
        )
        .map_err(lance_err)
    }
}

#[async_trait]
impl VectorStoreAdapter for LanceStore {
    fn backend_name(&self) -> &str {
        "lancedb"
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexSpec> {
        match self.spec(&spec.name).await {
            Ok(existing) if existing.is_compatible(spec) => return Ok(existing),
            Ok(existing) => {
                return Err(RagError::config(format!(
                    "index '{}' exists with dimensionality {} / {}; requested {} / {}",
                    spec.name, existing.dimensionality, existing.metric, spec.dimensionality, spec.metric
                )))
            }
            Err(RagError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let dim = i32::try_from(spec.dimensionality).map_err(|_| RagError::config("dimensionality exceeds i32"))?;
        ensure_table(&self.conn, &spec.name, build_chunk_schema(dim)).await?;
        set_meta(&self.conn, &spec_key(&spec.name), &serde_json::to_string(spec)?).await?;
        self.specs.write().insert(spec.name.clone(), spec.clone());
        tracing::info!(index = %spec.name, dim = spec.dimensionality, metric = %spec.metric, "created lancedb index");
        Ok(spec.clone())
    }

    async fn upsert(&self, index: &str, records: &[VectorRecord]) -> Result<usize> {
        let spec = self.spec(index).await?;
        if records.is_empty() {
            return Ok(0);
        }
        if let Some(bad) = records.iter().find(|r| r.vector().len() != spec.dimensionality) {
            return Err(RagError::DimensionMismatch {
                index: index.to_string(),
                expected: spec.dimensionality,
                actual: bad.vector().len(),
            });
        }
        let batch = Self::to_record_batch(&spec, records)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let table = self.conn.open_table(index).execute().await.map_err(lance_err)?;
        let mut mi = table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(lance_err)?;
        Ok(records.len())
    }

    async fn delete(&self, index: &str, chunk_ids: &[ChunkId]) -> Result<usize> {
        self.spec(index).await?;
        if chunk_ids.is_empty() {
            return Ok(0);
        }
        let list = chunk_ids.iter().map(|id| format!("'{}'", sql_quote(id))).collect::<Vec<_>>().join(", ");
        let predicate = format!("id IN ({list})");
        let table = self.conn.open_table(index).execute().await.map_err(lance_err)?;
        let present = table.count_rows(Some(predicate.clone())).await.map_err(lance_err)?;
        if present > 0 {
            table.delete(&predicate).await.map_err(lance_err)?;
        }
        Ok(present)
    }

    async fn search(
        &self,
        index: &str,
        query: &[f32],
        top_k: usize,
        _filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchMatch>> {
        let spec = self.spec(index).await?;
        if query.len() != spec.dimensionality {
            return Err(RagError::DimensionMismatch {
                index: index.to_string(),
                expected: spec.dimensionality,
                actual: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let table = self.conn.open_table(index).execute().await.map_err(lance_err)?;
        let mut q = table
            .vector_search(query.to_vec())
            .map_err(lance_err)?
            .distance_type(distance_type(spec.metric))
            .limit(top_k);
        if let Some(n) = self.tuning.nprobes {
            q = q.nprobes(n);
        }
        if let Some(r) = self.tuning.refine_factor {
            q = q.refine_factor(r);
        }
        let mut stream = q.execute().await.map_err(lance_err)?;

        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(lance_err)? {
            let payloads = batch
                .column_by_name("payload")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| lance_err("payload column missing"))?;
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| lance_err("_distance column missing"))?;
            for i in 0..batch.num_rows() {
                if payloads.is_null(i) {
                    continue;
                }
                let chunk: Chunk = serde_json::from_str(payloads.value(i))?;
                out.push(SearchMatch { chunk, score: score(spec.metric, distances.value(i)) });
            }
        }
        out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
        Ok(out)
    }

    async fn health(&self) -> Result<HealthStatus> {
        match table_exists(&self.conn, crate::table::META_TABLE).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unavailable(e.to_string())),
        }
    }
}
