//! Domain types shared by the chunker, embedder, vector stores and retrieval.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{RagError, Result};

pub type ChunkId = String;
pub type DocId = String;
pub type Meta = BTreeMap<String, serde_json::Value>;

/// Content-type tag of a document. Unknown tags are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContentType {
    #[default]
    Text,
    Markdown,
    Html,
    Code,
    Other(String),
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Code => "code",
            Self::Other(s) => s,
        }
    }

    pub fn is_code(&self) -> bool {
        matches!(self, Self::Code)
    }

    /// Guess a content type from a file extension (`rs`, `md`, ...).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Self::Markdown,
            "htm" | "html" => Self::Html,
            "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "h" | "cpp" | "hpp" | "rb" | "kt"
            | "swift" | "scala" | "cs" => Self::Code,
            _ => Self::Text,
        }
    }
}

impl From<String> for ContentType {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" | "plain" | "text/plain" => Self::Text,
            "markdown" | "md" | "text/markdown" => Self::Markdown,
            "html" | "text/html" => Self::Html,
            "code" | "source" | "source_code" => Self::Code,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for ContentType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ContentType> for String {
    fn from(c: ContentType) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source document handed over by the upstream text-extraction pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub text: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub metadata: Meta,
}

impl Document {
    pub fn new(id: impl Into<DocId>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), content_type: ContentType::Text, metadata: Meta::new() }
    }

    pub fn with_content_type(mut self, content_type: impl Into<ContentType>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A region of source text produced by the chunker.
///
/// Character offsets count Unicode scalar values; byte offsets index the
/// UTF-8 source directly, so `&source[start_byte..end_byte] == text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl TextSpan {
    pub fn char_len(&self) -> usize {
        self.end_char - self.start_char
    }
}

/// A chunk of a document that is embedded and indexed independently.
///
/// - `id`: `"{doc_id}:{ordinal}"`, stable across re-ingestion of identical text
/// - `metadata`: document metadata plus chunk-local keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: DocId,
    pub ordinal: usize,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    #[serde(default)]
    pub metadata: Meta,
}

impl Chunk {
    pub fn chunk_id(doc_id: &str, ordinal: usize) -> ChunkId {
        format!("{doc_id}:{ordinal}")
    }
}

/// Distance metric of an index. Scores are always "higher is better".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Dot,
    Euclidean,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
            Self::Euclidean => "euclidean",
        }
    }
}

impl FromStr for Metric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" | "inner_product" => Ok(Self::Dot),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            other => Err(RagError::config(format!("unknown metric '{other}'"))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name, dimensionality and metric of an index. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub dimensionality: usize,
    pub metric: Metric,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, dimensionality: usize, metric: Metric) -> Result<Self> {
        let name = name.into();
        validate_index_name(&name)?;
        if dimensionality == 0 {
            return Err(RagError::config(format!("index '{name}': dimensionality must be > 0")));
        }
        Ok(Self { name, dimensionality, metric })
    }

    /// Same dimensionality and metric (names are compared by the caller).
    pub fn is_compatible(&self, other: &IndexSpec) -> bool {
        self.dimensionality == other.dimensionality && self.metric == other.metric
    }
}

/// Index names double as table and directory names.
pub fn validate_index_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 128
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(RagError::config(format!("invalid index name '{name}': use [A-Za-z0-9_-], 1..=128 chars")))
    }
}

/// A chunk and its embedding, bound to one index.
///
/// Only constructible through [`VectorRecord::new`], which enforces
/// `vector.len() == spec.dimensionality`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    index: String,
    chunk: Chunk,
    vector: Vec<f32>,
}

impl VectorRecord {
    pub fn new(spec: &IndexSpec, chunk: Chunk, vector: Vec<f32>) -> Result<Self> {
        if vector.len() != spec.dimensionality {
            return Err(RagError::DimensionMismatch {
                index: spec.name.clone(),
                expected: spec.dimensionality,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(RagError::config(format!("chunk '{}': vector contains non-finite values", chunk.id)));
        }
        Ok(Self { index: spec.name.clone(), chunk, vector })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn into_parts(self) -> (Chunk, Vec<f32>) {
        (self.chunk, self.vector)
    }
}

/// A backend search match; `score` is only comparable within one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub chunk: Chunk,
    pub score: f32,
}

/// A lexical search match from the keyword index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unavailable(String),
}

impl HealthStatus {
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }
}

/// Blend weights between vector and keyword scores for hybrid retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub vector: f32,
    pub keyword: f32,
}

impl HybridWeights {
    pub fn new(vector: f32, keyword: f32) -> Result<Self> {
        let w = Self { vector, keyword };
        w.validate()?;
        Ok(w)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = self.vector.is_finite() && self.keyword.is_finite();
        if !finite || self.vector < 0.0 || self.keyword < 0.0 || self.vector + self.keyword <= 0.0 {
            return Err(RagError::config(format!(
                "hybrid weights must be non-negative with a positive sum (vector={}, keyword={})",
                self.vector, self.keyword
            )));
        }
        Ok(())
    }

    pub fn combine(&self, vector_score: f32, keyword_score: f32) -> f32 {
        self.vector * vector_score + self.keyword * keyword_score
    }
}

/// One ranked entry of a retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub index: String,
    pub vector_score: f32,
    pub keyword_score: Option<f32>,
    pub combined_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFailure {
    pub index: String,
    pub error: RagErrorReport,
}

/// Serializable rendering of a [`RagError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagErrorReport {
    pub kind: String,
    pub message: String,
}

impl From<&RagError> for RagErrorReport {
    fn from(e: &RagError) -> Self {
        let kind = match e {
            RagError::Configuration(_) | RagError::DimensionMismatch { .. } => "configuration",
            RagError::Provider(_) | RagError::Backend { .. } => "provider",
            RagError::NotFound(_) => "not_found",
            RagError::PartialFailure { .. } => "partial_failure",
            RagError::Timeout(_) => "timeout",
            RagError::Cancelled => "cancelled",
            RagError::Io(_) => "io",
            RagError::Serialization(_) => "serialization",
        };
        Self { kind: kind.to_string(), message: e.to_string() }
    }
}

/// Ordered, deduplicated retrieval output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
    /// Indexes that errored or timed out and contributed nothing.
    pub failed_indexes: Vec<IndexFailure>,
    pub partial: bool,
    pub from_cache: bool,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.chunk.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Per-chunk outcome of an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkStatus {
    pub chunk_id: ChunkId,
    pub embedded: bool,
    pub stored: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub doc_id: DocId,
    pub index: String,
    pub version: u64,
    pub chunks: Vec<ChunkStatus>,
    /// Chunk ids of the previous version removed by this run.
    pub superseded: usize,
}

impl IngestReport {
    pub fn stored_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.stored).count()
    }

    pub fn failed_count(&self) -> usize {
        self.chunks.len() - self.stored_count()
    }

    /// An empty document is complete: there was nothing to store.
    pub fn status(&self) -> DocumentStatus {
        let stored = self.stored_count();
        if stored == self.chunks.len() {
            DocumentStatus::Complete
        } else if stored == 0 {
            DocumentStatus::Failed
        } else {
            DocumentStatus::Partial
        }
    }

    /// Collapse into `Err(PartialFailure)` when any chunk was not stored.
    pub fn into_result(self) -> Result<Self> {
        match self.status() {
            DocumentStatus::Complete => Ok(self),
            _ => Err(RagError::PartialFailure { succeeded: self.stored_count(), failed: self.failed_count() }),
        }
    }
}
