//! Configuration loader, validated settings and path helpers.
//!
//! Uses Figment to merge `ragdb.toml` + `ragdb.<env>.toml` + `RAGDB_*` env vars
//! (nested keys separated by `__`, e.g. `RAGDB_CHUNKING__MAX_SIZE=800`).
//! [`Config::settings`] extracts a [`RagSettings`] and rejects invalid
//! combinations before anything is constructed from it.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};

use crate::cache::CacheConfig;
use crate::chunker::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::types::{ContentType, HybridWeights, IndexSpec, Metric};

pub struct Config {
    figment: Figment,
    base_dir: PathBuf,
}

impl Config {
    /// Load from the current working directory.
    pub fn load() -> Result<Self> {
        let cwd = env::current_dir()?;
        Self::load_from(&cwd)
    }

    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_name = env::var("RAGDB_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file(dir.join("ragdb.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("ragdb.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("ragdb.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("ragdb.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("RAGDB_").split("__"));
        Ok(Self { figment, base_dir: dir.to_path_buf() })
    }

    pub fn from_figment(figment: Figment, base_dir: &Path) -> Self {
        Self { figment, base_dir: base_dir.to_path_buf() }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| RagError::config(format!("failed to get '{key}': {e}")))
    }

    /// Extract and validate the full settings tree. Relative paths resolve
    /// against the directory the config was loaded from.
    pub fn settings(&self) -> Result<RagSettings> {
        let mut settings: RagSettings =
            self.figment.extract().map_err(|e| RagError::config(format!("invalid configuration: {e}")))?;
        settings.storage.data_dir =
            resolve_with_base(&self.base_dir, &settings.storage.data_dir).to_string_lossy().to_string();
        settings.validate()?;
        Ok(settings)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

/// Declarative backend selection: `{backend, connection, dimensionality, metric}`.
///
/// `connection` and `tuning` are opaque to everything except the backend named
/// by `backend`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub backend: String,
    #[serde(default)]
    pub connection: serde_json::Value,
    pub dimensionality: usize,
    pub metric: Metric,
    #[serde(default)]
    pub tuning: serde_json::Value,
}

impl BackendConfig {
    pub fn memory(dimensionality: usize, metric: Metric) -> Self {
        Self {
            backend: "memory".to_string(),
            connection: serde_json::Value::Null,
            dimensionality,
            metric,
            tuning: serde_json::Value::Null,
        }
    }

    pub fn with_connection(mut self, connection: serde_json::Value) -> Self {
        self.connection = connection;
        self
    }

    pub fn spec(&self, name: &str) -> Result<IndexSpec> {
        if self.backend.trim().is_empty() {
            return Err(RagError::config(format!("index '{name}': backend must be set")));
        }
        IndexSpec::new(name, self.dimensionality, self.metric)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub name: String,
    #[serde(flatten)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root for the catalog, keyword indexes and file-backed stores.
    pub data_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { data_dir: "~/.ragdb".to_string() }
    }
}

impl StorageSettings {
    pub fn data_path(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }
}

/// Exponential backoff: `initial * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 100, max_backoff_ms: 2_000 }
    }
}

impl RetrySettings {
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms)
    }

    pub fn validate(&self, section: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RagError::config(format!("{section}.max_attempts must be >= 1")));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(RagError::config(format!("{section}.initial_backoff_ms must not exceed max_backoff_ms")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `hash` (deterministic, offline) or `candle` (local model weights).
    pub provider: String,
    pub dimensionality: usize,
    pub model_dir: Option<String>,
    pub max_len: usize,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub timeout_ms: u64,
    #[serde(flatten)]
    pub retry: RetrySettings,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            dimensionality: 384,
            model_dir: None,
            max_len: 256,
            batch_size: 32,
            max_concurrency: 4,
            timeout_ms: 30_000,
            retry: RetrySettings::default(),
        }
    }
}

impl EmbeddingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.dimensionality == 0 {
            return Err(RagError::config("embedding.dimensionality must be > 0"));
        }
        if self.batch_size == 0 || self.max_concurrency == 0 || self.max_len == 0 {
            return Err(RagError::config("embedding.batch_size, max_concurrency and max_len must be > 0"));
        }
        if self.timeout_ms == 0 {
            return Err(RagError::config("embedding.timeout_ms must be > 0"));
        }
        self.retry.validate("embedding")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreNormalization {
    /// `(s - min) / (max - min)` over the candidate list.
    #[default]
    MinMax,
    /// `1 - rank / n` over the candidate list.
    Rank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub score_threshold: f32,
    /// Backend `top_k` inflation for post-filter and merge headroom.
    pub candidate_multiplier: usize,
    /// Upper bound on candidates fetched while widening a post-filtered search.
    pub max_candidates: usize,
    pub index_timeout_ms: u64,
    pub normalization: ScoreNormalization,
    pub hybrid: Option<HybridWeights>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.0,
            candidate_multiplier: 3,
            max_candidates: 10_000,
            index_timeout_ms: 5_000,
            normalization: ScoreNormalization::MinMax,
            hybrid: None,
        }
    }
}

impl RetrievalSettings {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RagError::config("retrieval.top_k must be > 0"));
        }
        if !(2..=16).contains(&self.candidate_multiplier) {
            return Err(RagError::config("retrieval.candidate_multiplier must be within 2..=16"));
        }
        if self.max_candidates < self.top_k.saturating_mul(self.candidate_multiplier) {
            return Err(RagError::config("retrieval.max_candidates must cover top_k * candidate_multiplier"));
        }
        if self.index_timeout_ms == 0 {
            return Err(RagError::config("retrieval.index_timeout_ms must be > 0"));
        }
        if !self.score_threshold.is_finite() {
            return Err(RagError::config("retrieval.score_threshold must be finite"));
        }
        if let Some(w) = &self.hybrid {
            w.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    /// Target index when neither the caller nor `routing` names one.
    pub default_index: String,
    /// Content-type tag -> index name.
    pub routing: BTreeMap<String, String>,
    pub upsert_batch_size: usize,
    pub max_concurrent_documents: usize,
    pub backend_timeout_ms: u64,
    #[serde(flatten)]
    pub retry: RetrySettings,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            default_index: "default".to_string(),
            routing: BTreeMap::new(),
            upsert_batch_size: 256,
            max_concurrent_documents: 4,
            backend_timeout_ms: 10_000,
            retry: RetrySettings::default(),
        }
    }
}

impl IngestionSettings {
    pub fn route(&self, content_type: &ContentType) -> &str {
        self.routing.get(content_type.as_str()).map(String::as_str).unwrap_or(&self.default_index)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upsert_batch_size == 0 || self.max_concurrent_documents == 0 || self.backend_timeout_ms == 0 {
            return Err(RagError::config(
                "ingestion.upsert_batch_size, max_concurrent_documents and backend_timeout_ms must be > 0",
            ));
        }
        crate::types::validate_index_name(&self.default_index)?;
        for target in self.routing.values() {
            crate::types::validate_index_name(target)?;
        }
        self.retry.validate("ingestion")
    }
}

/// Complete, validated settings tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub storage: StorageSettings,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub cache: CacheConfig,
    pub ingestion: IngestionSettings,
    pub indexes: Vec<IndexSettings>,
}

impl RagSettings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.embedding.validate()?;
        self.retrieval.validate()?;
        self.cache.validate()?;
        self.ingestion.validate()?;

        let mut seen = HashSet::new();
        for idx in &self.indexes {
            let spec = idx.backend.spec(&idx.name)?;
            if !seen.insert(spec.name.clone()) {
                return Err(RagError::config(format!("index '{}' is declared twice", spec.name)));
            }
            if spec.dimensionality != self.embedding.dimensionality {
                return Err(RagError::DimensionMismatch {
                    index: spec.name,
                    expected: spec.dimensionality,
                    actual: self.embedding.dimensionality,
                });
            }
        }
        Ok(())
    }
}
