//! Persistent catalog: declared indexes and per-document lineage.
//!
//! Stored as a single JSON file, replaced atomically on every change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use ragdb_core::config::BackendConfig;
use ragdb_core::error::{RagError, Result};
use ragdb_core::types::{ChunkId, DocId, DocumentStatus, IndexSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub spec: IndexSpec,
    pub backend: BackendConfig,
    pub created_at: DateTime<Utc>,
}

/// Which chunks a document currently owns, per index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLineage {
    pub doc_id: DocId,
    /// Incremented on every ingestion of this document.
    pub version: u64,
    pub content_hash: String,
    pub chunks_by_index: BTreeMap<String, Vec<ChunkId>>,
    /// Document version each index currently serves.
    #[serde(default)]
    pub versions_by_index: BTreeMap<String, u64>,
    pub status: DocumentStatus,
    pub updated_at: DateTime<Utc>,
}

impl DocumentLineage {
    pub fn new(doc_id: impl Into<DocId>) -> Self {
        Self {
            doc_id: doc_id.into(),
            version: 0,
            content_hash: String::new(),
            chunks_by_index: BTreeMap::new(),
            versions_by_index: BTreeMap::new(),
            status: DocumentStatus::Complete,
            updated_at: Utc::now(),
        }
    }

    /// Version served by `index`, if it holds any chunk of this document.
    pub fn version_in(&self, index: &str) -> Option<u64> {
        self.versions_by_index.get(index).copied()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks_by_index.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub indexes: BTreeMap<String, IndexEntry>,
    pub documents: BTreeMap<DocId, DocumentLineage>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| RagError::Serialization(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        tmp.persist(path).map_err(|e| RagError::Io(e.to_string()))?;
        Ok(())
    }
}
