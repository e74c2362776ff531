//! Named index registry.
//!
//! Maps index names to their spec, backend adapter and optional keyword index,
//! and owns the catalog of document lineage. Specs are immutable: registering
//! a name again with a different dimensionality or metric is rejected.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ragdb_core::config::BackendConfig;
use ragdb_core::error::{RagError, Result};
use ragdb_core::traits::{KeywordIndex, VectorStoreAdapter};
use ragdb_core::types::IndexSpec;

use crate::catalog::{Catalog, DocumentLineage, IndexEntry};

pub const CATALOG_FILE: &str = "catalog.json";

#[derive(Clone)]
pub struct RegisteredIndex {
    pub spec: IndexSpec,
    pub backend: BackendConfig,
    pub store: Arc<dyn VectorStoreAdapter>,
    pub keyword: Option<Arc<dyn KeywordIndex>>,
}

impl std::fmt::Debug for RegisteredIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredIndex")
            .field("spec", &self.spec)
            .field("backend", &self.store.backend_name())
            .field("keyword", &self.keyword.is_some())
            .finish()
    }
}

pub struct IndexRegistry {
    live: RwLock<HashMap<String, RegisteredIndex>>,
    catalog: Mutex<Catalog>,
    catalog_path: Option<PathBuf>,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl IndexRegistry {
    /// Registry whose catalog is never written to disk.
    pub fn in_memory() -> Self {
        Self { live: RwLock::new(HashMap::new()), catalog: Mutex::new(Catalog::default()), catalog_path: None }
    }

    /// Load `catalog.json` from `data_dir`. Catalog entries are not live until
    /// their adapters are attached with [`register`](Self::register).
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CATALOG_FILE);
        let catalog = Catalog::load(&path)?;
        tracing::debug!(
            path = %path.display(),
            indexes = catalog.indexes.len(),
            documents = catalog.documents.len(),
            "opened catalog"
        );
        Ok(Self { live: RwLock::new(HashMap::new()), catalog: Mutex::new(catalog), catalog_path: Some(path) })
    }

    fn save(&self, catalog: &Catalog) -> Result<()> {
        match &self.catalog_path {
            Some(path) => catalog.save(path),
            None => Ok(()),
        }
    }

    /// Declared indexes recorded by earlier runs, in name order.
    pub fn catalog_entries(&self) -> Vec<IndexEntry> {
        self.catalog.lock().indexes.values().cloned().collect()
    }

    /// Create (or reattach) an index on `store` and make it live.
    ///
    /// Idempotent for an identical spec. A spec conflicting with the catalog
    /// or with the backend's existing index is a configuration error.
    pub async fn register(
        &self,
        spec: IndexSpec,
        backend: BackendConfig,
        store: Arc<dyn VectorStoreAdapter>,
        keyword: Option<Arc<dyn KeywordIndex>>,
    ) -> Result<IndexSpec> {
        let known = self.catalog.lock().indexes.get(&spec.name).map(|e| e.spec.clone());
        if let Some(existing) = &known {
            if !existing.is_compatible(&spec) {
                return Err(RagError::config(format!(
                    "index '{}' is registered as {} / {}; requested {} / {}",
                    spec.name, existing.dimensionality, existing.metric, spec.dimensionality, spec.metric
                )));
            }
        }
        let spec = store.create_index(&spec).await?;

        {
            let mut catalog = self.catalog.lock();
            if !catalog.indexes.contains_key(&spec.name) {
                catalog.indexes.insert(
                    spec.name.clone(),
                    IndexEntry { spec: spec.clone(), backend: backend.clone(), created_at: Utc::now() },
                );
                self.save(&catalog)?;
            }
        }
        tracing::info!(index = %spec.name, backend = store.backend_name(), "index registered");
        self.live.write().insert(spec.name.clone(), RegisteredIndex { spec: spec.clone(), backend, store, keyword });
        Ok(spec)
    }

    pub fn get(&self, name: &str) -> Result<RegisteredIndex> {
        self.live.read().get(name).cloned().ok_or_else(|| RagError::NotFound(format!("index '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.live.read().contains_key(name)
    }

    /// Live index names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.live.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn all(&self) -> Vec<RegisteredIndex> {
        let live = self.live.read();
        let mut out: Vec<RegisteredIndex> = live.values().cloned().collect();
        out.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        out
    }

    /// Forget an index. Stored vectors are left to the backend.
    pub fn remove(&self, name: &str) -> Result<RegisteredIndex> {
        let removed = self.live.write().remove(name).ok_or_else(|| RagError::NotFound(format!("index '{name}'")))?;
        let mut catalog = self.catalog.lock();
        catalog.indexes.remove(name);
        for lineage in catalog.documents.values_mut() {
            lineage.chunks_by_index.remove(name);
            lineage.versions_by_index.remove(name);
        }
        self.save(&catalog)?;
        Ok(removed)
    }

    pub fn lineage(&self, doc_id: &str) -> Option<DocumentLineage> {
        self.catalog.lock().documents.get(doc_id).cloned()
    }

    pub fn documents(&self) -> Vec<DocumentLineage> {
        self.catalog.lock().documents.values().cloned().collect()
    }

    pub fn record_lineage(&self, lineage: DocumentLineage) -> Result<()> {
        let mut catalog = self.catalog.lock();
        catalog.documents.insert(lineage.doc_id.clone(), lineage);
        self.save(&catalog)
    }

    pub fn remove_lineage(&self, doc_id: &str) -> Result<Option<DocumentLineage>> {
        let mut catalog = self.catalog.lock();
        let removed = catalog.documents.remove(doc_id);
        if removed.is_some() {
            self.save(&catalog)?;
        }
        Ok(removed)
    }
}
