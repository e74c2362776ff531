use std::path::Path;
use std::sync::Arc;

use ragdb_core::config::BackendConfig;
use ragdb_core::error::{RagError, Result};
use ragdb_core::traits::VectorStoreAdapter;

use crate::lance::LanceStore;
use crate::memory::MemoryStore;

/// Instantiate the adapter named by `config.backend`.
///
/// Relative paths inside `connection` resolve against `data_dir`.
pub async fn open_backend(config: &BackendConfig, data_dir: Option<&Path>) -> Result<Arc<dyn VectorStoreAdapter>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::from_connection(&config.connection, data_dir)?)),
        "lancedb" | "lance" => {
            Ok(Arc::new(LanceStore::from_config(&config.connection, &config.tuning, data_dir).await?))
        }
        other => Err(RagError::config(format!("unknown vector backend '{other}' (expected memory or lancedb)"))),
    }
}
