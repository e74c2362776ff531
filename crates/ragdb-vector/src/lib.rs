//! Vector store adapters, the index registry and its catalog.
//!
//! - `memory`: exact-scan reference backend with optional JSON snapshots
//! - `lance`: LanceDB tables, one per index
//! - `registry`: name -> adapter mapping plus document lineage

pub mod catalog;
pub mod factory;
pub mod lance;
pub mod memory;
pub mod registry;
pub mod schema;
pub mod table;

pub use catalog::{Catalog, DocumentLineage, IndexEntry};
pub use factory::open_backend;
pub use lance::LanceStore;
pub use memory::MemoryStore;
pub use registry::{IndexRegistry, RegisteredIndex};
