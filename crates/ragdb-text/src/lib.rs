//! ragdb-text
//!
//! Tantivy-backed keyword index used for the lexical half of hybrid retrieval.

pub mod index;
pub mod schema;

pub use index::TantivyKeywordIndex;
