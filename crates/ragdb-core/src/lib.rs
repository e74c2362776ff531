//! Core types, traits and building blocks of the ragdb retrieval stack.

pub mod cache;
pub mod cancel;
pub mod chunker;
pub mod config;
pub mod distance;
pub mod error;
pub mod filter;
pub mod query;
pub mod retry;
pub mod traits;
pub mod types;

pub use cancel::CancellationToken;
pub use error::{RagError, Result};
