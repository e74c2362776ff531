use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::filter::MetadataFilter;
use crate::types::HybridWeights;

/// A retrieval request. Built with the `with_*` methods and checked by
/// [`Query::validate`] before any work is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub filter: Option<MetadataFilter>,
    /// Target indexes; `None` means every registered index.
    #[serde(default)]
    pub indexes: Option<Vec<String>>,
    pub top_k: usize,
    #[serde(default)]
    pub score_threshold: f32,
    #[serde(default)]
    pub hybrid: Option<HybridWeights>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), filter: None, indexes: None, top_k: 5, score_threshold: 0.0, hybrid: None }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = if filter.is_empty() { None } else { Some(filter) };
        self
    }

    pub fn with_indexes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_hybrid(mut self, weights: HybridWeights) -> Self {
        self.hybrid = Some(weights);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(RagError::config("query text must not be empty"));
        }
        if self.top_k == 0 {
            return Err(RagError::config("top_k must be > 0"));
        }
        if !self.score_threshold.is_finite() {
            return Err(RagError::config("score_threshold must be finite"));
        }
        if let Some(w) = &self.hybrid {
            w.validate()?;
        }
        if let Some(f) = &self.filter {
            f.validate()?;
        }
        Ok(())
    }

    /// Whitespace-collapsed query text used for cache keys. Case is kept:
    /// embedding models may map "Apple" and "apple" to different vectors.
    pub fn normalized_text(&self) -> String {
        self.text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}
