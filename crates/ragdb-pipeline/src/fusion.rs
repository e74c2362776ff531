//! Score normalization, hybrid blending and cross-index merging.

use std::collections::HashMap;

use ragdb_core::config::ScoreNormalization;
use ragdb_core::types::{HybridWeights, KeywordHit, ScoredChunk, SearchMatch};

/// Map raw scores to `[0, 1]` under `policy`, preserving input order.
///
/// A single-element or constant list normalizes to `1.0` everywhere.
pub fn normalize(scores: &[f32], policy: ScoreNormalization) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    match policy {
        ScoreNormalization::MinMax => {
            let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
            let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let span = max - min;
            if span <= f32::EPSILON {
                return vec![1.0; scores.len()];
            }
            scores.iter().map(|s| (s - min) / span).collect()
        }
        ScoreNormalization::Rank => {
            let n = scores.len() as f32;
            let mut order: Vec<usize> = (0..scores.len()).collect();
            order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
            let mut out = vec![0.0; scores.len()];
            for (rank, &i) in order.iter().enumerate() {
                out[i] = 1.0 - rank as f32 / n;
            }
            out
        }
    }
}

/// Vector-only scoring: the combined score is the backend similarity.
pub fn vector_only(index: &str, matches: Vec<SearchMatch>) -> Vec<ScoredChunk> {
    matches
        .into_iter()
        .map(|m| ScoredChunk {
            chunk: m.chunk,
            index: index.to_string(),
            vector_score: m.score,
            keyword_score: None,
            combined_score: m.score,
        })
        .collect()
}

/// Blend one index's vector and keyword candidates.
///
/// Both lists are normalized independently; a chunk missing from one list
/// contributes `0` for that component. The returned `vector_score` and
/// `keyword_score` are the normalized components fed into the blend.
pub fn fuse_hybrid(
    index: &str,
    vector: Vec<SearchMatch>,
    keyword: Vec<KeywordHit>,
    weights: HybridWeights,
    policy: ScoreNormalization,
) -> Vec<ScoredChunk> {
    let v_norm = normalize(&vector.iter().map(|m| m.score).collect::<Vec<_>>(), policy);
    let k_norm = normalize(&keyword.iter().map(|h| h.score).collect::<Vec<_>>(), policy);

    let mut by_id: HashMap<String, ScoredChunk> = HashMap::new();
    for (m, v) in vector.into_iter().zip(v_norm) {
        by_id.insert(
            m.chunk.id.clone(),
            ScoredChunk {
                chunk: m.chunk,
                index: index.to_string(),
                vector_score: v,
                keyword_score: None,
                combined_score: 0.0,
            },
        );
    }
    for (h, k) in keyword.into_iter().zip(k_norm) {
        by_id
            .entry(h.chunk.id.clone())
            .and_modify(|hit| hit.keyword_score = Some(hit.keyword_score.map_or(k, |old| old.max(k))))
            .or_insert_with(|| ScoredChunk {
                chunk: h.chunk,
                index: index.to_string(),
                vector_score: 0.0,
                keyword_score: Some(k),
                combined_score: 0.0,
            });
    }

    by_id
        .into_values()
        .map(|mut hit| {
            hit.combined_score = weights.combine(hit.vector_score, hit.keyword_score.unwrap_or(0.0));
            hit
        })
        .collect()
}

/// Merge candidates from every searched index into the final ranking.
///
/// Duplicate chunk ids keep their highest combined score. Scores below
/// `threshold` are dropped; the rest sort descending with ties broken by
/// chunk id, truncated to `top_k`.
pub fn merge(candidates: Vec<ScoredChunk>, top_k: usize, threshold: f32) -> Vec<ScoredChunk> {
    let mut best: HashMap<String, ScoredChunk> = HashMap::new();
    for hit in candidates {
        let keep_existing = best.get(&hit.chunk.id).is_some_and(|old| {
            old.combined_score > hit.combined_score
                || (old.combined_score == hit.combined_score && old.index <= hit.index)
        });
        if !keep_existing {
            best.insert(hit.chunk.id.clone(), hit);
        }
    }
    let mut out: Vec<ScoredChunk> = best.into_values().filter(|h| h.combined_score >= threshold).collect();
    out.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
    out.truncate(top_k);
    out
}
