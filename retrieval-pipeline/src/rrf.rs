//! Reciprocal Rank Fusion (§4.11): the hybrid search ranking algorithm. Combines a
//! semantic-search ranked list and a keyword-search ranked list keyed by
//! `(doc_id, chunk_id)`, grounded in `arkham_shard_search/engines/hybrid.py`'s
//! `_merge_results`.

use std::collections::HashMap;

/// RRF smoothing constant; higher values flatten the influence of rank differences.
pub const RRF_K: f64 = 60.0;

/// One item entering rank fusion: its `(doc_id, chunk_id)` key, a snippet/highlight
/// list to merge, and arbitrary metadata carried through to the fused result.
#[derive(Debug, Clone)]
pub struct RankedItem<T> {
    pub doc_id: String,
    pub chunk_id: String,
    pub highlights: Vec<String>,
    pub payload: T,
}

/// A fused hybrid-search result: the winning item's payload (semantic preferred
/// over keyword per the original merge rule) plus the combined fused score.
#[derive(Debug, Clone)]
pub struct FusedItem<T> {
    pub doc_id: String,
    pub chunk_id: String,
    pub highlights: Vec<String>,
    pub payload: T,
    pub score: f64,
}

/// Normalizes `semantic_weight`/`keyword_weight` to sum to 1.0; falls back to an
/// even 0.5/0.5 split when both are zero, matching the spec's default.
pub fn normalize_weights(semantic_weight: f64, keyword_weight: f64) -> (f64, f64) {
    let total = semantic_weight + keyword_weight;
    if total <= 0.0 {
        return (0.5, 0.5);
    }
    (semantic_weight / total, keyword_weight / total)
}

/// Reciprocal rank fusion over two already-ranked lists (rank 1 = best, as
/// returned by each engine). Semantic metadata wins on key collision; keyword
/// highlights are appended onto the winning item's highlight list.
pub fn reciprocal_rank_fusion<T: Clone>(
    semantic: &[RankedItem<T>],
    keyword: &[RankedItem<T>],
    semantic_weight: f64,
    keyword_weight: f64,
) -> Vec<FusedItem<T>> {
    let (w_s, w_k) = normalize_weights(semantic_weight, keyword_weight);

    let mut fused: HashMap<(String, String), FusedItem<T>> = HashMap::new();
    let mut order: Vec<(String, String)> = Vec::new();

    for (rank, item) in semantic.iter().enumerate() {
        let key = (item.doc_id.clone(), item.chunk_id.clone());
        let contribution = w_s / (RRF_K + (rank + 1) as f64);
        order.push(key.clone());
        fused.insert(
            key,
            FusedItem {
                doc_id: item.doc_id.clone(),
                chunk_id: item.chunk_id.clone(),
                highlights: item.highlights.clone(),
                payload: item.payload.clone(),
                score: contribution,
            },
        );
    }

    for (rank, item) in keyword.iter().enumerate() {
        let key = (item.doc_id.clone(), item.chunk_id.clone());
        let contribution = w_k / (RRF_K + (rank + 1) as f64);

        fused
            .entry(key.clone())
            .and_modify(|existing| {
                existing.score += contribution;
                existing.highlights.extend(item.highlights.iter().cloned());
            })
            .or_insert_with(|| {
                order.push(key.clone());
                FusedItem {
                    doc_id: item.doc_id.clone(),
                    chunk_id: item.chunk_id.clone(),
                    highlights: item.highlights.clone(),
                    payload: item.payload.clone(),
                    score: contribution,
                }
            });
    }

    let mut results: Vec<FusedItem<T>> = order
        .into_iter()
        .filter_map(|key| fused.remove(&key))
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Applies the documented `offset`/`limit` pagination slice to an already-sorted
/// fused result list.
pub fn paginate<T>(items: Vec<FusedItem<T>>, offset: usize, limit: usize) -> Vec<FusedItem<T>> {
    items.into_iter().skip(offset).take(limit).collect()
}

/// Model-aware default weights (§4.11): higher-dimension embedding models lean
/// more on semantic search. Unknown/low dimensions fall back to `{0.7, 0.3}`.
pub fn default_weights_for_dimension(dim: usize) -> (f64, f64) {
    match dim {
        0..=384 => (0.6, 0.4),
        385..=1024 => (0.7, 0.3),
        _ => (0.8, 0.2),
    }
}
