//! Hybrid ranking: fuse lexical and vector results into one score

use crate::item::{ContextItem, ItemType};
use std::collections::HashMap;

/// Weight given to vector similarity when none is specified
pub const DEFAULT_VECTOR_WEIGHT: f64 = 0.7;

/// Cap on lexical search results
pub const TEXT_SEARCH_LIMIT: usize = 50;

/// Options for [`crate::Store::hybrid_search`]
#[derive(Debug, Clone, Copy)]
pub struct HybridOptions {
    pub limit: usize,
    pub item_type: Option<ItemType>,
    /// Share of the score coming from vector similarity, in `[0, 1]`
    pub vector_weight: f64,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            item_type: None,
            vector_weight: DEFAULT_VECTOR_WEIGHT,
        }
    }
}

/// One ranked result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub item: ContextItem,
    pub score: f64,
    pub text_score: f64,
    pub vector_score: f64,
}

/// Combine the two result lists.
///
/// Text results contribute `(1 - w) / (rank + 1)`, vector results contribute
/// `w * similarity`. Contributions for the same id are summed; ids with no
/// positive score are dropped. Equal scores keep first-seen order.
pub fn fuse(
    text_results: Vec<ContextItem>,
    vector_results: Vec<(ContextItem, f64)>,
    vector_weight: f64,
    limit: usize,
) -> Vec<SearchHit> {
    let vector_weight = vector_weight.clamp(0.0, 1.0);
    let text_weight = 1.0 - vector_weight;

    let mut order: Vec<String> = Vec::new();
    let mut hits: HashMap<String, SearchHit> = HashMap::new();

    for (rank, item) in text_results.into_iter().enumerate() {
        let contribution = text_weight / (rank as f64 + 1.0);
        let hit = hits.entry(item.id.clone()).or_insert_with(|| {
            order.push(item.id.clone());
            SearchHit { item, score: 0.0, text_score: 0.0, vector_score: 0.0 }
        });
        hit.text_score += contribution;
        hit.score += contribution;
    }

    for (item, similarity) in vector_results {
        let contribution = vector_weight * similarity;
        let hit = hits.entry(item.id.clone()).or_insert_with(|| {
            order.push(item.id.clone());
            SearchHit { item, score: 0.0, text_score: 0.0, vector_score: 0.0 }
        });
        hit.vector_score += contribution;
        hit.score += contribution;
    }

    let mut ranked: Vec<SearchHit> = order
        .into_iter()
        .filter_map(|id| hits.remove(&id))
        .filter(|hit| hit.score > 0.0)
        .collect();

    // sort_by is stable, so ties keep insertion order
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);
    ranked
}
