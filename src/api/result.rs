//! Search results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::VectorId;

/// Free-form per-query statistics.
pub type SearchStats = BTreeMap<String, Value>;

pub const STAT_CANDIDATES_SCANNED: &str = "candidates_scanned";
pub const STAT_FILTERED_OUT: &str = "filtered_out";
pub const STAT_BACKEND: &str = "backend";

/// One ranked hit.
///
/// `distance` is the metric's natural value: L2 distance for euclidean,
/// the dot product for inner product and the similarity for cosine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: VectorId,
    pub distance: f32,
}

/// Hits ordered best first, plus statistics about how they were found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub stats: SearchStats,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn ids(&self) -> Vec<VectorId> {
        self.hits.iter().map(|hit| hit.id).collect()
    }

    pub fn best(&self) -> Option<&SearchHit> {
        self.hits.first()
    }

    pub fn stat(&self, key: &str) -> Option<&Value> {
        self.stats.get(key)
    }

    /// Numeric statistic, if present.
    pub fn stat_u64(&self, key: &str) -> Option<u64> {
        self.stats.get(key).and_then(Value::as_u64)
    }
}

impl IntoIterator for SearchResult {
    type Item = SearchHit;
    type IntoIter = std::vec::IntoIter<SearchHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}
