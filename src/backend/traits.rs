//! Interfaces implemented by every backend.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde_json::Value;

use crate::backend::registry::BackendKind;
use crate::core::distance::{DistanceType, Scorer};
use crate::core::memory::SearchSession;
use crate::core::options::RuntimeOptions;
use crate::core::types::{Dimension, VectorId};
use crate::error::Result;
use crate::search::{Candidate, CandidateFilter, ScanOutcome};

/// Everything a backend needs to start building.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub dimension: Dimension,
    pub metric: DistanceType,
    pub scorer: Scorer,
    pub options: RuntimeOptions,
}

/// Build-side half of a backend.
///
/// Vectors arrive already validated: every row has `dimension` finite
/// values, ids are unique, and cosine inputs are normalized.
pub trait IndexWriter: Send + Debug {
    fn kind(&self) -> BackendKind;

    /// Fit the backend model on a row-major training sample.
    fn train(&mut self, sample: &[f32]) -> Result<()>;

    /// Append a row-major batch of vectors.
    fn insert(&mut self, ids: &[VectorId], vectors: &[f32]) -> Result<()>;

    /// Rows inserted so far.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated resident size in bytes, checked against the builder budget.
    fn estimated_memory_usage(&self) -> usize;

    /// Finalize internal structures and serialize them.
    fn finish(&mut self) -> Result<Vec<u8>>;
}

/// Per-query inputs handed to a reader.
#[derive(Debug)]
pub struct SearchContext<'a> {
    /// Query vector, already normalized when the metric requires it.
    pub query: &'a [f32],
    pub limit: usize,
    pub scorer: Scorer,
    pub filter: CandidateFilter<'a>,
    /// Searcher defaults overlaid with the per-call options.
    pub options: &'a RuntimeOptions,
    /// Whether scoring may fan out over the rayon pool.
    pub parallel: bool,
}

/// What a reader returns for one query.
#[derive(Debug, Clone, Default)]
pub struct BackendOutput {
    /// Best candidates, best first, at most `limit`.
    pub candidates: Vec<Candidate>,
    pub scanned: u64,
    pub filtered_out: u64,
    /// Backend specific counters, merged into the result stats.
    pub stats: BTreeMap<String, Value>,
}

impl BackendOutput {
    pub fn from_scan(outcome: ScanOutcome) -> Self {
        BackendOutput {
            candidates: outcome.collector.into_sorted_vec(),
            scanned: outcome.scanned,
            filtered_out: outcome.filtered_out,
            stats: BTreeMap::new(),
        }
    }

    pub fn with_stat<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.stats.insert(key.into(), value.into());
        self
    }
}

/// Search-side half of a backend. Shared by concurrent queries.
pub trait IndexReader: Send + Sync + Debug {
    fn kind(&self) -> BackendKind;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident size in bytes, checked against the searcher budget.
    fn memory_usage(&self) -> usize;

    fn search(&self, ctx: &SearchContext<'_>, session: &mut SearchSession) -> Result<BackendOutput>;
}
