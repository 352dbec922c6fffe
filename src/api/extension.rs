//! Observer hooks attached to builders and searchers.
//!
//! Hooks only receive side information. They cannot veto an operation or
//! change its outcome; a search extension may add entries to the result
//! statistics and nothing else.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::api::query::VectorSearch;
use crate::api::result::{STAT_CANDIDATES_SCANNED, SearchResult, SearchStats};
use crate::backend::BackendKind;
use crate::core::types::IndexInfo;
use crate::error::SagittaError;

/// Build pipeline observer.
pub trait BuildExtension: Send + Sync + Debug {
    /// Training finished over `rows` sample rows.
    fn on_train(&self, _kind: BackendKind, _rows: usize) {}

    /// A batch of `rows` rows was accepted.
    fn on_insert(&self, _rows: usize, _total: usize) {}

    /// The index was serialized.
    fn on_dump(&self, _info: &IndexInfo, _bytes: u64) {}

    /// The builder entered its error state.
    fn on_error(&self, _error: &SagittaError) {}
}

/// Search pipeline observer.
pub trait SearchExtension: Send + Sync + Debug {
    fn on_open(&self, _kind: BackendKind, _info: &IndexInfo) {}

    fn before_search(&self, _query: &VectorSearch) {}

    /// Called with the finished result; may add statistics.
    fn after_search(&self, _query: &VectorSearch, _result: &SearchResult, _stats: &mut SearchStats) {}

    fn on_close(&self) {}
}

/// Counters gathered by [`StatsCollector`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedStats {
    pub trained_rows: u64,
    pub inserted_rows: u64,
    pub insert_batches: u64,
    pub dumped_bytes: u64,
    pub build_errors: u64,
    pub opens: u64,
    pub searches: u64,
    pub hits_returned: u64,
    pub candidates_scanned: u64,
}

/// Extension counting build and search activity with atomics.
///
/// One collector may be attached to several builders and searchers at
/// once.
#[derive(Debug, Default)]
pub struct StatsCollector {
    trained_rows: AtomicU64,
    inserted_rows: AtomicU64,
    insert_batches: AtomicU64,
    dumped_bytes: AtomicU64,
    build_errors: AtomicU64,
    opens: AtomicU64,
    searches: AtomicU64,
    hits_returned: AtomicU64,
    candidates_scanned: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CollectedStats {
        CollectedStats {
            trained_rows: self.trained_rows.load(Ordering::Relaxed),
            inserted_rows: self.inserted_rows.load(Ordering::Relaxed),
            insert_batches: self.insert_batches.load(Ordering::Relaxed),
            dumped_bytes: self.dumped_bytes.load(Ordering::Relaxed),
            build_errors: self.build_errors.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
            hits_returned: self.hits_returned.load(Ordering::Relaxed),
            candidates_scanned: self.candidates_scanned.load(Ordering::Relaxed),
        }
    }
}

impl BuildExtension for StatsCollector {
    fn on_train(&self, _kind: BackendKind, rows: usize) {
        self.trained_rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    fn on_insert(&self, rows: usize, _total: usize) {
        self.inserted_rows.fetch_add(rows as u64, Ordering::Relaxed);
        self.insert_batches.fetch_add(1, Ordering::Relaxed);
    }

    fn on_dump(&self, _info: &IndexInfo, bytes: u64) {
        self.dumped_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn on_error(&self, _error: &SagittaError) {
        self.build_errors.fetch_add(1, Ordering::Relaxed);
    }
}

impl SearchExtension for StatsCollector {
    fn on_open(&self, _kind: BackendKind, _info: &IndexInfo) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    fn after_search(&self, _query: &VectorSearch, result: &SearchResult, stats: &mut SearchStats) {
        let searches = self.searches.fetch_add(1, Ordering::Relaxed) + 1;
        self.hits_returned
            .fetch_add(result.hits.len() as u64, Ordering::Relaxed);
        if let Some(scanned) = result.stat_u64(STAT_CANDIDATES_SCANNED) {
            self.candidates_scanned.fetch_add(scanned, Ordering::Relaxed);
        }
        stats.insert("collector.searches".into(), searches.into());
    }
}
