//! # Sagitta
//!
//! An embeddable vector similarity search engine.
//!
//! Sagitta builds a serialized index over fixed-dimension float vectors and
//! answers top-k nearest neighbour queries against it, optionally narrowed
//! by a row-id pre-filter and a structured predicate over attributes
//! captured at build time.
//!
//! ## Features
//!
//! - Closed set of backends: `bruteforce`, `ivf`, `diskann` and `demo`
//! - Euclidean, inner product and cosine metrics
//! - Explicit builder lifecycle with a terminal error state
//! - Checksummed index files written atomically through a pluggable storage
//! - Parallel candidate scoring on a rayon pool
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use sagitta::prelude::*;
//!
//! # fn main() -> sagitta::error::Result<()> {
//! let storage = Arc::new(MemoryStorage::new_default());
//! let io = IoOptions::new(storage, "vectors.sgt");
//!
//! let mut builder = IndexBuilder::create(BuilderOptions::new("bruteforce", 2, DistanceType::Euclidean))?;
//! builder.insert_batch(&[1, 2], &[0.0, 0.0, 1.0, 0.0])?;
//! builder.dump(&io)?;
//!
//! let mut searcher = IndexSearcher::create(SearcherOptions::new("bruteforce", 2, DistanceType::Euclidean))?;
//! searcher.open(&io)?;
//! let result = searcher.search(&VectorSearch::new("embedding", vec![0.9, 0.0], 1), &SearchOptions::new())?;
//! assert_eq!(result.ids(), vec![2]);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backend;
pub mod core;
pub mod encode;
pub mod error;
pub mod format;
pub mod search;
pub mod storage;
pub mod util;

pub mod prelude {
    pub use crate::api::{
        BuildExtension, BuilderStatus, Dataset, FieldPredicate, InMemoryDataset, IndexBuilder,
        IndexSearcher, Predicate, SearchExtension, SearchHit, SearchResult, StatsCollector,
        VectorSearch,
    };
    pub use crate::backend::BackendKind;
    pub use crate::core::{
        BuilderOptions, DistanceType, IndexInfo, IoOptions, MemoryResourceConfig, RowAttributes,
        SearchOptions, SearchSession, SearcherOptions, VectorId,
    };
    pub use crate::error::{ErrorCode, Result, SagittaError, Status};
    pub use crate::storage::Storage;
    pub use crate::storage::file::{FileStorage, FileStorageConfig};
    pub use crate::storage::memory::MemoryStorage;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
