//! Public entry points: build an index, then search it.
//!
//! - `builder`: [`IndexBuilder`] and its lifecycle states
//! - `searcher`: [`IndexSearcher`]
//! - `query`: the [`VectorSearch`] descriptor
//! - `predicate`: structured predicates over materialized attributes
//! - `dataset`: batch sources for training and ingestion
//! - `extension`: build and search observers
//! - `result`: ranked hits and statistics

pub mod builder;
pub mod dataset;
pub mod extension;
pub mod predicate;
pub mod query;
pub mod result;
pub mod searcher;

pub use self::builder::{BuilderStatus, IndexBuilder};
pub use self::dataset::{Dataset, InMemoryDataset};
pub use self::extension::{BuildExtension, CollectedStats, SearchExtension, StatsCollector};
pub use self::predicate::{AttributeRow, FieldPredicate, Predicate};
pub use self::query::{PreFilter, VectorSearch};
pub use self::result::{SearchHit, SearchResult, SearchStats};
pub use self::searcher::IndexSearcher;
