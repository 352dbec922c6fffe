//! Core data types shared by builders, searchers and backends.
//!
//! - `types`: identifiers, scalar attributes and index metadata
//! - `distance`: distance metrics and ranking order
//! - `options`: builder, searcher, query and I/O option bundles
//! - `memory`: memory budgets and per-query scratch sessions

pub mod distance;
pub mod memory;
pub mod options;
pub mod types;

pub use self::distance::{DistanceType, Scorer};
pub use self::memory::{MemoryResourceConfig, SearchSession};
pub use self::options::{
    BuilderOptions, IoOptions, RuntimeOptions, SearchOptions, SearcherOptions,
};
pub use self::types::{AttributeStore, AttributeValue, Dimension, IndexInfo, RowAttributes, VectorId};
