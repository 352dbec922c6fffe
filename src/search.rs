//! Query execution building blocks shared by all backends.
//!
//! - `collector`: bounded top-k selection with deterministic tie-breaking
//! - `filter`: pre-filter and structured predicate evaluation per candidate
//! - `scan`: sequential or rayon-parallel scoring over row ranges

pub mod collector;
pub mod filter;
pub mod scan;

pub use self::collector::{Candidate, TopKCollector};
pub use self::filter::CandidateFilter;
pub use self::scan::{RowOutcome, ScanOutcome, ScanParams, scan_rows};
