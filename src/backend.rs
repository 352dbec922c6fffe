//! Index backends and the registry that selects them.
//!
//! Backends are a closed set enumerated by [`BackendKind`]. Each variant maps
//! to a concrete [`IndexWriter`] used while building and an [`IndexReader`]
//! used while searching; the builder and searcher only ever talk to those two
//! traits.
//!
//! - `bruteforce` (`flat`): exact scan over float32 rows
//! - `demo` (`flat`): exact scan over trained 8-bit scalar codes
//! - `ivf`: k-means partitioned inverted lists
//! - `diskann`: Vamana proximity graph searched with a bounded beam

pub mod diskann;
pub mod flat;
pub mod ivf;
pub mod registry;
pub mod traits;

pub use self::registry::{BackendCapabilities, BackendKind};
pub use self::traits::{BackendOutput, BuildContext, IndexReader, IndexWriter, SearchContext};
