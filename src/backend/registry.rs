//! Backend registry.
//!
//! Adding a backend means adding a [`BackendKind`] variant; every `match`
//! below is exhaustive, so the compiler points at each table that needs a
//! new entry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::diskann::{DiskAnnReader, DiskAnnWriter};
use crate::backend::flat::{FlatReader, FlatWriter};
use crate::backend::ivf::{IvfReader, IvfWriter};
use crate::backend::traits::{BuildContext, IndexReader, IndexWriter};
use crate::core::distance::DistanceType;
use crate::core::types::Dimension;
use crate::error::Result;

/// The closed set of index backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Bruteforce,
    Ivf,
    DiskAnn,
    Demo,
}

/// Static facts about a backend, available without instantiating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// `pretrain` must run before rows can be inserted.
    pub requires_training: bool,
    /// Results equal an exhaustive scan over the stored representation.
    pub exact: bool,
    /// Encodings the backend can store rows in.
    pub encodings: &'static [&'static str],
    /// Query-time option keys the backend reads.
    pub search_options: &'static [&'static str],
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Bruteforce,
        BackendKind::Ivf,
        BackendKind::DiskAnn,
        BackendKind::Demo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Bruteforce => "bruteforce",
            BackendKind::Ivf => "ivf",
            BackendKind::DiskAnn => "diskann",
            BackendKind::Demo => "demo",
        }
    }

    /// Look up a backend by name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        match self {
            BackendKind::Bruteforce => BackendCapabilities {
                requires_training: false,
                exact: true,
                encodings: &["float32"],
                search_options: &["search.parallelism"],
            },
            BackendKind::Ivf => BackendCapabilities {
                requires_training: true,
                exact: false,
                encodings: &["float32", "sq8"],
                search_options: &["ivf.nprobe", "search.parallelism"],
            },
            BackendKind::DiskAnn => BackendCapabilities {
                requires_training: false,
                exact: false,
                encodings: &["float32"],
                search_options: &["diskann.search_list_size"],
            },
            BackendKind::Demo => BackendCapabilities {
                requires_training: true,
                exact: false,
                encodings: &["sq8"],
                search_options: &["search.parallelism"],
            },
        }
    }

    pub fn requires_training(&self) -> bool {
        self.capabilities().requires_training
    }

    /// Instantiate the build-side implementation.
    pub fn create_writer(&self, ctx: BuildContext) -> Result<Box<dyn IndexWriter>> {
        Ok(match self {
            BackendKind::Bruteforce => Box::new(FlatWriter::bruteforce(ctx)),
            BackendKind::Demo => Box::new(FlatWriter::demo(ctx)),
            BackendKind::Ivf => Box::new(IvfWriter::new(ctx)?),
            BackendKind::DiskAnn => Box::new(DiskAnnWriter::new(ctx)?),
        })
    }

    /// Decode a payload produced by this backend's writer.
    pub fn open_reader(
        &self,
        dimension: Dimension,
        metric: DistanceType,
        payload: &[u8],
    ) -> Result<Box<dyn IndexReader>> {
        Ok(match self {
            BackendKind::Bruteforce | BackendKind::Demo => {
                Box::new(FlatReader::open(*self, dimension, payload)?)
            }
            BackendKind::Ivf => Box::new(IvfReader::open(dimension, metric, payload)?),
            BackendKind::DiskAnn => Box::new(DiskAnnReader::open(dimension, payload)?),
        })
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
