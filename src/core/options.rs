//! Option bundles for builders, searchers, queries and I/O.
//!
//! Host engines usually hand over a flat `string -> string` table
//! configuration. [`fetch_prefixed_options`] extracts the entries that belong
//! to Sagitta, and the `from_map` constructors turn them into typed options.
//! Keys a component does not recognise are ignored; a recognised key with a
//! malformed value is an [`SagittaError::InvalidArgument`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::distance::DistanceType;
use crate::error::{Result, SagittaError};
use crate::storage::{Storage, StorageConfig, StorageFactory};
use crate::util::simd::DistanceKernel;

/// Prefix under which host table options carry Sagitta settings.
pub const OPTION_PREFIX: &str = "sagitta.";

pub const KEY_INDEX_TYPE: &str = "index.type";
pub const KEY_DIMENSION: &str = "index.dimension";
pub const KEY_DISTANCE: &str = "distance.metric";
pub const KEY_KERNEL: &str = "distance.kernel";
pub const KEY_MATERIALIZED_FIELDS: &str = "index.materialized_fields";
pub const KEY_PARALLELISM: &str = "search.parallelism";

/// Keep the entries whose key starts with `prefix`, with the prefix removed.
pub fn fetch_prefixed_options<'a, I>(options: I, prefix: &str) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    options
        .into_iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .filter(|stripped| !stripped.is_empty())
                .map(|stripped| (stripped.to_string(), value.clone()))
        })
        .collect()
}

/// Free-form runtime options with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOptions(BTreeMap<String, String>);

impl RuntimeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Parse a recognised key, returning `None` when it is absent.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                SagittaError::invalid_argument(format!("Invalid value '{raw}' for {key}: {e}"))
            }),
        }
    }

    /// Parse a recognised key, falling back to `default` when absent.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merged(&self, other: &RuntimeOptions) -> RuntimeOptions {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        RuntimeOptions(merged)
    }
}

impl From<BTreeMap<String, String>> for RuntimeOptions {
    fn from(map: BTreeMap<String, String>) -> Self {
        RuntimeOptions(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RuntimeOptions {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        RuntimeOptions(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Configuration consumed by `IndexBuilder::create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderOptions {
    /// Backend name (`bruteforce`, `ivf`, `diskann`, `demo`).
    pub index_type: String,
    /// Vector dimension.
    pub dimension: usize,
    /// Metric baked into the index.
    pub distance_type: DistanceType,
    /// Distance kernel used while building.
    pub kernel: DistanceKernel,
    /// Attribute fields captured for structured predicates.
    pub materialized_fields: Vec<String>,
    /// Backend specific options.
    pub options: RuntimeOptions,
}

impl BuilderOptions {
    pub fn new<S: Into<String>>(index_type: S, dimension: usize, distance_type: DistanceType) -> Self {
        Self {
            index_type: index_type.into(),
            dimension,
            distance_type,
            kernel: DistanceKernel::default(),
            materialized_fields: Vec::new(),
            options: RuntimeOptions::new(),
        }
    }

    pub fn with_option<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key, value);
        self
    }

    pub fn with_materialized_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.materialized_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kernel(mut self, kernel: DistanceKernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Parse builder options from an already prefix-stripped map.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let options = RuntimeOptions::from(map.clone());

        let index_type = options
            .get(KEY_INDEX_TYPE)
            .ok_or_else(|| SagittaError::invalid_argument(format!("Missing {KEY_INDEX_TYPE}")))?
            .to_string();
        let dimension = options
            .parse::<usize>(KEY_DIMENSION)?
            .ok_or_else(|| SagittaError::invalid_argument(format!("Missing {KEY_DIMENSION}")))?;
        let distance_type = match options.get(KEY_DISTANCE) {
            Some(raw) => DistanceType::parse_str(raw)?,
            None => DistanceType::default(),
        };
        let kernel = parse_kernel(&options)?;
        let materialized_fields = options
            .get(KEY_MATERIALIZED_FIELDS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            index_type,
            dimension,
            distance_type,
            kernel,
            materialized_fields,
            options,
        })
    }

    /// Reject option combinations no backend can honour.
    pub fn validate(&self) -> Result<()> {
        validate_common(self.dimension, self.distance_type)?;

        let mut seen = self.materialized_fields.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.materialized_fields.len() {
            return Err(SagittaError::invalid_argument(
                "Materialized fields must be unique",
            ));
        }
        Ok(())
    }
}

/// Configuration consumed by `IndexSearcher::create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearcherOptions {
    /// Backend the opened index must have been built with.
    pub index_type: String,
    /// Dimension the opened index must have.
    pub dimension: usize,
    /// Metric the opened index must have.
    pub distance_type: DistanceType,
    /// Distance kernel used while scoring.
    pub kernel: DistanceKernel,
    /// Worker threads used to score candidates.
    pub parallelism: usize,
    /// Default runtime options applied to every query.
    pub options: RuntimeOptions,
}

impl SearcherOptions {
    pub fn new<S: Into<String>>(index_type: S, dimension: usize, distance_type: DistanceType) -> Self {
        Self {
            index_type: index_type.into(),
            dimension,
            distance_type,
            kernel: DistanceKernel::default(),
            parallelism: num_cpus::get(),
            options: RuntimeOptions::new(),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_option<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key, value);
        self
    }

    pub fn with_kernel(mut self, kernel: DistanceKernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Parse searcher options from an already prefix-stripped map.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let builder = BuilderOptions::from_map(map)?;
        let parallelism = builder
            .options
            .parse_or(KEY_PARALLELISM, num_cpus::get())?;

        Ok(Self {
            index_type: builder.index_type,
            dimension: builder.dimension,
            distance_type: builder.distance_type,
            kernel: builder.kernel,
            parallelism,
            options: builder.options,
        })
    }

    pub fn validate(&self) -> Result<()> {
        validate_common(self.dimension, self.distance_type)?;
        if self.parallelism == 0 {
            return Err(SagittaError::invalid_argument(
                "Parallelism must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Per-call search options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Runtime options for this call; override searcher defaults.
    pub options: RuntimeOptions,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_option<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key, value);
        self
    }
}

/// Where an index is dumped to or opened from.
#[derive(Clone)]
pub struct IoOptions {
    /// Storage resolving the named file.
    pub storage: Arc<dyn Storage>,
    /// File name within the storage.
    pub name: String,
    /// Sync the output before it is published.
    pub sync: bool,
}

impl IoOptions {
    pub fn new<S: Into<String>>(storage: Arc<dyn Storage>, name: S) -> Self {
        Self {
            storage,
            name: name.into(),
            sync: true,
        }
    }

    /// Build the storage described by `config` and point at `name` in it.
    pub fn from_config<S: Into<String>>(config: StorageConfig, name: S) -> Result<Self> {
        Ok(Self::new(StorageFactory::create(config)?, name))
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

impl fmt::Debug for IoOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoOptions")
            .field("storage", &self.storage)
            .field("name", &self.name)
            .field("sync", &self.sync)
            .finish()
    }
}

fn parse_kernel(options: &RuntimeOptions) -> Result<DistanceKernel> {
    match options.get(KEY_KERNEL) {
        None => Ok(DistanceKernel::default()),
        Some(raw) => DistanceKernel::parse_str(raw).ok_or_else(|| {
            SagittaError::invalid_argument(format!("Unknown distance kernel: {raw}"))
        }),
    }
}

fn validate_common(dimension: usize, distance_type: DistanceType) -> Result<()> {
    if dimension == 0 {
        return Err(SagittaError::invalid_argument(
            "Dimension must be greater than zero",
        ));
    }
    if !distance_type.is_known() {
        return Err(SagittaError::invalid_argument(
            "Distance metric must be euclidean, inner_product or cosine",
        ));
    }
    Ok(())
}
