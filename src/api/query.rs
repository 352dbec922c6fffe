//! The query descriptor.

use std::fmt;
use std::sync::Arc;

use crate::api::predicate::Predicate;
use crate::core::distance::DistanceType;
use crate::core::options::RuntimeOptions;
use crate::core::types::VectorId;

/// Fast id test applied before scoring. Called concurrently from scoring
/// threads, so it must not mutate shared state.
pub type PreFilter = Arc<dyn Fn(VectorId) -> bool + Send + Sync>;

/// An immutable top-k request.
///
/// Fields are shared behind `Arc`, so cloning a descriptor or deriving one
/// with [`VectorSearch::replace_pre_filter`] never copies the query vector.
#[derive(Clone)]
pub struct VectorSearch {
    field_name: Arc<str>,
    limit: usize,
    query: Arc<[f32]>,
    pre_filter: Option<PreFilter>,
    predicate: Option<Arc<dyn Predicate>>,
    distance_type: Option<DistanceType>,
    options: Arc<RuntimeOptions>,
}

impl VectorSearch {
    pub fn new<F, Q>(field_name: F, query: Q, limit: usize) -> Self
    where
        F: Into<Arc<str>>,
        Q: Into<Arc<[f32]>>,
    {
        VectorSearch {
            field_name: field_name.into(),
            limit,
            query: query.into(),
            pre_filter: None,
            predicate: None,
            distance_type: None,
            options: Arc::new(RuntimeOptions::new()),
        }
    }

    pub fn with_pre_filter<P>(mut self, pre_filter: P) -> Self
    where
        P: Fn(VectorId) -> bool + Send + Sync + 'static,
    {
        self.pre_filter = Some(Arc::new(pre_filter));
        self
    }

    pub fn with_predicate<P: Predicate + 'static>(mut self, predicate: P) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Expected metric; searching an index built with another metric fails.
    pub fn with_distance_type(mut self, distance_type: DistanceType) -> Self {
        self.distance_type = Some(distance_type);
        self
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    pub fn with_option<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        Arc::make_mut(&mut self.options).insert(key, value);
        self
    }

    /// A new descriptor that differs only in its pre-filter.
    pub fn replace_pre_filter(&self, pre_filter: Option<PreFilter>) -> Self {
        VectorSearch {
            pre_filter,
            ..self.clone()
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn query(&self) -> &[f32] {
        &self.query
    }

    pub fn pre_filter(&self) -> Option<&PreFilter> {
        self.pre_filter.as_ref()
    }

    pub fn predicate(&self) -> Option<&dyn Predicate> {
        self.predicate.as_deref()
    }

    pub fn distance_type(&self) -> Option<DistanceType> {
        self.distance_type
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }
}

impl fmt::Debug for VectorSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorSearch")
            .field("field_name", &self.field_name)
            .field("limit", &self.limit)
            .field("dimension", &self.query.len())
            .field("pre_filter", &self.pre_filter.is_some())
            .field("predicate", &self.predicate)
            .field("distance_type", &self.distance_type)
            .field("options", &self.options)
            .finish()
    }
}
