//! Candidate filtering.

use std::fmt;

use crate::api::predicate::{AttributeRow, Predicate};
use crate::core::types::{AttributeStore, VectorId};
use crate::error::{Result, SagittaError};

/// Borrowed form of a query pre-filter.
pub type PreFilterFn = dyn Fn(VectorId) -> bool + Send + Sync;

/// Decides whether a candidate id may be scored.
///
/// The pre-filter runs first since it is a plain id test; the structured
/// predicate is only evaluated for ids that pass it. Both are shared across
/// scoring threads, so `CandidateFilter` is `Sync` and never mutates.
#[derive(Clone, Copy)]
pub struct CandidateFilter<'a> {
    pre_filter: Option<&'a PreFilterFn>,
    predicate: Option<&'a dyn Predicate>,
    attributes: &'a AttributeStore,
}

impl<'a> CandidateFilter<'a> {
    pub fn new(attributes: &'a AttributeStore) -> Self {
        CandidateFilter {
            pre_filter: None,
            predicate: None,
            attributes,
        }
    }

    pub fn with_pre_filter(mut self, pre_filter: Option<&'a PreFilterFn>) -> Self {
        self.pre_filter = pre_filter;
        self
    }

    /// Attach a structured predicate after checking that every field it reads
    /// was materialized.
    pub fn with_predicate(mut self, predicate: Option<&'a dyn Predicate>) -> Result<Self> {
        if let Some(predicate) = predicate {
            for field in predicate.referenced_fields() {
                if !self.attributes.is_materialized(&field) {
                    return Err(SagittaError::field_not_materialized(field));
                }
            }
        }
        self.predicate = predicate;
        Ok(self)
    }

    /// Whether every id passes.
    pub fn is_pass_through(&self) -> bool {
        self.pre_filter.is_none() && self.predicate.is_none()
    }

    #[inline]
    pub fn accepts(&self, id: VectorId) -> bool {
        if let Some(pre_filter) = self.pre_filter {
            if !pre_filter(id) {
                return false;
            }
        }
        match self.predicate {
            Some(predicate) => predicate.evaluate(&AttributeRow::new(self.attributes, id)),
            None => true,
        }
    }
}

impl fmt::Debug for CandidateFilter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateFilter")
            .field("pre_filter", &self.pre_filter.is_some())
            .field("predicate", &self.predicate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::predicate::FieldPredicate;
    use crate::core::types::{AttributeValue, RowAttributes};
    use crate::error::ErrorCode;

    fn store() -> AttributeStore {
        let mut store = AttributeStore::new(vec!["color".into()]);
        for (id, color) in [(1, "red"), (2, "blue"), (3, "red")] {
            let mut row = RowAttributes::new();
            row.insert("color".into(), AttributeValue::from(color));
            store.push(id, &row).unwrap();
        }
        store
    }

    #[test]
    fn test_pass_through() {
        let store = store();
        let filter = CandidateFilter::new(&store);
        assert!(filter.is_pass_through());
        assert!(filter.accepts(42));
    }

    #[test]
    fn test_pre_filter_then_predicate() {
        let store = store();
        let pre_filter = |id: VectorId| id != 3;
        let predicate = FieldPredicate::eq("color", "red");

        let filter = CandidateFilter::new(&store)
            .with_pre_filter(Some(&pre_filter))
            .with_predicate(Some(&predicate))
            .unwrap();

        assert!(filter.accepts(1));
        assert!(!filter.accepts(2));
        assert!(!filter.accepts(3));
        assert!(!filter.accepts(4));
    }

    #[test]
    fn test_unmaterialized_field_is_rejected() {
        let store = store();
        let predicate = FieldPredicate::eq("size", 3i64);
        let err = CandidateFilter::new(&store)
            .with_predicate(Some(&predicate))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FieldNotMaterialized);
    }
}
