//! Structured predicates over materialized attributes.
//!
//! The engine treats a [`Predicate`] as opaque: it asks which fields the
//! predicate reads (to reject unmaterialized ones up front) and then calls
//! [`Predicate::evaluate`] per candidate. [`FieldPredicate`] is a ready-made
//! implementation for hosts that do not bring their own.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::core::types::{AttributeStore, AttributeValue, VectorId};

static NULL: AttributeValue = AttributeValue::Null;

/// Read-only view of one row's materialized attributes.
#[derive(Debug, Clone, Copy)]
pub struct AttributeRow<'a> {
    store: &'a AttributeStore,
    id: VectorId,
}

impl<'a> AttributeRow<'a> {
    pub fn new(store: &'a AttributeStore, id: VectorId) -> Self {
        AttributeRow { store, id }
    }

    pub fn id(&self) -> VectorId {
        self.id
    }

    /// Value of `field`, or `None` when the row carries no attributes.
    pub fn get(&self, field: &str) -> Option<&'a AttributeValue> {
        self.store.get(self.id, field)
    }
}

/// A boolean condition evaluated per candidate row.
///
/// Implementations are shared by concurrent scoring threads.
pub trait Predicate: Send + Sync + Debug {
    /// Fields the predicate reads.
    fn referenced_fields(&self) -> Vec<String>;

    fn evaluate(&self, row: &AttributeRow<'_>) -> bool;
}

/// Field comparisons combined with boolean connectives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldPredicate {
    Equals(String, AttributeValue),
    NotEquals(String, AttributeValue),
    In(String, Vec<AttributeValue>),
    /// Numeric range; either bound may be open. Bounds are inclusive.
    Range {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    IsNull(String),
    And(Vec<FieldPredicate>),
    Or(Vec<FieldPredicate>),
    Not(Box<FieldPredicate>),
}

impl FieldPredicate {
    pub fn eq<F: Into<String>, V: Into<AttributeValue>>(field: F, value: V) -> Self {
        FieldPredicate::Equals(field.into(), value.into())
    }

    pub fn ne<F: Into<String>, V: Into<AttributeValue>>(field: F, value: V) -> Self {
        FieldPredicate::NotEquals(field.into(), value.into())
    }

    pub fn one_of<F, I, V>(field: F, values: I) -> Self
    where
        F: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        FieldPredicate::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn range<F: Into<String>>(field: F, min: Option<f64>, max: Option<f64>) -> Self {
        FieldPredicate::Range {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn is_null<F: Into<String>>(field: F) -> Self {
        FieldPredicate::IsNull(field.into())
    }

    pub fn and(self, other: FieldPredicate) -> Self {
        match self {
            FieldPredicate::And(mut all) => {
                all.push(other);
                FieldPredicate::And(all)
            }
            this => FieldPredicate::And(vec![this, other]),
        }
    }

    pub fn or(self, other: FieldPredicate) -> Self {
        match self {
            FieldPredicate::Or(mut any) => {
                any.push(other);
                FieldPredicate::Or(any)
            }
            this => FieldPredicate::Or(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        FieldPredicate::Not(Box::new(self))
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            FieldPredicate::Equals(field, _)
            | FieldPredicate::NotEquals(field, _)
            | FieldPredicate::In(field, _)
            | FieldPredicate::Range { field, .. }
            | FieldPredicate::IsNull(field) => {
                if !out.contains(field) {
                    out.push(field.clone());
                }
            }
            FieldPredicate::And(children) | FieldPredicate::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            FieldPredicate::Not(child) => child.collect_fields(out),
        }
    }
}

impl Predicate for FieldPredicate {
    fn referenced_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    /// Rows without attributes read every field as null.
    fn evaluate(&self, row: &AttributeRow<'_>) -> bool {
        let value = |field: &str| row.get(field).unwrap_or(&NULL);
        match self {
            FieldPredicate::Equals(field, expected) => value(field).matches(expected),
            FieldPredicate::NotEquals(field, expected) => !value(field).matches(expected),
            FieldPredicate::In(field, options) => {
                let actual = value(field);
                options.iter().any(|o| actual.matches(o))
            }
            FieldPredicate::Range { field, min, max } => match value(field).as_f64() {
                Some(v) => min.is_none_or(|lo| v >= lo) && max.is_none_or(|hi| v <= hi),
                None => false,
            },
            FieldPredicate::IsNull(field) => value(field).is_null(),
            FieldPredicate::And(children) => children.iter().all(|c| c.evaluate(row)),
            FieldPredicate::Or(children) => children.iter().any(|c| c.evaluate(row)),
            FieldPredicate::Not(child) => !child.evaluate(row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RowAttributes;

    fn store() -> AttributeStore {
        let mut store = AttributeStore::new(vec!["color".into(), "price".into()]);
        let rows: [(VectorId, &str, f64); 3] = [(1, "red", 10.0), (2, "blue", 25.5), (3, "red", 40.0)];
        for (id, color, price) in rows {
            let mut row = RowAttributes::new();
            row.insert("color".into(), color.into());
            row.insert("price".into(), price.into());
            store.push(id, &row).unwrap();
        }
        store.push(4, &RowAttributes::new()).unwrap();
        store
    }

    fn matching(store: &AttributeStore, predicate: &FieldPredicate) -> Vec<VectorId> {
        (1..=5)
            .filter(|&id| predicate.evaluate(&AttributeRow::new(store, id)))
            .collect()
    }

    #[test]
    fn test_comparisons() {
        let store = store();
        assert_eq!(matching(&store, &FieldPredicate::eq("color", "red")), vec![1, 3]);
        assert_eq!(matching(&store, &FieldPredicate::ne("color", "red")), vec![2, 4, 5]);
        assert_eq!(
            matching(&store, &FieldPredicate::one_of("color", ["blue", "green"])),
            vec![2]
        );
        assert_eq!(
            matching(&store, &FieldPredicate::range("price", Some(10.0), Some(30.0))),
            vec![1, 2]
        );
        assert_eq!(matching(&store, &FieldPredicate::is_null("price")), vec![4, 5]);
    }

    #[test]
    fn test_connectives() {
        let store = store();
        let cheap_red = FieldPredicate::eq("color", "red").and(FieldPredicate::range("price", None, Some(20.0)));
        assert_eq!(matching(&store, &cheap_red), vec![1]);

        let either = FieldPredicate::eq("color", "blue").or(FieldPredicate::range("price", Some(30.0), None));
        assert_eq!(matching(&store, &either), vec![2, 3]);

        assert_eq!(matching(&store, &either.not()), vec![1, 4, 5]);
    }

    #[test]
    fn test_referenced_fields() {
        let predicate = FieldPredicate::eq("color", "red")
            .and(FieldPredicate::range("price", Some(1.0), None))
            .and(FieldPredicate::ne("color", "blue").not());
        assert_eq!(predicate.referenced_fields(), vec!["color", "price"]);
    }
}
