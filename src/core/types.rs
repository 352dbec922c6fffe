//! Identifiers, scalar attributes and index metadata.

use std::collections::HashMap;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagittaError};

/// Caller-assigned vector identifier, unique within one index.
pub type VectorId = u64;

/// Number of components in every vector of an index.
pub type Dimension = usize;

/// Snapshot of serialized index metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Total number of vectors.
    pub count: u64,
    /// Vector dimension.
    pub dim: Dimension,
}

/// A scalar value attached to a row for structured predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum AttributeValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttributeValue {
    /// Numeric view of this value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Loose equality: integers and floats compare numerically.
    pub fn matches(&self, other: &AttributeValue) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(value)
    }
}

/// Attributes supplied for one row at insert time.
pub type RowAttributes = HashMap<String, AttributeValue>;

/// Columnar store of the fields materialized during build.
///
/// Rows are addressed by [`VectorId`]. Ids inserted without attributes have
/// no row and read as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeStore {
    fields: Vec<String>,
    ids: Vec<VectorId>,
    columns: Vec<Vec<AttributeValue>>,
    #[serde(skip)]
    rows: AHashMap<VectorId, usize>,
}

impl AttributeStore {
    /// Create an empty store materializing the given fields.
    pub fn new(fields: Vec<String>) -> Self {
        let columns = vec![Vec::new(); fields.len()];
        Self {
            fields,
            ids: Vec::new(),
            columns,
            rows: AHashMap::new(),
        }
    }

    /// Names of the materialized fields.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn is_materialized(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Number of rows carrying attributes.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append one row. Fields that are not materialized are dropped.
    pub fn push(&mut self, id: VectorId, attributes: &RowAttributes) -> Result<()> {
        if self.rows.contains_key(&id) {
            return Err(SagittaError::invalid_argument(format!(
                "Attributes for vector {id} were already inserted"
            )));
        }

        for (field, column) in self.fields.iter().zip(self.columns.iter_mut()) {
            column.push(attributes.get(field).cloned().unwrap_or_default());
        }
        self.rows.insert(id, self.ids.len());
        self.ids.push(id);
        Ok(())
    }

    /// Look up a single field of a row.
    pub fn get(&self, id: VectorId, field: &str) -> Option<&AttributeValue> {
        let row = *self.rows.get(&id)?;
        let column = self.fields.iter().position(|f| f == field)?;
        self.columns[column].get(row)
    }

    pub fn contains(&self, id: VectorId) -> bool {
        self.rows.contains_key(&id)
    }

    /// Rebuild the id lookup table after deserialization.
    pub(crate) fn rebuild_index(&mut self) -> Result<()> {
        if self.columns.len() != self.fields.len()
            || self.columns.iter().any(|c| c.len() != self.ids.len())
        {
            return Err(SagittaError::corrupted(
                "Attribute columns do not line up with row ids",
            ));
        }

        self.rows = self
            .ids
            .iter()
            .enumerate()
            .map(|(row, id)| (*id, row))
            .collect();
        Ok(())
    }

    /// Estimated heap usage in bytes.
    pub fn estimated_memory_usage(&self) -> usize {
        let per_row = 8 + 16 + self.fields.len() * std::mem::size_of::<AttributeValue>();
        self.ids.len() * per_row
    }
}
