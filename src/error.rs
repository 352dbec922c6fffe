//! Error types for the Sagitta library.
//!
//! Every fallible operation in Sagitta returns a [`Result`]. Errors are
//! represented by the [`SagittaError`] enum, and each variant maps onto a
//! stable [`ErrorCode`] so that host engines can branch on the category of a
//! failure without matching on message text.
//!
//! # Examples
//!
//! ```
//! use sagitta::error::{ErrorCode, Result, SagittaError};
//!
//! fn example_operation() -> Result<()> {
//!     Err(SagittaError::invalid_argument("limit must be positive"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => assert_eq!(e.code(), ErrorCode::InvalidArgument),
//! }
//! ```

use std::fmt;
use std::io;

use thiserror::Error;

/// Stable error categories.
///
/// The set of codes is part of the public contract; new error variants must
/// map onto one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    StateViolation,
    NotFound,
    Io,
    ResourceExhausted,
    DimensionMismatch,
    MetricMismatch,
    FieldNotMaterialized,
    Unimplemented,
    Internal,
}

impl ErrorCode {
    /// Get the canonical name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::StateViolation => "state_violation",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Io => "io",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::DimensionMismatch => "dimension_mismatch",
            ErrorCode::MetricMismatch => "metric_mismatch",
            ErrorCode::FieldNotMaterialized => "field_not_materialized",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for Sagitta operations.
#[derive(Error, Debug)]
pub enum SagittaError {
    /// I/O errors (file operations, storage backends, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid caller input (bad limit, malformed option, non-finite values).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation issued in the wrong lifecycle state.
    #[error("State violation: {0}")]
    StateViolation(String),

    /// Unknown backend, missing file, missing field.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Memory budget or arena exhausted.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Vector length differs from the index dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Query or opened index metric differs from the configured metric.
    #[error("Metric mismatch: index uses {expected}, got {actual}")]
    MetricMismatch { expected: String, actual: String },

    /// A predicate references a field that was not materialized at build time.
    #[error("Field not materialized: {0}")]
    FieldNotMaterialized(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Corrupted or foreign index bytes.
    #[error("Corrupted index: {0}")]
    Corrupted(String),

    /// Not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Broken internal invariant.
    #[error("Internal error: {0}")]
    Internal(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for operations that may fail with SagittaError.
pub type Result<T> = std::result::Result<T, SagittaError>;

/// Outcome of an operation without a payload.
pub type Status = Result<()>;

impl From<bincode::Error> for SagittaError {
    fn from(err: bincode::Error) -> Self {
        SagittaError::SerializationError(err.to_string())
    }
}

impl SagittaError {
    /// Map this error onto its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SagittaError::Io(_)
            | SagittaError::Storage(_)
            | SagittaError::SerializationError(_)
            | SagittaError::Corrupted(_)
            | SagittaError::Json(_) => ErrorCode::Io,
            SagittaError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            SagittaError::StateViolation(_) => ErrorCode::StateViolation,
            SagittaError::NotFound(_) => ErrorCode::NotFound,
            SagittaError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            SagittaError::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            SagittaError::MetricMismatch { .. } => ErrorCode::MetricMismatch,
            SagittaError::FieldNotMaterialized(_) => ErrorCode::FieldNotMaterialized,
            SagittaError::NotImplemented(_) => ErrorCode::Unimplemented,
            SagittaError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        SagittaError::InvalidArgument(msg.into())
    }

    /// Create a new state violation error.
    pub fn state_violation<S: Into<String>>(msg: S) -> Self {
        SagittaError::StateViolation(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        SagittaError::NotFound(msg.into())
    }

    /// Create a new resource exhausted error.
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        SagittaError::ResourceExhausted(msg.into())
    }

    /// Create a new dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        SagittaError::DimensionMismatch { expected, actual }
    }

    /// Create a new metric mismatch error.
    pub fn metric_mismatch<E: ToString, A: ToString>(expected: E, actual: A) -> Self {
        SagittaError::MetricMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a new field not materialized error.
    pub fn field_not_materialized<S: Into<String>>(field: S) -> Self {
        SagittaError::FieldNotMaterialized(field.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SagittaError::Storage(msg.into())
    }

    /// Create a new corruption error.
    pub fn corrupted<S: Into<String>>(msg: S) -> Self {
        SagittaError::Corrupted(msg.into())
    }

    /// Create a new not implemented error.
    pub fn unimplemented<S: Into<String>>(msg: S) -> Self {
        SagittaError::NotImplemented(msg.into())
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        SagittaError::Internal(msg.into())
    }
}
