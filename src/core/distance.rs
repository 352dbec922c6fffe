//! Distance metrics and ranking order.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagittaError};
use crate::util::simd::DistanceKernel;

/// Distance or similarity metric baked into an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DistanceType {
    /// Euclidean (L2) distance, smaller is more similar.
    #[default]
    Euclidean,
    /// Inner product, larger is more similar.
    InnerProduct,
    /// Cosine similarity, larger is more similar.
    Cosine,
    /// Placeholder for metrics this build does not understand.
    Unknown,
}

impl DistanceType {
    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceType::Euclidean => "euclidean",
            DistanceType::InnerProduct => "inner_product",
            DistanceType::Cosine => "cosine",
            DistanceType::Unknown => "unknown",
        }
    }

    /// Parse a distance metric from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceType::Euclidean),
            "inner_product" | "ip" | "dot_product" | "dot" => Ok(DistanceType::InnerProduct),
            "cosine" => Ok(DistanceType::Cosine),
            "unknown" => Ok(DistanceType::Unknown),
            _ => Err(SagittaError::invalid_argument(format!(
                "Unknown distance metric: {s}"
            ))),
        }
    }

    /// Stable on-disk code.
    pub fn code(&self) -> u8 {
        match self {
            DistanceType::Euclidean => 1,
            DistanceType::InnerProduct => 2,
            DistanceType::Cosine => 3,
            DistanceType::Unknown => 128,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DistanceType::Euclidean),
            2 => Some(DistanceType::InnerProduct),
            3 => Some(DistanceType::Cosine),
            128 => Some(DistanceType::Unknown),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DistanceType::Unknown)
    }

    /// Whether a larger value means a better match.
    pub fn higher_is_better(&self) -> bool {
        matches!(self, DistanceType::InnerProduct | DistanceType::Cosine)
    }

    /// Whether stored and query vectors are normalized to unit length.
    pub fn normalizes(&self) -> bool {
        matches!(self, DistanceType::Cosine)
    }

    /// Build a scorer for this metric.
    pub fn scorer(&self, kernel: DistanceKernel) -> Result<Scorer> {
        if !self.is_known() {
            return Err(SagittaError::invalid_argument(
                "Cannot score vectors with an unknown distance metric",
            ));
        }
        Ok(Scorer {
            metric: *self,
            kernel,
        })
    }
}

impl fmt::Display for DistanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Evaluates one metric with one kernel.
///
/// `score` is the value reported to callers. `cost` maps a score onto a
/// scale where smaller is always better, which is what collectors and graph
/// traversal order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scorer {
    metric: DistanceType,
    kernel: DistanceKernel,
}

impl Scorer {
    pub fn metric(&self) -> DistanceType {
        self.metric
    }

    pub fn kernel(&self) -> DistanceKernel {
        self.kernel
    }

    /// Reported value: L2 distance, inner product or cosine similarity.
    ///
    /// Cosine assumes both inputs were normalized beforehand.
    #[inline]
    pub fn score(&self, query: &[f32], candidate: &[f32]) -> f32 {
        match self.metric {
            DistanceType::Euclidean => self.kernel.l2_squared(query, candidate).sqrt(),
            DistanceType::InnerProduct | DistanceType::Cosine => {
                self.kernel.dot(query, candidate)
            }
            DistanceType::Unknown => f32::NAN,
        }
    }

    /// Rank key, smaller is better. A NaN score ranks after everything.
    #[inline]
    pub fn cost(&self, score: f32) -> f32 {
        if score.is_nan() {
            f32::INFINITY
        } else if self.metric.higher_is_better() {
            -score
        } else {
            score
        }
    }

    /// Order two scores, better first.
    #[inline]
    pub fn compare(&self, a: f32, b: f32) -> Ordering {
        self.cost(a).total_cmp(&self.cost(b))
    }
}
