//! Checks and transforms applied to caller-supplied vectors.

use std::borrow::Cow;

use crate::core::distance::DistanceType;
use crate::core::types::Dimension;
use crate::error::{Result, SagittaError};
use crate::util::simd::normalize;

/// Reject NaN and infinite components, naming the offending row.
pub fn check_finite(values: &[f32], dimension: Dimension) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        None => Ok(()),
        Some(pos) => Err(SagittaError::invalid_argument(format!(
            "Row {} contains a non-finite value (NaN or infinity)",
            pos / dimension.max(1)
        ))),
    }
}

/// Rows in the representation the metric scores.
///
/// Cosine rows are scaled to unit length; other metrics borrow the input.
pub fn prepare_rows(metric: DistanceType, values: &[f32], dimension: Dimension) -> Cow<'_, [f32]> {
    if !metric.normalizes() || dimension == 0 {
        return Cow::Borrowed(values);
    }

    let mut owned = values.to_vec();
    for row in owned.chunks_exact_mut(dimension) {
        normalize(row);
    }
    Cow::Owned(owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_finite() {
        check_finite(&[1.0, -2.0, 0.0, 3.5], 2).unwrap();
        let err = check_finite(&[1.0, 2.0, f32::NAN, 0.0], 2).unwrap_err();
        assert!(err.to_string().contains("Row 1"));
        assert!(check_finite(&[f32::INFINITY], 1).is_err());
    }

    #[test]
    fn test_prepare_rows() {
        let rows = [3.0, 4.0, 0.0, 2.0];
        assert!(matches!(
            prepare_rows(DistanceType::Euclidean, &rows, 2),
            Cow::Borrowed(_)
        ));

        let normalized = prepare_rows(DistanceType::Cosine, &rows, 2);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
        assert_eq!(&normalized[2..], &[0.0, 1.0]);
    }
}
