//! Distance kernels.
//!
//! Kernels are a pluggable strategy: [`DistanceKernel::Scalar`] is the
//! reference implementation and [`DistanceKernel::Simd`] processes eight lanes
//! at a time with the `wide` crate. Both produce the same results up to
//! floating point reassociation.

use serde::{Deserialize, Serialize};
use wide::f32x8;

/// Strategy used to evaluate inner products and squared L2 distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DistanceKernel {
    Scalar,
    #[default]
    Simd,
}

impl DistanceKernel {
    /// Inner product of two equally sized slices.
    #[inline]
    pub fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceKernel::Scalar => scalar::dot(a, b),
            DistanceKernel::Simd => simd_wide::dot(a, b),
        }
    }

    /// Squared Euclidean distance of two equally sized slices.
    #[inline]
    pub fn l2_squared(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceKernel::Scalar => scalar::l2_squared(a, b),
            DistanceKernel::Simd => simd_wide::l2_squared(a, b),
        }
    }

    /// Parse a kernel name (`scalar` or `simd`).
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "scalar" => Some(DistanceKernel::Scalar),
            "simd" => Some(DistanceKernel::Simd),
            _ => None,
        }
    }
}

/// Reference kernels.
pub mod scalar {
    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
    }
}

/// Kernels vectorized with `f32x8`.
pub mod simd_wide {
    use super::f32x8;

    #[inline]
    fn load(chunk: &[f32]) -> f32x8 {
        f32x8::new([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ])
    }

    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        let mut acc = f32x8::splat(0.0);
        let a_chunks = a.chunks_exact(8);
        let b_chunks = b.chunks_exact(8);
        let a_rem = a_chunks.remainder();
        let b_rem = b_chunks.remainder();

        for (x, y) in a_chunks.zip(b_chunks) {
            acc = acc + load(x) * load(y);
        }

        acc.reduce_add() + super::scalar::dot(a_rem, b_rem)
    }

    pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
        let mut acc = f32x8::splat(0.0);
        let a_chunks = a.chunks_exact(8);
        let b_chunks = b.chunks_exact(8);
        let a_rem = a_chunks.remainder();
        let b_rem = b_chunks.remainder();

        for (x, y) in a_chunks.zip(b_chunks) {
            let diff = load(x) - load(y);
            acc = acc + diff * diff;
        }

        acc.reduce_add() + super::scalar::l2_squared(a_rem, b_rem)
    }
}

/// Scale a vector to unit length in place. Zero vectors are left unchanged.
pub fn normalize(values: &mut [f32]) {
    let norm = scalar::dot(values, values).sqrt();
    if norm > 0.0 {
        for value in values.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize, offset: f32) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.37 + offset).sin()).collect()
    }

    #[test]
    fn test_kernels_agree() {
        for len in [1, 7, 8, 9, 31, 64, 100] {
            let a = sample(len, 0.1);
            let b = sample(len, 1.3);

            let dot_s = DistanceKernel::Scalar.dot(&a, &b);
            let dot_w = DistanceKernel::Simd.dot(&a, &b);
            assert!((dot_s - dot_w).abs() < 1e-4, "dot mismatch at len {len}");

            let l2_s = DistanceKernel::Scalar.l2_squared(&a, &b);
            let l2_w = DistanceKernel::Simd.l2_squared(&a, &b);
            assert!((l2_s - l2_w).abs() < 1e-4, "l2 mismatch at len {len}");
        }
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_parse_kernel() {
        assert_eq!(DistanceKernel::parse_str("SIMD"), Some(DistanceKernel::Simd));
        assert_eq!(DistanceKernel::parse_str("scalar"), Some(DistanceKernel::Scalar));
        assert_eq!(DistanceKernel::parse_str("avx"), None);
    }
}
