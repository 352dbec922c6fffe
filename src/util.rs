//! Shared utility modules used across Sagitta components.

pub mod simd;
pub mod vectors;
