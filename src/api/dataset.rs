//! Batch sources consumed by the builder.

use crate::core::types::{Dimension, VectorId};
use crate::error::{Result, SagittaError};

/// A pull-based producer of `(vectors, ids)` batches.
///
/// Each call to [`Dataset::next_batch`] clears both buffers and refills
/// them with the next batch, returning its row count. A return value of `0`
/// signals the end of the stream.
pub trait Dataset {
    /// Dimension of every produced vector.
    fn dim(&self) -> Dimension;

    /// Total rows this dataset will produce, or `0` if unknown.
    fn total_size(&self) -> usize {
        0
    }

    fn next_batch(&mut self, vectors: &mut Vec<f32>, ids: &mut Vec<VectorId>) -> Result<usize>;
}

impl<D: Dataset + ?Sized> Dataset for Box<D> {
    fn dim(&self) -> Dimension {
        (**self).dim()
    }

    fn total_size(&self) -> usize {
        (**self).total_size()
    }

    fn next_batch(&mut self, vectors: &mut Vec<f32>, ids: &mut Vec<VectorId>) -> Result<usize> {
        (**self).next_batch(vectors, ids)
    }
}

/// A [`Dataset`] over owned row-major buffers.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    dimension: Dimension,
    vectors: Vec<f32>,
    ids: Vec<VectorId>,
    batch_size: usize,
    cursor: usize,
}

impl InMemoryDataset {
    pub const DEFAULT_BATCH_SIZE: usize = 1024;

    pub fn new(dimension: Dimension, vectors: Vec<f32>, ids: Vec<VectorId>) -> Result<Self> {
        if dimension == 0 {
            return Err(SagittaError::invalid_argument(
                "Dataset dimension must be greater than zero",
            ));
        }
        if vectors.len() != ids.len() * dimension {
            return Err(SagittaError::invalid_argument(format!(
                "Dataset holds {} values for {} ids of dimension {dimension}",
                vectors.len(),
                ids.len()
            )));
        }

        Ok(Self {
            dimension,
            vectors,
            ids,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            cursor: 0,
        })
    }

    /// Dataset assigning ids `0..n` in row order.
    pub fn with_sequential_ids(dimension: Dimension, vectors: Vec<f32>) -> Result<Self> {
        let rows = if dimension == 0 {
            0
        } else {
            vectors.len() / dimension
        };
        Self::new(dimension, vectors, (0..rows as VectorId).collect())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Restart the stream from the first row.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl Dataset for InMemoryDataset {
    fn dim(&self) -> Dimension {
        self.dimension
    }

    fn total_size(&self) -> usize {
        self.ids.len()
    }

    fn next_batch(&mut self, vectors: &mut Vec<f32>, ids: &mut Vec<VectorId>) -> Result<usize> {
        vectors.clear();
        ids.clear();

        let start = self.cursor;
        let end = (start + self.batch_size).min(self.ids.len());
        if start >= end {
            return Ok(0);
        }

        ids.extend_from_slice(&self.ids[start..end]);
        vectors.extend_from_slice(&self.vectors[start * self.dimension..end * self.dimension]);
        self.cursor = end;
        Ok(end - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_clear_and_refill() {
        let vectors: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let mut dataset = InMemoryDataset::with_sequential_ids(2, vectors)
            .unwrap()
            .with_batch_size(2);
        assert_eq!(dataset.total_size(), 5);

        let mut vectors = vec![99.0; 7];
        let mut ids = vec![42];
        let mut seen = Vec::new();
        loop {
            let rows = dataset.next_batch(&mut vectors, &mut ids).unwrap();
            if rows == 0 {
                break;
            }
            assert_eq!(ids.len(), rows);
            assert_eq!(vectors.len(), rows * 2);
            seen.extend_from_slice(&ids);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(vectors.is_empty());
        assert!(ids.is_empty());

        dataset.rewind();
        assert_eq!(dataset.next_batch(&mut vectors, &mut ids).unwrap(), 2);
        assert_eq!(vectors, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_rejects_ragged_buffers() {
        assert!(InMemoryDataset::new(3, vec![0.0; 5], vec![1, 2]).is_err());
        assert!(InMemoryDataset::new(0, Vec::new(), Vec::new()).is_err());
    }
}
