//! Exhaustive-scan backends.
//!
//! `bruteforce` keeps float32 rows and needs no training. `demo` keeps 8-bit
//! scalar codes whose per-dimension ranges are learned by `pretrain`; it is
//! the smallest backend that exercises the full training lifecycle.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::registry::BackendKind;
use crate::backend::traits::{BackendOutput, BuildContext, IndexReader, IndexWriter, SearchContext};
use crate::core::memory::SearchSession;
use crate::core::types::{Dimension, VectorId};
use crate::encode::{EncodedVectors, EncoderModel, EncodingKind};
use crate::error::{Result, SagittaError};
use crate::search::{Candidate, RowOutcome, ScanParams, scan_rows};

#[derive(Debug, Serialize, Deserialize)]
struct FlatIndex {
    vectors: EncodedVectors,
}

#[derive(Debug)]
pub struct FlatWriter {
    kind: BackendKind,
    ctx: BuildContext,
    vectors: Option<EncodedVectors>,
}

impl FlatWriter {
    pub fn bruteforce(ctx: BuildContext) -> Self {
        let model = EncoderModel::Float32(crate::encode::Float32Encoder::new(ctx.dimension));
        FlatWriter {
            kind: BackendKind::Bruteforce,
            ctx,
            vectors: Some(EncodedVectors::new(model)),
        }
    }

    pub fn demo(ctx: BuildContext) -> Self {
        FlatWriter {
            kind: BackendKind::Demo,
            ctx,
            vectors: None,
        }
    }
}

impl IndexWriter for FlatWriter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn train(&mut self, sample: &[f32]) -> Result<()> {
        if self.kind == BackendKind::Bruteforce {
            return Ok(());
        }
        let model = EncoderModel::train(EncodingKind::Sq8, self.ctx.dimension, sample)?;
        debug!(rows = sample.len() / self.ctx.dimension, "Trained demo scalar quantizer");
        self.vectors = Some(EncodedVectors::new(model));
        Ok(())
    }

    fn insert(&mut self, ids: &[VectorId], vectors: &[f32]) -> Result<()> {
        self.vectors
            .as_mut()
            .ok_or_else(|| SagittaError::state_violation("Quantizer has not been trained"))?
            .push_batch(ids, vectors)
    }

    fn len(&self) -> usize {
        self.vectors.as_ref().map_or(0, EncodedVectors::len)
    }

    fn estimated_memory_usage(&self) -> usize {
        self.vectors.as_ref().map_or(0, EncodedVectors::memory_usage)
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let vectors = self
            .vectors
            .take()
            .ok_or_else(|| SagittaError::state_violation("Quantizer has not been trained"))?;
        Ok(bincode::serialize(&FlatIndex { vectors })?)
    }
}

#[derive(Debug)]
pub struct FlatReader {
    kind: BackendKind,
    index: FlatIndex,
}

impl FlatReader {
    pub fn open(kind: BackendKind, dimension: Dimension, payload: &[u8]) -> Result<Self> {
        let index: FlatIndex = bincode::deserialize(payload)?;
        index.vectors.validate()?;
        if index.vectors.encoder().dimension() != dimension {
            return Err(SagittaError::corrupted(format!(
                "Stored vectors have dimension {}, header says {dimension}",
                index.vectors.encoder().dimension()
            )));
        }
        Ok(FlatReader { kind, index })
    }
}

impl IndexReader for FlatReader {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.index.vectors.len()
    }

    fn memory_usage(&self) -> usize {
        self.index.vectors.memory_usage()
    }

    fn search(&self, ctx: &SearchContext<'_>, session: &mut SearchSession) -> Result<BackendOutput> {
        let vectors = &self.index.vectors;
        let params = ScanParams {
            limit: ctx.limit,
            dimension: ctx.query.len(),
            parallel: ctx.parallel,
        };

        let outcome = scan_rows(vectors.len(), params, session, |row, scratch| {
            let id = vectors.id(row);
            if !ctx.filter.accepts(id) {
                return RowOutcome::Filtered;
            }
            vectors.decode_into(row, scratch);
            RowOutcome::Scored(Candidate::new(
                &ctx.scorer,
                id,
                ctx.scorer.score(ctx.query, scratch),
            ))
        })?;

        Ok(BackendOutput::from_scan(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::distance::DistanceType;
    use crate::core::options::RuntimeOptions;
    use crate::core::types::AttributeStore;
    use crate::search::CandidateFilter;
    use crate::util::simd::DistanceKernel;

    fn ctx(dimension: usize) -> BuildContext {
        BuildContext {
            dimension,
            metric: DistanceType::Euclidean,
            scorer: DistanceType::Euclidean.scorer(DistanceKernel::Scalar).unwrap(),
            options: RuntimeOptions::new(),
        }
    }

    fn search(reader: &dyn IndexReader, query: &[f32], limit: usize) -> Vec<(VectorId, f32)> {
        let attributes = AttributeStore::default();
        let options = RuntimeOptions::new();
        let ctx = SearchContext {
            query,
            limit,
            scorer: DistanceType::Euclidean.scorer(DistanceKernel::Scalar).unwrap(),
            filter: CandidateFilter::new(&attributes),
            options: &options,
            parallel: false,
        };
        let mut session = SearchSession::new();
        reader
            .search(&ctx, &mut session)
            .unwrap()
            .candidates
            .iter()
            .map(|c| (c.id, c.score))
            .collect()
    }

    #[test]
    fn test_bruteforce_round_trip() {
        let mut writer = FlatWriter::bruteforce(ctx(2));
        writer.train(&[]).unwrap();
        writer
            .insert(&[1, 2, 3, 4], &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0])
            .unwrap();
        assert_eq!(writer.len(), 4);

        let payload = writer.finish().unwrap();
        let reader = FlatReader::open(BackendKind::Bruteforce, 2, &payload).unwrap();
        assert_eq!(reader.len(), 4);

        let hits = search(&reader, &[1.0, 0.0], 2);
        assert_eq!(hits[0], (2, 0.0));
        assert_eq!(hits[1].0, 1);
        assert_eq!(hits[1].1, 1.0);

        assert!(FlatReader::open(BackendKind::Bruteforce, 3, &payload).is_err());
    }

    #[test]
    fn test_demo_requires_training() {
        let mut writer = FlatWriter::demo(ctx(2));
        assert!(writer.insert(&[1], &[0.0, 0.0]).is_err());

        writer.train(&[0.0, 0.0, 4.0, 4.0]).unwrap();
        writer.insert(&[1, 2], &[0.0, 0.0, 4.0, 4.0]).unwrap();
        let payload = writer.finish().unwrap();

        let reader = FlatReader::open(BackendKind::Demo, 2, &payload).unwrap();
        let hits = search(&reader, &[4.0, 4.0], 1);
        assert_eq!(hits, vec![(2, 0.0)]);
    }
}
