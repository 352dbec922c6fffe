//! Inverted-file backend.
//!
//! Training runs k-means++ seeded k-means over the pretrain sample to obtain
//! `nlist` centroids. Inserted rows are appended to the list of their
//! nearest centroid, optionally scalar-quantized. A query ranks the
//! centroids and scans the `nprobe` closest lists.

use std::time::Instant;

use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::registry::BackendKind;
use crate::backend::traits::{BackendOutput, BuildContext, IndexReader, IndexWriter, SearchContext};
use crate::core::distance::{DistanceType, Scorer};
use crate::core::memory::SearchSession;
use crate::core::types::{Dimension, VectorId};
use crate::encode::{EncodedBatch, EncoderModel, EncodingKind};
use crate::error::{Result, SagittaError};
use crate::search::{Candidate, RowOutcome, ScanParams, scan_rows};
use crate::util::simd::normalize;

pub const KEY_NLIST: &str = "ivf.nlist";
pub const KEY_KMEANS_ITERATIONS: &str = "ivf.kmeans_iterations";
pub const KEY_SEED: &str = "ivf.seed";
pub const KEY_ENCODING: &str = "ivf.encoding";
pub const KEY_NPROBE: &str = "ivf.nprobe";

const DEFAULT_NLIST: usize = 16;
const DEFAULT_KMEANS_ITERATIONS: usize = 25;
const DEFAULT_SEED: u64 = 42;
const DEFAULT_NPROBE: usize = 4;
const CONVERGENCE_THRESHOLD: f32 = 1e-6;
/// Sample size above which assignment runs on the rayon pool.
const PARALLEL_ASSIGN_THRESHOLD: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IvfList {
    ids: Vec<VectorId>,
    codes: EncodedBatch,
}

#[derive(Debug, Serialize, Deserialize)]
struct IvfIndex {
    nlist: usize,
    default_nprobe: usize,
    /// Row-major `nlist * dimension` centroid matrix.
    centroids: Vec<f32>,
    model: EncoderModel,
    lists: Vec<IvfList>,
}

impl IvfIndex {
    fn centroid(&self, list: usize, dimension: usize) -> &[f32] {
        &self.centroids[list * dimension..(list + 1) * dimension]
    }

    fn len(&self) -> usize {
        self.lists.iter().map(|list| list.ids.len()).sum()
    }

    fn memory_usage(&self) -> usize {
        self.centroids.capacity() * 4
            + self
                .lists
                .iter()
                .map(|l| l.ids.capacity() * 8 + l.codes.memory_usage())
                .sum::<usize>()
    }
}

#[derive(Debug)]
pub struct IvfWriter {
    ctx: BuildContext,
    nlist: usize,
    iterations: usize,
    seed: u64,
    encoding: EncodingKind,
    default_nprobe: usize,
    trained: Option<IvfIndex>,
}

impl IvfWriter {
    pub fn new(ctx: BuildContext) -> Result<Self> {
        let nlist = ctx.options.parse_or(KEY_NLIST, DEFAULT_NLIST)?;
        if nlist == 0 {
            return Err(SagittaError::invalid_argument(format!("{KEY_NLIST} must be positive")));
        }
        let iterations = ctx
            .options
            .parse_or(KEY_KMEANS_ITERATIONS, DEFAULT_KMEANS_ITERATIONS)?;
        let seed = ctx.options.parse_or(KEY_SEED, DEFAULT_SEED)?;
        let encoding = match ctx.options.get(KEY_ENCODING) {
            Some(raw) => EncodingKind::parse_str(raw)?,
            None => EncodingKind::Float32,
        };
        let default_nprobe = ctx.options.parse_or(KEY_NPROBE, DEFAULT_NPROBE)?.max(1);

        Ok(IvfWriter {
            ctx,
            nlist,
            iterations,
            seed,
            encoding,
            default_nprobe,
            trained: None,
        })
    }

    /// Initialize centroids with k-means++.
    fn init_centroids(&self, sample: &[f32], k: usize, rng: &mut StdRng) -> Vec<f32> {
        let dim = self.ctx.dimension;
        let rows = sample.len() / dim;
        let kernel = self.ctx.scorer.kernel();
        let mut centroids = Vec::with_capacity(k * dim);

        let first = rng.random_range(0..rows);
        centroids.extend_from_slice(&sample[first * dim..(first + 1) * dim]);

        let mut weights: Vec<f32> = sample
            .chunks_exact(dim)
            .map(|v| kernel.l2_squared(v, &centroids[..dim]))
            .collect();

        for c in 1..k {
            let total: f32 = weights.iter().sum();
            let pick = if total > 0.0 {
                let target = rng.random::<f32>() * total;
                let mut cumsum = 0.0;
                weights
                    .iter()
                    .position(|&w| {
                        cumsum += w;
                        cumsum >= target
                    })
                    .unwrap_or(rows - 1)
            } else {
                rng.random_range(0..rows)
            };
            centroids.extend_from_slice(&sample[pick * dim..(pick + 1) * dim]);

            let newest = &centroids[c * dim..(c + 1) * dim];
            for (w, v) in weights.iter_mut().zip(sample.chunks_exact(dim)) {
                *w = w.min(kernel.l2_squared(v, newest));
            }
        }

        centroids
    }

    fn assign_all(&self, sample: &[f32], centroids: &[f32]) -> Vec<usize> {
        let dim = self.ctx.dimension;
        let scorer = self.ctx.scorer;
        if sample.len() / dim > PARALLEL_ASSIGN_THRESHOLD {
            sample
                .par_chunks_exact(dim)
                .map(|v| nearest_centroid(&scorer, centroids, dim, v))
                .collect()
        } else {
            sample
                .chunks_exact(dim)
                .map(|v| nearest_centroid(&scorer, centroids, dim, v))
                .collect()
        }
    }

    /// Recompute centroids as cluster means. Returns the mean centroid shift.
    fn update_centroids(&self, sample: &[f32], assignments: &[usize], centroids: &mut [f32]) -> f32 {
        let dim = self.ctx.dimension;
        let k = centroids.len() / dim;
        let mut sums = vec![0.0f32; k * dim];
        let mut counts = vec![0usize; k];

        for (v, &cluster) in sample.chunks_exact(dim).zip(assignments) {
            counts[cluster] += 1;
            for (s, x) in sums[cluster * dim..(cluster + 1) * dim].iter_mut().zip(v) {
                *s += x;
            }
        }

        let mut movement = 0.0;
        for cluster in 0..k {
            if counts[cluster] == 0 {
                continue;
            }
            let mean = &mut sums[cluster * dim..(cluster + 1) * dim];
            for s in mean.iter_mut() {
                *s /= counts[cluster] as f32;
            }
            if self.ctx.metric.normalizes() {
                normalize(mean);
            }
            let old = &mut centroids[cluster * dim..(cluster + 1) * dim];
            movement += self.ctx.scorer.kernel().l2_squared(old, mean).sqrt();
            old.copy_from_slice(mean);
        }

        movement / k as f32
    }
}

fn nearest_centroid(scorer: &Scorer, centroids: &[f32], dim: usize, v: &[f32]) -> usize {
    let mut best = 0;
    let mut best_cost = f32::INFINITY;
    for (i, centroid) in centroids.chunks_exact(dim).enumerate() {
        let cost = scorer.cost(scorer.score(v, centroid));
        if cost < best_cost {
            best_cost = cost;
            best = i;
        }
    }
    best
}

impl IndexWriter for IvfWriter {
    fn kind(&self) -> BackendKind {
        BackendKind::Ivf
    }

    fn train(&mut self, sample: &[f32]) -> Result<()> {
        let dim = self.ctx.dimension;
        let rows = sample.len() / dim;
        if rows == 0 {
            return Err(SagittaError::invalid_argument("IVF training needs at least one vector"));
        }

        let k = self.nlist.min(rows);
        if k < self.nlist {
            debug!(nlist = self.nlist, rows, "Clamping nlist to the training sample size");
        }

        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = self.init_centroids(sample, k, &mut rng);

        let mut iterations = 0;
        for _ in 0..self.iterations {
            iterations += 1;
            let assignments = self.assign_all(sample, &centroids);
            let movement = self.update_centroids(sample, &assignments, &mut centroids);
            if movement < CONVERGENCE_THRESHOLD {
                break;
            }
        }

        let model = EncoderModel::train(self.encoding, dim, sample)?;
        let lists = vec![
            IvfList {
                ids: Vec::new(),
                codes: EncodedBatch::for_encoder(model.encoder()),
            };
            k
        ];

        info!(
            nlist = k,
            rows,
            iterations,
            encoding = model.encoder().name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Trained IVF centroids"
        );

        self.trained = Some(IvfIndex {
            nlist: k,
            default_nprobe: self.default_nprobe.min(k),
            centroids,
            model,
            lists,
        });
        Ok(())
    }

    fn insert(&mut self, ids: &[VectorId], vectors: &[f32]) -> Result<()> {
        let dim = self.ctx.dimension;
        let scorer = self.ctx.scorer;
        let index = self
            .trained
            .as_mut()
            .ok_or_else(|| SagittaError::state_violation("IVF centroids have not been trained"))?;

        let assignments: Vec<usize> = vectors
            .chunks_exact(dim)
            .map(|v| nearest_centroid(&scorer, &index.centroids, dim, v))
            .collect();

        let encoder = index.model.encoder();
        for ((&id, vector), list) in ids.iter().zip(vectors.chunks_exact(dim)).zip(assignments) {
            let target = &mut index.lists[list];
            encoder.encode_batch(vector, &mut target.codes)?;
            target.ids.push(id);
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.trained.as_ref().map_or(0, IvfIndex::len)
    }

    fn estimated_memory_usage(&self) -> usize {
        self.trained.as_ref().map_or(0, IvfIndex::memory_usage)
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let index = self
            .trained
            .take()
            .ok_or_else(|| SagittaError::state_violation("IVF centroids have not been trained"))?;
        Ok(bincode::serialize(&index)?)
    }
}

#[derive(Debug)]
pub struct IvfReader {
    dimension: Dimension,
    index: IvfIndex,
}

impl IvfReader {
    pub fn open(dimension: Dimension, _metric: DistanceType, payload: &[u8]) -> Result<Self> {
        let index: IvfIndex = bincode::deserialize(payload)?;
        if index.centroids.len() != index.nlist * dimension
            || index.lists.len() != index.nlist
            || index.model.encoder().dimension() != dimension
        {
            return Err(SagittaError::corrupted("IVF payload does not match its header"));
        }
        for list in &index.lists {
            list.codes.validate()?;
            if list.codes.rows != list.ids.len() {
                return Err(SagittaError::corrupted("IVF list codes do not match ids"));
            }
        }
        Ok(IvfReader { dimension, index })
    }

    pub fn nlist(&self) -> usize {
        self.index.nlist
    }

    /// Lists ordered from the closest centroid to the farthest.
    fn rank_lists(&self, scorer: &Scorer, query: &[f32]) -> Vec<usize> {
        let mut ranked: Vec<(f32, usize)> = (0..self.index.nlist)
            .map(|i| {
                let centroid = self.index.centroid(i, self.dimension);
                (scorer.cost(scorer.score(query, centroid)), i)
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, i)| i).collect()
    }
}

impl IndexReader for IvfReader {
    fn kind(&self) -> BackendKind {
        BackendKind::Ivf
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn memory_usage(&self) -> usize {
        self.index.memory_usage()
    }

    fn search(&self, ctx: &SearchContext<'_>, session: &mut SearchSession) -> Result<BackendOutput> {
        let nprobe = ctx.options.parse_or(KEY_NPROBE, self.index.default_nprobe)?;
        if nprobe == 0 {
            return Err(SagittaError::invalid_argument(format!("{KEY_NPROBE} must be positive")));
        }

        let probed: Vec<usize> = self
            .rank_lists(&ctx.scorer, ctx.query)
            .into_iter()
            .take(nprobe)
            .collect();

        // Flatten the probed lists into one row space.
        let mut offsets = Vec::with_capacity(probed.len() + 1);
        offsets.push(0);
        for &list in &probed {
            let last = offsets[offsets.len() - 1];
            offsets.push(last + self.index.lists[list].ids.len());
        }
        let total = offsets[offsets.len() - 1];

        let encoder = self.index.model.encoder();
        let params = ScanParams {
            limit: ctx.limit,
            dimension: self.dimension,
            parallel: ctx.parallel,
        };
        let outcome = scan_rows(total, params, session, |row, scratch| {
            let slot = offsets.partition_point(|&start| start <= row) - 1;
            let list = &self.index.lists[probed[slot]];
            let local = row - offsets[slot];
            let id = list.ids[local];
            if !ctx.filter.accepts(id) {
                return RowOutcome::Filtered;
            }
            encoder.decode(list.codes.row(local), scratch);
            RowOutcome::Scored(Candidate::new(
                &ctx.scorer,
                id,
                ctx.scorer.score(ctx.query, scratch),
            ))
        })?;

        Ok(BackendOutput::from_scan(outcome).with_stat("ivf.probed_lists", probed.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::RuntimeOptions;
    use crate::core::types::AttributeStore;
    use crate::search::CandidateFilter;
    use crate::util::simd::DistanceKernel;

    fn ctx(options: RuntimeOptions) -> BuildContext {
        BuildContext {
            dimension: 2,
            metric: DistanceType::Euclidean,
            scorer: DistanceType::Euclidean.scorer(DistanceKernel::Scalar).unwrap(),
            options,
        }
    }

    /// Two well separated blobs around (0, 0) and (100, 100).
    fn blobs() -> (Vec<VectorId>, Vec<f32>) {
        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        for i in 0..20u64 {
            let offset = if i % 2 == 0 { 0.0 } else { 100.0 };
            ids.push(i);
            vectors.push(offset + (i as f32) * 0.1);
            vectors.push(offset - (i as f32) * 0.1);
        }
        (ids, vectors)
    }

    fn build(options: RuntimeOptions) -> IvfReader {
        let (ids, vectors) = blobs();
        let mut writer = IvfWriter::new(ctx(options)).unwrap();
        assert!(writer.insert(&ids, &vectors).is_err());
        writer.train(&vectors).unwrap();
        writer.insert(&ids, &vectors).unwrap();
        assert_eq!(writer.len(), 20);
        let payload = writer.finish().unwrap();
        IvfReader::open(2, DistanceType::Euclidean, &payload).unwrap()
    }

    fn search(reader: &IvfReader, query: &[f32], options: &RuntimeOptions) -> BackendOutput {
        let attributes = AttributeStore::default();
        let ctx = SearchContext {
            query,
            limit: 3,
            scorer: DistanceType::Euclidean.scorer(DistanceKernel::Scalar).unwrap(),
            filter: CandidateFilter::new(&attributes),
            options,
            parallel: false,
        };
        reader.search(&ctx, &mut SearchSession::new()).unwrap()
    }

    #[test]
    fn test_ivf_single_probe_stays_in_cluster() {
        let options: RuntimeOptions = [("ivf.nlist", "2"), ("ivf.nprobe", "1")].into_iter().collect();
        let reader = build(options);
        assert_eq!(reader.nlist(), 2);
        assert_eq!(reader.len(), 20);

        let output = search(&reader, &[100.0, 100.0], &RuntimeOptions::new());
        assert_eq!(output.candidates[0].id, 1);
        assert!(output.candidates.iter().all(|c| c.id % 2 == 1));
        assert_eq!(output.scanned, 10);
        assert_eq!(output.stats["ivf.probed_lists"], 1);
    }

    #[test]
    fn test_ivf_nprobe_override_scans_everything() {
        let options: RuntimeOptions = [("ivf.nlist", "2"), ("ivf.nprobe", "1")].into_iter().collect();
        let reader = build(options);

        let call: RuntimeOptions = [("ivf.nprobe", "8")].into_iter().collect();
        let output = search(&reader, &[0.0, 0.0], &call);
        assert_eq!(output.scanned, 20);
        assert_eq!(output.candidates[0].id, 0);
        assert_eq!(output.stats["ivf.probed_lists"], 2);
    }

    #[test]
    fn test_ivf_sq8_encoding() {
        let options: RuntimeOptions = [("ivf.nlist", "2"), ("ivf.encoding", "sq8")]
            .into_iter()
            .collect();
        let reader = build(options);
        let output = search(&reader, &[100.0, 100.0], &RuntimeOptions::new());
        assert_eq!(output.candidates[0].id, 1);
    }

    #[test]
    fn test_ivf_training_is_reproducible() {
        let (_, vectors) = blobs();
        let options: RuntimeOptions = [("ivf.nlist", "4")].into_iter().collect();

        let mut a = IvfWriter::new(ctx(options.clone())).unwrap();
        let mut b = IvfWriter::new(ctx(options)).unwrap();
        a.train(&vectors).unwrap();
        b.train(&vectors).unwrap();
        assert_eq!(a.finish().unwrap(), b.finish().unwrap());
    }

    #[test]
    fn test_ivf_rejects_bad_options() {
        let options: RuntimeOptions = [("ivf.nlist", "0")].into_iter().collect();
        assert!(IvfWriter::new(ctx(options)).is_err());
        let options: RuntimeOptions = [("ivf.encoding", "pq")].into_iter().collect();
        assert!(IvfWriter::new(ctx(options)).is_err());
    }
}
