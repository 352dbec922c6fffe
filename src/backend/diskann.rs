//! Graph backend in the style of DiskANN's Vamana index.
//!
//! Rows are buffered while inserting and the proximity graph is built when
//! the index is dumped: a random regular graph is refined by two passes of
//! greedy search plus robust pruning (`alpha = 1` then the configured
//! `alpha`). Queries run a bounded beam search from the medoid.
//!
//! Graph construction measures Euclidean distance. Queries rank by the
//! index metric. Every node the beam evaluates is offered to the collector
//! if it passes the candidate filter; rejected nodes are still expanded so
//! the beam can route through them.

use std::time::Instant;

use bit_vec::BitVec;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::registry::BackendKind;
use crate::backend::traits::{BackendOutput, BuildContext, IndexReader, IndexWriter, SearchContext};
use crate::core::memory::SearchSession;
use crate::core::types::{Dimension, VectorId};
use crate::error::{Result, SagittaError};
use crate::search::{Candidate, TopKCollector};
use crate::util::simd::DistanceKernel;

pub const KEY_MAX_DEGREE: &str = "diskann.max_degree";
pub const KEY_BUILD_LIST_SIZE: &str = "diskann.build_list_size";
pub const KEY_ALPHA: &str = "diskann.alpha";
pub const KEY_SEED: &str = "diskann.seed";
pub const KEY_SEARCH_LIST_SIZE: &str = "diskann.search_list_size";

const DEFAULT_MAX_DEGREE: usize = 32;
const DEFAULT_BUILD_LIST_SIZE: usize = 64;
const DEFAULT_ALPHA: f32 = 1.2;
const DEFAULT_SEED: u64 = 42;
const DEFAULT_SEARCH_LIST_SIZE: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
struct DiskAnnIndex {
    dimension: Dimension,
    default_search_list_size: usize,
    medoid: u32,
    ids: Vec<VectorId>,
    vectors: Vec<f32>,
    neighbors: Vec<Vec<u32>>,
}

impl DiskAnnIndex {
    #[inline]
    fn vector(&self, node: u32) -> &[f32] {
        let start = node as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    fn memory_usage(&self) -> usize {
        self.vectors.capacity() * 4
            + self.ids.capacity() * 8
            + self
                .neighbors
                .iter()
                .map(|n| n.capacity() * 4 + 24)
                .sum::<usize>()
    }
}

/// Beam entry: cost, node, expanded.
type PoolEntry = (f32, u32, bool);

/// Best-first search over `neighbors` keeping at most `list_size` entries.
///
/// `cost` is evaluated once per reached node and `on_visit` is told about
/// each evaluation. Returns the number of evaluated nodes.
fn beam_search<C, V>(
    neighbors: &[Vec<u32>],
    start: u32,
    list_size: usize,
    visited: &mut BitVec,
    mut cost: C,
    mut on_visit: V,
) -> usize
where
    C: FnMut(u32) -> f32,
    V: FnMut(u32, f32),
{
    let mut pool: Vec<PoolEntry> = Vec::with_capacity(list_size.min(neighbors.len()) + 1);
    let first = cost(start);
    visited.set(start as usize, true);
    on_visit(start, first);
    pool.push((first, start, false));
    let mut evaluated = 1;

    while let Some(i) = pool.iter().position(|e| !e.2) {
        pool[i].2 = true;
        let node = pool[i].1;

        for &next in &neighbors[node as usize] {
            if visited.get(next as usize).unwrap_or(true) {
                continue;
            }
            visited.set(next as usize, true);

            let c = cost(next);
            on_visit(next, c);
            evaluated += 1;

            let worst = pool.last().map_or(f32::INFINITY, |e| e.0);
            if pool.len() < list_size || c < worst {
                let pos = pool.partition_point(|e| e.0.total_cmp(&c).then(e.1.cmp(&next)).is_lt());
                pool.insert(pos, (c, next, false));
                pool.truncate(list_size);
            }
        }
    }

    evaluated
}

#[derive(Debug)]
pub struct DiskAnnWriter {
    ctx: BuildContext,
    max_degree: usize,
    build_list_size: usize,
    alpha: f32,
    seed: u64,
    search_list_size: usize,
    ids: Vec<VectorId>,
    vectors: Vec<f32>,
}

impl DiskAnnWriter {
    pub fn new(ctx: BuildContext) -> Result<Self> {
        let max_degree = ctx.options.parse_or(KEY_MAX_DEGREE, DEFAULT_MAX_DEGREE)?;
        let build_list_size = ctx.options.parse_or(KEY_BUILD_LIST_SIZE, DEFAULT_BUILD_LIST_SIZE)?;
        let alpha = ctx.options.parse_or(KEY_ALPHA, DEFAULT_ALPHA)?;
        let seed = ctx.options.parse_or(KEY_SEED, DEFAULT_SEED)?;
        let search_list_size = ctx
            .options
            .parse_or(KEY_SEARCH_LIST_SIZE, DEFAULT_SEARCH_LIST_SIZE)?;

        if max_degree == 0 || build_list_size == 0 || search_list_size == 0 {
            return Err(SagittaError::invalid_argument(
                "DiskANN degree and list sizes must be positive",
            ));
        }
        if !(alpha.is_finite() && alpha >= 1.0) {
            return Err(SagittaError::invalid_argument(format!(
                "{KEY_ALPHA} must be at least 1.0, got {alpha}"
            )));
        }

        Ok(DiskAnnWriter {
            ctx,
            max_degree,
            build_list_size: build_list_size.max(max_degree),
            alpha,
            seed,
            search_list_size,
            ids: Vec::new(),
            vectors: Vec::new(),
        })
    }

    fn kernel(&self) -> DistanceKernel {
        self.ctx.scorer.kernel()
    }

    #[inline]
    fn vector(&self, node: u32) -> &[f32] {
        let dim = self.ctx.dimension;
        &self.vectors[node as usize * dim..(node as usize + 1) * dim]
    }

    #[inline]
    fn distance(&self, a: u32, b: u32) -> f32 {
        self.kernel().l2_squared(self.vector(a), self.vector(b)).sqrt()
    }

    /// Node closest to the mean of all rows.
    fn medoid(&self) -> u32 {
        let dim = self.ctx.dimension;
        let n = self.ids.len();
        let mut mean = vec![0.0f32; dim];
        for v in self.vectors.chunks_exact(dim) {
            for (m, x) in mean.iter_mut().zip(v) {
                *m += x;
            }
        }
        for m in mean.iter_mut() {
            *m /= n as f32;
        }

        let kernel = self.kernel();
        (0..n as u32)
            .min_by(|&a, &b| {
                kernel
                    .l2_squared(self.vector(a), &mean)
                    .total_cmp(&kernel.l2_squared(self.vector(b), &mean))
            })
            .unwrap_or(0)
    }

    /// Keep a diverse subset of `candidates` (distance, node) as neighbors of `p`.
    fn robust_prune(&self, p: u32, mut candidates: Vec<(f32, u32)>, alpha: f32) -> Vec<u32> {
        candidates.retain(|&(_, c)| c != p);
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates.dedup_by_key(|c| c.1);

        let mut result = Vec::with_capacity(self.max_degree);
        while !candidates.is_empty() {
            let (_, best) = candidates.remove(0);
            result.push(best);
            if result.len() >= self.max_degree {
                break;
            }
            candidates.retain(|&(d, c)| alpha * self.distance(best, c) > d);
        }
        result
    }

    fn build_graph(&self) -> (u32, Vec<Vec<u32>>) {
        let n = self.ids.len();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let medoid = self.medoid();

        let initial_degree = self.max_degree.min(n.saturating_sub(1));
        let mut neighbors: Vec<Vec<u32>> = (0..n)
            .map(|p| {
                rand::seq::index::sample(&mut rng, n, (initial_degree + 1).min(n))
                    .into_iter()
                    .filter(|&c| c != p)
                    .take(initial_degree)
                    .map(|c| c as u32)
                    .collect()
            })
            .collect();

        let mut order: Vec<u32> = (0..n as u32).collect();
        for alpha in [1.0, self.alpha] {
            order.shuffle(&mut rng);
            for &p in &order {
                let mut visited = BitVec::from_elem(n, false);
                let mut candidates = Vec::new();
                beam_search(
                    &neighbors,
                    medoid,
                    self.build_list_size,
                    &mut visited,
                    |node| self.distance(p, node),
                    |node, d| candidates.push((d, node)),
                );
                candidates.extend(neighbors[p as usize].iter().map(|&c| (self.distance(p, c), c)));

                let pruned = self.robust_prune(p, candidates, alpha);
                for &j in &pruned {
                    let back = &neighbors[j as usize];
                    if back.contains(&p) {
                        continue;
                    }
                    if back.len() < self.max_degree {
                        neighbors[j as usize].push(p);
                    } else {
                        let with_p: Vec<(f32, u32)> = back
                            .iter()
                            .chain(std::iter::once(&p))
                            .map(|&c| (self.distance(j, c), c))
                            .collect();
                        neighbors[j as usize] = self.robust_prune(j, with_p, alpha);
                    }
                }
                neighbors[p as usize] = pruned;
            }
        }

        (medoid, neighbors)
    }
}

impl IndexWriter for DiskAnnWriter {
    fn kind(&self) -> BackendKind {
        BackendKind::DiskAnn
    }

    fn train(&mut self, _sample: &[f32]) -> Result<()> {
        Ok(())
    }

    fn insert(&mut self, ids: &[VectorId], vectors: &[f32]) -> Result<()> {
        if self.ids.len() + ids.len() > u32::MAX as usize {
            return Err(SagittaError::resource_exhausted(
                "DiskANN graphs hold at most u32::MAX nodes",
            ));
        }
        self.ids.extend_from_slice(ids);
        self.vectors.extend_from_slice(vectors);
        Ok(())
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn estimated_memory_usage(&self) -> usize {
        // Rows plus the graph that will be built at dump.
        self.vectors.capacity() * 4 + self.ids.len() * (8 + self.max_degree * 4)
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let start = Instant::now();
        let (medoid, neighbors) = if self.ids.is_empty() {
            (0, Vec::new())
        } else {
            self.build_graph()
        };

        let edges: usize = neighbors.iter().map(Vec::len).sum();
        info!(
            nodes = self.ids.len(),
            edges,
            max_degree = self.max_degree,
            alpha = self.alpha,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Built DiskANN graph"
        );

        let index = DiskAnnIndex {
            dimension: self.ctx.dimension,
            default_search_list_size: self.search_list_size,
            medoid,
            ids: std::mem::take(&mut self.ids),
            vectors: std::mem::take(&mut self.vectors),
            neighbors,
        };
        Ok(bincode::serialize(&index)?)
    }
}

#[derive(Debug)]
pub struct DiskAnnReader {
    index: DiskAnnIndex,
}

impl DiskAnnReader {
    pub fn open(dimension: Dimension, payload: &[u8]) -> Result<Self> {
        let index: DiskAnnIndex = bincode::deserialize(payload)?;
        let n = index.ids.len();
        let consistent = index.dimension == dimension
            && index.vectors.len() == n * dimension
            && index.neighbors.len() == n
            && (n == 0 || (index.medoid as usize) < n)
            && index
                .neighbors
                .iter()
                .all(|list| list.iter().all(|&c| (c as usize) < n));
        if !consistent {
            return Err(SagittaError::corrupted("DiskANN graph does not match its header"));
        }
        Ok(DiskAnnReader { index })
    }

    /// Out-degree of every node.
    pub fn degrees(&self) -> Vec<usize> {
        self.index.neighbors.iter().map(Vec::len).collect()
    }
}

impl IndexReader for DiskAnnReader {
    fn kind(&self) -> BackendKind {
        BackendKind::DiskAnn
    }

    fn len(&self) -> usize {
        self.index.ids.len()
    }

    fn memory_usage(&self) -> usize {
        self.index.memory_usage()
    }

    fn search(&self, ctx: &SearchContext<'_>, session: &mut SearchSession) -> Result<BackendOutput> {
        let n = self.index.ids.len();
        if n == 0 {
            return Ok(BackendOutput::default().with_stat("diskann.visited", 0u64));
        }

        // No beam or result list ever holds more than every node.
        let limit = ctx.limit.min(n);
        let list_size = ctx
            .options
            .parse_or(KEY_SEARCH_LIST_SIZE, self.index.default_search_list_size)?
            .max(limit)
            .min(n);
        session.charge(
            n.div_ceil(8)
                .saturating_add(list_size.saturating_mul(std::mem::size_of::<PoolEntry>())),
            "DiskANN beam",
        )?;

        let mut visited = BitVec::from_elem(n, false);
        let mut collector = TopKCollector::new(limit);
        let mut scanned = 0u64;
        let mut filtered_out = 0u64;

        let evaluated = beam_search(
            &self.index.neighbors,
            self.index.medoid,
            list_size,
            &mut visited,
            |node| {
                ctx.scorer
                    .cost(ctx.scorer.score(ctx.query, self.index.vector(node)))
            },
            |node, cost| {
                let id = self.index.ids[node as usize];
                if ctx.filter.accepts(id) {
                    scanned += 1;
                    let score = if ctx.scorer.metric().higher_is_better() { -cost } else { cost };
                    collector.push(Candidate { cost, id, score });
                } else {
                    filtered_out += 1;
                }
            },
        );

        Ok(BackendOutput {
            candidates: collector.into_sorted_vec(),
            scanned,
            filtered_out,
            stats: Default::default(),
        }
        .with_stat("diskann.visited", evaluated as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::distance::DistanceType;
    use crate::core::options::RuntimeOptions;
    use crate::core::types::AttributeStore;
    use crate::search::CandidateFilter;

    fn ctx(options: RuntimeOptions) -> BuildContext {
        BuildContext {
            dimension: 2,
            metric: DistanceType::Euclidean,
            scorer: DistanceType::Euclidean.scorer(DistanceKernel::Scalar).unwrap(),
            options,
        }
    }

    /// A 10x10 grid with id = 10 * x + y.
    fn grid() -> (Vec<VectorId>, Vec<f32>) {
        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        for x in 0..10 {
            for y in 0..10 {
                ids.push((x * 10 + y) as VectorId);
                vectors.push(x as f32);
                vectors.push(y as f32);
            }
        }
        (ids, vectors)
    }

    fn build(options: RuntimeOptions) -> DiskAnnReader {
        let (ids, vectors) = grid();
        let mut writer = DiskAnnWriter::new(ctx(options)).unwrap();
        writer.insert(&ids, &vectors).unwrap();
        let payload = writer.finish().unwrap();
        DiskAnnReader::open(2, &payload).unwrap()
    }

    fn search(reader: &DiskAnnReader, query: &[f32], limit: usize) -> BackendOutput {
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
        reader.search(&ctx, &mut SearchSession::new()).unwrap()
    }

    #[test]
    fn test_graph_respects_max_degree() {
        let options: RuntimeOptions = [("diskann.max_degree", "8")].into_iter().collect();
        let reader = build(options);
        assert_eq!(reader.len(), 100);
        assert!(reader.degrees().iter().all(|&d| d > 0 && d <= 8));
    }

    #[test]
    fn test_finds_exact_match() {
        let reader = build(RuntimeOptions::new());
        let output = search(&reader, &[3.0, 7.0], 3);
        assert_eq!(output.candidates[0].id, 37);
        assert_eq!(output.candidates[0].score, 0.0);
        assert_eq!(output.candidates.len(), 3);
        for hit in &output.candidates[1..] {
            assert_eq!(hit.score, 1.0);
        }
        assert!(output.stats["diskann.visited"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_limit_larger_than_graph() {
        let reader = build(RuntimeOptions::new());
        let output = search(&reader, &[0.0, 0.0], i32::MAX as usize);
        assert_eq!(output.candidates.len(), 100);
        assert_eq!(output.candidates[0].id, 0);

        let options: RuntimeOptions = [("diskann.search_list_size", "1000000")].into_iter().collect();
        let reader = build(options);
        assert_eq!(search(&reader, &[9.0, 9.0], usize::MAX).candidates.len(), 100);
    }

    #[test]
    fn test_empty_graph() {
        let mut writer = DiskAnnWriter::new(ctx(RuntimeOptions::new())).unwrap();
        let payload = writer.finish().unwrap();
        let reader = DiskAnnReader::open(2, &payload).unwrap();
        assert!(search(&reader, &[0.0, 0.0], 5).candidates.is_empty());
    }

    #[test]
    fn test_build_is_reproducible() {
        let (ids, vectors) = grid();
        let mut a = DiskAnnWriter::new(ctx(RuntimeOptions::new())).unwrap();
        let mut b = DiskAnnWriter::new(ctx(RuntimeOptions::new())).unwrap();
        a.insert(&ids, &vectors).unwrap();
        b.insert(&ids, &vectors).unwrap();
        assert_eq!(a.finish().unwrap(), b.finish().unwrap());
    }

    #[test]
    fn test_rejects_bad_alpha() {
        let options: RuntimeOptions = [("diskann.alpha", "0.5")].into_iter().collect();
        assert!(DiskAnnWriter::new(ctx(options)).is_err());
    }
}
