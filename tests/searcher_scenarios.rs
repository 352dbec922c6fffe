//! Query scenarios against indexes built in memory.

use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sagitta::api::result::STAT_FILTERED_OUT;
use sagitta::prelude::*;

fn random_rows(rows: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows * dim).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn open_index(
    backend: &str,
    metric: DistanceType,
    dim: usize,
    ids: &[VectorId],
    vectors: &[f32],
) -> Result<IndexSearcher> {
    let storage = Arc::new(MemoryStorage::new_default());
    let io = IoOptions::new(storage, "index.sgt");

    let options = BuilderOptions::new(backend, dim, metric).with_option("ivf.nlist", "4");
    let mut builder = IndexBuilder::create(options)?;
    builder.pretrain(vectors)?;
    builder.insert_batch(ids, vectors)?;
    builder.dump(&io)?;

    let mut searcher = IndexSearcher::create(
        SearcherOptions::new(backend, dim, metric)
            .with_parallelism(2)
            .with_option("ivf.nprobe", "4"),
    )?;
    searcher.open(&io)?;
    Ok(searcher)
}

#[test]
fn exact_match_is_the_top_hit() -> Result<()> {
    let vectors = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let searcher = open_index("bruteforce", DistanceType::Euclidean, 2, &[1, 2, 3, 4], &vectors)?;

    let result = searcher.search(&VectorSearch::new("embedding", vec![1.0, 0.0], 2), &SearchOptions::new())?;
    assert_eq!(result.len(), 2);
    assert_eq!(result.hits[0], SearchHit { id: 2, distance: 0.0 });
    assert_eq!(result.stat("backend"), Some(&serde_json::Value::from("bruteforce")));
    Ok(())
}

#[test]
fn euclidean_results_ascend_with_id_tie_break() -> Result<()> {
    // Ids 7, 3 and 5 sit at the same distance from the query.
    let vectors = [1.0, 0.0, -1.0, 0.0, 0.0, 1.0, 3.0, 3.0, 0.1, 0.0];
    let ids = [7, 3, 5, 9, 1];
    let searcher = open_index("bruteforce", DistanceType::Euclidean, 2, &ids, &vectors)?;

    let result = searcher.search(&VectorSearch::new("v", vec![0.0, 0.0], 5), &SearchOptions::new())?;
    assert_eq!(result.ids(), vec![1, 3, 5, 7, 9]);
    for pair in result.hits.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    Ok(())
}

#[test]
fn every_backend_orders_hits_best_first() -> Result<()> {
    let dim = 8;
    let ids: Vec<VectorId> = (0..300).collect();
    let vectors = random_rows(ids.len(), dim, 11);
    let query = random_rows(1, dim, 12);

    for backend in ["bruteforce", "ivf", "diskann", "demo"] {
        let searcher = open_index(backend, DistanceType::Euclidean, dim, &ids, &vectors)?;
        let result = searcher.search(&VectorSearch::new("v", query.clone(), 10), &SearchOptions::new())?;

        assert!(!result.is_empty(), "backend {backend}");
        assert!(result.len() <= 10);
        for pair in result.hits.windows(2) {
            assert!(
                pair[0].distance < pair[1].distance
                    || (pair[0].distance == pair[1].distance && pair[0].id < pair[1].id),
                "backend {backend} misordered {pair:?}"
            );
        }
    }
    Ok(())
}

#[test]
fn similarity_metrics_rank_descending() -> Result<()> {
    let vectors = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

    let ip = open_index("bruteforce", DistanceType::InnerProduct, 2, &[1, 2, 3], &vectors)?;
    let result = ip.search(&VectorSearch::new("v", vec![1.0, 2.0], 3), &SearchOptions::new())?;
    assert_eq!(result.ids(), vec![3, 2, 1]);
    assert_eq!(result.hits[0].distance, 3.0);

    let cosine = open_index("bruteforce", DistanceType::Cosine, 2, &[1, 2, 3], &vectors)?;
    let query = VectorSearch::new("v", vec![2.0, 0.0], 3).with_distance_type(DistanceType::Cosine);
    let result = cosine.search(&query, &SearchOptions::new())?;
    assert_eq!(result.ids(), vec![1, 3, 2]);
    assert!((result.hits[0].distance - 1.0).abs() < 1e-6);
    assert!((result.hits[1].distance - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    Ok(())
}

#[test]
fn limit_beyond_the_index_returns_every_row() -> Result<()> {
    let dim = 2;
    for backend in ["bruteforce", "ivf", "diskann", "demo"] {
        // Scan backends need enough rows to take the parallel path.
        let count = if backend == "diskann" { 300 } else { 2100 };
        let ids: Vec<VectorId> = (0..count as VectorId).collect();
        let vectors = random_rows(count, dim, 71);
        let searcher = open_index(backend, DistanceType::Euclidean, dim, &ids, &vectors)?;

        for limit in [count + 1, i32::MAX as usize, usize::MAX] {
            let query = VectorSearch::new("v", vectors[..dim].to_vec(), limit);
            let result = searcher.search(&query, &SearchOptions::new())?;
            assert_eq!(result.len(), count, "backend {backend} limit {limit}");
            assert_eq!(result.hits[0].id, 0, "backend {backend}");
        }
    }
    Ok(())
}

#[test]
fn similarity_ties_break_by_ascending_id() -> Result<()> {
    // Ids 8, 3 and 5 share the same inner product and cosine with the query.
    let vectors = [1.0, 1.0, 2.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0];
    let ids = [8, 6, 3, 2, 5];

    let ip = open_index("bruteforce", DistanceType::InnerProduct, 2, &ids, &vectors)?;
    let result = ip.search(&VectorSearch::new("v", vec![1.0, 1.0], 5), &SearchOptions::new())?;
    assert_eq!(result.ids(), vec![3, 5, 6, 8, 2]);

    let cosine = open_index("bruteforce", DistanceType::Cosine, 2, &ids, &vectors)?;
    let result = cosine.search(&VectorSearch::new("v", vec![1.0, 1.0], 3), &SearchOptions::new())?;
    assert_eq!(result.ids(), vec![3, 5, 8]);
    Ok(())
}

#[test]
fn pre_filter_excludes_ids_on_every_backend() -> Result<()> {
    let dim = 4;
    let ids: Vec<VectorId> = (0..200).collect();
    let vectors = random_rows(ids.len(), dim, 21);

    for backend in ["bruteforce", "ivf", "diskann", "demo"] {
        let searcher = open_index(backend, DistanceType::Euclidean, dim, &ids, &vectors)?;
        let unfiltered = VectorSearch::new("v", vectors[..dim].to_vec(), 20);
        let odd_only = unfiltered.replace_pre_filter(Some(Arc::new(|id: VectorId| id % 2 == 1)));

        let result = searcher.search(&odd_only, &SearchOptions::new())?;
        assert!(!result.is_empty(), "backend {backend}");
        assert!(result.hits.iter().all(|hit| hit.id % 2 == 1), "backend {backend}");
        assert!(result.stat_u64(STAT_FILTERED_OUT).unwrap_or(0) > 0);

        // The original descriptor is untouched by the replacement.
        let result = searcher.search(&unfiltered, &SearchOptions::new())?;
        assert_eq!(result.hits[0].id, 0, "backend {backend}");
    }
    Ok(())
}

#[test]
fn structured_predicate_uses_materialized_fields() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new_default());
    let io = IoOptions::new(storage, "colors.sgt");

    let options =
        BuilderOptions::new("bruteforce", 1, DistanceType::Euclidean).with_materialized_fields(["color", "price"]);
    let mut builder = IndexBuilder::create(options)?;
    let colors = ["red", "blue", "red", "green", "red"];
    let rows: Vec<RowAttributes> = colors
        .iter()
        .enumerate()
        .map(|(i, color)| {
            let mut row = RowAttributes::new();
            row.insert("color".into(), (*color).into());
            row.insert("price".into(), (i as i64 * 10).into());
            row
        })
        .collect();
    builder.insert_batch_with_attributes(&[0, 1, 2, 3, 4], &[0.0, 1.0, 2.0, 3.0, 4.0], &rows)?;
    builder.dump(&io)?;

    let mut searcher = IndexSearcher::create(SearcherOptions::new("bruteforce", 1, DistanceType::Euclidean))?;
    searcher.open(&io)?;

    let red = VectorSearch::new("v", vec![1.0], 5).with_predicate(FieldPredicate::eq("color", "red"));
    assert_eq!(searcher.search(&red, &SearchOptions::new())?.ids(), vec![0, 2, 4]);

    let cheap_red = VectorSearch::new("v", vec![1.0], 5)
        .with_predicate(FieldPredicate::eq("color", "red").and(FieldPredicate::range("price", None, Some(25.0))))
        .with_pre_filter(|id| id != 0);
    assert_eq!(searcher.search(&cheap_red, &SearchOptions::new())?.ids(), vec![2]);

    let unknown = VectorSearch::new("v", vec![1.0], 5).with_predicate(FieldPredicate::eq("size", 3i64));
    let err = searcher.search(&unknown, &SearchOptions::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FieldNotMaterialized);
    Ok(())
}

#[test]
fn metric_mismatch_returns_no_partial_results() -> Result<()> {
    let vectors = random_rows(10, 3, 31);
    let ids: Vec<VectorId> = (0..10).collect();
    let searcher = open_index("bruteforce", DistanceType::Euclidean, 3, &ids, &vectors)?;

    let query = VectorSearch::new("v", vectors[..3].to_vec(), 3).with_distance_type(DistanceType::Cosine);
    let err = searcher.search(&query, &SearchOptions::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MetricMismatch);

    let err = searcher
        .search(&VectorSearch::new("v", vec![0.0; 4], 3), &SearchOptions::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DimensionMismatch);
    Ok(())
}

#[test]
fn concurrent_searches_share_one_searcher() -> Result<()> {
    let dim = 16;
    let ids: Vec<VectorId> = (0..5000).collect();
    let vectors = random_rows(ids.len(), dim, 41);
    let searcher = open_index("bruteforce", DistanceType::Euclidean, dim, &ids, &vectors)?;

    let expected: Vec<Vec<VectorId>> = (0..4)
        .map(|t| {
            let query = VectorSearch::new("v", vectors[t * dim..(t + 1) * dim].to_vec(), 5);
            let sequential = SearchOptions::new().with_option("search.parallelism", "1");
            searcher.search(&query, &sequential).map(|r| r.ids())
        })
        .collect::<Result<_>>()?;

    std::thread::scope(|scope| {
        for (t, expected) in expected.iter().enumerate() {
            let searcher = &searcher;
            let vectors = &vectors;
            scope.spawn(move || {
                let query = VectorSearch::new("v", vectors[t * dim..(t + 1) * dim].to_vec(), 5)
                    .with_pre_filter(|id| id < 5000);
                let result = searcher.search(&query, &SearchOptions::new()).unwrap();
                assert_eq!(&result.ids(), expected);
                assert_eq!(result.hits[0].id, t as VectorId);
            });
        }
    });
    Ok(())
}

#[test]
fn ivf_probe_count_is_a_query_option() -> Result<()> {
    let dim = 4;
    let ids: Vec<VectorId> = (0..400).collect();
    let vectors = random_rows(ids.len(), dim, 51);
    let searcher = open_index("ivf", DistanceType::Euclidean, dim, &ids, &vectors)?;
    let query = VectorSearch::new("v", vectors[..dim].to_vec(), 10);

    let narrow = searcher.search(&query, &SearchOptions::new().with_option("ivf.nprobe", "1"))?;
    let wide = searcher.search(&query, &SearchOptions::new())?;
    assert_eq!(narrow.stat_u64("ivf.probed_lists"), Some(1));
    assert_eq!(wide.stat_u64("ivf.probed_lists"), Some(4));
    assert!(narrow.stat_u64("candidates_scanned") <= wide.stat_u64("candidates_scanned"));

    let exact = open_index("bruteforce", DistanceType::Euclidean, dim, &ids, &vectors)?;
    assert_eq!(wide.ids(), exact.search(&query, &SearchOptions::new())?.ids());
    Ok(())
}

#[test]
fn extensions_observe_searches() -> Result<()> {
    let vectors = random_rows(20, 2, 61);
    let ids: Vec<VectorId> = (0..20).collect();
    let mut searcher = open_index("diskann", DistanceType::Euclidean, 2, &ids, &vectors)?;
    let collector = Arc::new(StatsCollector::new());
    searcher.attach(collector.clone())?;

    let query = VectorSearch::new("v", vec![0.0, 0.0], 3);
    let result = searcher.search(&query, &SearchOptions::new())?;
    assert!(result.stat_u64("diskann.visited").unwrap_or(0) > 0);
    assert_eq!(result.stat_u64("collector.searches"), Some(1));
    searcher.search(&query, &SearchOptions::new())?;
    searcher.close()?;

    let stats = collector.snapshot();
    assert_eq!(stats.searches, 2);
    assert_eq!(stats.hits_returned, 6);

    let seen: HashSet<VectorId> = result.ids().into_iter().collect();
    assert_eq!(seen.len(), result.len());
    Ok(())
}
