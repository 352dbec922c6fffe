//! Index files dumped to disk and opened again.

use std::io::Write;
use std::sync::Arc;

use sagitta::prelude::*;
use sagitta::storage::StorageConfig;
use tempfile::TempDir;

fn rows(count: usize, dim: usize) -> Vec<f32> {
    (0..count * dim)
        .map(|i| ((i as f32) * 0.618).fract() * 2.0 - 1.0)
        .collect()
}

fn build_into(io: &IoOptions, backend: &str, metric: DistanceType, dim: usize, count: usize) -> Result<IndexInfo> {
    let mut builder = IndexBuilder::create(BuilderOptions::new(backend, dim, metric).with_option("ivf.nlist", "8"))?;
    builder.pretrain(&rows(count, dim))?;
    let ids: Vec<VectorId> = (0..count as VectorId).map(|i| i * 10).collect();
    builder.insert_batch(&ids, &rows(count, dim))?;
    builder.dump(io)
}

#[test]
fn every_backend_survives_a_disk_round_trip() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::new(temp_dir.path(), FileStorageConfig::new(temp_dir.path()))?);

    for backend in ["bruteforce", "ivf", "diskann", "demo"] {
        for metric in [DistanceType::Euclidean, DistanceType::InnerProduct, DistanceType::Cosine] {
            let name = format!("{backend}-{}.sgt", metric.name());
            let io = IoOptions::new(storage.clone(), name.clone());
            let dumped = build_into(&io, backend, metric, 6, 120)?;
            assert!(temp_dir.path().join(&name).exists());

            let mut searcher = IndexSearcher::create(SearcherOptions::new(backend, 6, metric))?;
            searcher.open(&io)?;
            assert_eq!(searcher.meta()?, dumped);

            let query = VectorSearch::new("v", rows(120, 6)[6..12].to_vec(), 5);
            let result = searcher.search(&query, &SearchOptions::new())?;
            assert!(!result.is_empty(), "{backend}/{metric}");
            assert!(result.hits.iter().all(|hit| hit.id % 10 == 0));
            searcher.close()?;
        }
    }

    let leftovers: Vec<String> = storage
        .list_files()?
        .into_iter()
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind: {leftovers:?}");
    Ok(())
}

#[test]
fn redump_replaces_the_previous_file() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let io = IoOptions::from_config(StorageConfig::File(FileStorageConfig::new(temp_dir.path())), "index.sgt")?;
    let storage = io.storage.clone();

    build_into(&io, "bruteforce", DistanceType::Euclidean, 3, 10)?;
    let first_size = storage.file_size("index.sgt")?;
    build_into(&io, "bruteforce", DistanceType::Euclidean, 3, 40)?;
    assert!(storage.file_size("index.sgt")? > first_size);

    let mut searcher = IndexSearcher::create(SearcherOptions::new("bruteforce", 3, DistanceType::Euclidean))?;
    searcher.open(&io)?;
    assert_eq!(searcher.meta()?.count, 40);
    Ok(())
}

#[test]
fn damaged_files_are_rejected() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::new(temp_dir.path(), FileStorageConfig::new(temp_dir.path()))?);
    let io = IoOptions::new(storage.clone(), "index.sgt");
    build_into(&io, "ivf", DistanceType::Euclidean, 4, 64)?;

    let bytes = std::fs::read(temp_dir.path().join("index.sgt"))?;
    let searcher_options = SearcherOptions::new("ivf", 4, DistanceType::Euclidean);

    // Truncated: the stream ends before the checksum trailer.
    let truncated = IoOptions::new(storage.clone(), "truncated.sgt");
    let mut output = storage.create_output("truncated.sgt")?;
    output.write_all(&bytes[..bytes.len() / 2])?;
    output.close()?;
    let mut searcher = IndexSearcher::create(searcher_options.clone())?;
    assert_eq!(searcher.open(&truncated).unwrap_err().code(), ErrorCode::Io);

    // Flipped byte inside the payload.
    let mut flipped = bytes.clone();
    let middle = flipped.len() / 2;
    flipped[middle] ^= 0x55;
    std::fs::write(temp_dir.path().join("flipped.sgt"), &flipped)?;
    let err = searcher
        .open(&IoOptions::new(storage.clone(), "flipped.sgt"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Io);

    assert!(!searcher.is_open());
    searcher.open(&io)?;
    assert_eq!(searcher.meta()?.count, 64);
    Ok(())
}
