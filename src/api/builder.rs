//! Index construction.
//!
//! An [`IndexBuilder`] walks a fixed lifecycle:
//!
//! ```text
//! Initial --pretrain--> Trained --insert--> DataInjected --dump--> Dumped
//! TrainNotNeeded ------------------^
//! ```
//!
//! Backends without a training phase start in `TrainNotNeeded`. Rejected
//! input leaves the state untouched; a failure inside the backend or the
//! output sink moves the builder to `Error`, after which every call fails
//! with a state violation.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashSet;
use tracing::{debug, info, warn};

use crate::api::dataset::Dataset;
use crate::api::extension::BuildExtension;
use crate::backend::{BackendKind, BuildContext, IndexWriter};
use crate::core::memory::MemoryResourceConfig;
use crate::core::options::{BuilderOptions, IoOptions};
use crate::core::types::{AttributeStore, IndexInfo, RowAttributes, VectorId};
use crate::error::{Result, SagittaError, Status};
use crate::format::{IndexFile, IndexHeader, write_index};
use crate::storage::StorageOutput;
use crate::util::vectors::{check_finite, prepare_rows};

/// Cap on floats reserved up front from a dataset's size hint.
const MAX_PRESIZED_SAMPLE: usize = 1 << 20;

/// Lifecycle state of an [`IndexBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderStatus {
    Initial,
    Trained,
    TrainNotNeeded,
    DataInjected,
    Dumped,
    Error,
}

impl BuilderStatus {
    /// No further calls are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuilderStatus::Dumped | BuilderStatus::Error)
    }

    /// Rows may be inserted.
    pub fn accepts_data(&self) -> bool {
        matches!(
            self,
            BuilderStatus::Trained | BuilderStatus::TrainNotNeeded | BuilderStatus::DataInjected
        )
    }
}

impl fmt::Display for BuilderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuilderStatus::Initial => "initial",
            BuilderStatus::Trained => "trained",
            BuilderStatus::TrainNotNeeded => "train_not_needed",
            BuilderStatus::DataInjected => "data_injected",
            BuilderStatus::Dumped => "dumped",
            BuilderStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Builds one serialized index.
///
/// A builder is driven by a single writer; it is `Send` but takes `&mut
/// self` for every mutating call.
pub struct IndexBuilder {
    kind: BackendKind,
    options: BuilderOptions,
    memory: MemoryResourceConfig,
    writer: Box<dyn IndexWriter>,
    attributes: AttributeStore,
    seen: AHashSet<VectorId>,
    inserted: usize,
    status: BuilderStatus,
    extensions: Vec<Arc<dyn BuildExtension>>,
}

impl IndexBuilder {
    pub fn create(options: BuilderOptions) -> Result<Self> {
        Self::create_with_memory(options, MemoryResourceConfig::unlimited())
    }

    /// Create a builder whose resident size is bounded by `memory`.
    pub fn create_with_memory(options: BuilderOptions, memory: MemoryResourceConfig) -> Result<Self> {
        options.validate()?;
        let kind = BackendKind::from_name(&options.index_type).ok_or_else(|| {
            SagittaError::not_found(format!("Unknown index type: {}", options.index_type))
        })?;

        let ctx = BuildContext {
            dimension: options.dimension,
            metric: options.distance_type,
            scorer: options.distance_type.scorer(options.kernel)?,
            options: options.options.clone(),
        };
        let writer = kind.create_writer(ctx)?;
        let status = if kind.requires_training() {
            BuilderStatus::Initial
        } else {
            BuilderStatus::TrainNotNeeded
        };

        info!(
            backend = kind.name(),
            dimension = options.dimension,
            metric = options.distance_type.name(),
            "Created index builder"
        );

        Ok(Self {
            kind,
            attributes: AttributeStore::new(options.materialized_fields.clone()),
            options,
            memory,
            writer,
            seen: AHashSet::new(),
            inserted: 0,
            status,
            extensions: Vec::new(),
        })
    }

    pub fn status(&self) -> BuilderStatus {
        self.status
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// Rows accepted so far.
    pub fn len(&self) -> usize {
        self.inserted
    }

    pub fn is_empty(&self) -> bool {
        self.inserted == 0
    }

    pub fn info(&self) -> IndexInfo {
        IndexInfo {
            count: self.inserted as u64,
            dim: self.options.dimension,
        }
    }

    /// Register an observer for the remaining build steps.
    pub fn attach(&mut self, extension: Arc<dyn BuildExtension>) -> Status {
        self.ensure_live("attach")?;
        self.extensions.push(extension);
        Ok(())
    }

    /// Train the backend model on a row-major sample.
    ///
    /// A no-op for backends that need no training.
    pub fn pretrain(&mut self, vectors: &[f32]) -> Status {
        self.ensure_live("pretrain")?;
        match self.status {
            BuilderStatus::TrainNotNeeded => {
                debug!(backend = self.kind.name(), "Backend needs no training");
                return Ok(());
            }
            BuilderStatus::Initial => {}
            status => {
                return Err(SagittaError::state_violation(format!(
                    "Cannot pretrain a builder in state {status}"
                )));
            }
        }

        let dimension = self.options.dimension;
        if vectors.is_empty() {
            return Err(SagittaError::invalid_argument("Training sample is empty"));
        }
        if vectors.len() % dimension != 0 {
            return Err(SagittaError::dimension_mismatch(dimension, vectors.len() % dimension));
        }
        check_finite(vectors, dimension)?;
        self.memory.check(
            self.resident_bytes() + std::mem::size_of_val(vectors),
            "Training sample",
        )?;

        let rows = vectors.len() / dimension;
        let start = Instant::now();
        info!(backend = self.kind.name(), rows, "Training started");

        let sample = prepare_rows(self.options.distance_type, vectors, dimension);
        if let Err(e) = self.writer.train(&sample) {
            return Err(self.fail(e));
        }

        self.status = BuilderStatus::Trained;
        info!(
            backend = self.kind.name(),
            rows,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Training finished"
        );
        for extension in &self.extensions {
            extension.on_train(self.kind, rows);
        }
        Ok(())
    }

    /// Drain `dataset` into a training sample and train on it.
    pub fn pretrain_from<D: Dataset + ?Sized>(&mut self, dataset: &mut D) -> Status {
        self.ensure_live("pretrain")?;
        self.check_dataset_dim(dataset)?;
        if self.status != BuilderStatus::Initial {
            return self.pretrain(&[]);
        }

        let hint = dataset.total_size().saturating_mul(self.options.dimension);
        let mut sample = Vec::with_capacity(hint.min(MAX_PRESIZED_SAMPLE));
        let mut vectors = Vec::new();
        let mut ids = Vec::new();
        while dataset.next_batch(&mut vectors, &mut ids)? > 0 {
            sample.extend_from_slice(&vectors);
            self.memory.check(
                self.resident_bytes() + std::mem::size_of_val(sample.as_slice()),
                "Training sample",
            )?;
        }
        self.pretrain(&sample)
    }

    /// Insert a row-major batch of vectors with their ids.
    ///
    /// The batch is validated as a whole; nothing is inserted if any row
    /// is rejected.
    pub fn insert_batch(&mut self, ids: &[VectorId], vectors: &[f32]) -> Status {
        self.insert_rows(ids, vectors, None)
    }

    /// Insert a batch along with per-row attributes for the materialized
    /// fields. `attributes` must hold one entry per id.
    pub fn insert_batch_with_attributes(
        &mut self,
        ids: &[VectorId],
        vectors: &[f32],
        attributes: &[RowAttributes],
    ) -> Status {
        self.insert_rows(ids, vectors, Some(attributes))
    }

    /// Insert every batch `dataset` produces. Returns the rows inserted.
    ///
    /// A failure after some batches were accepted leaves a partially
    /// ingested stream, so it moves the builder to `Error`.
    pub fn insert_from<D: Dataset + ?Sized>(&mut self, dataset: &mut D) -> Result<usize> {
        self.ensure_live("insert")?;
        self.check_dataset_dim(dataset)?;

        let mut vectors = Vec::new();
        let mut ids = Vec::new();
        let mut total = 0;
        loop {
            let outcome = dataset
                .next_batch(&mut vectors, &mut ids)
                .and_then(|rows| {
                    if rows > 0 {
                        self.insert_rows(&ids, &vectors, None)?;
                    }
                    Ok(rows)
                });
            match outcome {
                Ok(0) => return Ok(total),
                Ok(rows) => total += rows,
                Err(e) if total == 0 || self.status.is_terminal() => return Err(e),
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// Finalize the index and write it to the named file atomically.
    ///
    /// Bytes go to a temporary file that replaces the target only after a
    /// complete write. On failure the temporary file is removed and the
    /// target is left as it was.
    pub fn dump(&mut self, io: &IoOptions) -> Result<IndexInfo> {
        self.ensure_dumpable()?;
        let file = self.finalize()?;

        let (temp_name, mut output) = match io.storage.create_temp_output(&io.name) {
            Ok(created) => created,
            Err(e) => return Err(self.fail(e)),
        };
        let written = write_to(&mut output, &file, io.sync);
        drop(output);

        let published = written.and_then(|bytes| {
            io.storage.rename_file(&temp_name, &io.name)?;
            Ok(bytes)
        });
        match published {
            Ok(bytes) => Ok(self.complete(&file, bytes, &io.name)),
            Err(e) => {
                if let Err(cleanup) = io.storage.delete_file(&temp_name) {
                    warn!(file = %temp_name, error = %cleanup, "Failed to remove temporary index file");
                }
                Err(self.fail(e))
            }
        }
    }

    /// Finalize the index and write it to a caller-supplied output, which
    /// is closed afterwards.
    pub fn dump_to<W: StorageOutput>(&mut self, mut output: W) -> Result<IndexInfo> {
        self.ensure_dumpable()?;
        let file = self.finalize()?;
        match write_to(&mut output, &file, true) {
            Ok(bytes) => Ok(self.complete(&file, bytes, "<writer>")),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn insert_rows(
        &mut self,
        ids: &[VectorId],
        vectors: &[f32],
        attributes: Option<&[RowAttributes]>,
    ) -> Status {
        self.ensure_live("insert")?;
        if !self.status.accepts_data() {
            return Err(SagittaError::state_violation(format!(
                "Backend {} must be trained before inserting data",
                self.kind
            )));
        }
        if ids.is_empty() && vectors.is_empty() {
            return Ok(());
        }
        self.validate_batch(ids, vectors, attributes)?;

        let dimension = self.options.dimension;
        let data = prepare_rows(self.options.distance_type, vectors, dimension);
        if let Err(e) = self.writer.insert(ids, &data) {
            return Err(self.fail(e));
        }
        if let Some(rows) = attributes {
            for (id, row) in ids.iter().zip(rows) {
                if let Err(e) = self.attributes.push(*id, row) {
                    return Err(self.fail(e));
                }
            }
        }

        self.seen.extend(ids.iter().copied());
        self.inserted += ids.len();
        self.status = BuilderStatus::DataInjected;
        debug!(rows = ids.len(), total = self.inserted, "Inserted batch");
        for extension in &self.extensions {
            extension.on_insert(ids.len(), self.inserted);
        }
        Ok(())
    }

    fn validate_batch(
        &self,
        ids: &[VectorId],
        vectors: &[f32],
        attributes: Option<&[RowAttributes]>,
    ) -> Status {
        let dimension = self.options.dimension;
        if ids.is_empty() {
            return Err(SagittaError::invalid_argument(format!(
                "Batch carries {} values but no ids",
                vectors.len()
            )));
        }
        // A ragged batch has no single stride; report the truncated one.
        if vectors.len() != ids.len().saturating_mul(dimension) {
            return Err(SagittaError::dimension_mismatch(dimension, vectors.len() / ids.len()));
        }
        if let Some(rows) = attributes {
            if rows.len() != ids.len() {
                return Err(SagittaError::invalid_argument(format!(
                    "Batch has {} ids but {} attribute rows",
                    ids.len(),
                    rows.len()
                )));
            }
        }
        check_finite(vectors, dimension)?;

        let mut batch = AHashSet::with_capacity(ids.len());
        for id in ids {
            if self.seen.contains(id) || !batch.insert(*id) {
                return Err(SagittaError::invalid_argument(format!(
                    "Vector id {id} was inserted more than once"
                )));
            }
        }

        let incoming = std::mem::size_of_val(vectors)
            + std::mem::size_of_val(ids)
            + attributes.map_or(0, |rows| rows.len() * self.attributes.fields().len() * 32);
        self.memory.check(self.resident_bytes() + incoming, "Index build")
    }

    fn resident_bytes(&self) -> usize {
        self.writer.estimated_memory_usage()
            + self.attributes.estimated_memory_usage()
            + self.seen.len() * std::mem::size_of::<VectorId>()
    }

    fn check_dataset_dim<D: Dataset + ?Sized>(&self, dataset: &D) -> Status {
        if dataset.dim() != self.options.dimension {
            return Err(SagittaError::dimension_mismatch(
                self.options.dimension,
                dataset.dim(),
            ));
        }
        Ok(())
    }

    fn ensure_live(&self, operation: &str) -> Status {
        if self.status.is_terminal() {
            return Err(SagittaError::state_violation(format!(
                "Cannot {operation}: builder is in terminal state {}",
                self.status
            )));
        }
        Ok(())
    }

    fn ensure_dumpable(&self) -> Status {
        self.ensure_live("dump")?;
        if self.status == BuilderStatus::Initial {
            return Err(SagittaError::state_violation(format!(
                "Backend {} must be trained before dumping",
                self.kind
            )));
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<IndexFile> {
        let start = Instant::now();
        let payload = match self.writer.finish() {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(e)),
        };
        debug!(
            backend = self.kind.name(),
            payload_bytes = payload.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Finalized backend structures"
        );

        Ok(IndexFile {
            header: IndexHeader {
                kind: self.kind,
                metric: self.options.distance_type,
                dimension: self.options.dimension,
                count: self.inserted as u64,
            },
            attributes: std::mem::take(&mut self.attributes),
            payload,
        })
    }

    fn complete(&mut self, file: &IndexFile, bytes: u64, destination: &str) -> IndexInfo {
        self.status = BuilderStatus::Dumped;
        let info = IndexInfo {
            count: file.header.count,
            dim: file.header.dimension,
        };
        info!(
            backend = self.kind.name(),
            destination,
            bytes,
            count = info.count,
            "Dumped index"
        );
        for extension in &self.extensions {
            extension.on_dump(&info, bytes);
        }
        info
    }

    fn fail(&mut self, error: SagittaError) -> SagittaError {
        warn!(backend = self.kind.name(), state = %self.status, %error, "Index builder failed");
        self.status = BuilderStatus::Error;
        for extension in &self.extensions {
            extension.on_error(&error);
        }
        error
    }
}

impl fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("inserted", &self.inserted)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

/// Serialize `file` into `output`, close it and return the bytes written.
fn write_to<W: StorageOutput + ?Sized>(output: &mut W, file: &IndexFile, sync: bool) -> Result<u64> {
    write_index(&mut *output, file)?;
    if sync {
        output.flush_and_sync()?;
    }
    let bytes = output.position();
    output.close()?;
    Ok(bytes)
}
