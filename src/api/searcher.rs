//! Query execution over a serialized index.

use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::api::extension::SearchExtension;
use crate::api::query::VectorSearch;
use crate::api::result::{
    STAT_BACKEND, STAT_CANDIDATES_SCANNED, STAT_FILTERED_OUT, SearchHit, SearchResult, SearchStats,
};
use crate::backend::{BackendKind, IndexReader, SearchContext};
use crate::core::distance::Scorer;
use crate::core::memory::{MemoryResourceConfig, SearchSession};
use crate::core::options::{IoOptions, KEY_PARALLELISM, SearchOptions, SearcherOptions};
use crate::core::types::{AttributeStore, IndexInfo};
use crate::error::{Result, SagittaError, Status};
use crate::format::read_index;
use crate::search::CandidateFilter;
use crate::util::vectors::{check_finite, prepare_rows};

/// Structures resident while an index is open.
#[derive(Debug)]
struct OpenIndex {
    info: IndexInfo,
    reader: Box<dyn IndexReader>,
    attributes: AttributeStore,
}

#[derive(Debug)]
enum SearcherState {
    Created,
    Opened(OpenIndex),
    Closed,
}

/// Opens one serialized index and answers top-k queries against it.
///
/// `search` takes `&self`, so an opened searcher can be shared between
/// threads (for example behind an `Arc`) and queried concurrently.
pub struct IndexSearcher {
    kind: BackendKind,
    options: SearcherOptions,
    scorer: Scorer,
    memory: MemoryResourceConfig,
    pool: ThreadPool,
    state: SearcherState,
    extensions: RwLock<Vec<Arc<dyn SearchExtension>>>,
}

impl IndexSearcher {
    pub fn create(options: SearcherOptions) -> Result<Self> {
        Self::create_with_memory(options, MemoryResourceConfig::unlimited())
    }

    /// Create a searcher whose opened index must fit in `memory`.
    pub fn create_with_memory(options: SearcherOptions, memory: MemoryResourceConfig) -> Result<Self> {
        options.validate()?;
        let kind = BackendKind::from_name(&options.index_type).ok_or_else(|| {
            SagittaError::not_found(format!("Unknown index type: {}", options.index_type))
        })?;
        let scorer = options.distance_type.scorer(options.kernel)?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(options.parallelism)
            .thread_name(|i| format!("sagitta-search-{i}"))
            .build()
            .map_err(|e| SagittaError::internal(format!("Failed to create thread pool: {e}")))?;

        Ok(Self {
            kind,
            options,
            scorer,
            memory,
            pool,
            state: SearcherState::Created,
            extensions: RwLock::new(Vec::new()),
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn options(&self) -> &SearcherOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SearcherState::Opened(_))
    }

    /// Open the named index file.
    pub fn open(&mut self, io: &IoOptions) -> Status {
        self.ensure_created()?;
        let input = io.storage.open_input(&io.name)?;
        self.open_from(input)?;
        info!(file = %io.name, "Opened index file");
        Ok(())
    }

    /// Open an index from any byte stream produced by a builder dump.
    pub fn open_from<R: Read>(&mut self, reader: R) -> Status {
        self.ensure_created()?;
        let start = Instant::now();
        let file = read_index(reader)?;
        let header = file.header;

        if header.kind != self.kind {
            return Err(SagittaError::invalid_argument(format!(
                "Index was built with backend {}, searcher expects {}",
                header.kind, self.kind
            )));
        }
        if header.dimension != self.options.dimension {
            return Err(SagittaError::dimension_mismatch(
                self.options.dimension,
                header.dimension,
            ));
        }
        if header.metric != self.options.distance_type {
            return Err(SagittaError::metric_mismatch(
                self.options.distance_type,
                header.metric,
            ));
        }

        let reader = self
            .kind
            .open_reader(header.dimension, header.metric, &file.payload)?;
        if reader.len() as u64 != header.count {
            return Err(SagittaError::corrupted(format!(
                "Header declares {} vectors, backend holds {}",
                header.count,
                reader.len()
            )));
        }
        self.memory.check(
            reader.memory_usage() + file.attributes.estimated_memory_usage(),
            "Opened index",
        )?;

        let info = IndexInfo {
            count: header.count,
            dim: header.dimension,
        };
        info!(
            backend = self.kind.name(),
            count = info.count,
            dimension = info.dim,
            memory_bytes = reader.memory_usage(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Opened index"
        );
        self.state = SearcherState::Opened(OpenIndex {
            info,
            reader,
            attributes: file.attributes,
        });

        for extension in self.extensions.read().iter() {
            extension.on_open(self.kind, &info);
        }
        Ok(())
    }

    /// Metadata of the opened index.
    pub fn meta(&self) -> Result<IndexInfo> {
        Ok(self.opened()?.info)
    }

    /// Run a query with a fresh scratch session.
    pub fn search(&self, query: &VectorSearch, options: &SearchOptions) -> Result<SearchResult> {
        let mut session = SearchSession::new();
        self.search_with_session(query, options, &mut session)
    }

    /// Run a query whose transient buffers are charged to `session`.
    ///
    /// The session is reset on entry and exit; nothing returned borrows
    /// from it.
    pub fn search_with_session(
        &self,
        query: &VectorSearch,
        options: &SearchOptions,
        session: &mut SearchSession,
    ) -> Result<SearchResult> {
        let index = self.opened()?;
        let dimension = index.info.dim;

        if query.limit() == 0 {
            return Err(SagittaError::invalid_argument("Search limit must be positive"));
        }
        if query.query().len() != dimension {
            return Err(SagittaError::dimension_mismatch(dimension, query.query().len()));
        }
        check_finite(query.query(), dimension)?;
        if let Some(metric) = query.distance_type() {
            if metric != self.options.distance_type {
                return Err(SagittaError::metric_mismatch(self.options.distance_type, metric));
            }
        }

        let filter = CandidateFilter::new(&index.attributes)
            .with_pre_filter(query.pre_filter().map(|f| f.as_ref()))
            .with_predicate(query.predicate())?;
        let runtime = self
            .options
            .options
            .merged(query.options())
            .merged(&options.options);
        let parallelism = runtime.parse_or(KEY_PARALLELISM, self.options.parallelism)?;
        if parallelism == 0 {
            return Err(SagittaError::invalid_argument(format!(
                "{KEY_PARALLELISM} must be at least 1"
            )));
        }

        let extensions = self.extensions.read().clone();
        for extension in &extensions {
            extension.before_search(query);
        }

        let prepared = prepare_rows(self.options.distance_type, query.query(), dimension);
        let ctx = SearchContext {
            query: &prepared,
            limit: query.limit(),
            scorer: self.scorer,
            filter,
            options: &runtime,
            parallel: parallelism > 1,
        };

        let start = Instant::now();
        session.begin();
        let output = if ctx.parallel {
            self.pool.install(|| index.reader.search(&ctx, session))
        } else {
            index.reader.search(&ctx, session)
        };
        session.end();
        let output = output?;

        let mut stats = SearchStats::new();
        stats.insert(STAT_CANDIDATES_SCANNED.into(), output.scanned.into());
        stats.insert(STAT_FILTERED_OUT.into(), output.filtered_out.into());
        stats.insert(STAT_BACKEND.into(), self.kind.name().into());
        stats.extend(output.stats);

        let mut result = SearchResult {
            hits: output
                .candidates
                .into_iter()
                .map(|c| SearchHit {
                    id: c.id,
                    distance: c.score,
                })
                .collect(),
            stats,
        };
        debug!(
            backend = self.kind.name(),
            limit = query.limit(),
            hits = result.hits.len(),
            scanned = output.scanned,
            filtered_out = output.filtered_out,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Search finished"
        );

        let mut extra = SearchStats::new();
        for extension in &extensions {
            extension.after_search(query, &result, &mut extra);
        }
        result.stats.extend(extra);
        Ok(result)
    }

    /// Register an observer. Allowed at any point of the lifecycle.
    pub fn attach(&self, extension: Arc<dyn SearchExtension>) -> Status {
        self.extensions.write().push(extension);
        Ok(())
    }

    /// Release the index. Closing twice is a no-op.
    pub fn close(&mut self) -> Status {
        let previous = std::mem::replace(&mut self.state, SearcherState::Closed);
        if let SearcherState::Opened(index) = previous {
            info!(backend = self.kind.name(), count = index.info.count, "Closed index");
            drop(index);
            for extension in self.extensions.read().iter() {
                extension.on_close();
            }
        }
        Ok(())
    }

    fn opened(&self) -> Result<&OpenIndex> {
        match &self.state {
            SearcherState::Opened(index) => Ok(index),
            SearcherState::Created => Err(SagittaError::state_violation(
                "Searcher has not opened an index",
            )),
            SearcherState::Closed => Err(SagittaError::state_violation("Searcher is closed")),
        }
    }

    fn ensure_created(&self) -> Status {
        match self.state {
            SearcherState::Created => Ok(()),
            SearcherState::Opened(_) => Err(SagittaError::state_violation(
                "Searcher already has an open index",
            )),
            SearcherState::Closed => Err(SagittaError::state_violation("Searcher is closed")),
        }
    }
}

impl fmt::Debug for IndexSearcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSearcher")
            .field("kind", &self.kind)
            .field("options", &self.options)
            .field("state", &self.state)
            .field("extensions", &self.extensions.read().len())
            .finish()
    }
}
