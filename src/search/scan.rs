//! Scoring loops over row ranges.

use rayon::prelude::*;

use crate::core::memory::SearchSession;
use crate::error::{Result, SagittaError};
use crate::search::collector::{Candidate, TopKCollector};

/// Rows handed to one rayon task at minimum.
const MIN_ROWS_PER_TASK: usize = 1024;

/// What happened to one visited row.
#[derive(Debug, Clone, Copy)]
pub enum RowOutcome {
    /// Rejected by the pre-filter or predicate before scoring.
    Filtered,
    Scored(Candidate),
}

#[derive(Debug, Clone, Copy)]
pub struct ScanParams {
    pub limit: usize,
    /// Length of the per-task decode buffer.
    pub dimension: usize,
    pub parallel: bool,
}

/// Result of a scan: the best rows plus counters.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub collector: TopKCollector,
    pub scanned: u64,
    pub filtered_out: u64,
}

impl ScanOutcome {
    pub fn empty(limit: usize) -> Self {
        ScanOutcome {
            collector: TopKCollector::new(limit),
            scanned: 0,
            filtered_out: 0,
        }
    }

    pub fn merge(mut self, other: ScanOutcome) -> Self {
        self.collector.merge(other.collector);
        self.scanned += other.scanned;
        self.filtered_out += other.filtered_out;
        self
    }

    #[inline]
    fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Filtered => self.filtered_out += 1,
            RowOutcome::Scored(candidate) => {
                self.scanned += 1;
                self.collector.push(candidate);
            }
        }
    }
}

/// Visit rows `0..len`, keeping the `limit` best.
///
/// `visit` receives the row index and a scratch buffer of `dimension` floats
/// it may decode into. In parallel mode each rayon task owns its own buffer
/// and collector, and partial results are merged at the end; the session is
/// charged for those buffers up front.
pub fn scan_rows<F>(
    len: usize,
    params: ScanParams,
    session: &mut SearchSession,
    visit: F,
) -> Result<ScanOutcome>
where
    F: Fn(usize, &mut [f32]) -> RowOutcome + Sync,
{
    let parallel = params.parallel && len >= MIN_ROWS_PER_TASK * 2;

    if !parallel {
        let mut scratch = session.take_buffer(params.dimension)?;
        let mut outcome = ScanOutcome::empty(params.limit.min(len));
        for row in 0..len {
            outcome.record(visit(row, &mut scratch));
        }
        session.give_back(scratch);
        return Ok(outcome);
    }

    let tasks = rayon::current_num_threads().max(1);
    let limit = params.limit.min(len);
    let bytes = params
        .dimension
        .checked_mul(std::mem::size_of::<f32>())
        .zip(limit.checked_mul(std::mem::size_of::<Candidate>()))
        .and_then(|(scratch, heap)| scratch.checked_add(heap))
        .and_then(|bytes| bytes.checked_mul(tasks))
        .ok_or_else(|| SagittaError::resource_exhausted("Parallel scan buffers overflow usize"))?;
    session.charge(bytes, "parallel scan")?;

    let outcome = (0..len)
        .into_par_iter()
        .with_min_len(MIN_ROWS_PER_TASK)
        .fold(
            || (ScanOutcome::empty(limit), vec![0.0f32; params.dimension]),
            |(mut outcome, mut scratch), row| {
                outcome.record(visit(row, &mut scratch));
                (outcome, scratch)
            },
        )
        .map(|(outcome, _)| outcome)
        .reduce(|| ScanOutcome::empty(limit), ScanOutcome::merge);

    Ok(outcome)
}
