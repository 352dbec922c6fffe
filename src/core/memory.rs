//! Memory budgets and per-query scratch space.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagittaError};

/// Byte budget for a builder or searcher.
///
/// With no limit every allocation goes through the global allocator
/// unchecked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryResourceConfig {
    pub memory_limit: Option<usize>,
}

impl MemoryResourceConfig {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_limit(bytes: usize) -> Self {
        Self {
            memory_limit: Some(bytes),
        }
    }

    /// Fail with `ResourceExhausted` when `used` exceeds the budget.
    pub fn check(&self, used: usize, what: &str) -> Result<()> {
        if let Some(limit) = self.memory_limit {
            if used > limit {
                return Err(SagittaError::resource_exhausted(format!(
                    "{what} needs {used} bytes, exceeding limit {limit} bytes"
                )));
            }
        }
        Ok(())
    }
}

/// Scratch space for one search call at a time.
///
/// A session is borrowed mutably by `IndexSearcher::search_with_session`,
/// so it can never be shared by two concurrent calls. Buffers handed out
/// during a call are pooled and reused by later calls, but their contents
/// are cleared when the call ends. An optional byte limit bounds what a
/// single call may charge to the session.
#[derive(Debug, Default)]
pub struct SearchSession {
    limit: Option<usize>,
    pool: Vec<Vec<f32>>,
    charged: usize,
    peak: usize,
    calls: u64,
}

impl SearchSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session whose calls may charge at most `bytes` each.
    pub fn with_limit(bytes: usize) -> Self {
        Self {
            limit: Some(bytes),
            ..Self::default()
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Bytes charged by the current (or last) call.
    pub fn used_bytes(&self) -> usize {
        self.charged
    }

    /// Largest charge seen by any call.
    pub fn peak_bytes(&self) -> usize {
        self.peak
    }

    /// Number of calls this session has served.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub(crate) fn begin(&mut self) {
        self.charged = 0;
        self.calls += 1;
        for buffer in &mut self.pool {
            buffer.clear();
        }
    }

    pub(crate) fn end(&mut self) {
        for buffer in &mut self.pool {
            buffer.clear();
        }
    }

    /// Account for `bytes` of transient memory used by the current call.
    pub fn charge(&mut self, bytes: usize, what: &str) -> Result<()> {
        let next = self.charged.saturating_add(bytes);
        if let Some(limit) = self.limit {
            if next > limit {
                return Err(SagittaError::resource_exhausted(format!(
                    "Search session limit of {limit} bytes exceeded by {what}"
                )));
            }
        }
        self.charged = next;
        self.peak = self.peak.max(next);
        Ok(())
    }

    /// Borrow a zeroed buffer of `len` floats for the current call.
    pub(crate) fn take_buffer(&mut self, len: usize) -> Result<Vec<f32>> {
        self.charge(len * std::mem::size_of::<f32>(), "scratch buffer")?;
        let mut buffer = self.pool.pop().unwrap_or_default();
        buffer.clear();
        buffer.resize(len, 0.0);
        Ok(buffer)
    }

    /// Return a buffer obtained from [`SearchSession::take_buffer`].
    pub(crate) fn give_back(&mut self, mut buffer: Vec<f32>) {
        buffer.clear();
        self.pool.push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_memory_resource_config() {
        MemoryResourceConfig::unlimited().check(usize::MAX, "x").unwrap();

        let config = MemoryResourceConfig::with_limit(100);
        config.check(100, "builder").unwrap();
        let err = config.check(101, "builder").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceExhausted);
    }

    #[test]
    fn test_session_reuses_buffers() {
        let mut session = SearchSession::new();
        session.begin();
        let mut buffer = session.take_buffer(8).unwrap();
        buffer[0] = 1.0;
        session.give_back(buffer);
        session.end();

        session.begin();
        let buffer = session.take_buffer(4).unwrap();
        assert_eq!(buffer, vec![0.0; 4]);
        assert_eq!(session.used_bytes(), 16);
        assert_eq!(session.peak_bytes(), 32);
        assert_eq!(session.calls(), 2);
    }

    #[test]
    fn test_session_limit() {
        let mut session = SearchSession::with_limit(16);
        session.begin();
        session.take_buffer(4).unwrap();
        let err = session.take_buffer(1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceExhausted);

        session.begin();
        assert_eq!(session.used_bytes(), 0);
    }
}
