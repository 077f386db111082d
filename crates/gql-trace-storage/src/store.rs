//! Trace store contract
//!
//! Backends keep at most `limit` traces and evict the oldest on overflow.
//! Listing is most-recent-first, optionally windowed by `before` (strictly
//! earlier `begin_ms`) and capped by `last`.

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Identifier assigned by a store on save; increases with insertion order
pub type TraceId = u64;

/// A retained trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTrace {
    pub id: TraceId,
    /// Comma-joined operation names of the traced multiplex
    pub operation_name: String,
    pub duration_ms: u64,
    /// Wall-clock start, milliseconds since the Unix epoch
    pub begin_ms: i64,
    /// Binary Perfetto trace
    pub trace_data: Vec<u8>,
}

impl StoredTrace {
    /// Start time as a UTC timestamp, if representable
    pub fn begin_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.begin_ms)
    }
}

/// Window for [`TraceStore::list`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Return at most this many traces
    pub last: Option<usize>,
    /// Only traces that began strictly before this time (ms since epoch)
    pub before: Option<i64>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(mut self, n: usize) -> Self {
        self.last = Some(n);
        self
    }

    pub fn before(mut self, begin_ms: i64) -> Self {
        self.before = Some(begin_ms);
        self
    }

    /// Whether `trace` falls inside the `before` window
    pub fn admits(&self, trace: &StoredTrace) -> bool {
        self.before.map_or(true, |before| trace.begin_ms < before)
    }

    /// Apply the window to traces already ordered most-recent-first
    pub fn apply<I>(&self, newest_first: I) -> Vec<StoredTrace>
    where
        I: IntoIterator<Item = StoredTrace>,
    {
        newest_first
            .into_iter()
            .filter(|t| self.admits(t))
            .take(self.last.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Bounded trace storage shared across concurrent executions
#[cfg_attr(test, mockall::automock)]
pub trait TraceStore: Send + Sync {
    /// Backend name used in logs
    fn backend(&self) -> &'static str;

    /// Retention bound
    fn limit(&self) -> usize;

    /// Keep a trace, evicting the oldest beyond the limit
    fn save(&self, operation_name: &str, duration_ms: u64, begin_ms: i64, trace_data: Vec<u8>) -> StoreResult<TraceId>;

    /// Retained traces, most recent first
    fn list(&self, query: ListQuery) -> StoreResult<Vec<StoredTrace>>;

    fn find(&self, id: TraceId) -> StoreResult<Option<StoredTrace>>;

    /// Returns whether a trace was removed
    fn delete(&self, id: TraceId) -> StoreResult<bool>;

    /// Returns how many traces were removed
    fn delete_all(&self) -> StoreResult<usize>;

    fn len(&self) -> StoreResult<usize>;
}
