//! Detailed trace facade
//!
//! [`DetailedTrace`] pairs a [`Sampler`] with a [`TraceStore`] and is the
//! sink the capture module hands finished traces to. Storage failures never
//! propagate from here: a failed save drops the trace, a failed read returns
//! nothing, and both are logged.
//!
//! # Usage
//!
//! ```rust
//! use gql_trace_core::{Multiplex, Query, RateSampler, TraceSetup};
//! use gql_trace_storage::{DetailedTrace, MemoryTraceStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryTraceStore::new(50)?);
//! let detailed = Arc::new(DetailedTrace::new(store).with_sampler(RateSampler::new(1.0)));
//!
//! let mut setup = TraceSetup::new();
//! detailed.install(&mut setup)?;
//!
//! let chain = setup.new_trace(&Multiplex::single(Query::new("{ a }")), None)?;
//! assert_eq!(chain.module_names(), vec!["perfetto"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gql_trace_core::{CaptureResult, Multiplex, NeverSample, Sampler, TraceSetup, TraceSink};

use crate::store::{ListQuery, StoredTrace, TraceId, TraceStore};

/// Mode name detailed traces run under unless configured otherwise
pub const DEFAULT_TRACE_MODE: &str = "detailed";

/// Sampling plus bounded retention of detailed traces
pub struct DetailedTrace {
    store: Arc<dyn TraceStore>,
    sampler: Arc<dyn Sampler>,
    trace_mode: String,
    dropped: AtomicU64,
}

impl fmt::Debug for DetailedTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetailedTrace")
            .field("backend", &self.store.backend())
            .field("limit", &self.store.limit())
            .field("trace_mode", &self.trace_mode)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

impl DetailedTrace {
    /// Facade over `store` that samples nothing until given a sampler
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self {
            store,
            sampler: Arc::new(NeverSample),
            trace_mode: DEFAULT_TRACE_MODE.to_string(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn with_sampler<S: Sampler + 'static>(mut self, sampler: S) -> Self {
        self.sampler = Arc::new(sampler);
        self
    }

    pub fn with_trace_mode(mut self, mode: impl Into<String>) -> Self {
        self.trace_mode = mode.into();
        self
    }

    pub fn trace_mode(&self) -> &str {
        &self.trace_mode
    }

    pub fn store(&self) -> &Arc<dyn TraceStore> {
        &self.store
    }

    pub fn should_sample(&self, multiplex: &Multiplex) -> bool {
        self.sampler.should_sample(multiplex)
    }

    /// Register the capture module and this sink on `setup`
    pub fn install(self: &Arc<Self>, setup: &mut TraceSetup) -> CaptureResult<()> {
        let sink: Arc<dyn TraceSink> = self.clone();
        setup.enable_detailed_trace(self.sampler.clone(), sink, self.trace_mode.clone())?;
        tracing::info!(
            backend = self.store.backend(),
            limit = self.store.limit(),
            mode = %self.trace_mode,
            "Detailed tracing installed"
        );
        Ok(())
    }

    /// Keep a trace; `None` when the store rejected it
    pub fn save_trace(&self, operation_name: &str, duration_ms: u64, begin_ms: i64, trace_data: Vec<u8>) -> Option<TraceId> {
        match self.store.save(operation_name, duration_ms, begin_ms, trace_data) {
            Ok(id) => {
                tracing::debug!(trace_id = id, operation = operation_name, duration_ms, "Trace stored");
                Some(id)
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    backend = self.store.backend(),
                    operation = operation_name,
                    transient = e.is_transient(),
                    error = %e,
                    "Trace dropped"
                );
                None
            }
        }
    }

    /// Retained traces, most recent first; empty when the store cannot be read
    pub fn traces(&self, query: ListQuery) -> Vec<StoredTrace> {
        self.store.list(query).unwrap_or_else(|e| {
            tracing::warn!(backend = self.store.backend(), error = %e, "Listing traces failed");
            Vec::new()
        })
    }

    pub fn find_trace(&self, id: TraceId) -> Option<StoredTrace> {
        self.store.find(id).unwrap_or_else(|e| {
            tracing::warn!(backend = self.store.backend(), trace_id = id, error = %e, "Reading trace failed");
            None
        })
    }

    pub fn delete_trace(&self, id: TraceId) -> bool {
        self.store.delete(id).unwrap_or_else(|e| {
            tracing::warn!(backend = self.store.backend(), trace_id = id, error = %e, "Deleting trace failed");
            false
        })
    }

    pub fn delete_all_traces(&self) -> usize {
        self.store.delete_all().unwrap_or_else(|e| {
            tracing::warn!(backend = self.store.backend(), error = %e, "Clearing traces failed");
            0
        })
    }

    /// Traces lost to storage failures since creation
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TraceSink for DetailedTrace {
    fn save_trace(&self, operation_name: &str, duration_ms: u64, begin_ms: i64, payload: Vec<u8>) -> Option<u64> {
        DetailedTrace::save_trace(self, operation_name, duration_ms, begin_ms, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::MemoryTraceStore;
    use crate::store::MockTraceStore;
    use gql_trace_core::{AlwaysSample, PerfettoTrace, Query, Trace};

    fn failing_store() -> MockTraceStore {
        let mut store = MockTraceStore::new();
        store.expect_backend().return_const("mock");
        store.expect_limit().return_const(5usize);
        store
            .expect_save()
            .returning(|_, _, _, _| Err(StoreError::unavailable("connection refused")));
        store
            .expect_list()
            .returning(|_| Err(StoreError::unavailable("connection refused")));
        store
            .expect_find()
            .returning(|_| Err(StoreError::unavailable("connection refused")));
        store
            .expect_delete()
            .returning(|_| Err(StoreError::unavailable("connection refused")));
        store
            .expect_delete_all()
            .returning(|| Err(StoreError::unavailable("connection refused")));
        store
    }

    #[test]
    fn test_failed_save_is_dropped() {
        let detailed = DetailedTrace::new(Arc::new(failing_store()));
        assert_eq!(detailed.save_trace("GetUser", 3, 0, vec![1]), None);
        assert_eq!(detailed.save_trace("GetUser", 3, 0, vec![1]), None);
        assert_eq!(detailed.dropped_count(), 2);
    }

    #[test]
    fn test_failed_reads_degrade() {
        let detailed = DetailedTrace::new(Arc::new(failing_store()));
        assert!(detailed.traces(ListQuery::new()).is_empty());
        assert!(detailed.find_trace(1).is_none());
        assert!(!detailed.delete_trace(1));
        assert_eq!(detailed.delete_all_traces(), 0);
        assert_eq!(detailed.dropped_count(), 0);
    }

    #[test]
    fn test_save_passes_through() {
        let mut store = MockTraceStore::new();
        store
            .expect_save()
            .withf(|name, duration, begin, data| name == "GetUser" && *duration == 7 && *begin == 100 && data == &vec![9])
            .times(1)
            .returning(|_, _, _, _| Ok(41));
        let detailed = DetailedTrace::new(Arc::new(store));
        assert_eq!(detailed.save_trace("GetUser", 7, 100, vec![9]), Some(41));
    }

    #[test]
    fn test_default_sampler_samples_nothing() {
        let detailed = DetailedTrace::new(Arc::new(MemoryTraceStore::new(5).unwrap()));
        assert!(!detailed.should_sample(&Multiplex::single(Query::new("{ a }"))));
        assert_eq!(detailed.trace_mode(), DEFAULT_TRACE_MODE);
    }

    #[test]
    fn test_install_stores_sampled_execution() {
        let store = Arc::new(MemoryTraceStore::new(5).unwrap());
        let detailed = Arc::new(
            DetailedTrace::new(store.clone())
                .with_sampler(AlwaysSample)
                .with_trace_mode("profile"),
        );
        let mut setup = TraceSetup::new();
        detailed.install(&mut setup).unwrap();
        assert_eq!(setup.detailed_mode(), Some("profile"));

        let multiplex = Multiplex::single(Query::new("{ a }").with_operation_name("GetA"));
        let mut chain = setup.new_trace(&multiplex, None).unwrap();
        chain.begin_execute_multiplex(&multiplex);
        chain.end_execute_multiplex(&multiplex);

        let saved = chain.find::<PerfettoTrace>().and_then(|t| t.saved_trace_id());
        let stored = detailed.traces(ListQuery::new());
        assert_eq!(stored.len(), 1);
        assert_eq!(saved, Some(stored[0].id));
        assert_eq!(stored[0].operation_name, "GetA");
        assert!(!stored[0].trace_data.is_empty());
    }

    #[test]
    fn test_failing_store_does_not_break_execution() {
        let detailed = Arc::new(DetailedTrace::new(Arc::new(failing_store())).with_sampler(AlwaysSample));
        let mut setup = TraceSetup::new();
        detailed.install(&mut setup).unwrap();

        let multiplex = Multiplex::single(Query::new("{ a }"));
        let mut chain = setup.new_trace(&multiplex, None).unwrap();
        chain.begin_execute_multiplex(&multiplex);
        chain.end_execute_multiplex(&multiplex);

        assert!(chain.find::<PerfettoTrace>().unwrap().saved_trace_id().is_none());
        assert_eq!(detailed.dropped_count(), 1);
    }
}
