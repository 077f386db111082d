//! In-memory trace store
//!
//! A FIFO ring behind one mutex. Nothing survives a restart.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{StoreError, StoreResult};
use crate::store::{ListQuery, StoredTrace, TraceId, TraceStore};

#[derive(Debug, Default)]
struct MemoryState {
    traces: VecDeque<StoredTrace>,
    last_id: TraceId,
}

/// Bounded in-process store
#[derive(Debug)]
pub struct MemoryTraceStore {
    limit: usize,
    state: Mutex<MemoryState>,
}

impl MemoryTraceStore {
    pub fn new(limit: usize) -> StoreResult<Self> {
        if limit == 0 {
            return Err(StoreError::config("trace limit must be at least 1"));
        }
        Ok(Self {
            limit,
            state: Mutex::new(MemoryState::default()),
        })
    }

    // A panic mid-mutation leaves the deque consistent, so poisoning is ignored
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TraceStore for MemoryTraceStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn save(&self, operation_name: &str, duration_ms: u64, begin_ms: i64, trace_data: Vec<u8>) -> StoreResult<TraceId> {
        let mut state = self.state();
        state.last_id += 1;
        let id = state.last_id;
        state.traces.push_back(StoredTrace {
            id,
            operation_name: operation_name.to_string(),
            duration_ms,
            begin_ms,
            trace_data,
        });
        while state.traces.len() > self.limit {
            if let Some(evicted) = state.traces.pop_front() {
                tracing::debug!(trace_id = evicted.id, backend = "memory", "Evicted oldest trace");
            }
        }
        Ok(id)
    }

    fn list(&self, query: ListQuery) -> StoreResult<Vec<StoredTrace>> {
        let state = self.state();
        Ok(query.apply(state.traces.iter().rev().cloned()))
    }

    fn find(&self, id: TraceId) -> StoreResult<Option<StoredTrace>> {
        let state = self.state();
        let found = state
            .traces
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .and_then(|index| state.traces.get(index).cloned());
        Ok(found)
    }

    fn delete(&self, id: TraceId) -> StoreResult<bool> {
        let mut state = self.state();
        match state.traces.binary_search_by_key(&id, |t| t.id) {
            Ok(index) => Ok(state.traces.remove(index).is_some()),
            Err(_) => Ok(false),
        }
    }

    fn delete_all(&self) -> StoreResult<usize> {
        let mut state = self.state();
        let removed = state.traces.len();
        state.traces.clear();
        Ok(removed)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.state().traces.len())
    }
}
