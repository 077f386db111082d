//! Persistent trace store on sled
//!
//! Two trees keyed by the big-endian trace id, so iteration order is
//! insertion order:
//!
//! - `traces`: JSON [`TraceRecord`] metadata
//! - `data`: the binary payload
//!
//! A save writes both trees in one transaction and removals take metadata
//! before payload, so a record in `traces` always has its payload unless the
//! database was damaged.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, IVec, Transactional, Tree};

use crate::error::{StoreError, StoreResult};
use crate::store::{ListQuery, StoredTrace, TraceId, TraceStore};

const TRACES_TREE: &str = "traces";
const DATA_TREE: &str = "data";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TraceRecord {
    operation_name: String,
    duration_ms: u64,
    begin_ms: i64,
}

/// Bounded store backed by an on-disk sled database
pub struct SledTraceStore {
    db: Arc<Db>,
    traces: Tree,
    data: Tree,
    limit: usize,
    // Serializes save/evict so concurrent writers cannot over-evict
    write_lock: Mutex<()>,
}

impl fmt::Debug for SledTraceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SledTraceStore")
            .field("limit", &self.limit)
            .field("traces", &self.traces.len())
            .finish_non_exhaustive()
    }
}

impl SledTraceStore {
    /// Open (or create) a store at `path`
    pub fn open<P: AsRef<Path>>(path: P, limit: usize) -> StoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        Self::with_db(db, limit)
    }

    /// Use an already opened database
    pub fn with_db(db: Db, limit: usize) -> StoreResult<Self> {
        if limit == 0 {
            return Err(StoreError::config("trace limit must be at least 1"));
        }
        let traces = db.open_tree(TRACES_TREE)?;
        let data = db.open_tree(DATA_TREE)?;
        let store = Self {
            db: Arc::new(db),
            traces,
            data,
            limit,
            write_lock: Mutex::new(()),
        };
        // A smaller limit than the one the database was written with applies on open
        store.evict_overflow()?;
        Ok(store)
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> StoreResult<usize> {
        Ok(self.db.flush()?)
    }

    fn evict_overflow(&self) -> StoreResult<()> {
        let mut count = self.traces.len();
        while count > self.limit {
            match self.traces.pop_min()? {
                Some((key, _)) => {
                    self.data.remove(&key)?;
                    count -= 1;
                    tracing::debug!(trace_id = ?decode_id(&key).ok(), backend = "sled", "Evicted oldest trace");
                }
                None => break,
            }
        }
        Ok(())
    }

    fn load(&self, key: &IVec, meta: &IVec) -> StoreResult<StoredTrace> {
        let id = decode_id(key)?;
        let record: TraceRecord = serde_json::from_slice(meta)?;
        let trace_data = self
            .data
            .get(key)?
            .ok_or_else(|| StoreError::corrupt(id, "payload missing"))?;
        Ok(StoredTrace {
            id,
            operation_name: record.operation_name,
            duration_ms: record.duration_ms,
            begin_ms: record.begin_ms,
            trace_data: trace_data.to_vec(),
        })
    }
}

fn decode_id(key: &[u8]) -> StoreResult<TraceId> {
    <[u8; 8]>::try_from(key)
        .map(u64::from_be_bytes)
        .map_err(|_| StoreError::corrupt(format!("{:?}", key), "key is not a trace id"))
}

impl TraceStore for SledTraceStore {
    fn backend(&self) -> &'static str {
        "sled"
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn save(&self, operation_name: &str, duration_ms: u64, begin_ms: i64, trace_data: Vec<u8>) -> StoreResult<TraceId> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let id = self.db.generate_id()? + 1;
        let key = id.to_be_bytes();
        let record = TraceRecord {
            operation_name: operation_name.to_string(),
            duration_ms,
            begin_ms,
        };
        let meta = serde_json::to_vec(&record)?;
        (&self.traces, &self.data)
            .transaction(|(traces, data)| {
                data.insert(&key[..], trace_data.as_slice())?;
                traces.insert(&key[..], meta.as_slice())?;
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => StoreError::Sled(e),
                TransactionError::Abort(()) => StoreError::unavailable("trace write aborted"),
            })?;
        self.evict_overflow()?;
        self.db.flush()?;
        Ok(id)
    }

    fn list(&self, query: ListQuery) -> StoreResult<Vec<StoredTrace>> {
        let mut found = Vec::new();
        let wanted = query.last.unwrap_or(usize::MAX);
        for entry in self.traces.iter().rev() {
            if found.len() >= wanted {
                break;
            }
            let (key, meta) = entry?;
            let record: TraceRecord = serde_json::from_slice(&meta)?;
            if query.before.map_or(false, |before| record.begin_ms >= before) {
                continue;
            }
            found.push(self.load(&key, &meta)?);
        }
        Ok(found)
    }

    fn find(&self, id: TraceId) -> StoreResult<Option<StoredTrace>> {
        let key = IVec::from(&id.to_be_bytes()[..]);
        match self.traces.get(&key)? {
            Some(meta) => self.load(&key, &meta).map(Some),
            None => Ok(None),
        }
    }

    fn delete(&self, id: TraceId) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = id.to_be_bytes();
        let removed = self.traces.remove(key)?.is_some();
        self.data.remove(key)?;
        self.db.flush()?;
        Ok(removed)
    }

    fn delete_all(&self) -> StoreResult<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self.traces.len();
        self.traces.clear()?;
        self.data.clear()?;
        self.db.flush()?;
        Ok(removed)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.traces.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir, limit: usize) -> SledTraceStore {
        SledTraceStore::open(dir.path().join("traces.db"), limit).unwrap()
    }

    #[test]
    fn test_save_and_find() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 10);

        let id = store.save("GetUser", 42, 1_700_000_000_000, vec![10, 20, 30]).unwrap();
        let trace = store.find(id).unwrap().unwrap();
        assert_eq!(trace.id, id);
        assert_eq!(trace.operation_name, "GetUser");
        assert_eq!(trace.duration_ms, 42);
        assert_eq!(trace.trace_data, vec![10, 20, 30]);
        assert!(store.find(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let first = {
            let store = open(&dir, 10);
            let first = store.save("A", 1, 100, vec![1]).unwrap();
            store.save("B", 1, 200, vec![2]).unwrap();
            first
        };

        let store = open(&dir, 10);
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.find(first).unwrap().unwrap().operation_name, "A");

        // ids keep increasing across reopen
        let third = store.save("C", 1, 300, vec![3]).unwrap();
        let names: Vec<_> = store
            .list(ListQuery::new())
            .unwrap()
            .into_iter()
            .map(|t| t.operation_name)
            .collect();
        assert_eq!(names, vec!["C", "B", "A"]);
        assert!(third > first);
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 3);
        let ids: Vec<_> = (0..5)
            .map(|i| store.save(&format!("Op{}", i), 1, i * 10, vec![i as u8]).unwrap())
            .collect();

        assert_eq!(store.len().unwrap(), 3);
        assert!(store.find(ids[0]).unwrap().is_none());
        assert!(store.find(ids[1]).unwrap().is_none());
        let listed: Vec<_> = store.list(ListQuery::new()).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(listed, vec![ids[4], ids[3], ids[2]]);
    }

    #[test]
    fn test_payload_and_metadata_stay_paired() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 4);
        for i in 0..9 {
            store.save("Op", 1, i, vec![i as u8; 16]).unwrap();
        }
        assert_eq!(store.traces.len(), 4);
        assert_eq!(store.data.len(), 4);
        let keys = |tree: &Tree| -> Vec<IVec> { tree.iter().keys().map(Result::unwrap).collect() };
        assert_eq!(keys(&store.traces), keys(&store.data));
    }

    #[test]
    fn test_reopen_with_smaller_limit_evicts() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir, 10);
            for i in 0..6 {
                store.save("Op", 1, i, vec![]).unwrap();
            }
        }
        let store = open(&dir, 2);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_list_window() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 10);
        for i in 0..6 {
            store.save(&format!("Op{}", i), 1, i * 100, vec![]).unwrap();
        }

        let names: Vec<_> = store
            .list(ListQuery::new().before(400).last(2))
            .unwrap()
            .into_iter()
            .map(|t| t.operation_name)
            .collect();
        assert_eq!(names, vec!["Op3", "Op2"]);
        assert_eq!(store.list(ListQuery::new().last(0)).unwrap().len(), 0);
    }

    #[test]
    fn test_delete_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 10);
        let a = store.save("A", 1, 0, vec![1]).unwrap();
        store.save("B", 1, 0, vec![2]).unwrap();

        assert!(store.delete(a).unwrap());
        assert!(!store.delete(a).unwrap());
        assert_eq!(store.data.len(), 1);

        assert_eq!(store.delete_all().unwrap(), 1);
        assert_eq!(store.len().unwrap(), 0);
        assert!(store.data.is_empty());
    }

    #[test]
    fn test_missing_payload_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 10);
        let id = store.save("A", 1, 0, vec![1]).unwrap();
        store.data.remove(id.to_be_bytes()).unwrap();

        let err = store.find(id).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let dir = TempDir::new().unwrap();
        let err = SledTraceStore::open(dir.path().join("db"), 0).err().unwrap();
        assert!(err.is_user_error());
    }
}
