//! Sampling and retention driven through a full trace setup

use std::sync::Arc;

use gql_trace_core::{Multiplex, PerfettoTrace, Query, Trace, TraceSetup};
use gql_trace_storage::{
    DetailedTrace, DetailedTraceConfig, ListQuery, MemoryTraceStore, SledTraceStore, TraceStore,
};
use proptest::prelude::*;
use tempfile::TempDir;

fn execute(setup: &TraceSetup, operation: &str) -> Option<u64> {
    let multiplex = Multiplex::single(Query::new("{ viewer { id } }").with_operation_name(operation));
    let mut chain = setup.new_trace(&multiplex, None).unwrap();
    chain.begin_execute_multiplex(&multiplex);
    chain.end_execute_multiplex(&multiplex);
    chain.find::<PerfettoTrace>().and_then(PerfettoTrace::saved_trace_id)
}

fn install(config: DetailedTraceConfig) -> (Arc<DetailedTrace>, TraceSetup) {
    let detailed = Arc::new(config.open().unwrap());
    let mut setup = TraceSetup::new();
    detailed.install(&mut setup).unwrap();
    (detailed, setup)
}

#[test]
fn test_zero_rate_stores_nothing() {
    let (detailed, setup) = install(DetailedTraceConfig::builder().sample_rate(0.0).build().unwrap());

    for i in 0..10_000 {
        assert_eq!(execute(&setup, &format!("Op{}", i)), None);
    }
    assert_eq!(detailed.store().len().unwrap(), 0);
    assert!(detailed.traces(ListQuery::new()).is_empty());
}

#[test]
fn test_full_rate_keeps_most_recent() {
    let (detailed, setup) = install(
        DetailedTraceConfig::builder()
            .sample_rate(1.0)
            .limit(5)
            .build()
            .unwrap(),
    );

    let ids: Vec<u64> = (0..8)
        .map(|i| execute(&setup, &format!("Op{}", i)).unwrap())
        .collect();

    let listed = detailed.traces(ListQuery::new());
    let names: Vec<_> = listed.iter().map(|t| t.operation_name.as_str()).collect();
    assert_eq!(names, vec!["Op7", "Op6", "Op5", "Op4", "Op3"]);
    assert!(listed.iter().all(|t| !t.trace_data.is_empty()));

    for id in &ids[..3] {
        assert!(detailed.find_trace(*id).is_none());
    }
    for id in &ids[3..] {
        assert!(detailed.find_trace(*id).is_some());
    }
}

#[test]
fn test_sled_backend_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("traces");
    let config = DetailedTraceConfig::builder()
        .sled(&path)
        .sample_rate(1.0)
        .limit(3)
        .build()
        .unwrap();

    {
        let (_detailed, setup) = install(config.clone());
        for i in 0..4 {
            execute(&setup, &format!("Op{}", i)).unwrap();
        }
    }

    let store = SledTraceStore::open(&path, 3).unwrap();
    let names: Vec<_> = store
        .list(ListQuery::new())
        .unwrap()
        .into_iter()
        .map(|t| t.operation_name)
        .collect();
    assert_eq!(names, vec!["Op3", "Op2", "Op1"]);
}

#[test]
fn test_stored_payload_decodes() {
    let (detailed, setup) = install(DetailedTraceConfig::builder().sample_rate(1.0).build().unwrap());
    let id = execute(&setup, "GetViewer").unwrap();

    let trace = detailed.find_trace(id).unwrap();
    let packets = gql_trace_core::decode_trace(&trace.trace_data).unwrap();
    assert!(!packets.is_empty());
}

fn check_eviction(store: &dyn TraceStore, limit: usize, extra: usize) {
    let ids: Vec<u64> = (0..limit + extra)
        .map(|i| store.save(&format!("Op{}", i), 1, i as i64, vec![]).unwrap())
        .collect();

    let listed: Vec<u64> = store.list(ListQuery::new()).unwrap().iter().map(|t| t.id).collect();
    let expected: Vec<u64> = ids.iter().rev().take(limit).copied().collect();
    assert_eq!(listed, expected);
    for id in &ids[..extra] {
        assert!(store.find(*id).unwrap().is_none());
    }
}

#[test]
fn test_sled_eviction_bound() {
    let dir = TempDir::new().unwrap();
    let store = SledTraceStore::open(dir.path().join("db"), 4).unwrap();
    check_eviction(&store, 4, 3);
}

proptest! {
    #[test]
    fn prop_memory_store_keeps_newest(limit in 1usize..20, extra in 1usize..20) {
        let store = MemoryTraceStore::new(limit).unwrap();
        check_eviction(&store, limit, extra);
    }

    #[test]
    fn prop_list_window_respects_bounds(last in 0usize..10, before in 0i64..30) {
        let store = MemoryTraceStore::new(25).unwrap();
        for i in 0..25i64 {
            store.save("Op", 1, i, vec![]).unwrap();
        }
        let listed = store.list(ListQuery::new().last(last).before(before)).unwrap();
        prop_assert!(listed.len() <= last);
        prop_assert!(listed.iter().all(|t| t.begin_ms < before));
        prop_assert!(listed.windows(2).all(|w| w[0].id > w[1].id));
    }
}

#[test]
fn test_detailed_trace_over_shared_store() {
    let store = Arc::new(MemoryTraceStore::new(2).unwrap());
    let detailed = DetailedTrace::new(store.clone());
    detailed.save_trace("A", 1, 0, vec![1]);
    detailed.save_trace("B", 1, 0, vec![2]);
    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(detailed.delete_all_traces(), 2);
}
