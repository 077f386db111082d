//! Capture overhead benchmarks
//!
//! # Scenarios
//!
//! 1. **Null trace**: hook dispatch with nothing attached
//! 2. **Flat fields**: N sibling fields through the Perfetto module
//! 3. **Encoding**: protobuf encoding of a finished capture

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gql_trace_core::{
    DebugValue, FiberId, FieldCall, FieldRef, Multiplex, NullTrace, PathSegment, PerfettoOptions,
    PerfettoTrace, Query, Trace, TraceChain, TypeHandle,
};

static NULL: DebugValue = DebugValue::Null;

fn run_fields<T: Trace>(trace: &mut T, count: usize) {
    let query = Query::new("{ items { id } }");
    let multiplex = Multiplex::single(query.clone());
    let field = FieldRef::new(1, TypeHandle(0), "id");
    let result = DebugValue::object("Item", "#<Item id: 1>");

    trace.begin_execute_multiplex(&multiplex);
    for i in 0..count {
        let path = [PathSegment::from("items"), PathSegment::from(i), PathSegment::from("id")];
        let call = FieldCall {
            fiber: FiberId::MAIN,
            field: &field,
            object: &NULL,
            arguments: &NULL,
            path: &path,
            query: &query,
        };
        trace.begin_execute_field(&call);
        trace.end_execute_field(&call, &result);
    }
    trace.end_execute_multiplex(&multiplex);
}

fn capture() -> TraceChain {
    match PerfettoTrace::new(PerfettoOptions::default()) {
        Ok(module) => TraceChain::new().with_module(module),
        Err(e) => panic!("capture unavailable: {}", e),
    }
}

fn bench_null_trace(c: &mut Criterion) {
    c.bench_function("null_trace_100_fields", |b| {
        b.iter(|| {
            let mut trace = NullTrace;
            run_fields(&mut trace, black_box(100));
        })
    });
}

fn bench_perfetto_fields(c: &mut Criterion) {
    let mut group = c.benchmark_group("perfetto_fields");
    for count in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut chain = capture();
                run_fields(&mut chain, count);
                black_box(chain.len())
            })
        });
    }
    group.finish();
}

fn bench_encoding(c: &mut Criterion) {
    let mut chain = capture();
    run_fields(&mut chain, 1000);
    let trace = match chain.find::<PerfettoTrace>() {
        Some(trace) => trace,
        None => return,
    };
    c.bench_function("encode_1000_fields", |b| {
        b.iter(|| black_box(trace.to_bytes().map(|bytes| bytes.len()).unwrap_or_default()))
    });
}

criterion_group!(benches, bench_null_trace, bench_perfetto_fields, bench_encoding);
criterion_main!(benches);
