//! Execution trace capture for GraphQL-style execution engines.
//!
//! This crate provides the hook contract an execution engine calls into, the
//! chain that composes independently written observers behind it, and an
//! observer that records the execution as a Perfetto trace.
//!
//! # Pipeline
//!
//! ```text
//! engine hooks ─▶ TraceChain ─▶ LogTrace ─▶ PerfettoTrace ─▶ packets ─▶ protobuf bytes
//!                     ▲                                                      │
//!               TraceSetup (modes, sampling)                          TraceSink (store)
//! ```
//!
//! # Usage
//!
//! 1. Register observers on a [`TraceSetup`], and optionally enable a detailed
//!    trace with a [`Sampler`] and a [`TraceSink`].
//! 2. Per top-level execution, call [`TraceSetup::new_trace`] and drive the
//!    returned [`TraceChain`] through the [`Trace`] hooks.
//! 3. Sampled executions hand their encoded trace to the sink when the
//!    multiplex ends; [`PerfettoTrace::write`] covers ad-hoc captures.

pub mod alloc;
pub mod args;
pub mod encoder;
pub mod error;
pub mod fiber;
pub mod hooks;
pub mod intern;
pub mod log_trace;
pub mod packet;
pub mod perfetto;
pub mod sampling;
pub mod setup;
pub mod track;
pub mod value;
pub mod wire;

pub use alloc::{AllocationSource, CountingAllocator, GlobalAllocationCount, NoAllocationTracking};
pub use args::{
    path_label, AuthorizedCall, FiberId, FieldCall, FieldHandle, FieldRef, Multiplex, PathSegment,
    Query, ResolveTypeCall, SourceClassHandle, SourceId, SourceRef, TypeHandle, TypeRef,
};
pub use error::{CaptureError, CaptureResult};
pub use hooks::{Next, NullTrace, Trace, TraceChain, TraceModule};
pub use log_trace::LogTrace;
pub use packet::{EventKind, TracePacket};
pub use perfetto::{PerfettoOptions, PerfettoTrace};
pub use sampling::{AlwaysSample, ModeSampler, NeverSample, PredicateSampler, RateSampler, Sampler};
pub use setup::{ModuleFactory, TraceOptions, TraceSetup, TraceSink, DEFAULT_MODE};
pub use value::DebugValue;
pub use wire::{decode_trace, encode_trace};
