//! Bounded retention of sampled execution traces.
//!
//! Backends implement [`TraceStore`]: [`MemoryTraceStore`] keeps traces in
//! process memory, [`SledTraceStore`] in an embedded sled database. Both keep
//! at most `limit` traces and evict the oldest first.
//!
//! [`DetailedTrace`] is what a host installs on its
//! [`TraceSetup`](gql_trace_core::TraceSetup): it decides which executions are
//! captured and receives their encoded traces, turning storage failures into
//! logged, dropped traces instead of request errors.
//!
//! # Usage
//!
//! ```rust,no_run
//! use gql_trace_core::TraceSetup;
//! use gql_trace_storage::{DetailedTraceConfig, ListQuery};
//! use std::sync::Arc;
//!
//! let detailed = Arc::new(DetailedTraceConfig::from_env()?.open()?);
//! let mut setup = TraceSetup::new();
//! detailed.install(&mut setup)?;
//!
//! // ... run executions through `setup.new_trace(..)` ...
//!
//! for trace in detailed.traces(ListQuery::new().last(10)) {
//!     println!("{} {} {}ms", trace.id, trace.operation_name, trace.duration_ms);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod detailed;
pub mod error;
pub mod memory;
pub mod sled_store;
pub mod store;

pub use config::{DetailedTraceConfig, DetailedTraceConfigBuilder, StoreBackend, DEFAULT_LIMIT};
pub use detailed::{DetailedTrace, DEFAULT_TRACE_MODE};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryTraceStore;
pub use sled_store::SledTraceStore;
pub use store::{ListQuery, StoredTrace, TraceId, TraceStore};
