//! Argument records passed to lifecycle hooks
//!
//! The execution engine owns the schema, the queries and the fibers; it hands
//! the tracer lightweight references to them. Schema elements are identified by
//! stable integer handles assigned when the schema is built, so caches keyed on
//! them never depend on reference identity.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::DebugValue;

/// Identity of a cooperative fiber, stable for the life of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiberId(pub u64);

impl FiberId {
    /// The fiber that runs the top-level execution
    pub const MAIN: FiberId = FiberId(0);
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a schema type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeHandle(pub u32);

/// Handle of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldHandle(pub u32);

/// Handle of a batched-fetch source class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceClassHandle(pub u32);

/// Identity of one batched-fetch source instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub u64);

/// A schema type as seen by hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub handle: TypeHandle,
    pub name: Arc<str>,
}

impl TypeRef {
    pub fn new(handle: u32, name: impl Into<Arc<str>>) -> Self {
        Self {
            handle: TypeHandle(handle),
            name: name.into(),
        }
    }
}

/// A schema field as seen by hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub handle: FieldHandle,
    pub owner: TypeHandle,
    pub name: Arc<str>,
}

impl FieldRef {
    pub fn new(handle: u32, owner: TypeHandle, name: impl Into<Arc<str>>) -> Self {
        Self {
            handle: FieldHandle(handle),
            owner,
            name: name.into(),
        }
    }
}

/// One query in a multiplex
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Name of the operation selected for execution, if any
    pub operation_name: Option<String>,
    /// Query text with secrets removed
    pub sanitized_query_string: String,
    /// Trace mode requested by the caller for this query
    pub trace_mode: Option<String>,
}

impl Query {
    pub fn new(query_string: impl Into<String>) -> Self {
        Self {
            sanitized_query_string: query_string.into(),
            ..Default::default()
        }
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_trace_mode(mut self, mode: impl Into<String>) -> Self {
        self.trace_mode = Some(mode.into());
        self
    }
}

/// A batch of queries executed together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Multiplex {
    pub queries: Vec<Query>,
    /// Trace mode requested for the whole batch
    pub trace_mode: Option<String>,
}

impl Multiplex {
    pub fn new(queries: Vec<Query>) -> Self {
        Self {
            queries,
            trace_mode: None,
        }
    }

    /// Single-query multiplex
    pub fn single(query: Query) -> Self {
        Self::new(vec![query])
    }

    /// Comma-joined operation names, `anonymous` for unnamed operations
    pub fn operation_label(&self) -> String {
        self.queries
            .iter()
            .map(|q| q.operation_name.as_deref().unwrap_or("anonymous"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// All query strings, blank-line separated
    pub fn query_strings(&self) -> String {
        self.queries
            .iter()
            .map(|q| q.sanitized_query_string.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The requested trace mode: the batch's own, or a single query's
    pub fn requested_mode(&self) -> Option<&str> {
        self.trace_mode.as_deref().or_else(|| match self.queries.as_slice() {
            [only] => only.trace_mode.as_deref(),
            _ => None,
        })
    }
}

/// A segment of a result path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(Arc<str>),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => f.write_str(k),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.into())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Dotted rendering of a result path, e.g. `posts.0.author`
pub fn path_label(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// A field resolution in progress
#[derive(Debug, Clone, Copy)]
pub struct FieldCall<'a> {
    pub fiber: FiberId,
    pub field: &'a FieldRef,
    pub object: &'a DebugValue,
    pub arguments: &'a DebugValue,
    pub path: &'a [PathSegment],
    pub query: &'a Query,
}

/// An authorization check in progress
#[derive(Debug, Clone, Copy)]
pub struct AuthorizedCall<'a> {
    pub fiber: FiberId,
    pub type_ref: &'a TypeRef,
    pub object: &'a DebugValue,
}

/// Abstract type resolution in progress
#[derive(Debug, Clone, Copy)]
pub struct ResolveTypeCall<'a> {
    pub fiber: FiberId,
    pub abstract_type: &'a TypeRef,
    pub value: &'a DebugValue,
}

/// A batched-fetch source instance
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub id: SourceId,
    pub class: SourceClassHandle,
    pub class_name: Arc<str>,
    /// Keys waiting to be fetched
    pub pending_keys: Vec<DebugValue>,
    /// Source configuration worth showing next to the fetch
    pub params: Vec<(String, DebugValue)>,
}

impl SourceRef {
    pub fn new(id: u64, class: u32, class_name: impl Into<Arc<str>>) -> Self {
        Self {
            id: SourceId(id),
            class: SourceClassHandle(class),
            class_name: class_name.into(),
            pending_keys: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn with_pending_keys(mut self, keys: Vec<DebugValue>) -> Self {
        self.pending_keys = keys;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<DebugValue>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}
