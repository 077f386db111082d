//! Per-fiber span stacks, flow links and running counters
//!
//! Only one fiber runs at a time, but many can be suspended with spans open,
//! so every stack is keyed by fiber identity.

use std::collections::HashMap;

use crate::alloc::AllocationSource;
use crate::args::{FiberId, SourceId};

/// Which hook pair opened a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    Multiplex,
    Parse,
    Validate,
    Analyze,
    ExecuteQuery,
    ExecuteQueryLazy,
    Field,
    Authorized,
    ResolveType,
    Source,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Multiplex => "multiplex",
            SpanKind::Parse => "parse",
            SpanKind::Validate => "validate",
            SpanKind::Analyze => "analyze",
            SpanKind::ExecuteQuery => "execute_query",
            SpanKind::ExecuteQueryLazy => "execute_query_lazy",
            SpanKind::Field => "field",
            SpanKind::Authorized => "authorized",
            SpanKind::ResolveType => "resolve_type",
            SpanKind::Source => "source",
        }
    }
}

/// A begun span: its kind and the index of its begin packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenSpan {
    pub kind: SpanKind,
    pub packet: usize,
}

/// Why an end could not be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unbalanced {
    /// Nothing open on the fiber
    Empty,
    /// The innermost open span is of another kind
    Mismatch { expected: SpanKind, found: SpanKind },
}

/// Open-span stacks for every fiber of one capture
#[derive(Debug, Default)]
pub struct FiberStacks {
    stacks: HashMap<FiberId, Vec<OpenSpan>>,
}

impl FiberStacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fiber: FiberId, span: OpenSpan) {
        self.stacks.entry(fiber).or_default().push(span);
    }

    pub fn top(&self, fiber: FiberId) -> Option<OpenSpan> {
        self.stacks.get(&fiber).and_then(|s| s.last().copied())
    }

    /// Pop the innermost span if it is of `kind`; leave the stack alone otherwise
    pub fn pop(&mut self, fiber: FiberId, kind: SpanKind) -> Result<OpenSpan, Unbalanced> {
        let stack = self.stacks.get_mut(&fiber).ok_or(Unbalanced::Empty)?;
        match stack.last() {
            None => Err(Unbalanced::Empty),
            Some(top) if top.kind != kind => Err(Unbalanced::Mismatch {
                expected: kind,
                found: top.kind,
            }),
            Some(_) => stack.pop().ok_or(Unbalanced::Empty),
        }
    }

    /// Point the innermost span at a new begin packet
    pub fn retarget_top(&mut self, fiber: FiberId, packet: usize) -> Option<OpenSpan> {
        let top = self.stacks.get_mut(&fiber)?.last_mut()?;
        top.packet = packet;
        Some(*top)
    }

    pub fn depth(&self, fiber: FiberId) -> usize {
        self.stacks.get(&fiber).map_or(0, Vec::len)
    }

    /// Fibers with spans still open, with their depth, ordered by fiber id
    pub fn unbalanced(&self) -> Vec<(FiberId, usize)> {
        let mut open: Vec<_> = self
            .stacks
            .iter()
            .filter(|(_, stack)| !stack.is_empty())
            .map(|(fiber, stack)| (*fiber, stack.len()))
            .collect();
        open.sort_unstable();
        open
    }

    pub fn is_balanced(&self) -> bool {
        self.stacks.values().all(Vec::is_empty)
    }
}

/// Flow id for the span whose begin packet sits at `packet`
///
/// Deterministic in the span's identity and unique across captures.
pub fn flow_id_for(sequence_id: u32, packet: usize) -> u64 {
    (u64::from(sequence_id) << 32) | (packet as u64 & 0xFFFF_FFFF)
}

/// Flow ids waiting for the source that caused a yield
#[derive(Debug, Default)]
pub struct FlowLinks {
    pending: HashMap<SourceId, Vec<u64>>,
}

impl FlowLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: SourceId, flow_id: u64) {
        let ids = self.pending.entry(source).or_default();
        if !ids.contains(&flow_id) {
            ids.push(flow_id);
        }
    }

    /// Consume the ids waiting on `source`
    pub fn take(&mut self, source: SourceId) -> Vec<u64> {
        self.pending.remove(&source).unwrap_or_default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }
}

/// Running totals sampled alongside events
pub struct Counters {
    allocations: Box<dyn AllocationSource>,
    allocation_baseline: u64,
    fibers: i64,
    fields: i64,
}

impl std::fmt::Debug for Counters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counters")
            .field("allocation_baseline", &self.allocation_baseline)
            .field("fibers", &self.fibers)
            .field("fields", &self.fields)
            .finish()
    }
}

impl Counters {
    pub fn new(allocations: Box<dyn AllocationSource>) -> Self {
        let allocation_baseline = allocations.total_allocated();
        Self {
            allocations,
            allocation_baseline,
            fibers: 0,
            fields: 0,
        }
    }

    /// Allocations since capture start
    pub fn allocations(&self) -> i64 {
        let delta = self
            .allocations
            .total_allocated()
            .saturating_sub(self.allocation_baseline);
        i64::try_from(delta).unwrap_or(i64::MAX)
    }

    /// Apply `delta` to the active fiber count and return the new value
    pub fn add_fibers(&mut self, delta: i64) -> i64 {
        self.fibers += delta;
        self.fibers
    }

    pub fn fibers(&self) -> i64 {
        self.fibers
    }

    /// Count one more resolved field and return the new value
    pub fn add_field(&mut self) -> i64 {
        self.fields += 1;
        self.fields
    }

    pub fn fields(&self) -> i64 {
        self.fields
    }
}
