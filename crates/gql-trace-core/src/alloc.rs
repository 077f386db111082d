//! Allocation counting for the `Allocated Objects` counter track
//!
//! A host that wants real numbers installs [`CountingAllocator`] as its global
//! allocator and passes [`GlobalAllocationCount`] to the capture module:
//!
//! ```rust,ignore
//! use gql_trace_core::alloc::CountingAllocator;
//! use std::alloc::System;
//!
//! #[global_allocator]
//! static ALLOC: CountingAllocator<System> = CountingAllocator::new(System);
//! ```

use std::alloc::{GlobalAlloc, Layout};
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of a monotonically increasing allocation total
pub trait AllocationSource: Send {
    fn total_allocated(&self) -> u64;
}

/// Reports no allocations; the counter track stays flat
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAllocationTracking;

impl AllocationSource for NoAllocationTracking {
    fn total_allocated(&self) -> u64 {
        0
    }
}

static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);

/// Global allocator wrapper counting every allocation
#[derive(Debug, Default)]
pub struct CountingAllocator<A> {
    inner: A,
}

impl<A> CountingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

// SAFETY: every call is forwarded unchanged to the wrapped allocator.
unsafe impl<A: GlobalAlloc> GlobalAlloc for CountingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        self.inner.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.dealloc(ptr, layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        self.inner.alloc_zeroed(layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.inner.realloc(ptr, layout, new_size)
    }
}

/// Reads the total maintained by [`CountingAllocator`]
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalAllocationCount;

impl AllocationSource for GlobalAllocationCount {
    fn total_allocated(&self) -> u64 {
        ALLOCATIONS.load(Ordering::Relaxed)
    }
}

/// Any closure returning a running total
impl<F> AllocationSource for F
where
    F: Fn() -> u64 + Send,
{
    fn total_allocated(&self) -> u64 {
        self()
    }
}
