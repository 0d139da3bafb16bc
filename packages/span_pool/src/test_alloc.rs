use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Forwards to the system allocator and counts the calls, so tests can observe which
/// allocations a buffer or pool performs through an injected allocator.
#[derive(Clone, Debug, Default)]
pub(crate) struct CountingAllocator {
    counts: Arc<Counts>,
}

#[derive(Debug, Default)]
struct Counts {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
}

impl CountingAllocator {
    pub(crate) fn allocations(&self) -> usize {
        self.counts.allocations.load(Ordering::Relaxed)
    }

    pub(crate) fn deallocations(&self) -> usize {
        self.counts.deallocations.load(Ordering::Relaxed)
    }
}

// SAFETY: All calls are forwarded to the system allocator unchanged.
unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.counts.allocations.fetch_add(1, Ordering::Relaxed);

        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.counts.allocations.fetch_add(1, Ordering::Relaxed);

        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.counts.deallocations.fetch_add(1, Ordering::Relaxed);

        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { System.dealloc(ptr, layout) }
    }
}
