//! Semi-space heap
//!
//! One contiguous arena split into two equal semi-spaces. Allocation bumps a
//! pointer through the active half; when it runs out the runtime collects
//! into the other half. When the live set stays above the configured
//! fraction of a semi-space, the next collection doubles the arena instead
//! of flipping.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};

use super::object::round_alloc;

/// Smallest arena the heap will accept (two 4 KiB semi-spaces).
pub const MIN_HEAP_SIZE: usize = 8 * 1024;

/// Arena alignment. Object pointers must keep their low three bits free for
/// tags, and 16 also keeps the semi-space boundary aligned.
const ARENA_ALIGN: usize = 16;

/// The bump-allocated semi-space heap.
pub struct Heap {
    arena: *mut u8,
    arena_size: usize,
    semi_size: usize,
    /// Base of the active semi-space.
    from: *mut u8,
    /// Next free address in the active semi-space.
    bump: *mut u8,
    /// End of the active semi-space.
    limit: *mut u8,
    /// Set when the next collection should double the arena.
    grow_pending: bool,
}

/// Token for the space being vacated during a collection. Holding it keeps
/// the old memory mapped until the scan phase has copied everything out.
pub struct OldSpace {
    old_arena: Option<(*mut u8, Layout)>,
}

impl Heap {
    /// Allocate an arena of `total` bytes (clamped up to [`MIN_HEAP_SIZE`]).
    pub fn new(total: usize) -> Heap {
        let total = total.max(MIN_HEAP_SIZE) & !(ARENA_ALIGN - 1);
        let layout = Layout::from_size_align(total, ARENA_ALIGN).expect("heap layout");
        let arena = unsafe { alloc(layout) };
        if arena.is_null() {
            handle_alloc_error(layout);
        }
        Heap {
            arena,
            arena_size: total,
            semi_size: total / 2,
            from: arena,
            bump: arena,
            limit: unsafe { arena.add(total / 2) },
            grow_pending: false,
        }
    }

    /// Bump-allocate `size` bytes (rounded up to 8, minimum 16).
    /// Returns `None` when the active semi-space is exhausted; the caller
    /// runs a collection and retries.
    pub fn try_alloc(&mut self, size: usize) -> Option<*mut u8> {
        let size = round_alloc(size);
        let remaining = self.limit as usize - self.bump as usize;
        if size > remaining {
            return None;
        }
        let ptr = self.bump;
        self.bump = unsafe { self.bump.add(size) };
        Some(ptr)
    }

    /// Bytes currently allocated in the active semi-space.
    pub fn used(&self) -> usize {
        self.bump as usize - self.from as usize
    }

    /// Size of one semi-space.
    pub fn semi_size(&self) -> usize {
        self.semi_size
    }

    /// Current bump cursor (the collector's scan base is captured from it).
    pub(crate) fn bump_ptr(&self) -> *mut u8 {
        self.bump
    }

    /// Schedule a doubling for the next collection.
    pub(crate) fn request_grow(&mut self) {
        self.grow_pending = true;
    }

    pub(crate) fn grow_pending(&self) -> bool {
        self.grow_pending
    }

    /// Flip (or grow) to the target semi-space. Evacuation and scanning
    /// happen between this and [`Heap::finish_collect`]; the returned token
    /// keeps the vacated memory alive until then.
    pub(crate) fn begin_collect(&mut self) -> OldSpace {
        if self.grow_pending {
            self.grow_pending = false;
            let old_layout =
                Layout::from_size_align(self.arena_size, ARENA_ALIGN).expect("heap layout");
            let old_arena = self.arena;

            let new_size = self.arena_size * 2;
            let layout = Layout::from_size_align(new_size, ARENA_ALIGN).expect("heap layout");
            let arena = unsafe { alloc(layout) };
            if arena.is_null() {
                handle_alloc_error(layout);
            }
            self.arena = arena;
            self.arena_size = new_size;
            self.semi_size = new_size / 2;
            self.from = arena;
            self.bump = arena;
            self.limit = unsafe { arena.add(self.semi_size) };
            OldSpace {
                old_arena: Some((old_arena, old_layout)),
            }
        } else {
            let to = if self.from == self.arena {
                unsafe { self.arena.add(self.semi_size) }
            } else {
                self.arena
            };
            self.from = to;
            self.bump = to;
            self.limit = unsafe { to.add(self.semi_size) };
            OldSpace { old_arena: None }
        }
    }

    /// Allocation during a collection. The to-space is at least as large as
    /// the live set, so exhaustion here is a collector bug.
    pub(crate) fn alloc_during_collect(&mut self, size: usize) -> *mut u8 {
        debug_assert_eq!(size, round_alloc(size));
        let remaining = self.limit as usize - self.bump as usize;
        assert!(size <= remaining, "live set exceeds semi-space during GC");
        let ptr = self.bump;
        self.bump = unsafe { self.bump.add(size) };
        ptr
    }

    /// Release the vacated arena (a no-op for a plain flip).
    pub(crate) fn finish_collect(&mut self, old: OldSpace) {
        if let Some((ptr, layout)) = old.old_arena {
            unsafe { dealloc(ptr, layout) };
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.arena_size, ARENA_ALIGN).expect("heap layout");
        unsafe { dealloc(self.arena, layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_creation() {
        let heap = Heap::new(64 * 1024);
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.semi_size(), 32 * 1024);
    }

    #[test]
    fn test_minimum_arena() {
        let heap = Heap::new(16);
        assert_eq!(heap.semi_size(), MIN_HEAP_SIZE / 2);
    }

    #[test]
    fn test_bump_allocation() {
        let mut heap = Heap::new(64 * 1024);
        let a = heap.try_alloc(24).unwrap();
        let b = heap.try_alloc(24).unwrap();
        assert_eq!(b as usize - a as usize, 24);
        assert_eq!(heap.used(), 48);
    }

    #[test]
    fn test_minimum_allocation_size() {
        let mut heap = Heap::new(64 * 1024);
        let a = heap.try_alloc(1).unwrap();
        let b = heap.try_alloc(1).unwrap();
        // 1-byte requests still take 16 bytes so headers can be rewritten
        // as forwarding pointers.
        assert_eq!(b as usize - a as usize, 16);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut heap = Heap::new(MIN_HEAP_SIZE);
        let semi = heap.semi_size();
        let mut allocated = 0;
        while heap.try_alloc(32).is_some() {
            allocated += 32;
        }
        assert!(allocated <= semi);
        assert!(heap.try_alloc(32).is_none());
    }

    #[test]
    fn test_flip_resets_bump() {
        let mut heap = Heap::new(MIN_HEAP_SIZE);
        heap.try_alloc(64).unwrap();
        assert_eq!(heap.used(), 64);

        let old = heap.begin_collect();
        assert_eq!(heap.used(), 0);
        heap.finish_collect(old);
    }

    #[test]
    fn test_grow_doubles_semi_space() {
        let mut heap = Heap::new(MIN_HEAP_SIZE);
        let semi = heap.semi_size();
        heap.request_grow();
        let old = heap.begin_collect();
        heap.finish_collect(old);
        assert_eq!(heap.semi_size(), semi * 2);
    }
}
