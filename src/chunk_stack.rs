//! Lock-free LIFO cache of freed chunks, shared by every thread.
//!
//! Arenas push chunks here instead of unmapping them, and pull from here
//! before asking the OS for fresh memory. The link pointer lives in the
//! first pointer-width bytes of each chunk, so the stack carries no
//! storage of its own.

use core::sync::atomic::Ordering;

use portable_atomic::AtomicU128;

/// Walk limit for [`ChunkStack::approximate_size`], in case a racing
/// writer leaves a cycle behind.
const APPROXIMATE_SIZE_CAP: usize = 1_000_000;

/// 128-bit tagged head for double-width compare-and-swap.
///
/// Bits [63:0] hold the top chunk's address, bits [127:64] a generation
/// tag bumped on every successful CAS. Without the tag, a pop could
/// observe head `A`, get preempted while `A` is popped and re-pushed
/// around it, then CAS against a bitwise-equal but logically different
/// head (the classic ABA hazard).
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct TaggedHead(u128);

impl TaggedHead {
    const EMPTY: Self = Self(0);

    #[inline]
    fn new(ptr: *mut u8, tag: u64) -> Self {
        Self((u128::from(tag) << 64) | (ptr as usize as u128))
    }

    #[inline]
    fn ptr(self) -> *mut u8 {
        (self.0 as usize) as *mut u8
    }

    #[inline]
    fn tag(self) -> u64 {
        (self.0 >> 64) as u64
    }
}

/// Lock-free stack of chunk base pointers.
///
/// Push publishes with release ordering, pop consumes with acquire, so a
/// chunk's contents written before `push` are visible to whichever thread
/// pops it. Both operations retry on CAS failure with a relaxed reload.
pub struct ChunkStack {
    head: AtomicU128,
}

impl ChunkStack {
    /// An empty stack.
    pub const fn new() -> Self {
        Self {
            head: AtomicU128::new(TaggedHead::EMPTY.0),
        }
    }

    /// Pushes a chunk base onto the stack. No-op on null.
    ///
    /// # Safety
    /// `chunk` must be null or a writable chunk base obtained from the
    /// provider, with no live blocks inside it.
    pub unsafe fn push(&self, chunk: *mut u8) {
        if chunk.is_null() {
            return;
        }

        let mut current = self.head.load(Ordering::Relaxed);
        loop {
            let old = TaggedHead(current);

            // Link the new node to the current top before publishing.
            (chunk as *mut *mut u8).write(old.ptr());

            let new = TaggedHead::new(chunk, old.tag().wrapping_add(1));
            match self.head.compare_exchange_weak(
                current,
                new.0,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Detaches and returns the top chunk, or null if the stack is empty.
    pub fn pop(&self) -> *mut u8 {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let old = TaggedHead(current);
            let top = old.ptr();
            if top.is_null() {
                return core::ptr::null_mut();
            }

            let next = unsafe { (top as *const *mut u8).read() };
            let new = TaggedHead::new(next, old.tag().wrapping_add(1));
            match self.head.compare_exchange_weak(
                current,
                new.0,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return top,
                Err(actual) => current = actual,
            }
        }
    }

    /// Whether the stack currently has no chunks (racy snapshot).
    pub fn is_empty(&self) -> bool {
        TaggedHead(self.head.load(Ordering::Relaxed)).ptr().is_null()
    }

    /// Counts the nodes currently reachable from the head.
    ///
    /// Diagnostic only: the walk races with concurrent pushes and pops
    /// and may over- or under-count. Capped at a safety bound.
    pub fn approximate_size(&self) -> usize {
        let mut count = 0;
        let mut current = TaggedHead(self.head.load(Ordering::Relaxed)).ptr();
        while !current.is_null() && count < APPROXIMATE_SIZE_CAP {
            count += 1;
            current = unsafe { (current as *const *mut u8).read_volatile() };
        }
        count
    }
}

impl Default for ChunkStack {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_CHUNK_STACK: ChunkStack = ChunkStack::new();

/// The process-wide chunk recycler. Never destroyed; chunks parked here at
/// process exit are reclaimed by the OS with the rest of the address space.
pub fn global_chunk_stack() -> &'static ChunkStack {
    &GLOBAL_CHUNK_STACK
}
