//! Thread-local arena: one array of bins per thread, no locks anywhere.
//!
//! All slab state behind a bin belongs to exactly one thread. The only
//! cross-thread traffic is whole chunks moving through the global chunk
//! stack, either when a slow path pulls a recycled chunk or when a dying
//! thread donates everything it owns.

use core::cell::RefCell;
use core::ptr::{self, NonNull};

use crate::cache_padded::CachePadded;
use crate::chunk_stack::global_chunk_stack;
use crate::provider::{self, align_up, CHUNK_SIZE, PAGE_SIZE};
use crate::size_class::{self, NUM_CLASSES};
use crate::slab::{header_next, header_set_next, SlabHandle, CLASS_OPS};
use crate::sys;

/// Recovers the owning slab's base from any interior pointer. Sound
/// because every chunk is `CHUNK_SIZE`-aligned.
#[inline]
pub fn slab_base_from_ptr(ptr: *const u8) -> *mut u8 {
    (ptr as usize & !(CHUNK_SIZE - 1)) as *mut u8
}

/// Per-size-class slab lists.
///
/// `current` is the single slab the fast path targets. `partial` and
/// `full` are intrusive LIFO lists threaded through the slab headers;
/// partial keeps the most recently displaced slab at its head, which is
/// the one most likely to still be cache-warm.
struct Bin {
    current: SlabHandle,
    partial: *mut (),
    full: *mut (),
}

impl Bin {
    const fn new() -> Self {
        Self {
            current: SlabHandle::invalid(),
            partial: ptr::null_mut(),
            full: ptr::null_mut(),
        }
    }

    fn push_partial(&mut self, header: *mut ()) {
        unsafe { header_set_next(header, self.partial) };
        self.partial = header;
    }

    fn pop_partial(&mut self) -> *mut () {
        let header = self.partial;
        if !header.is_null() {
            self.partial = unsafe { header_next(header) };
        }
        header
    }

    fn push_full(&mut self, header: *mut ()) {
        unsafe { header_set_next(header, self.full) };
        self.full = header;
    }

    /// Refills `current` and allocates from it. Kept out of line so the
    /// fast path stays small enough to inline into callers.
    #[cold]
    #[inline(never)]
    fn allocate_slow(&mut self, class: usize) -> *mut u8 {
        // A valid current slab only lands here exhausted; retire it.
        if self.current.valid() {
            debug_assert!(unsafe { self.current.full() });
            self.push_full(self.current.raw());
            self.current = SlabHandle::invalid();
        }

        // Most recently displaced partial slab first.
        let revived = self.pop_partial();
        if !revived.is_null() {
            self.current = SlabHandle::from_raw(class, revived);
            return unsafe { self.current.allocate() };
        }

        // Fresh backing: recycled chunk if any thread parked one, else
        // straight from the OS.
        let mut chunk = global_chunk_stack().pop();
        if chunk.is_null() {
            chunk = provider::allocate_chunk();
        }
        let Some(chunk) = NonNull::new(chunk) else {
            return ptr::null_mut();
        };

        let slab = unsafe { SlabHandle::create(class, chunk) };
        if !slab.valid() {
            // Header allocation failed; park the chunk rather than leak it.
            unsafe { global_chunk_stack().push(chunk.as_ptr()) };
            return ptr::null_mut();
        }
        self.current = slab;
        unsafe { self.current.allocate() }
    }

    /// Frees into whichever partial or full slab owns `slab_base`. A full
    /// slab that takes the block back has free space again and moves to
    /// the partial list.
    #[cold]
    #[inline(never)]
    fn deallocate_slow(&mut self, class: usize, ptr: *mut u8, slab_base: *mut u8) {
        let ops = &CLASS_OPS[class];

        let mut cursor = self.partial;
        while !cursor.is_null() {
            if unsafe { (ops.base)(cursor) } == slab_base {
                unsafe { (ops.deallocate)(cursor, ptr) };
                return;
            }
            cursor = unsafe { header_next(cursor) };
        }

        let mut prev: *mut () = ptr::null_mut();
        let mut cursor = self.full;
        while !cursor.is_null() {
            let next = unsafe { header_next(cursor) };
            if unsafe { (ops.base)(cursor) } == slab_base {
                unsafe { (ops.deallocate)(cursor, ptr) };
                if prev.is_null() {
                    self.full = next;
                } else {
                    unsafe { header_set_next(prev, next) };
                }
                self.push_partial(cursor);
                return;
            }
            prev = cursor;
            cursor = next;
        }

        // Unknown pointer or mismatched size: contract breach. The block
        // is dropped on the floor, same in every build; an assertion here
        // would misfire on adapter-level frees that crossed threads.
    }
}

/// Per-thread allocator front end: the full array of bins plus the
/// direct path for requests too large for any slab.
///
/// Normal use goes through the crate-level [`allocate`]/[`deallocate`]
/// functions, which route to a lazily created thread-local instance.
/// Standalone instances are handy in tests. The type is `!Send` (raw
/// pointers inside), which matches its contract: blocks must be freed on
/// the thread that allocated them.
pub struct ThreadArena {
    bins: [CachePadded<Bin>; NUM_CLASSES],
}

impl ThreadArena {
    /// An arena with every bin empty. No memory is mapped until the
    /// first allocation.
    pub const fn new() -> Self {
        const BIN: CachePadded<Bin> = CachePadded::new(Bin::new());
        Self {
            bins: [BIN; NUM_CLASSES],
        }
    }

    /// Returns a 16-byte-aligned block of at least `size` bytes, or null
    /// when out of memory. Size 0 is served from the smallest bin.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        if size_class::is_large(size) {
            return allocate_large(size);
        }

        let class = size_class::index(size);
        let bin = &mut *self.bins[class];
        if bin.current.valid() {
            let ptr = unsafe { bin.current.allocate() };
            if !ptr.is_null() {
                return ptr;
            }
        }
        bin.allocate_slow(class)
    }

    /// Releases a block previously returned by [`ThreadArena::allocate`]
    /// on this arena. No-op on null.
    ///
    /// # Safety
    /// `ptr` must be null or a live block from this arena, and `size`
    /// must classify into the same bin (or large path) as the size used
    /// to allocate it.
    #[inline]
    pub unsafe fn deallocate(&mut self, ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            return;
        }
        if size_class::is_large(size) {
            deallocate_large(ptr, size);
            return;
        }

        let class = size_class::index(size);
        let slab_base = slab_base_from_ptr(ptr);
        let bin = &mut *self.bins[class];
        if bin.current.valid() && bin.current.base() == slab_base {
            bin.current.deallocate(ptr);
            return;
        }
        bin.deallocate_slow(class, ptr, slab_base);
    }

    /// Outstanding allocations across every slab of one bin. Diagnostic.
    pub fn class_used_blocks(&self, class: usize) -> usize {
        let mut total = 0;
        // Handles passed to the closure are valid by list ownership.
        self.for_each_slab(class, |slab| total += unsafe { slab.used_blocks() });
        total
    }

    /// Set occupancy bits across every slab of one bin. Diagnostic.
    pub fn class_occupancy_count(&self, class: usize) -> usize {
        let mut total = 0;
        self.for_each_slab(class, |slab| total += unsafe { slab.occupancy_count() });
        total
    }

    /// Number of slabs (current + partial + full) held for one bin.
    pub fn class_slab_count(&self, class: usize) -> usize {
        let mut total = 0;
        self.for_each_slab(class, |_| total += 1);
        total
    }

    fn for_each_slab(&self, class: usize, mut f: impl FnMut(SlabHandle)) {
        let bin = &self.bins[class];
        if bin.current.valid() {
            f(bin.current);
        }
        for head in [bin.partial, bin.full] {
            let mut cursor = head;
            while !cursor.is_null() {
                f(SlabHandle::from_raw(class, cursor));
                cursor = unsafe { header_next(cursor) };
            }
        }
    }
}

impl Default for ThreadArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadArena {
    /// Donates every owned chunk to the global stack. Chunks must outlive
    /// the arena that last held them; the recycler is the natural sink,
    /// and process exit reclaims whatever is still parked there.
    fn drop(&mut self) {
        for class in 0..NUM_CLASSES {
            let bin = &mut *self.bins[class];

            if bin.current.valid() {
                let chunk = unsafe { bin.current.into_chunk() };
                unsafe { global_chunk_stack().push(chunk) };
                bin.current = SlabHandle::invalid();
            }

            for head in [
                core::mem::replace(&mut bin.partial, ptr::null_mut()),
                core::mem::replace(&mut bin.full, ptr::null_mut()),
            ] {
                let mut cursor = head;
                while !cursor.is_null() {
                    let next = unsafe { header_next(cursor) };
                    let chunk = unsafe { SlabHandle::from_raw(class, cursor).into_chunk() };
                    unsafe { global_chunk_stack().push(chunk) };
                    cursor = next;
                }
            }
        }
    }
}

/// Requests above the largest bin bypass slabs: map a page-rounded
/// anonymous region directly and forget about it. The arena keeps no
/// record of large allocations.
fn allocate_large(size: usize) -> *mut u8 {
    let Some(padded) = size.checked_add(PAGE_SIZE - 1) else {
        return ptr::null_mut();
    };
    let len = padded & !(PAGE_SIZE - 1);
    unsafe { sys::map_region(len) }.unwrap_or(ptr::null_mut())
}

/// # Safety
/// `ptr`/`size` must match a prior [`allocate_large`] call.
unsafe fn deallocate_large(ptr: *mut u8, size: usize) {
    sys::unmap_region(ptr, align_up(size, PAGE_SIZE));
}

thread_local! {
    static ARENA: RefCell<ThreadArena> = const { RefCell::new(ThreadArena::new()) };
}

/// Allocates `size` bytes from the calling thread's arena. Returns null
/// on out-of-memory, or during thread teardown once the arena is gone.
#[inline]
pub fn allocate(size: usize) -> *mut u8 {
    match ARENA.try_with(|arena| arena.borrow_mut().allocate(size)) {
        Ok(ptr) => ptr,
        // TLS destructor already ran; the large path needs no arena.
        Err(_) if size_class::is_large(size) => allocate_large(size),
        Err(_) => ptr::null_mut(),
    }
}

/// Releases `ptr` into the calling thread's arena. No-op on null.
///
/// # Safety
/// `ptr` must be null or a value previously returned by [`allocate`] on
/// this thread, and `size` must classify to the same bin (or the large
/// path) as the allocating call.
#[inline]
pub unsafe fn deallocate(ptr: *mut u8, size: usize) {
    if ptr.is_null() {
        return;
    }
    match ARENA.try_with(|arena| arena.borrow_mut().deallocate(ptr, size)) {
        Ok(()) => {}
        Err(_) if size_class::is_large(size) => deallocate_large(ptr, size),
        // Small frees during teardown are abandoned: the arena already
        // donated its chunks, blocks and all, to the recycler.
        Err(_) => {}
    }
}

/// Runs `f` against the calling thread's arena. Diagnostic seam for
/// tests; returns None during thread teardown.
pub fn with_current<R>(f: impl FnOnce(&mut ThreadArena) -> R) -> Option<R> {
    ARENA.try_with(|arena| f(&mut arena.borrow_mut())).ok()
}
