//! Slabs: one chunk formatted as an array of equal-size blocks with an
//! embedded free list, plus the monomorphized per-class dispatch table.
//!
//! Block size is a compile-time constant of each `Slab` instantiation, so
//! the block-index division and the occupancy bitmap length cost nothing
//! at runtime. The arena never names a concrete `Slab` type: it holds a
//! [`SlabHandle`] (bin index + type-erased header pointer) and dispatches
//! through [`CLASS_OPS`], a jump table with one entry per size class.

use core::alloc::Layout;
use core::ptr::{self, addr_of_mut, NonNull};
use std::alloc::{GlobalAlloc, System};

use crate::bitmap::{words_for, Bitmap};
use crate::provider::CHUNK_SIZE;
use crate::size_class::{self, NUM_CLASSES};

/// Prefetch the next free block for bursty allocation runs.
#[inline(always)]
fn prefetch_read(ptr: *const u8) {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        use core::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
        _mm_prefetch::<_MM_HINT_T0>(ptr as *const i8);
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = ptr;
}

/// Slab header for blocks of `BLOCK_SIZE` bytes.
///
/// `BLOCKS` must equal `CHUNK_SIZE / BLOCK_SIZE` and `WORDS` must equal
/// `words_for(BLOCKS)`; both are checked at compile time. Headers live on
/// the system heap (never the registered global allocator) and are only
/// ever handled through raw pointers: blocks reference the chunk the
/// header describes, so the header must never be copied or moved.
///
/// The `next` link must stay the first field. Bin lists thread through it
/// with type-erased header pointers, relying on `#[repr(C)]` putting it
/// at offset 0 for every instantiation.
#[repr(C)]
pub struct Slab<const BLOCK_SIZE: usize, const BLOCKS: usize, const WORDS: usize> {
    next: *mut (),
    base: NonNull<u8>,
    free_head: *mut u8,
    allocated: usize,
    occupancy: Bitmap<BLOCKS, WORDS>,
}

impl<const BLOCK_SIZE: usize, const BLOCKS: usize, const WORDS: usize>
    Slab<BLOCK_SIZE, BLOCKS, WORDS>
{
    const PARAMS_CONSISTENT: () = assert!(
        BLOCK_SIZE >= size_class::MIN_BLOCK_SIZE
            && BLOCK_SIZE % size_class::MIN_BLOCK_SIZE == 0
            && BLOCKS == CHUNK_SIZE / BLOCK_SIZE
            && WORDS == words_for(BLOCKS)
    );

    /// Bytes of the chunk actually covered by blocks. For block sizes
    /// that do not divide the chunk evenly, a sub-block tail goes unused.
    const USABLE_SPAN: usize = BLOCKS * BLOCK_SIZE;

    /// Takes ownership of a fresh chunk and formats it into a free list:
    /// each block's first pointer-width bytes point at the next block,
    /// the last at null, and the head starts at the chunk base.
    ///
    /// Returns null if the header allocation fails.
    ///
    /// # Safety
    /// `chunk` must be a chunk-aligned, writable region of `CHUNK_SIZE`
    /// bytes owned by the caller.
    pub unsafe fn create(chunk: NonNull<u8>) -> *mut Self {
        let () = Self::PARAMS_CONSISTENT;

        // Zeroed header: null link, clear bitmap, zero allocated count.
        let header = System.alloc_zeroed(Layout::new::<Self>()) as *mut Self;
        if header.is_null() {
            return ptr::null_mut();
        }

        let base = chunk.as_ptr();
        for i in 0..BLOCKS - 1 {
            let block = base.add(i * BLOCK_SIZE) as *mut *mut u8;
            block.write(base.add((i + 1) * BLOCK_SIZE));
        }
        (base.add((BLOCKS - 1) * BLOCK_SIZE) as *mut *mut u8).write(ptr::null_mut());

        addr_of_mut!((*header).base).write(chunk);
        addr_of_mut!((*header).free_head).write(base);
        header
    }

    /// Pops the free-list head, or returns null if the slab is full.
    pub fn allocate(&mut self) -> *mut u8 {
        let block = self.free_head;
        if block.is_null() {
            return ptr::null_mut();
        }

        let next = unsafe { (block as *const *mut u8).read() };
        if !next.is_null() {
            prefetch_read(next);
        }
        self.free_head = next;
        self.allocated += 1;
        self.occupancy.set(self.block_index(block));
        block
    }

    /// Returns a block to the free list. Null pointers and pointers
    /// outside this slab are ignored.
    ///
    /// # Safety
    /// `ptr` must be null, outside this slab (both ignored), or a block
    /// previously returned by [`Slab::allocate`] and not freed since.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        if ptr.is_null() || !self.contains(ptr) {
            return;
        }

        self.occupancy.clear(self.block_index(ptr));
        (ptr as *mut *mut u8).write(self.free_head);
        self.free_head = ptr;
        self.allocated -= 1;
    }

    /// No allocations outstanding.
    pub fn empty(&self) -> bool {
        self.allocated == 0
    }

    /// No free blocks left.
    pub fn full(&self) -> bool {
        self.free_head.is_null()
    }

    /// Outstanding allocation count.
    pub fn used_blocks(&self) -> usize {
        self.allocated
    }

    /// Blocks still on the free list.
    pub fn free_blocks(&self) -> usize {
        BLOCKS - self.allocated
    }

    /// Range check against the block-covered span. Debug paths only; the
    /// arena's hot free path recovers the slab base by address masking.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= base && addr < base + Self::USABLE_SPAN
    }

    /// Chunk base; the slab's identity.
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// The occupancy bitmap, for diagnostics.
    pub fn occupancy(&self) -> &Bitmap<BLOCKS, WORDS> {
        &self.occupancy
    }

    fn block_index(&self, ptr: *const u8) -> usize {
        (ptr as usize - self.base.as_ptr() as usize) / BLOCK_SIZE
    }

    /// Tears the header down and surrenders the chunk to the caller.
    ///
    /// # Safety
    /// `header` must come from [`Slab::create`] and must not be used
    /// afterwards. Any outstanding blocks dangle once the chunk is
    /// recycled; the arena only invokes this at thread exit, where the
    /// ownership contract makes that acceptable.
    pub unsafe fn into_chunk(header: *mut Self) -> *mut u8 {
        let chunk = (*header).base.as_ptr();
        System.dealloc(header as *mut u8, Layout::new::<Self>());
        chunk
    }
}

/// Monomorphized slab entry points for one size class.
///
/// Every function pointer takes the type-erased header produced by
/// `create` for the same class; mixing classes is undefined behavior.
#[allow(missing_docs)]
pub struct ClassOps {
    pub block_size: usize,
    pub blocks_per_slab: usize,
    pub create: unsafe fn(NonNull<u8>) -> *mut (),
    pub allocate: unsafe fn(*mut ()) -> *mut u8,
    pub deallocate: unsafe fn(*mut (), *mut u8),
    pub base: unsafe fn(*mut ()) -> *mut u8,
    pub empty: unsafe fn(*mut ()) -> bool,
    pub full: unsafe fn(*mut ()) -> bool,
    pub used_blocks: unsafe fn(*mut ()) -> usize,
    pub occupancy_count: unsafe fn(*mut ()) -> usize,
    pub contains: unsafe fn(*mut (), *const u8) -> bool,
    pub into_chunk: unsafe fn(*mut ()) -> *mut u8,
}

unsafe fn create_shim<const B: usize, const N: usize, const W: usize>(
    chunk: NonNull<u8>,
) -> *mut () {
    Slab::<B, N, W>::create(chunk) as *mut ()
}

unsafe fn allocate_shim<const B: usize, const N: usize, const W: usize>(
    header: *mut (),
) -> *mut u8 {
    (*(header as *mut Slab<B, N, W>)).allocate()
}

unsafe fn deallocate_shim<const B: usize, const N: usize, const W: usize>(
    header: *mut (),
    ptr: *mut u8,
) {
    (*(header as *mut Slab<B, N, W>)).deallocate(ptr)
}

unsafe fn base_shim<const B: usize, const N: usize, const W: usize>(header: *mut ()) -> *mut u8 {
    (*(header as *mut Slab<B, N, W>)).base()
}

unsafe fn empty_shim<const B: usize, const N: usize, const W: usize>(header: *mut ()) -> bool {
    (*(header as *mut Slab<B, N, W>)).empty()
}

unsafe fn full_shim<const B: usize, const N: usize, const W: usize>(header: *mut ()) -> bool {
    (*(header as *mut Slab<B, N, W>)).full()
}

unsafe fn used_blocks_shim<const B: usize, const N: usize, const W: usize>(
    header: *mut (),
) -> usize {
    (*(header as *mut Slab<B, N, W>)).used_blocks()
}

unsafe fn occupancy_count_shim<const B: usize, const N: usize, const W: usize>(
    header: *mut (),
) -> usize {
    (*(header as *mut Slab<B, N, W>)).occupancy().count()
}

unsafe fn contains_shim<const B: usize, const N: usize, const W: usize>(
    header: *mut (),
    ptr: *const u8,
) -> bool {
    (*(header as *mut Slab<B, N, W>)).contains(ptr)
}

unsafe fn into_chunk_shim<const B: usize, const N: usize, const W: usize>(
    header: *mut (),
) -> *mut u8 {
    Slab::<B, N, W>::into_chunk(header as *mut Slab<B, N, W>)
}

const fn ops_for<const B: usize, const N: usize, const W: usize>() -> ClassOps {
    ClassOps {
        block_size: B,
        blocks_per_slab: N,
        create: create_shim::<B, N, W>,
        allocate: allocate_shim::<B, N, W>,
        deallocate: deallocate_shim::<B, N, W>,
        base: base_shim::<B, N, W>,
        empty: empty_shim::<B, N, W>,
        full: full_shim::<B, N, W>,
        used_blocks: used_blocks_shim::<B, N, W>,
        occupancy_count: occupancy_count_shim::<B, N, W>,
        contains: contains_shim::<B, N, W>,
        into_chunk: into_chunk_shim::<B, N, W>,
    }
}

macro_rules! class_entry {
    ($block_size:literal) => {
        ops_for::<
            $block_size,
            { CHUNK_SIZE / $block_size },
            { words_for(CHUNK_SIZE / $block_size) },
        >()
    };
}

/// Jump table indexed by bin: one monomorphized slab implementation per
/// size class. Order mirrors `size_class::sizes()`.
pub static CLASS_OPS: [ClassOps; NUM_CLASSES] = [
    class_entry!(16),
    class_entry!(32),
    class_entry!(48),
    class_entry!(64),
    class_entry!(80),
    class_entry!(96),
    class_entry!(112),
    class_entry!(128),
    class_entry!(144),
    class_entry!(160),
    class_entry!(176),
    class_entry!(192),
    class_entry!(208),
    class_entry!(224),
    class_entry!(240),
    class_entry!(256),
    class_entry!(512),
    class_entry!(1024),
    class_entry!(2048),
    class_entry!(4096),
    class_entry!(8192),
    class_entry!(16384),
    class_entry!(32768),
    class_entry!(65536),
];

/// Compact slab reference: a bin index plus the type-erased header.
///
/// A null header marks the "no slab" state, so a bin's current slot is a
/// plain `SlabHandle` with no `Option` wrapping on the hot path.
#[derive(Clone, Copy)]
pub struct SlabHandle {
    class: usize,
    header: *mut (),
}

impl SlabHandle {
    /// The "no slab" handle.
    pub const fn invalid() -> Self {
        Self {
            class: 0,
            header: ptr::null_mut(),
        }
    }

    /// Formats `chunk` as a slab of class `class`. Returns an invalid
    /// handle if the header allocation fails.
    ///
    /// # Safety
    /// `class` must be a valid bin index and `chunk` a caller-owned
    /// chunk-aligned region of `CHUNK_SIZE` bytes.
    pub unsafe fn create(class: usize, chunk: NonNull<u8>) -> Self {
        Self {
            class,
            header: (CLASS_OPS[class].create)(chunk),
        }
    }

    /// Rewraps a header already owned by a bin of class `class`.
    pub const fn from_raw(class: usize, header: *mut ()) -> Self {
        Self { class, header }
    }

    /// Whether this handle refers to a slab at all.
    #[inline]
    pub fn valid(&self) -> bool {
        !self.header.is_null()
    }

    /// The type-erased header pointer.
    pub fn raw(&self) -> *mut () {
        self.header
    }

    /// Pops a block from the slab's free list; null when full.
    ///
    /// # Safety
    /// The handle must be valid.
    #[inline]
    pub unsafe fn allocate(&self) -> *mut u8 {
        (CLASS_OPS[self.class].allocate)(self.header)
    }

    /// # Safety
    /// The handle must be valid; `ptr` must be null, foreign (ignored),
    /// or a live block of this slab.
    #[inline]
    pub unsafe fn deallocate(&self, ptr: *mut u8) {
        (CLASS_OPS[self.class].deallocate)(self.header, ptr)
    }

    /// Chunk base; the slab's identity.
    ///
    /// # Safety
    /// The handle must be valid.
    #[inline]
    pub unsafe fn base(&self) -> *mut u8 {
        (CLASS_OPS[self.class].base)(self.header)
    }

    /// No allocations outstanding.
    ///
    /// # Safety
    /// The handle must be valid.
    pub unsafe fn empty(&self) -> bool {
        (CLASS_OPS[self.class].empty)(self.header)
    }

    /// No free blocks left.
    ///
    /// # Safety
    /// The handle must be valid.
    pub unsafe fn full(&self) -> bool {
        (CLASS_OPS[self.class].full)(self.header)
    }

    /// Outstanding allocation count.
    ///
    /// # Safety
    /// The handle must be valid.
    pub unsafe fn used_blocks(&self) -> usize {
        (CLASS_OPS[self.class].used_blocks)(self.header)
    }

    /// Set bits in the occupancy bitmap; equals [`Self::used_blocks`].
    ///
    /// # Safety
    /// The handle must be valid.
    pub unsafe fn occupancy_count(&self) -> usize {
        (CLASS_OPS[self.class].occupancy_count)(self.header)
    }

    /// Range check against the slab's block span. Debug paths only.
    ///
    /// # Safety
    /// The handle must be valid.
    pub unsafe fn contains(&self, ptr: *const u8) -> bool {
        (CLASS_OPS[self.class].contains)(self.header, ptr)
    }

    /// Capacity of any slab of this class.
    pub fn blocks_per_slab(&self) -> usize {
        CLASS_OPS[self.class].blocks_per_slab
    }

    /// Destroys the header and returns the backing chunk.
    ///
    /// # Safety
    /// The handle must be valid, and it (and any copies) must not be
    /// used afterwards.
    pub unsafe fn into_chunk(self) -> *mut u8 {
        (CLASS_OPS[self.class].into_chunk)(self.header)
    }
}

/// Reads the intrusive list link of a type-erased slab header.
///
/// # Safety
/// `header` must point at a live slab header of any class.
#[inline]
pub unsafe fn header_next(header: *mut ()) -> *mut () {
    (header as *mut *mut ()).read()
}

/// Writes the intrusive list link of a type-erased slab header.
///
/// # Safety
/// As [`header_next`]; the caller must own the list the header is on.
#[inline]
pub unsafe fn header_set_next(header: *mut (), next: *mut ()) {
    (header as *mut *mut ()).write(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider;
    use crate::size_class::index;
    use std::collections::HashSet;

    fn new_slab(class: usize) -> SlabHandle {
        let chunk = provider::allocate_chunk();
        assert!(!chunk.is_null(), "chunk allocation failed in test");
        let handle = unsafe { SlabHandle::create(class, NonNull::new_unchecked(chunk)) };
        assert!(handle.valid());
        handle
    }

    fn destroy(handle: SlabHandle) {
        unsafe {
            let chunk = handle.into_chunk();
            provider::deallocate_chunk(chunk);
        }
    }

    #[test]
    fn fresh_slab_is_empty_not_full() {
        let slab = new_slab(index(64));
        unsafe {
            assert!(slab.empty());
            assert!(!slab.full());
            assert_eq!(slab.used_blocks(), 0);
        }
        assert_eq!(slab.blocks_per_slab(), CHUNK_SIZE / 64);
        destroy(slab);
    }

    #[test]
    fn allocate_and_free_one_block() {
        let slab = new_slab(index(64));
        unsafe {
            let ptr = slab.allocate();
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % 16, 0);
            assert_eq!(slab.used_blocks(), 1);
            assert_eq!(slab.occupancy_count(), 1);
            assert!(!slab.empty());

            slab.deallocate(ptr);
            assert!(slab.empty());
            assert_eq!(slab.occupancy_count(), 0);
        }
        destroy(slab);
    }

    #[test]
    fn first_block_sits_at_chunk_base() {
        let slab = new_slab(index(64));
        unsafe {
            let ptr = slab.allocate();
            assert_eq!(ptr, slab.base());
            slab.deallocate(ptr);
        }
        destroy(slab);
    }

    #[test]
    fn blocks_are_distinct_and_contained() {
        let slab = new_slab(index(64));

        let mut seen = HashSet::new();
        let mut ptrs = Vec::new();
        unsafe {
            for _ in 0..100 {
                let ptr = slab.allocate();
                assert!(!ptr.is_null());
                assert!(slab.contains(ptr));
                assert!(seen.insert(ptr as usize), "duplicate block handed out");
                ptrs.push(ptr);
            }
            assert_eq!(slab.used_blocks(), 100);

            let outside = slab.base() as usize + CHUNK_SIZE;
            assert!(!slab.contains(outside as *const u8));

            for ptr in ptrs {
                slab.deallocate(ptr);
            }
            assert!(slab.empty());
        }
        destroy(slab);
    }

    #[test]
    fn free_then_allocate_reuses_lifo() {
        let slab = new_slab(index(64));
        unsafe {
            let first = slab.allocate();
            slab.deallocate(first);
            let second = slab.allocate();
            assert_eq!(first, second);
            slab.deallocate(second);
        }
        destroy(slab);
    }

    #[test]
    fn foreign_and_null_frees_are_ignored() {
        let slab = new_slab(index(64));
        let mut local = 0u64;
        unsafe {
            let ptr = slab.allocate();

            slab.deallocate(ptr::null_mut());
            slab.deallocate(&mut local as *mut u64 as *mut u8);
            assert_eq!(slab.used_blocks(), 1);

            slab.deallocate(ptr);
        }
        destroy(slab);
    }

    #[test]
    fn contains_matches_block_grid() {
        // Class 48 leaves a sub-block tail at the end of the chunk.
        let class = index(48);
        let slab = new_slab(class);
        let blocks = slab.blocks_per_slab();

        unsafe {
            let base = slab.base();
            assert!(slab.contains(base));
            assert!(slab.contains(base.add((blocks - 1) * 48)));
            assert!(!slab.contains(base.add(blocks * 48)));
        }
        destroy(slab);
    }

    #[test]
    fn drains_to_full_and_recovers() {
        // The largest class keeps the full drain cheap: 32 blocks.
        let slab = new_slab(index(65536));
        let blocks = slab.blocks_per_slab();

        unsafe {
            let mut ptrs = Vec::with_capacity(blocks);
            for _ in 0..blocks {
                let ptr = slab.allocate();
                assert!(!ptr.is_null());
                ptrs.push(ptr);
            }
            assert!(slab.full());
            assert!(slab.allocate().is_null());
            assert_eq!(slab.occupancy_count(), blocks);

            for ptr in ptrs.into_iter().rev() {
                slab.deallocate(ptr);
            }
            assert!(slab.empty());
            assert!(!slab.full());
        }
        destroy(slab);
    }
}
