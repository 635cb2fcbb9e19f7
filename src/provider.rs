//! Chunk provider: hands out fixed-size, chunk-aligned backing regions.
//!
//! Every slab in the allocator is backed by exactly one chunk from here.
//! The alignment guarantee is load-bearing: interior pointers recover
//! their slab base by masking off the low bits, so a misaligned chunk
//! would corrupt the free path.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::sys;

/// Chunk size handed to slabs. Matches the 2 MiB huge page size so the
/// `hugepages` feature can back a chunk with a single TLB entry.
pub const CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Regular page size, used to round large (non-slab) allocations.
pub const PAGE_SIZE: usize = 4096;

/// Rounds `value` up to a multiple of `align` (a power of two).
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

static MEMORY_LOCKED: AtomicBool = AtomicBool::new(false);

/// Obtains one `CHUNK_SIZE`-byte, `CHUNK_SIZE`-aligned read/write region.
///
/// Pages are touched before the chunk is returned, so the first
/// allocation out of a fresh slab does not eat a fault storm. Returns
/// null when the OS is out of memory.
pub fn allocate_chunk() -> *mut u8 {
    #[cfg(all(feature = "hugepages", target_os = "linux"))]
    unsafe {
        // Huge-page mappings are naturally chunk-aligned and populated by
        // the kernel; fall through to the regular path if the hugetlb
        // pool is empty.
        if let Some(ptr) = sys::map_region_huge(CHUNK_SIZE) {
            return ptr;
        }
    }

    unsafe {
        match sys::map_region_aligned(CHUNK_SIZE, CHUNK_SIZE) {
            Some(ptr) => {
                pretouch(ptr, CHUNK_SIZE);
                ptr
            }
            None => core::ptr::null_mut(),
        }
    }
}

/// Returns a chunk to the OS.
///
/// # Safety
/// `base` must be null or a chunk base previously returned by
/// [`allocate_chunk`] that is not referenced by any live slab.
pub unsafe fn deallocate_chunk(base: *mut u8) {
    if !base.is_null() {
        sys::unmap_region(base, CHUNK_SIZE);
    }
}

/// Best-effort pinning of current and future pages into physical memory.
/// Idempotent; failure is non-fatal and simply reported.
pub fn lock_memory() -> bool {
    if MEMORY_LOCKED.load(Ordering::Relaxed) {
        return true;
    }

    if unsafe { sys::lock_all_memory() } {
        MEMORY_LOCKED.store(true, Ordering::Relaxed);
        return true;
    }
    false
}

/// Whether a previous [`lock_memory`] call succeeded.
pub fn is_memory_locked() -> bool {
    MEMORY_LOCKED.load(Ordering::Relaxed)
}

/// Dirties one byte per page so the kernel commits frames up front.
fn pretouch(ptr: *mut u8, len: usize) {
    let mut offset = 0;
    while offset < len {
        unsafe { ptr.add(offset).write_volatile(0) };
        offset += PAGE_SIZE;
    }
}
