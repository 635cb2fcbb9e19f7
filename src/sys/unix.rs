#![cfg(unix)]

use libc::{c_void, mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};
use std::ptr;

/// Maps `len` bytes of anonymous read/write memory.
/// Returns a page-aligned pointer, or None if the kernel refuses.
pub unsafe fn map_region(len: usize) -> Option<*mut u8> {
    let ptr = mmap(
        ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
    );

    if ptr == MAP_FAILED {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

pub unsafe fn unmap_region(ptr: *mut u8, len: usize) {
    munmap(ptr as *mut c_void, len);
}

/// Maps `len` bytes aligned to `align` (a power of two >= the page size).
///
/// `mmap` only promises page alignment, so this over-maps `len + align`
/// and trims the misaligned head and the tail back out with `munmap`.
pub unsafe fn map_region_aligned(len: usize, align: usize) -> Option<*mut u8> {
    let span = len + align;
    let raw = map_region(span)? as usize;

    let aligned = (raw + align - 1) & !(align - 1);
    let lead = aligned - raw;
    if lead > 0 {
        munmap(raw as *mut c_void, lead);
    }
    let tail = span - lead - len;
    if tail > 0 {
        munmap((aligned + len) as *mut c_void, tail);
    }

    Some(aligned as *mut u8)
}

/// Maps `len` bytes backed by huge pages. Naturally aligned to the huge
/// page size, so no trimming is needed. Fails on kernels without a
/// reserved hugetlb pool.
#[cfg(all(feature = "hugepages", target_os = "linux"))]
pub unsafe fn map_region_huge(len: usize) -> Option<*mut u8> {
    let ptr = mmap(
        ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS | libc::MAP_HUGETLB | libc::MAP_POPULATE,
        -1,
        0,
    );

    if ptr == MAP_FAILED {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

/// Best-effort pinning of current and future pages into physical memory.
#[cfg(target_os = "linux")]
pub unsafe fn lock_all_memory() -> bool {
    libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) == 0
}

#[cfg(not(target_os = "linux"))]
pub unsafe fn lock_all_memory() -> bool {
    false
}
