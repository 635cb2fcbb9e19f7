#![cfg(windows)]

use std::ptr;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};

pub unsafe fn map_region(len: usize) -> Option<*mut u8> {
    let ptr = VirtualAlloc(ptr::null_mut(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE);
    if ptr.is_null() {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

pub unsafe fn unmap_region(ptr: *mut u8, _len: usize) {
    // MEM_RELEASE frees the whole region reserved by VirtualAlloc. Size must be 0.
    VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
}

/// Maps `len` bytes aligned to `align` (a power of two).
///
/// VirtualAlloc has no alignment parameter, so this reserves an oversized
/// span to learn an aligned address, releases it, and re-reserves exactly
/// at that address. Another thread can steal the address between the two
/// calls, hence the retry loop.
pub unsafe fn map_region_aligned(len: usize, align: usize) -> Option<*mut u8> {
    for _ in 0..8 {
        let span = len + align;
        let probe = VirtualAlloc(ptr::null_mut(), span, MEM_RESERVE, PAGE_READWRITE);
        if probe.is_null() {
            return None;
        }

        let aligned = ((probe as usize) + align - 1) & !(align - 1);
        VirtualFree(probe, 0, MEM_RELEASE);

        let ptr = VirtualAlloc(
            aligned as *mut _,
            len,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );
        if !ptr.is_null() {
            return Some(ptr as *mut u8);
        }
    }
    None
}

/// Windows has no process-wide analog of `mlockall`; pinning is per-region
/// and quota-bound, so the hint is simply not honored here.
pub unsafe fn lock_all_memory() -> bool {
    false
}
