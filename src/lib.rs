//! # `talus` - Thread-Caching Slab Allocator
//!
//! A general-purpose dynamic memory allocator tuned for frequent
//! small-object allocation under multi-threaded workloads. Callers pass
//! the allocation size back at free time, which removes per-object
//! headers entirely: the only metadata is one slab header per 2 MiB
//! chunk, kept off to the side.
//!
//! ## Architecture
//!
//! Three coupled subsystems do the heavy lifting:
//!
//! 1. **Size classes** ([`size_class`]): requests are partitioned into
//!    24 bins: 16 small classes (16..=256 bytes, 16-byte steps) and 8
//!    large classes (512..=65536 bytes, powers of two). Classification is a
//!    handful of arithmetic instructions; the large classes use the
//!    count-leading-zeros family, not a loop.
//! 2. **Thread arenas** ([`arena`]): each thread lazily builds an array
//!    of bins, one per class. A bin's *current* slab serves the fast
//!    path; exhausted slabs retire to a *full* list and revive through a
//!    *partial* list when frees give them space back. All of it is
//!    single-threaded by construction, with no locks and no atomics.
//! 3. **Chunk recycling** ([`chunk_stack`]): slabs are carved from 2 MiB
//!    chunk-aligned chunks. Freed chunks are parked on a process-wide
//!    lock-free stack (128-bit tagged CAS, ABA-safe) instead of going
//!    back to the OS, so a slab refill is usually just a stack pop.
//!
//! Chunk alignment buys the free path its speed: masking the low bits of
//! any interior pointer recovers the owning slab's base in one
//! instruction, no range checks, no lookup tables.
//!
//! Requests above 64 KiB skip the machinery and map pages directly.
//!
//! ## Example
//!
//! ```rust
//! let ptr = talus::allocate(64);
//! assert!(!ptr.is_null());
//! assert_eq!(ptr as usize % 16, 0);
//!
//! unsafe {
//!     ptr.write(7);
//!     // The size passed to deallocate must classify into the same bin
//!     // as the one passed to allocate.
//!     talus::deallocate(ptr, 64);
//! }
//! ```
//!
//! Containers and other layout-driven callers go through the
//! [`TalusAlloc`] adapter, which carries the size in the `Layout` it
//! receives on both sides.
//!
//! ## Contract
//!
//! - Pointers are 16-byte aligned; requested alignment beyond that is
//!   only available through the [`TalusAlloc`] layout API.
//! - A block must be freed on the thread that allocated it. Cross-thread
//!   frees are outside the ownership model: the block is silently
//!   abandoned, not recycled.
//! - Out-of-memory is reported as a null pointer, never a panic.
//! - Freeing a foreign pointer, or freeing with a size that lands in the
//!   wrong bin, is a contract breach tolerated by dropping the block.

#![warn(missing_docs, clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod adapter;
pub mod arena;
pub mod bitmap;
pub mod cache_padded;
pub mod chunk_stack;
pub mod provider;
pub mod size_class;
pub mod slab;
mod sys;

pub use adapter::{AllocError, TalusAlloc};
pub use arena::{allocate, deallocate, ThreadArena};
pub use chunk_stack::{global_chunk_stack, ChunkStack};
pub use provider::{CHUNK_SIZE, PAGE_SIZE};
pub use size_class::{MAX_SLAB_SIZE, MIN_BLOCK_SIZE, NUM_CLASSES};

/// One-time opt-in to best-effort memory locking: asks the OS to pin
/// current and future pages into physical memory. Idempotent. Returns
/// `false` where pinning is unsupported or denied; that is not fatal and
/// the allocator works normally without it.
pub fn initialize() -> bool {
    provider::lock_memory()
}

// Layout claims the hot paths rely on.
const _: () = {
    use core::mem;

    // Chunk-base recovery masks low bits, so the chunk size must be a
    // power of two, and large-path rounding relies on the same for pages.
    assert!(CHUNK_SIZE.is_power_of_two());
    assert!(PAGE_SIZE.is_power_of_two());

    // Every block can hold the embedded free-list link.
    assert!(MIN_BLOCK_SIZE >= mem::size_of::<*mut u8>());

    // A slab handle is a bin index plus one erased pointer.
    assert!(mem::size_of::<slab::SlabHandle>() <= mem::size_of::<usize>() * 2);

    // The 128-bit tagged head is exactly two machine words.
    assert!(mem::size_of::<portable_atomic::AtomicU128>() == 16);
};
