//! Cache-line padding to keep adjacent bins off each other's lines.

use core::ops::{Deref, DerefMut};

/// Aligns its contents to 128 bytes. 64 covers x86, but Apple Silicon and
/// some POWER parts prefetch in 128-byte pairs, so pad to the larger size.
#[repr(align(128))]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Wraps `value` in its own cache line.
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
