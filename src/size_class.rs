//! Size-class table: maps requested byte counts to one of 24 fixed bins.
//!
//! Small classes run 16..=256 in 16-byte steps, large classes 512..=65536
//! in powers of two. Anything above the largest class bypasses slabs
//! entirely and is mapped straight from the OS.

/// Small classes: 16-byte steps up to [`MAX_SMALL_SIZE`].
pub const NUM_SMALL_CLASSES: usize = 16;
/// Large classes: powers of two up to [`MAX_SLAB_SIZE`].
pub const NUM_LARGE_CLASSES: usize = 8;
/// Total bin count.
pub const NUM_CLASSES: usize = NUM_SMALL_CLASSES + NUM_LARGE_CLASSES;

/// Smallest block size; also the alignment every returned pointer keeps.
pub const MIN_BLOCK_SIZE: usize = 16;
/// Largest size in the 16-byte-step portion of the table.
pub const MAX_SMALL_SIZE: usize = 256;
/// Largest size served from a slab.
pub const MAX_SLAB_SIZE: usize = 65536;

const SIZES: [usize; NUM_CLASSES] = build_sizes();

const fn build_sizes() -> [usize; NUM_CLASSES] {
    let mut sizes = [0usize; NUM_CLASSES];
    let mut i = 0;
    while i < NUM_SMALL_CLASSES {
        sizes[i] = (i + 1) * MIN_BLOCK_SIZE;
        i += 1;
    }
    let mut power = MAX_SMALL_SIZE * 2;
    while i < NUM_CLASSES {
        sizes[i] = power;
        power *= 2;
        i += 1;
    }
    sizes
}

/// Bin index for `size`, or `NUM_CLASSES` when the request must take the
/// large-allocation path. Size 0 shares the smallest bin.
#[inline]
pub const fn index(size: usize) -> usize {
    if size <= MIN_BLOCK_SIZE {
        return 0;
    }
    if size <= MAX_SMALL_SIZE {
        // Round up to the next 16-byte step: 17..=32 -> 1, ..., 256 -> 15.
        return size.div_ceil(MIN_BLOCK_SIZE) - 1;
    }
    if size <= MAX_SLAB_SIZE {
        // ceil(log2(size)) via the count-leading-zeros family:
        // 257..=512 -> 16, ..., 65536 -> 23.
        let shift = size.next_power_of_two().trailing_zeros() as usize;
        return NUM_SMALL_CLASSES + shift - 9;
    }
    NUM_CLASSES
}

/// Block size of a bin; 0 for the out-of-range sentinel.
#[inline]
pub const fn block_size(index: usize) -> usize {
    if index >= NUM_CLASSES {
        return 0;
    }
    SIZES[index]
}

/// True iff `size` exceeds the largest slab-served class.
#[inline]
pub const fn is_large(size: usize) -> bool {
    size > MAX_SLAB_SIZE
}

/// The full table of class sizes, for diagnostics.
pub const fn sizes() -> &'static [usize; NUM_CLASSES] {
    &SIZES
}
