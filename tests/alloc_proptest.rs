use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeSet, HashSet};
use talus::arena::ThreadArena;
use talus::bitmap::Bitmap;
use talus::size_class::{block_size, index, is_large, MAX_SLAB_SIZE, NUM_CLASSES};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn classification_covers_every_request(size in 0usize..=MAX_SLAB_SIZE * 2) {
        if is_large(size) {
            prop_assert_eq!(index(size), NUM_CLASSES);
        } else {
            let bin = index(size);
            prop_assert!(bin < NUM_CLASSES);
            prop_assert!(block_size(bin) >= size.max(1));
            // Tightness: the next smaller class cannot hold the request.
            prop_assert!(bin == 0 || block_size(bin - 1) < size);
        }
    }

    #[test]
    fn allocations_are_aligned_distinct_and_drain_clean(
        sizes in proptest::collection::vec(1usize..=2048, 1..64)
    ) {
        let mut arena = ThreadArena::new();
        let mut seen = HashSet::new();

        let live: Vec<(*mut u8, usize)> = sizes
            .iter()
            .map(|&size| {
                let ptr = arena.allocate(size);
                prop_assert!(!ptr.is_null());
                prop_assert_eq!(ptr as usize % 16, 0);
                prop_assert!(seen.insert(ptr as usize), "duplicate live pointer");
                unsafe { ptr.write(size as u8) };
                Ok((ptr, size))
            })
            .collect::<Result<_, TestCaseError>>()?;

        for &(ptr, size) in &live {
            prop_assert_eq!(unsafe { ptr.read() }, size as u8);
        }
        for (ptr, size) in live {
            unsafe { arena.deallocate(ptr, size) };
        }
        for class in 0..NUM_CLASSES {
            prop_assert_eq!(arena.class_used_blocks(class), 0);
            prop_assert_eq!(arena.class_occupancy_count(class), 0);
        }
    }

    #[test]
    fn immediate_reuse_is_lifo(size in 1usize..=MAX_SLAB_SIZE) {
        let mut arena = ThreadArena::new();
        let first = arena.allocate(size);
        prop_assert!(!first.is_null());
        unsafe { arena.deallocate(first, size) };

        let second = arena.allocate(size);
        prop_assert_eq!(second, first);
        unsafe { arena.deallocate(second, size) };
    }

    #[test]
    fn bitmap_tracks_a_reference_model(
        ops in proptest::collection::vec((0usize..300, any::<bool>()), 0..200)
    ) {
        let mut bitmap = Bitmap::<300, 5>::new();
        let mut model = BTreeSet::new();

        for (bit, set) in ops {
            if set {
                bitmap.set(bit);
                model.insert(bit);
            } else {
                bitmap.clear(bit);
                model.remove(&bit);
            }
        }

        prop_assert_eq!(bitmap.count(), model.len());
        prop_assert_eq!(bitmap.none(), model.is_empty());
        prop_assert_eq!(bitmap.all(), model.len() == 300);
        for bit in 0..300 {
            prop_assert_eq!(bitmap.test(bit), model.contains(&bit));
        }

        let first_clear = (0..300).find(|bit| !model.contains(bit)).unwrap_or(300);
        prop_assert_eq!(bitmap.find_first_clear(), first_clear);
    }
}
