//! Translation between virtual and local node indices.
//!
//! Each challenge round re-roots the index space at the node disputed in the
//! previous round. A tree built from a submitted pollard therefore has its own
//! 1-based *local* heap indices, while the on-chain protocol keeps addressing
//! nodes by their *virtual* position in the outer tree. Virtual indices are
//! ordinary heap indices of that outer tree: the children of `v` are `2v` and
//! `2v + 1`.

/// Maps a local index of a tree rooted at `virtual_root` to its virtual index.
///
/// Returns `None` for the invalid index `0` or when the result would overflow.
pub fn virtual_from_local(virtual_root: u64, local: u64) -> Option<u64> {
    if local == 0 || virtual_root == 0 {
        return None;
    }
    if virtual_root == 1 {
        return Some(local);
    }
    let level = local.ilog2();
    let level_start = 1u64 << level;
    let offset = local - level_start;
    level_start.checked_mul(virtual_root)?.checked_add(offset)
}

/// Maps a virtual index to the local index of a tree rooted at `virtual_root`.
///
/// Returns `None` when `virtual_index` is not `virtual_root` or one of its
/// descendants.
pub fn local_from_virtual(virtual_root: u64, virtual_index: u64) -> Option<u64> {
    if virtual_index == 0 || virtual_root == 0 || virtual_index < virtual_root {
        return None;
    }
    if virtual_root == 1 {
        return Some(virtual_index);
    }
    // The number of levels below the root is the difference in bit length.
    let levels = virtual_index.ilog2() - virtual_root.ilog2();
    if virtual_index >> levels != virtual_root {
        return None;
    }
    let level_start = 1u64 << levels;
    let offset = virtual_index - (virtual_root << levels);
    Some(level_start + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn identity_for_top_level_tree() {
        for idx in 1..64 {
            assert_eq!(local_from_virtual(1, idx), Some(idx));
            assert_eq!(virtual_from_local(1, idx), Some(idx));
        }
    }

    #[test]
    fn rerooted_indices_follow_heap_layout() {
        // Node 3 re-rooted: its grandchildren are 12..=15 in the outer tree.
        assert_eq!(virtual_from_local(3, 1), Some(3));
        assert_eq!(virtual_from_local(3, 4), Some(12));
        assert_eq!(virtual_from_local(3, 7), Some(15));
        assert_eq!(local_from_virtual(3, 12), Some(4));
        assert_eq!(local_from_virtual(3, 15), Some(7));
    }

    #[test]
    fn offsets_beyond_the_root_index_still_invert() {
        // Root 2, 32 descendants at relative depth 5: entry 5 is virtual 69.
        assert_eq!(virtual_from_local(2, 37), Some(69));
        assert_eq!(local_from_virtual(2, 69), Some(37));
    }

    #[test]
    fn non_descendants_are_rejected() {
        assert_eq!(local_from_virtual(3, 8), None);
        assert_eq!(local_from_virtual(3, 2), None);
        assert_eq!(local_from_virtual(5, 0), None);
        assert_eq!(virtual_from_local(5, 0), None);
    }

    proptest! {
        #[test]
        fn local_virtual_roundtrip(root in 1u64..4096, local in 1u64..(1 << 20)) {
            let virtual_index = virtual_from_local(root, local).unwrap();
            prop_assert_eq!(local_from_virtual(root, virtual_index), Some(local));
        }

        #[test]
        fn virtual_local_roundtrip(root in 1u64..4096, depth in 0u32..20, offset in 0u64..(1 << 20)) {
            let width = 1u64 << depth;
            let virtual_index = (root << depth) + offset % width;
            let local = local_from_virtual(root, virtual_index).unwrap();
            prop_assert_eq!(virtual_from_local(root, local), Some(virtual_index));
        }
    }
}
