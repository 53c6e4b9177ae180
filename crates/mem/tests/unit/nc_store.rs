//! # Non-Coherent Store Tests
//!
//! The write-through path updates the functional image and propagates to
//! the backing store without allocating on a miss or disturbing resident
//! coherence state.

use memsim_core::BlockState;

use crate::common::{builder, Harness};

// ══════════════════════════════════════════════════════════
// 1. Miss behavior
// ══════════════════════════════════════════════════════════

#[test]
fn miss_writes_through_without_allocating() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let (l1, l2, mm) = (h.module("l1-0"), h.module("l2"), h.module("mm"));

    h.nc_store(l1, 0x100, 42);

    // No cache level picked up a copy; only the backing store serves it.
    assert_eq!(h.system.block_state(l1, 0x100), BlockState::Invalid);
    assert_eq!(h.system.block_state(l2, 0x100), BlockState::Invalid);
    assert_eq!(h.system.block_state(mm, 0x100), BlockState::Exclusive);
    assert_eq!(h.system.read_word(0x100), 42);
}

#[test]
fn each_level_counts_the_write_through() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let l1 = h.module("l1-0");

    h.nc_store(l1, 0x200, 1);

    assert_eq!(h.stats("l1-0").nc_writes, 1);
    assert_eq!(h.stats("l2").nc_writes, 1);
    assert_eq!(h.stats("mm").nc_writes, 1);
    assert_eq!(h.stats("l1-0").nc_write_hits, 0);
}

// ══════════════════════════════════════════════════════════
// 2. Hit behavior
// ══════════════════════════════════════════════════════════

#[test]
fn hit_leaves_resident_state_untouched() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let l1 = h.module("l1-0");

    let _ = h.load(l1, 0x300);
    assert_eq!(h.system.block_state(l1, 0x300), BlockState::Exclusive);

    h.nc_store(l1, 0x300, 9);

    assert_eq!(h.system.block_state(l1, 0x300), BlockState::Exclusive);
    assert_eq!(h.system.read_word(0x300), 9);
    assert_eq!(h.stats("l1-0").nc_write_hits, 1);

    // A later coherent read sees the written data.
    assert_eq!(h.load(l1, 0x300), 9);
}
