//! # Eviction Tests
//!
//! Conflict misses on a direct-mapped L1 force the victim out through the
//! eviction chain; these tests cover dirty writeback, clean drops, and
//! LRU victim choice.

use memsim_core::BlockState;

use crate::common::{builder, Harness};

// ══════════════════════════════════════════════════════════
// 1. Writeback on conflict
// ══════════════════════════════════════════════════════════

#[test]
fn dirty_victim_writes_back_to_lower_level() {
    let mut h = Harness::new(&builder::conflict_hierarchy());
    let (l1, l2) = (h.module("l1"), h.module("l2"));

    h.store(l1, 0x0, 7);
    // Same set and way, different tag: evicts the dirty copy of 0x0.
    h.store(l1, 0x1000, 9);

    assert_eq!(h.system.block_state(l1, 0x0), BlockState::Invalid);
    assert_eq!(h.system.block_state(l1, 0x1000), BlockState::Modified);
    assert_eq!(h.system.block_state(l2, 0x0), BlockState::Modified);
    assert!(!h.system.is_sharer(l2, l1, 0x0));
    assert_eq!(h.stats("l1").evictions, 1);

    // The written data survives the round trip.
    assert_eq!(h.load(l1, 0x0), 7);
}

#[test]
fn clean_victim_drops_without_upgrading_lower_level() {
    let mut h = Harness::new(&builder::conflict_hierarchy());
    let (l1, l2) = (h.module("l1"), h.module("l2"));

    let _ = h.load(l1, 0x0);
    let _ = h.load(l1, 0x1000);

    assert_eq!(h.system.block_state(l1, 0x0), BlockState::Invalid);
    assert!(!h.system.is_sharer(l2, l1, 0x0));
    // No data moved, so the lower copy keeps its clean state.
    assert_eq!(h.system.block_state(l2, 0x0), BlockState::Exclusive);
    assert_eq!(h.stats("l1").evictions, 1);
}

// ══════════════════════════════════════════════════════════
// 2. Victim choice
// ══════════════════════════════════════════════════════════

#[test]
fn lru_evicts_least_recently_used_way() {
    let mut h = Harness::new(&builder::single_l1_hierarchy());
    let l1 = h.module("l1");

    // 16 sets of 64-byte blocks: addresses 1 KiB apart share a set.
    let _ = h.load(l1, 0x0);
    let _ = h.load(l1, 0x400);
    let _ = h.load(l1, 0x0); // refresh 0x0
    let _ = h.load(l1, 0x800); // set is full; 0x400 is least recent

    assert_eq!(h.system.block_state(l1, 0x400), BlockState::Invalid);
    assert_ne!(h.system.block_state(l1, 0x0), BlockState::Invalid);
    assert_ne!(h.system.block_state(l1, 0x800), BlockState::Invalid);
    assert_eq!(h.stats("l1").evictions, 1);
}

/// Each fill must advance the FIFO pointer; a pointer stuck on one way
/// would thrash it while the other ways sit idle.
#[test]
fn fifo_rotates_the_fill_pointer_across_ways() {
    let mut h = Harness::new(&builder::fifo_l1_hierarchy());
    let l1 = h.module("l1");

    let _ = h.load(l1, 0x0);
    let _ = h.load(l1, 0x40); // second fill lands in the other way
    let _ = h.load(l1, 0x80); // pointer wraps back to the oldest fill

    assert_eq!(h.system.block_state(l1, 0x0), BlockState::Invalid);
    assert_ne!(h.system.block_state(l1, 0x40), BlockState::Invalid);
    assert_ne!(h.system.block_state(l1, 0x80), BlockState::Invalid);
    assert_eq!(h.stats("l1").evictions, 1);
}
