//! # Coherence Protocol Tests
//!
//! End-to-end scenarios over a two-L1 hierarchy: state transitions on
//! sharing and stealing, recall writebacks, invalidation, and agreement
//! between directories and the caches above them.

use std::cell::Cell;
use std::rc::Rc;

use memsim_core::{AccessKind, BlockState};

use crate::common::{builder, Harness};

// ══════════════════════════════════════════════════════════
// 1. Basic state transitions
// ══════════════════════════════════════════════════════════

#[test]
fn cold_load_takes_exclusive() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let (l1_0, l2) = (h.module("l1-0"), h.module("l2"));

    let _ = h.load(l1_0, 0x100);

    assert_eq!(h.system.block_state(l1_0, 0x100), BlockState::Exclusive);
    assert_eq!(h.system.block_state(l2, 0x100), BlockState::Exclusive);
    assert!(h.system.is_sharer(l2, l1_0, 0x100));
    assert_eq!(h.system.owner_of(l2, 0x100), Some(l1_0));
}

#[test]
fn second_reader_degrades_to_shared() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let (l1_0, l1_1, l2) = (h.module("l1-0"), h.module("l1-1"), h.module("l2"));

    let _ = h.load(l1_0, 0x100);
    let _ = h.load(l1_1, 0x100);

    assert_eq!(h.system.block_state(l1_0, 0x100), BlockState::Shared);
    assert_eq!(h.system.block_state(l1_1, 0x100), BlockState::Shared);
    assert!(h.system.is_sharer(l2, l1_0, 0x100));
    assert!(h.system.is_sharer(l2, l1_1, 0x100));
    assert_eq!(h.system.owner_of(l2, 0x100), None);
}

#[test]
fn store_takes_modified() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let (l1_0, l2) = (h.module("l1-0"), h.module("l2"));

    h.store(l1_0, 0x200, 42);

    assert_eq!(h.system.block_state(l1_0, 0x200), BlockState::Modified);
    assert_eq!(h.system.owner_of(l2, 0x200), Some(l1_0));
    assert_eq!(h.system.read_word(0x200), 42);
}

// ══════════════════════════════════════════════════════════
// 2. Recall and writeback propagation
// ══════════════════════════════════════════════════════════

#[test]
fn remote_load_recalls_dirty_block() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let (l1_0, l1_1, l2) = (h.module("l1-0"), h.module("l1-1"), h.module("l2"));

    h.store(l1_0, 0x100, 42);
    let value = h.load(l1_1, 0x100);

    assert_eq!(value, 42);
    // The dirty copy is recalled: both readers end Shared, the dirty data
    // is absorbed one level down, and ownership is relinquished.
    assert_eq!(h.system.block_state(l1_0, 0x100), BlockState::Shared);
    assert_eq!(h.system.block_state(l1_1, 0x100), BlockState::Shared);
    assert_eq!(h.system.block_state(l2, 0x100), BlockState::Modified);
    assert!(h.system.is_sharer(l2, l1_0, 0x100));
    assert!(h.system.is_sharer(l2, l1_1, 0x100));
    assert_eq!(h.system.owner_of(l2, 0x100), None);
}

#[test]
fn remote_load_of_clean_exclusive_keeps_lower_level_clean() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let (l1_0, l1_1, l2) = (h.module("l1-0"), h.module("l1-1"), h.module("l2"));

    let _ = h.load(l1_0, 0x300);
    let _ = h.load(l1_1, 0x300);

    // Nothing was dirty, so no upgrade happens below.
    assert_eq!(h.system.block_state(l2, 0x300), BlockState::Exclusive);
    assert_eq!(h.system.block_state(l1_0, 0x300), BlockState::Shared);
    assert_eq!(h.system.block_state(l1_1, 0x300), BlockState::Shared);
}

// ══════════════════════════════════════════════════════════
// 3. Invalidation on exclusive acquisition
// ══════════════════════════════════════════════════════════

#[test]
fn store_invalidates_remote_sharers() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let (l1_0, l1_1, l2) = (h.module("l1-0"), h.module("l1-1"), h.module("l2"));

    let _ = h.load(l1_0, 0x100);
    let _ = h.load(l1_1, 0x100);
    h.store(l1_0, 0x100, 7);

    assert_eq!(h.system.block_state(l1_0, 0x100), BlockState::Modified);
    assert_eq!(h.system.block_state(l1_1, 0x100), BlockState::Invalid);
    assert!(h.system.is_sharer(l2, l1_0, 0x100));
    assert!(!h.system.is_sharer(l2, l1_1, 0x100));
    assert_eq!(h.system.owner_of(l2, 0x100), Some(l1_0));
}

#[test]
fn store_steals_dirty_block_from_sibling() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let (l1_0, l1_1, _l2) = (h.module("l1-0"), h.module("l1-1"), h.module("l2"));

    h.store(l1_0, 0x400, 1);
    h.store(l1_1, 0x400, 2);

    assert_eq!(h.system.block_state(l1_0, 0x400), BlockState::Invalid);
    assert_eq!(h.system.block_state(l1_1, 0x400), BlockState::Modified);
    assert_eq!(h.system.read_word(0x400), 2);

    // The first writer's data must survive the steal for other words.
    let value = h.load(l1_0, 0x400);
    assert_eq!(value, 2);
}

#[test]
fn conflicting_stores_converge_to_single_owner() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let (l1_0, l1_1, l2) = (h.module("l1-0"), h.module("l1-1"), h.module("l2"));

    // Issued in the same cycle; one bounces off the other's directory lock
    // and retries until the hierarchy settles.
    h.issue_store(l1_0, 0x500, 5);
    h.issue_store(l1_1, 0x500, 9);
    h.run();

    let s0 = h.system.block_state(l1_0, 0x500);
    let s1 = h.system.block_state(l1_1, 0x500);
    let winner = match (s0, s1) {
        (BlockState::Modified, BlockState::Invalid) => l1_0,
        (BlockState::Invalid, BlockState::Modified) => l1_1,
        other => panic!("expected one modified and one invalid copy, got {other:?}"),
    };
    assert_eq!(h.system.owner_of(l2, 0x500), Some(winner));
    let final_value = if winner == l1_0 { 5 } else { 9 };
    assert_eq!(h.system.read_word(0x500), final_value);
}

// ══════════════════════════════════════════════════════════
// 4. Peer transfers and structural agreement
// ══════════════════════════════════════════════════════════

#[test]
fn peer_transfer_toggle_never_changes_final_state() {
    let run = |peer: bool| {
        let mut config = builder::two_l1_hierarchy();
        config.peer_transfers = peer;
        let mut h = Harness::new(&config);
        let (l1_0, l1_1) = (h.module("l1-0"), h.module("l1-1"));
        h.store(l1_0, 0x100, 42);
        let value = h.load(l1_1, 0x100);
        (
            value,
            h.system.block_state(l1_0, 0x100),
            h.system.block_state(l1_1, 0x100),
        )
    };

    assert_eq!(run(true), run(false));
}

#[test]
fn directory_agrees_with_caches_above() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let (l1_0, l1_1, l2) = (h.module("l1-0"), h.module("l1-1"), h.module("l2"));

    let blocks = [0x000, 0x040, 0x080, 0x0c0, 0x100];
    h.store(l1_0, blocks[0], 1);
    let _ = h.load(l1_1, blocks[0]);
    let _ = h.load(l1_0, blocks[1]);
    h.store(l1_1, blocks[2], 3);
    let _ = h.load(l1_0, blocks[3]);
    let _ = h.load(l1_1, blocks[3]);
    h.store(l1_0, blocks[4], 5);
    h.store(l1_1, blocks[4], 6);

    for &addr in &blocks {
        for l1 in [l1_0, l1_1] {
            let resident = h.system.block_state(l1, addr) != BlockState::Invalid;
            assert_eq!(
                h.system.is_sharer(l2, l1, addr),
                resident,
                "directory and cache disagree on {addr:#x} at {l1:?}"
            );
        }
    }
}

// ══════════════════════════════════════════════════════════
// 5. Completion plumbing
// ══════════════════════════════════════════════════════════

#[test]
fn witness_counts_completions() {
    let mut h = Harness::new(&builder::two_l1_hierarchy());
    let l1_0 = h.module("l1-0");
    let witness = Rc::new(Cell::new(0));

    for addr in [0x100, 0x140, 0x180] {
        let _ = h.system.access(
            l1_0,
            AccessKind::Load,
            addr,
            0,
            Some(Rc::clone(&witness)),
            None,
        );
    }
    h.run();

    assert_eq!(witness.get(), 3);
}

// ══════════════════════════════════════════════════════════
// 6. Direct state injection
// ══════════════════════════════════════════════════════════

/// Seeding an exclusive block by hand, with matching directory records
/// below, makes the next store a pure local hit.
#[test]
fn injected_block_serves_a_store_without_descending() {
    let mut h = Harness::new(&builder::single_l1_hierarchy());
    let (l1, mm) = (h.module("l1"), h.module("mm"));
    let addr = 0x100;

    {
        let cache = h.system.cache_mut(l1).expect("l1 has a cache");
        let decoded = cache.decode_address(addr);
        cache.set_block(decoded.0, 0, decoded.1, BlockState::Exclusive);
    }
    let mm_set = {
        let backing = h.system.cache_mut(mm).expect("backing store array");
        let decoded = backing.decode_address(addr);
        backing.set_block(decoded.0, 0, decoded.1, BlockState::Exclusive);
        decoded.0
    };
    let directory = h.system.directory_mut(mm).expect("mm directory");
    directory.set_sharer(mm_set, 0, 0, 0);
    directory.set_owner(mm_set, 0, 0, Some(0));

    h.store(l1, addr, 7);

    assert_eq!(h.system.block_state(l1, addr), BlockState::Modified);
    assert_eq!(h.stats("l1").write_hits, 1);
    assert_eq!(h.stats("mm").accesses, 0);
    assert_eq!(h.load(l1, addr), 7);
}
