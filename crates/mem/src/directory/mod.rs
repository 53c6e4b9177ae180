//! Per-block owner/sharer metadata and block locks.
//!
//! The directory is the single source of truth for which higher modules hold
//! a copy of each block. It provides:
//! 1. **Entries:** One per `(set, way, sub-block)`, tracking an optional owner
//!    node and a sharer bitmap sized from the configured node count.
//! 2. **Locks:** One per `(set, way)`, with a FIFO wait queue of parked
//!    accesses. Holding a block's lock is the sole mutual-exclusion mechanism
//!    in the protocol: cache and directory state for a block may only be
//!    mutated by the lock holder.
//!
//! Unlocking hands the lock directly to the queue head; the caller is
//! responsible for rescheduling the woken access in the current cycle.

use std::collections::VecDeque;

use crate::access::AccessId;
use crate::protocol::EventKind;

/// Growable bitmap of sharer nodes, sized from the directory's node count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SharerSet {
    words: Vec<u64>,
    count: u32,
}

impl SharerSet {
    /// Creates an empty set able to hold `num_nodes` nodes.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            words: vec![0; num_nodes.div_ceil(64)],
            count: 0,
        }
    }

    /// Adds `node`; idempotent.
    pub fn insert(&mut self, node: usize) {
        let (word, bit) = (node / 64, node % 64);
        if self.words[word] & (1 << bit) == 0 {
            self.words[word] |= 1 << bit;
            self.count += 1;
        }
    }

    /// Removes `node`; idempotent.
    pub fn remove(&mut self, node: usize) {
        let (word, bit) = (node / 64, node % 64);
        if self.words[word] & (1 << bit) != 0 {
            self.words[word] &= !(1 << bit);
            self.count -= 1;
        }
    }

    /// Whether `node` is present.
    pub fn contains(&self, node: usize) -> bool {
        self.words[node / 64] & (1 << (node % 64)) != 0
    }

    /// Number of nodes present; always equals the bitmap population.
    pub fn len(&self) -> u32 {
        self.count
    }

    /// Whether no node is present.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Clears every node.
    pub fn clear(&mut self) {
        self.words.fill(0);
        self.count = 0;
    }

    /// Iterates over present node indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &bits)| {
            (0..64)
                .filter(move |bit| bits & (1 << bit) != 0)
                .map(move |bit| w * 64 + bit)
        })
    }
}

/// Directory entry for one sub-block: optional owner plus sharer bitmap.
///
/// Invariant: the owner, when present, is also a sharer.
#[derive(Clone, Debug, Default)]
pub struct Entry {
    owner: Option<usize>,
    sharers: SharerSet,
}

impl Entry {
    /// Owner node, if any.
    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    /// Number of sharer nodes.
    pub fn num_sharers(&self) -> u32 {
        self.sharers.len()
    }

    /// Whether `node` is a sharer.
    pub fn is_sharer(&self, node: usize) -> bool {
        self.sharers.contains(node)
    }

    /// Iterates over sharer node indices.
    pub fn sharers(&self) -> impl Iterator<Item = usize> + '_ {
        self.sharers.iter()
    }
}

/// Per-(set, way) lock with FIFO wait queue.
#[derive(Debug, Default)]
struct Lock {
    holder: Option<AccessId>,
    queue: VecDeque<(AccessId, EventKind)>,
}

/// Directory of `xsize × ysize × zsize` entries plus `xsize × ysize` locks.
///
/// For caches, `xsize` is the number of sets, `ysize` the associativity, and
/// `zsize` the number of sub-blocks of the finest higher-level block size
/// that fit within one block. `num_nodes` bounds the sharer bitmap.
#[derive(Debug)]
pub struct Directory {
    xsize: u32,
    ysize: u32,
    zsize: u32,
    num_nodes: usize,
    entries: Vec<Entry>,
    locks: Vec<Lock>,
}

impl Directory {
    /// Creates a directory with all entries empty and all locks free.
    pub fn new(xsize: u32, ysize: u32, zsize: u32, num_nodes: usize) -> Self {
        assert!(
            xsize > 0 && ysize > 0 && zsize > 0 && num_nodes > 0,
            "mis-sized directory: {xsize}x{ysize}x{zsize}, {num_nodes} nodes"
        );
        let entry = Entry {
            owner: None,
            sharers: SharerSet::new(num_nodes),
        };
        Self {
            xsize,
            ysize,
            zsize,
            num_nodes,
            entries: vec![entry; (xsize * ysize * zsize) as usize],
            locks: (0..xsize * ysize).map(|_| Lock::default()).collect(),
        }
    }

    /// Number of sub-blocks per block (the directory depth).
    pub fn zsize(&self) -> u32 {
        self.zsize
    }

    /// Number of possible sharer nodes.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Returns the entry at `(x, y, z)`.
    pub fn entry(&self, x: u32, y: u32, z: u32) -> &Entry {
        &self.entries[self.entry_index(x, y, z)]
    }

    /// Sets or clears the owner of `(x, y, z)`. An owner is always made a sharer.
    pub fn set_owner(&mut self, x: u32, y: u32, z: u32, owner: Option<usize>) {
        let index = self.entry_index(x, y, z);
        if let Some(node) = owner {
            assert!(node < self.num_nodes, "owner node {node} out of range");
            self.entries[index].sharers.insert(node);
        }
        self.entries[index].owner = owner;
    }

    /// Adds `node` as a sharer of `(x, y, z)`.
    pub fn set_sharer(&mut self, x: u32, y: u32, z: u32, node: usize) {
        assert!(node < self.num_nodes, "sharer node {node} out of range");
        let index = self.entry_index(x, y, z);
        self.entries[index].sharers.insert(node);
    }

    /// Removes `node` as a sharer of `(x, y, z)`; clears the owner if it was `node`.
    pub fn clear_sharer(&mut self, x: u32, y: u32, z: u32, node: usize) {
        let index = self.entry_index(x, y, z);
        self.entries[index].sharers.remove(node);
        if self.entries[index].owner == Some(node) {
            self.entries[index].owner = None;
        }
    }

    /// Removes every sharer and the owner of `(x, y, z)`.
    pub fn clear_all_sharers(&mut self, x: u32, y: u32, z: u32) {
        let index = self.entry_index(x, y, z);
        self.entries[index].sharers.clear();
        self.entries[index].owner = None;
    }

    /// Whether `node` shares `(x, y, z)`.
    pub fn is_sharer(&self, x: u32, y: u32, z: u32, node: usize) -> bool {
        self.entry(x, y, z).is_sharer(node)
    }

    /// Whether any sub-block of `(x, y)` has a sharer or an owner.
    ///
    /// A valid cache block must satisfy this; an invalid one must not.
    pub fn group_shared_or_owned(&self, x: u32, y: u32) -> bool {
        (0..self.zsize).any(|z| {
            let entry = self.entry(x, y, z);
            entry.owner.is_some() || !entry.sharers.is_empty()
        })
    }

    /// Attempts to take the `(x, y)` lock for `access`.
    ///
    /// Returns `true` when the lock is acquired (free, or already held by
    /// this same access after a queue handoff). Otherwise appends
    /// `(access, event)` to the FIFO wait queue and returns `false`; the
    /// caller must yield to the scheduler and will be resumed via `event`.
    pub fn lock(&mut self, x: u32, y: u32, event: EventKind, access: AccessId) -> bool {
        let lock = &mut self.locks[(x * self.ysize + y) as usize];
        match lock.holder {
            None => {
                lock.holder = Some(access);
                true
            }
            Some(holder) if holder == access => true,
            Some(_) => {
                lock.queue.push_back((access, event));
                false
            }
        }
    }

    /// Releases the `(x, y)` lock.
    ///
    /// If the wait queue is non-empty the lock is handed to the head entry,
    /// which is returned so the caller can reschedule its event for the
    /// current cycle (FIFO, no priority inversion).
    ///
    /// # Panics
    ///
    /// Panics when the lock is not held: double-unlock is a protocol defect.
    pub fn unlock(&mut self, x: u32, y: u32) -> Option<(AccessId, EventKind)> {
        let lock = &mut self.locks[(x * self.ysize + y) as usize];
        assert!(
            lock.holder.is_some(),
            "unlock of free directory lock ({x}, {y})"
        );
        if let Some((next, event)) = lock.queue.pop_front() {
            lock.holder = Some(next);
            Some((next, event))
        } else {
            lock.holder = None;
            None
        }
    }

    /// Whether the `(x, y)` lock is currently held.
    pub fn is_locked(&self, x: u32, y: u32) -> bool {
        self.locks[(x * self.ysize + y) as usize].holder.is_some()
    }

    /// Current holder of the `(x, y)` lock, if any.
    pub fn lock_holder(&self, x: u32, y: u32) -> Option<AccessId> {
        self.locks[(x * self.ysize + y) as usize].holder
    }

    fn entry_index(&self, x: u32, y: u32, z: u32) -> usize {
        assert!(
            x < self.xsize && y < self.ysize && z < self.zsize,
            "directory entry ({x}, {y}, {z}) out of range"
        );
        ((x * self.ysize + y) * self.zsize + z) as usize
    }
}
