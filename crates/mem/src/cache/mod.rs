//! Set-associative cache array with coherence-tagged blocks.
//!
//! This module implements the pure data half of a cache level: an array of
//! `sets × assoc` blocks carrying a tag, an NMOESI coherence state, and a
//! transient tag for in-flight fills. It has no timing and no protocol
//! knowledge; all mutation happens from protocol handlers that hold the
//! block's directory lock.

/// Cache replacement policy implementations (FIFO, LRU, Random).
pub mod policies;

use self::policies::{FifoPolicy, LruPolicy, RandomPolicy, ReplacementPolicy};
use crate::config::CachePolicy;

/// Coherence state of a cached block under the NMOESI protocol.
///
/// `Invalid` blocks never hit; every other state implies the block's
/// directory entry at the lower level lists this module as a sharer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockState {
    /// No valid copy present.
    #[default]
    Invalid,
    /// Valid copy, possibly stale relative to a dirty peer; other sharers may exist.
    Shared,
    /// Dirty copy held while other shared copies exist; responsible for writeback.
    Owned,
    /// Sole clean copy; may transition to Modified without a bus transaction.
    Exclusive,
    /// Sole dirty copy.
    Modified,
}

impl BlockState {
    /// Whether the block holds data that must be written back on eviction.
    pub fn is_dirty(self) -> bool {
        matches!(self, Self::Modified | Self::Owned)
    }

    /// Whether the block is valid (any state other than `Invalid`).
    pub fn is_valid(self) -> bool {
        self != Self::Invalid
    }
}

impl std::fmt::Display for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Invalid => "I",
            Self::Shared => "S",
            Self::Owned => "O",
            Self::Exclusive => "E",
            Self::Modified => "M",
        })
    }
}

/// One cache block: tag, coherence state, and the transient tag of an
/// in-flight fill targeting this way.
#[derive(Clone, Copy, Debug, Default)]
pub struct Block {
    /// Block-aligned address tag of the resident data.
    pub tag: u64,
    /// Tag of a fill currently in flight for this way, if any. Lets a second
    /// requester follow the fill instead of duplicating lower-level traffic.
    pub transient_tag: Option<u64>,
    /// NMOESI coherence state.
    pub state: BlockState,
}

/// Result of a cache lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lookup {
    /// Set the address decodes to.
    pub set: u32,
    /// Way the tag was found in; meaningful only when `hit`.
    pub way: u32,
    /// Whether a valid block with a matching tag was found.
    pub hit: bool,
    /// State of the matching block (`Invalid` on miss).
    pub state: BlockState,
}

/// Set-associative array of coherence-tagged blocks plus a replacement policy.
///
/// Invariant: at most one block per set holds a given tag. Geometry is fixed
/// at construction; out-of-range set/way indices are fatal bounds errors.
pub struct Cache {
    num_sets: u32,
    assoc: u32,
    block_size: u64,
    log_block_size: u32,
    blocks: Vec<Block>,
    policy: Box<dyn ReplacementPolicy>,
}

impl Cache {
    /// Creates a cache of `num_sets × assoc` invalid blocks.
    ///
    /// # Arguments
    ///
    /// * `num_sets` - Number of sets; must be a power of two.
    /// * `assoc` - Ways per set; must be nonzero.
    /// * `block_size` - Block size in bytes; must be a power of two.
    /// * `policy` - Replacement policy selecting victims per set.
    ///
    /// # Panics
    ///
    /// Panics on a zero or non-power-of-two geometry; configuration
    /// validation rejects these before construction in normal operation.
    pub fn new(num_sets: u32, assoc: u32, block_size: u64, policy: CachePolicy) -> Self {
        assert!(
            num_sets.is_power_of_two() && assoc > 0 && block_size.is_power_of_two(),
            "invalid cache geometry: sets={num_sets} assoc={assoc} block_size={block_size}"
        );
        let policy: Box<dyn ReplacementPolicy> = match policy {
            CachePolicy::Lru => Box::new(LruPolicy::new(num_sets as usize, assoc as usize)),
            CachePolicy::Fifo => Box::new(FifoPolicy::new(num_sets as usize, assoc as usize)),
            CachePolicy::Random => Box::new(RandomPolicy::new(num_sets as usize, assoc as usize)),
        };
        Self {
            num_sets,
            assoc,
            block_size,
            log_block_size: block_size.trailing_zeros(),
            blocks: vec![Block::default(); (num_sets * assoc) as usize],
            policy,
        }
    }

    /// Number of sets.
    pub fn num_sets(&self) -> u32 {
        self.num_sets
    }

    /// Associativity (ways per set).
    pub fn assoc(&self) -> u32 {
        self.assoc
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Decodes `addr` into `(set, tag, offset)`.
    pub fn decode_address(&self, addr: u64) -> (u32, u64, u64) {
        let block = addr >> self.log_block_size;
        let set = (block % u64::from(self.num_sets)) as u32;
        let tag = addr & !(self.block_size - 1);
        let offset = addr & (self.block_size - 1);
        (set, tag, offset)
    }

    /// Scans the set for `addr`.
    ///
    /// Hits only on a tag match with state ≠ `Invalid`. A transient-tag match
    /// reports the way of the in-flight fill with `hit == false`, so the
    /// caller can chain onto the fill rather than start another.
    pub fn lookup(&self, addr: u64) -> Lookup {
        let (set, tag, _) = self.decode_address(addr);
        for way in 0..self.assoc {
            let block = self.block(set, way);
            if block.tag == tag && block.state.is_valid() {
                return Lookup {
                    set,
                    way,
                    hit: true,
                    state: block.state,
                };
            }
            if block.transient_tag == Some(tag) {
                return Lookup {
                    set,
                    way,
                    hit: false,
                    state: BlockState::Invalid,
                };
            }
        }
        Lookup {
            set,
            way: 0,
            hit: false,
            state: BlockState::Invalid,
        }
    }

    /// Installs `tag`/`state` at `(set, way)`, clearing any transient tag.
    pub fn set_block(&mut self, set: u32, way: u32, tag: u64, state: BlockState) {
        let block = self.block_mut(set, way);
        block.tag = tag;
        block.state = state;
        block.transient_tag = None;
    }

    /// Returns `(tag, state)` of the block at `(set, way)`.
    pub fn get_block(&self, set: u32, way: u32) -> (u64, BlockState) {
        let block = self.block(set, way);
        (block.tag, block.state)
    }

    /// Marks `(set, way)` as the landing slot of an in-flight fill for `tag`.
    pub fn set_transient_tag(&mut self, set: u32, way: u32, tag: u64) {
        self.block_mut(set, way).transient_tag = Some(tag);
    }

    /// Way with an in-flight fill for `addr`'s tag, if one exists.
    pub fn transient_way(&self, addr: u64) -> Option<u32> {
        let (set, tag, _) = self.decode_address(addr);
        (0..self.assoc).find(|&way| self.block(set, way).transient_tag == Some(tag))
    }

    /// Selects a victim way in `set` according to the replacement policy.
    pub fn select_victim(&mut self, set: u32) -> u32 {
        assert!(set < self.num_sets, "set {set} out of range");
        self.policy.get_victim(set as usize) as u32
    }

    /// Promotes `(set, way)` per the replacement policy (no-op for FIFO
    /// unless the pointed-to way is refilled, no-op for Random).
    pub fn touch(&mut self, set: u32, way: u32) {
        assert!(
            set < self.num_sets && way < self.assoc,
            "block ({set}, {way}) out of range"
        );
        self.policy.update(set as usize, way as usize);
    }

    fn block(&self, set: u32, way: u32) -> &Block {
        assert!(
            set < self.num_sets && way < self.assoc,
            "block ({set}, {way}) out of range"
        );
        &self.blocks[(set * self.assoc + way) as usize]
    }

    fn block_mut(&mut self, set: u32, way: u32) -> &mut Block {
        assert!(
            set < self.num_sets && way < self.assoc,
            "block ({set}, {way}) out of range"
        );
        &mut self.blocks[(set * self.assoc + way) as usize]
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("num_sets", &self.num_sets)
            .field("assoc", &self.assoc)
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}
