//! Access frames ("stacks") and their arena.
//!
//! An [`Access`] threads one logical memory operation through the protocol
//! event chains: it owns the transient lookup results, the call/return
//! linkage between nested chains, and the follower queue used for both
//! coalescing and ordering waits. Frames live in a generational
//! [`AccessArena`]; all cross-references are [`AccessId`]s, so an event aimed
//! at a destroyed frame is detected by generation mismatch instead of
//! dereferencing a dangling pointer.

use std::cell::Cell;
use std::rc::Rc;

use crate::cache::BlockState;
use crate::module::ModuleId;
use crate::protocol::EventKind;

/// Kind of memory access issued by a collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    /// Coherent read.
    Load,
    /// Coherent write; acquires exclusive ownership before completing.
    Store,
    /// Non-coherent write-through; bypasses sharer/owner bookkeeping.
    NcStore,
}

impl AccessKind {
    /// Whether this kind writes.
    pub fn is_write(self) -> bool {
        matches!(self, Self::Store | Self::NcStore)
    }
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Store => "store",
            Self::NcStore => "nc_store",
        })
    }
}

/// Direction of a read/write request between two modules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestDirection {
    /// Requester is the higher module asking the level below.
    UpDown,
    /// A lower module recalls or invalidates data held above it.
    DownUp,
}

/// Caller-supplied completion counter, bumped once when the access finishes.
///
/// The simulation is single-threaded and cooperative, so a shared cell is
/// sufficient; pipelines poll it to detect completion.
pub type Witness = Rc<Cell<u64>>;

/// Completion callback, fired with the access's data word when it finishes.
pub type CompletionFn = Box<dyn FnOnce(u64)>;

/// Reference to a held directory lock: module, set, way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirLockRef {
    /// Module whose directory is locked.
    pub module: ModuleId,
    /// Locked set.
    pub set: u32,
    /// Locked way.
    pub way: u32,
}

/// Per-request continuation: one frame per protocol chain invocation.
///
/// A top-level frame carries the witness/callback; nested chains
/// (find-and-lock, read/write requests, evictions, invalidations) push child
/// frames that return their results into the parent via `parent`/`ret_event`.
#[derive(Default)]
pub struct Access {
    /// Global sequence id of the originating access; children inherit it so
    /// one logical operation logs under a single id.
    pub seq_id: u64,
    /// Kind of the originating access.
    pub kind: Option<AccessKind>,
    /// Module currently processing this frame.
    pub module: Option<ModuleId>,
    /// Module a request frame is directed at.
    pub target_module: Option<ModuleId>,
    /// Module excluded from invalidation fan-out (the requester keeps its copy).
    pub except_module: Option<ModuleId>,
    /// Target address.
    pub addr: u64,
    /// Block-aligned tag of `addr` in the processing module.
    pub tag: u64,
    /// Data word carried by stores; loads capture the image word at finish.
    pub value: u64,

    /// Lookup result: set.
    pub set: u32,
    /// Lookup result: way.
    pub way: u32,
    /// Lookup result: block state (`Invalid` on miss).
    pub state: BlockState,
    /// Eviction source set in the evicting module.
    pub src_set: u32,
    /// Eviction source way in the evicting module.
    pub src_way: u32,
    /// Eviction source tag in the evicting module.
    pub src_tag: u64,

    /// Direction of a read/write request frame.
    pub request_dir: Option<RequestDirection>,
    /// Directory lock held by this frame, transferred to the parent when a
    /// find-and-lock chain returns.
    pub dir_lock: Option<DirLockRef>,
    /// Reply payload size in bytes; determines the transfer delay.
    pub reply_size: u64,
    /// Pending-ack counter for fan-out rendez-vous (invalidations, recalls).
    pub pending: u32,
    /// Port index held in `module`, if any.
    pub port: Option<usize>,

    /// Lookup hit flag.
    pub hit: bool,
    /// Error return (lock race); triggers the retry path in the parent.
    pub error: bool,
    /// Reply flag: another cache retains a copy, install as Shared.
    pub shared: bool,
    /// This frame performs a read (for statistics and lock admission).
    pub read: bool,
    /// Find-and-lock may wait in the directory queue rather than fail.
    pub blocking: bool,
    /// Eviction carries dirty data that must be written back.
    pub writeback: bool,
    /// A victim eviction ran as part of this find-and-lock.
    pub eviction: bool,
    /// The access has been retried at least once.
    pub retry: bool,
    /// The access rides on a master instead of issuing protocol traffic.
    pub coalesced: bool,
    /// A port has been granted; writes can no longer coalesce onto this frame.
    pub port_locked: bool,
    /// Statistics for this find-and-lock were already recorded (the port
    /// step re-runs after a directory-lock handoff).
    pub stats_recorded: bool,
    /// An up-down read request recalled data from owners above the target.
    pub recalled: bool,

    /// Master this access coalesced onto.
    pub master: Option<AccessId>,
    /// Followers parked on this frame: coalesced slaves waiting for the
    /// finish broadcast, and younger accesses waiting for ordering.
    pub followers: Vec<(AccessId, EventKind)>,

    /// Parent frame of a nested chain.
    pub parent: Option<AccessId>,
    /// Event scheduled on the parent when this chain returns.
    pub ret_event: Option<EventKind>,

    /// Completion counter, bumped at finish.
    pub witness: Option<Witness>,
    /// Completion callback, fired with the access's data word at finish.
    pub on_complete: Option<CompletionFn>,
}

/// Handle to an arena slot; the generation detects reuse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessId {
    index: u32,
    generation: u32,
}

impl AccessId {
    /// Builds an id from raw parts (tests and scheduler plumbing only).
    pub fn from_raw(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    access: Option<Access>,
}

/// Generational slab of access frames.
///
/// Frames are destroyed only after reaching their terminal state; a freed
/// slot bumps its generation so stale [`AccessId`]s (and the events carrying
/// them) resolve to `None`.
#[derive(Default)]
pub struct AccessArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl AccessArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a slot for `access`, reusing freed slots.
    pub fn alloc(&mut self, access: Access) -> AccessId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.access = Some(access);
            AccessId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                access: Some(access),
            });
            AccessId {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    /// Destroys the frame behind `id`, invalidating all outstanding copies
    /// of the id (their generation no longer matches).
    ///
    /// # Panics
    ///
    /// Panics when `id` is stale: double-free is a protocol defect.
    pub fn free(&mut self, id: AccessId) -> Access {
        let slot = &mut self.slots[id.index as usize];
        assert_eq!(
            slot.generation, id.generation,
            "free of stale access id {id:?}"
        );
        let access = slot.access.take().unwrap_or_else(|| {
            panic!("double free of access id {id:?}");
        });
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        access
    }

    /// Resolves `id`, returning `None` for destroyed frames.
    pub fn get(&self, id: AccessId) -> Option<&Access> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation == id.generation {
            slot.access.as_ref()
        } else {
            None
        }
    }

    /// Mutable counterpart of [`Self::get`].
    pub fn get_mut(&mut self, id: AccessId) -> Option<&mut Access> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation == id.generation {
            slot.access.as_mut()
        } else {
            None
        }
    }

    /// Number of live frames.
    pub fn live(&self) -> usize {
        self.live
    }
}
