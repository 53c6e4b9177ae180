//! Hierarchy nodes: caches, main memory, and local memories.
//!
//! A [`Module`] bundles everything one node of the hierarchy owns: its cache
//! array and directory (where the kind calls for them), its ports, its
//! in-flight access lists, its neighbors, and its statistics. Modules hold no
//! behavior of their own beyond admission bookkeeping; the protocol engine
//! drives them through [`crate::System`].

use std::collections::VecDeque;

use crate::access::AccessId;
use crate::cache::Cache;
use crate::protocol::EventKind;
use crate::config::{defaults, AddressRange, ModuleKind};
use crate::directory::Directory;
use crate::stats::ModuleStats;

/// Index of a module within its [`System`](crate::System).
///
/// Assigned in configuration order; resolve names with
/// [`System::module_id`](crate::System::module_id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModuleId(pub(crate) usize);

impl ModuleId {
    /// Position of this module in the system's module list.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mod{}", self.0)
    }
}

/// One access port; a taken port pins the access until released.
#[derive(Clone, Copy, Debug, Default)]
pub struct Port {
    /// Access currently holding the port.
    pub access: Option<AccessId>,
}

/// One node of the memory hierarchy.
pub struct Module {
    /// Unique name from the configuration.
    pub name: String,
    /// Node kind.
    pub kind: ModuleKind,
    /// This module's id.
    pub id: ModuleId,
    /// Block size in bytes.
    pub block_size: u64,
    /// `log2(block_size)`.
    pub log_block_size: u32,
    /// Finest sharing granularity below this module: the smallest block size
    /// among its high modules, or its own block size with none above.
    pub sub_block_size: u64,
    /// Access latency in cycles.
    pub latency: u64,

    /// Cache array; present for `Cache` and `MainMemory`.
    pub cache: Option<Cache>,
    /// Directory; present for `Cache` and `MainMemory`.
    pub directory: Option<Directory>,

    /// Ports; admission is first-come first-served through `port_queue`.
    pub ports: Vec<Port>,
    /// Accesses waiting for a free port with their resume events, in
    /// arrival order.
    pub port_queue: VecDeque<(AccessId, EventKind)>,
    /// Number of ports currently held.
    pub locked_ports: usize,

    /// All in-flight accesses at this module, in arrival order.
    pub access_list: Vec<AccessId>,
    /// In-flight writes, in arrival order.
    pub write_access_list: Vec<AccessId>,

    /// Modules directly below.
    pub low_modules: Vec<ModuleId>,
    /// Modules directly above.
    pub high_modules: Vec<ModuleId>,
    /// Address range served.
    pub address_range: AddressRange,

    /// Accumulated counters.
    pub stats: ModuleStats,
}

impl Module {
    /// Builds a module shell; neighbor lists and `sub_block_size` are wired
    /// by the system after all modules exist.
    pub(crate) fn new(
        name: String,
        kind: ModuleKind,
        id: ModuleId,
        block_size: u64,
        latency: u64,
        num_ports: u32,
        address_range: AddressRange,
        cache: Option<Cache>,
        directory: Option<Directory>,
    ) -> Self {
        assert!(block_size.is_power_of_two(), "block size must be a power of two");
        Self {
            name,
            kind,
            id,
            block_size,
            log_block_size: block_size.trailing_zeros(),
            sub_block_size: block_size,
            latency,
            cache,
            directory,
            ports: vec![Port::default(); num_ports as usize],
            port_queue: VecDeque::new(),
            locked_ports: 0,
            access_list: Vec::new(),
            write_access_list: Vec::new(),
            low_modules: Vec::new(),
            high_modules: Vec::new(),
            address_range,
            stats: ModuleStats::default(),
        }
    }

    /// Block-aligned tag of `addr`.
    pub fn tag_of(&self, addr: u64) -> u64 {
        addr & !(self.block_size - 1)
    }

    /// Whether `addr` falls in this module's served range.
    pub fn serves_address(&self, addr: u64) -> bool {
        self.address_range.serves(addr)
    }

    /// Cycles to move `bytes` of payload plus the message header across the
    /// link into this module.
    pub fn transfer_cycles(&self, bytes: u64) -> u64 {
        (bytes + defaults::MESSAGE_HEADER).div_ceil(defaults::LINK_WIDTH)
    }

    /// Index of a free port, if any.
    pub(crate) fn free_port(&self) -> Option<usize> {
        if self.locked_ports == self.ports.len() {
            return None;
        }
        self.ports.iter().position(|p| p.access.is_none())
    }

    /// Grants port `index` to `access`.
    ///
    /// # Panics
    ///
    /// Panics when the port is already held.
    pub(crate) fn take_port(&mut self, index: usize, access: AccessId) {
        assert!(self.ports[index].access.is_none(), "port {index} already held");
        self.ports[index].access = Some(access);
        self.locked_ports += 1;
    }

    /// Releases port `index`, returning the next waiter if one exists.
    ///
    /// # Panics
    ///
    /// Panics when the port is not held.
    pub(crate) fn release_port(&mut self, index: usize) -> Option<(AccessId, EventKind)> {
        assert!(self.ports[index].access.is_some(), "port {index} not held");
        self.ports[index].access = None;
        self.locked_ports -= 1;
        self.port_queue.pop_front()
    }

    /// Records `access` as in flight; writes also join the write list.
    pub(crate) fn start_access(&mut self, access: AccessId, is_write: bool) {
        self.access_list.push(access);
        if is_write {
            self.write_access_list.push(access);
        }
    }

    /// Drops `access` from the in-flight lists.
    pub(crate) fn end_access(&mut self, access: AccessId) {
        if let Some(pos) = self.access_list.iter().position(|&a| a == access) {
            let _ = self.access_list.remove(pos);
        }
        if let Some(pos) = self.write_access_list.iter().position(|&a| a == access) {
            let _ = self.write_access_list.remove(pos);
        }
    }
}
