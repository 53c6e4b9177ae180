//! Hierarchy assembly and the simulation loop.
//!
//! [`System`] owns every moving part of a simulation: the modules, the
//! access arena, the event scheduler with its clock domain, and the
//! word-granular functional image that gives loads their values. Protocol
//! handlers live in [`crate::protocol`] as methods on this type; this module
//! provides construction from a [`HierarchyConfig`], the public access API,
//! the event pump, and the shared helpers the handlers lean on.

use std::collections::HashMap;

use tracing::debug;

use crate::access::{Access, AccessArena, AccessId, AccessKind, CompletionFn, DirLockRef, Witness};
use crate::cache::{BlockState, Cache};
use crate::config::{defaults, CachePolicy, ConfigError, HierarchyConfig, ModuleKind};
use crate::directory::Directory;
use crate::engine::{DomainId, EventScheduler};
use crate::module::{Module, ModuleId};
use crate::protocol::EventKind;
use crate::stats::ModuleStats;

/// A complete memory hierarchy under simulation.
pub struct System {
    scheduler: EventScheduler,
    domain: DomainId,
    modules: Vec<Module>,
    names: HashMap<String, ModuleId>,
    arena: AccessArena,
    /// Word-aligned functional image; absent words read as zero.
    image: HashMap<u64, u64>,
    peer_transfers: bool,
    next_seq: u64,
    rng: u64,
}

impl System {
    /// Builds a hierarchy from its validated description.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the description is malformed; see
    /// [`HierarchyConfig::validate`].
    pub fn new(config: &HierarchyConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut scheduler = EventScheduler::new();
        let domain = scheduler.new_domain(config.frequency_mhz);

        let mut modules = Vec::with_capacity(config.modules.len());
        let mut names = HashMap::new();
        for (index, mc) in config.modules.iter().enumerate() {
            let id = ModuleId(index);
            let module = match mc.kind {
                ModuleKind::Cache => {
                    let geometry_name = mc
                        .geometry
                        .as_deref()
                        .ok_or_else(|| ConfigError::MissingGeometry(mc.name.clone()))?;
                    let geometry = config.geometries.get(geometry_name).ok_or_else(|| {
                        ConfigError::UnknownGeometry {
                            module: mc.name.clone(),
                            geometry: geometry_name.to_owned(),
                        }
                    })?;
                    Module::new(
                        mc.name.clone(),
                        mc.kind,
                        id,
                        geometry.block_size,
                        mc.latency.unwrap_or(geometry.latency),
                        mc.ports.unwrap_or(geometry.ports),
                        mc.address_range,
                        Some(Cache::new(
                            geometry.sets,
                            geometry.assoc,
                            geometry.block_size,
                            geometry.policy,
                        )),
                        None,
                    )
                }
                ModuleKind::MainMemory => {
                    let block_size = mc
                        .block_size
                        .ok_or_else(|| ConfigError::MissingBlockSize(mc.name.clone()))?;
                    let dir_sets = mc.directory_sets.unwrap_or(defaults::MAIN_MEMORY_DIR_SETS);
                    let dir_assoc = mc.directory_assoc.unwrap_or(defaults::MAIN_MEMORY_DIR_ASSOC);
                    Module::new(
                        mc.name.clone(),
                        mc.kind,
                        id,
                        block_size,
                        mc.latency.unwrap_or(defaults::MAIN_MEMORY_LATENCY),
                        mc.ports.unwrap_or(defaults::PORTS),
                        mc.address_range,
                        Some(Cache::new(dir_sets, dir_assoc, block_size, CachePolicy::Lru)),
                        None,
                    )
                }
                ModuleKind::LocalMemory => {
                    let block_size = mc
                        .block_size
                        .ok_or_else(|| ConfigError::MissingBlockSize(mc.name.clone()))?;
                    Module::new(
                        mc.name.clone(),
                        mc.kind,
                        id,
                        block_size,
                        mc.latency.unwrap_or(1),
                        mc.ports.unwrap_or(defaults::PORTS),
                        mc.address_range,
                        None,
                        None,
                    )
                }
            };
            let _ = names.insert(mc.name.clone(), id);
            modules.push(module);
        }

        // Wire neighbor lists.
        let mut edges = Vec::new();
        for (index, mc) in config.modules.iter().enumerate() {
            for low_name in &mc.low_modules {
                let low = *names
                    .get(low_name)
                    .ok_or_else(|| ConfigError::UnknownLowModule {
                        module: mc.name.clone(),
                        low: low_name.clone(),
                    })?;
                edges.push((ModuleId(index), low));
            }
        }
        for (high, low) in edges {
            modules[high.0].low_modules.push(low);
            modules[low.0].high_modules.push(high);
        }

        // Sub-block sizes and directories need the wired graph.
        let block_sizes: Vec<u64> = modules.iter().map(|m| m.block_size).collect();
        for module in &mut modules {
            let finest = module
                .high_modules
                .iter()
                .map(|h| block_sizes[h.0])
                .min()
                .unwrap_or(module.block_size);
            module.sub_block_size = finest.min(module.block_size);
            if let Some(cache) = &module.cache {
                let zsize = (module.block_size / module.sub_block_size) as u32;
                let num_nodes = module.high_modules.len().max(1);
                module.directory = Some(Directory::new(
                    cache.num_sets(),
                    cache.assoc(),
                    zsize,
                    num_nodes,
                ));
            }
        }

        Ok(Self {
            scheduler,
            domain,
            modules,
            names,
            arena: AccessArena::new(),
            image: HashMap::new(),
            peer_transfers: config.peer_transfers,
            next_seq: 0,
            rng: 0x9E37_79B9_7F4A_7C15,
        })
    }

    // ── Public API ──────────────────────────────────────────────────────

    /// Resolves a module name from the configuration.
    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.names.get(name).copied()
    }

    /// Borrows a module.
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    /// Statistics of `id`.
    pub fn stats(&self, id: ModuleId) -> &ModuleStats {
        &self.modules[id.0].stats
    }

    /// Issues a memory access at `module` and returns its sequence id.
    ///
    /// The access starts in the current cycle; `witness` is bumped and
    /// `on_complete` fired (with the loaded word, or `value` for writes)
    /// when it finishes. Local-memory modules accept loads and stores only
    /// at the port/latency level; coherent kinds run the full protocol.
    pub fn access(
        &mut self,
        module: ModuleId,
        kind: AccessKind,
        addr: u64,
        value: u64,
        witness: Option<Witness>,
        on_complete: Option<CompletionFn>,
    ) -> u64 {
        let seq_id = self.next_seq;
        self.next_seq += 1;
        let target = &self.modules[module.0];
        let tag = target.tag_of(addr);
        let entry = match (target.kind, kind) {
            (ModuleKind::LocalMemory, AccessKind::Load) => EventKind::LocalLoad,
            (ModuleKind::LocalMemory, _) => EventKind::LocalStore,
            (_, AccessKind::Load) => EventKind::Load,
            (_, AccessKind::Store) => EventKind::Store,
            (_, AccessKind::NcStore) => EventKind::NcStore,
        };
        let id = self.arena.alloc(Access {
            seq_id,
            kind: Some(kind),
            module: Some(module),
            addr,
            tag,
            value,
            witness,
            on_complete,
            ..Access::default()
        });
        self.modules[module.0].start_access(id, kind.is_write());
        debug!(
            seq = seq_id,
            module = %self.modules[module.0].name,
            %kind,
            addr = format_args!("{addr:#x}"),
            "access issued"
        );
        self.sched(0, entry, id);
        seq_id
    }

    /// Processes the next live event. Returns `false` when the queue is
    /// drained.
    pub fn step(&mut self) -> bool {
        while let Some(event) = self.scheduler.next_event() {
            // Events aimed at destroyed frames are stale; drop them.
            if self.arena.get(event.access).is_none() {
                continue;
            }
            self.dispatch(event.kind, event.access);
            return true;
        }
        false
    }

    /// Runs until no events remain.
    pub fn run_until_idle(&mut self) {
        while self.step() {}
    }

    /// Runs at most `cycles` cycles of simulated time.
    pub fn run_for(&mut self, cycles: u64) {
        let cycle_time = self.scheduler.cycle_time_ps(self.domain);
        let end_ps = (self.scheduler.cycle(self.domain) + cycles) * cycle_time;
        while self
            .scheduler
            .next_event_time()
            .is_some_and(|t| t <= end_ps)
        {
            let _ = self.step();
        }
    }

    /// Current cycle of the memory-system clock domain.
    pub fn cycle(&self) -> u64 {
        self.scheduler.cycle(self.domain)
    }

    /// Number of live access frames.
    pub fn in_flight(&self) -> usize {
        self.arena.live()
    }

    /// Reads the functional image word covering `addr`.
    pub fn read_word(&self, addr: u64) -> u64 {
        self.image.get(&(addr & !7)).copied().unwrap_or(0)
    }

    /// Writes the functional image word covering `addr`.
    pub fn write_word(&mut self, addr: u64, value: u64) {
        let _ = self.image.insert(addr & !7, value);
    }

    /// Mutable handle to `module`'s cache array for direct state injection.
    ///
    /// Only valid between runs; mutating blocks while accesses are in flight
    /// corrupts the directory's view of the hierarchy.
    pub fn cache_mut(&mut self, module: ModuleId) -> Option<&mut Cache> {
        self.modules[module.0].cache.as_mut()
    }

    /// Mutable handle to `module`'s directory, under the same between-runs
    /// rule as [`Self::cache_mut`].
    pub fn directory_mut(&mut self, module: ModuleId) -> Option<&mut Directory> {
        self.modules[module.0].directory.as_mut()
    }

    /// State of the block covering `addr` at `module`; `Invalid` on absence.
    pub fn block_state(&self, module: ModuleId, addr: u64) -> BlockState {
        self.modules[module.0]
            .cache
            .as_ref()
            .map_or(BlockState::Invalid, |cache| {
                let lookup = cache.lookup(addr);
                if lookup.hit {
                    lookup.state
                } else {
                    BlockState::Invalid
                }
            })
    }

    /// Whether `high` is recorded as a sharer of `addr` in `low`'s directory.
    pub fn is_sharer(&self, low: ModuleId, high: ModuleId, addr: u64) -> bool {
        let module = &self.modules[low.0];
        let (Some(cache), Some(directory)) = (&module.cache, &module.directory) else {
            return false;
        };
        let lookup = cache.lookup(addr);
        if !lookup.hit {
            return false;
        }
        let Some(node) = module.high_modules.iter().position(|&h| h == high) else {
            return false;
        };
        let z = self.sub_block_of(low, addr);
        directory.is_sharer(lookup.set, lookup.way, z, node)
    }

    /// Owner of `addr`'s sub-block in `low`'s directory, if any.
    pub fn owner_of(&self, low: ModuleId, addr: u64) -> Option<ModuleId> {
        let module = &self.modules[low.0];
        let cache = module.cache.as_ref()?;
        let directory = module.directory.as_ref()?;
        let lookup = cache.lookup(addr);
        if !lookup.hit {
            return None;
        }
        let z = self.sub_block_of(low, addr);
        directory
            .entry(lookup.set, lookup.way, z)
            .owner()
            .map(|node| module.high_modules[node])
    }

    // ── Handler plumbing ────────────────────────────────────────────────

    /// Borrows a live access frame.
    ///
    /// # Panics
    ///
    /// Panics on a stale id: handlers only run for live frames.
    pub(crate) fn frame(&self, id: AccessId) -> &Access {
        self.arena
            .get(id)
            .unwrap_or_else(|| panic!("stale access frame {id:?}"))
    }

    /// Mutable counterpart of [`Self::frame`].
    pub(crate) fn frame_mut(&mut self, id: AccessId) -> &mut Access {
        self.arena
            .get_mut(id)
            .unwrap_or_else(|| panic!("stale access frame {id:?}"))
    }

    /// Module the frame currently operates in.
    pub(crate) fn frame_module(&self, id: AccessId) -> ModuleId {
        self.frame(id)
            .module
            .unwrap_or_else(|| panic!("frame {id:?} has no module"))
    }

    pub(crate) fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0]
    }

    /// Schedules `kind` for `access` after `delay` cycles.
    pub(crate) fn sched(&mut self, delay: u64, kind: EventKind, access: AccessId) {
        self.scheduler.schedule(self.domain, delay, kind, access);
    }

    /// Allocates a child frame and schedules its entry event.
    pub(crate) fn push_frame(&mut self, access: Access, entry: EventKind, delay: u64) -> AccessId {
        let id = self.arena.alloc(access);
        self.sched(delay, entry, id);
        id
    }

    /// Destroys `child` and resumes its parent chain. Result fields must be
    /// copied into the parent before calling.
    pub(crate) fn pop_frame(&mut self, child: AccessId) {
        let frame = self.arena.free(child);
        if let (Some(parent), Some(ret)) = (frame.parent, frame.ret_event) {
            self.sched(0, ret, parent);
        }
    }

    /// Tries to grant `id` a port at `module`. On success the frame records
    /// its port and the owning top-level access is marked port-locked
    /// (closing the store-coalescing window). On failure `id` joins the
    /// port queue and is resumed with `resume` once a port frees up.
    pub(crate) fn acquire_port(&mut self, id: AccessId, module: ModuleId, resume: EventKind) -> bool {
        if let Some(port) = self.modules[module.0].free_port() {
            self.modules[module.0].take_port(port, id);
            let parent = {
                let frame = self.frame_mut(id);
                frame.port = Some(port);
                frame.port_locked = true;
                frame.parent
            };
            if let Some(parent) = parent {
                self.frame_mut(parent).port_locked = true;
            }
            true
        } else {
            self.modules[module.0].port_queue.push_back((id, resume));
            false
        }
    }

    /// Releases the port held by `id`, handing it straight to the next
    /// queued waiter and resuming that waiter in the current cycle.
    pub(crate) fn release_port_of(&mut self, id: AccessId) {
        let (module, port) = {
            let frame = self.frame_mut(id);
            let module = frame.module.unwrap_or_else(|| panic!("frame {id:?} has no module"));
            let port = frame.port.take().unwrap_or_else(|| panic!("frame {id:?} holds no port"));
            (module, port)
        };
        if let Some((waiter, resume)) = self.modules[module.0].release_port(port) {
            self.modules[module.0].take_port(port, waiter);
            let parent = {
                let frame = self.frame_mut(waiter);
                frame.port = Some(port);
                frame.port_locked = true;
                frame.parent
            };
            if let Some(parent) = parent {
                self.frame_mut(parent).port_locked = true;
            }
            self.sched(0, resume, waiter);
        }
    }

    /// Releases a directory lock, resuming the next waiter if any.
    pub(crate) fn unlock_dir(&mut self, lock: DirLockRef) {
        let module = &mut self.modules[lock.module.0];
        let directory = module
            .directory
            .as_mut()
            .unwrap_or_else(|| panic!("module {} has no directory", module.name));
        if let Some((next, event)) = directory.unlock(lock.set, lock.way) {
            self.sched(0, event, next);
        }
    }

    /// The low module serving `addr` below `module`.
    ///
    /// # Panics
    ///
    /// Panics when no low module serves `addr`; validated configurations
    /// partition the space.
    pub(crate) fn low_module_for(&self, module: ModuleId, addr: u64) -> ModuleId {
        self.modules[module.0]
            .low_modules
            .iter()
            .copied()
            .find(|&low| self.modules[low.0].serves_address(addr))
            .unwrap_or_else(|| {
                panic!(
                    "no low module of {} serves {addr:#x}",
                    self.modules[module.0].name
                )
            })
    }

    /// Sharer-bitmap node index of `high` in `low`'s directory.
    pub(crate) fn node_index(&self, low: ModuleId, high: ModuleId) -> usize {
        self.modules[low.0]
            .high_modules
            .iter()
            .position(|&h| h == high)
            .unwrap_or_else(|| {
                panic!(
                    "{} is not above {}",
                    self.modules[high.0].name, self.modules[low.0].name
                )
            })
    }

    /// Sub-block index of `addr` within its block at `module`.
    pub(crate) fn sub_block_of(&self, module: ModuleId, addr: u64) -> u32 {
        let m = &self.modules[module.0];
        ((addr & (m.block_size - 1)) / m.sub_block_size) as u32
    }

    /// Whether peer data transfers between siblings are enabled.
    pub(crate) fn peer_transfers(&self) -> bool {
        self.peer_transfers
    }

    /// Retry delay for a bounced access at `module`: the module latency plus
    /// a jittered slack of up to one more latency, de-synchronizing retries.
    pub(crate) fn retry_delay(&mut self, module: ModuleId) -> u64 {
        let latency = self.modules[module.0].latency.max(1);
        latency + self.next_random() % latency
    }

    fn next_random(&mut self) -> u64 {
        // xorshift64; deterministic across runs.
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        self.rng
    }

    /// Resolves the root master of a coalescing chain.
    pub(crate) fn root_master(&self, mut id: AccessId) -> AccessId {
        while let Some(master) = self.frame(id).master {
            id = master;
        }
        id
    }

    /// Finds an in-flight access older than `id` at `module` that `kind` on
    /// `addr` may piggyback on. Loads ride any older load or store to the
    /// block; stores ride the youngest older write to the block whose port
    /// is not yet granted. Non-coherent stores never coalesce.
    pub(crate) fn can_coalesce(
        &self,
        module: ModuleId,
        id: AccessId,
        kind: AccessKind,
        addr: u64,
    ) -> Option<AccessId> {
        let m = &self.modules[module.0];
        let tag = m.tag_of(addr);
        // The asker is already listed; only look at accesses issued before it.
        let position = m.access_list.iter().position(|&a| a == id)?;
        let older = &m.access_list[..position];
        match kind {
            AccessKind::Load => older.iter().rev().find_map(|&candidate| {
                let frame = self.frame(candidate);
                let master_kind = frame.kind?;
                if frame.tag != tag || frame.retry {
                    return None;
                }
                match master_kind {
                    AccessKind::Load => Some(self.root_master(candidate)),
                    // A write master stops broadcasting once its port is
                    // granted; late loads must run their own lookup.
                    AccessKind::Store => {
                        let master = self.root_master(candidate);
                        if self.frame(master).port_locked {
                            None
                        } else {
                            Some(master)
                        }
                    }
                    AccessKind::NcStore => None,
                }
            }),
            AccessKind::Store => {
                let &candidate = older.last()?;
                let frame = self.frame(candidate);
                if frame.tag == tag && frame.kind.is_some_and(AccessKind::is_write) {
                    let master = self.root_master(candidate);
                    if self.frame(master).port_locked {
                        None
                    } else {
                        Some(master)
                    }
                } else {
                    None
                }
            }
            AccessKind::NcStore => None,
        }
    }

    /// Marks `slave` as riding on `master` and parks it to be woken with
    /// `finish` when the master completes.
    pub(crate) fn coalesce(&mut self, master: AccessId, slave: AccessId, finish: EventKind) {
        let (module, kind) = {
            let frame = self.frame(slave);
            (frame.module, frame.kind)
        };
        {
            let frame = self.frame_mut(slave);
            frame.coalesced = true;
            frame.master = Some(master);
        }
        self.frame_mut(master).followers.push((slave, finish));
        if let (Some(module), Some(kind)) = (module, kind) {
            self.modules[module.0].stats.record_coalesce(kind);
            debug!(
                module = %self.modules[module.0].name,
                %kind,
                "access coalesced"
            );
        }
    }

    /// Completes a top-level access: leaves the in-flight lists, wakes
    /// followers, bumps the witness, and fires the completion callback with
    /// the access's data word.
    pub(crate) fn finish_access(&mut self, id: AccessId) {
        let module = self.frame(id).module;
        if let Some(module) = module {
            self.modules[module.0].end_access(id);
        }
        let followers = std::mem::take(&mut self.frame_mut(id).followers);
        for (follower, event) in followers {
            self.sched(0, event, follower);
        }
        let frame = self.arena.free(id);
        // Coalesced stores commit at finish, after the master's write.
        if frame.coalesced && frame.kind.is_some_and(AccessKind::is_write) {
            self.write_word(frame.addr, frame.value);
        }
        let value = match frame.kind {
            Some(AccessKind::Load) => self.read_word(frame.addr),
            _ => frame.value,
        };
        debug!(
            seq = frame.seq_id,
            addr = format_args!("{:#x}", frame.addr),
            cycle = self.cycle(),
            "access finished"
        );
        if let Some(witness) = frame.witness {
            witness.set(witness.get() + 1);
        }
        if let Some(on_complete) = frame.on_complete {
            on_complete(value);
        }
    }
}
