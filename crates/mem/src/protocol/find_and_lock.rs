//! Find-and-lock: port admission, lookup, victim choice, directory locking.
//!
//! Every chain that touches a block runs this sub-chain first. It admits the
//! access through a module port, looks the address up, picks and pins a
//! victim way on an allocating miss, and takes the `(set, way)` directory
//! lock. Blocking callers wait FIFO in the lock queue with the port held;
//! non-blocking callers bounce with an error and let the parent retry.
//!
//! The port step re-runs after a lock handoff; the `stats_recorded` flag
//! keeps counters single-shot, and a lock kept from a previous run whose
//! coordinates no longer match is released before the new attempt.

use tracing::{debug, trace};

use crate::access::{Access, AccessId, AccessKind, DirLockRef};
use crate::cache::BlockState;
use crate::config::ModuleKind;
use crate::protocol::EventKind;
use crate::System;

impl System {
    pub(crate) fn handle_find_and_lock(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        if self.acquire_port(id, module, EventKind::FindAndLockPort) {
            self.sched(0, EventKind::FindAndLockPort, id);
        } else {
            trace!(module = %self.module(module).name, "find-and-lock waits for a port");
        }
    }

    pub(crate) fn handle_find_and_lock_port(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let (addr, blocking, read, retry, stats_done, old_lock, kind) = {
            let frame = self.frame(id);
            (
                frame.addr,
                frame.blocking,
                frame.read,
                frame.retry,
                frame.stats_recorded,
                frame.dir_lock,
                frame.kind.unwrap_or(AccessKind::Load),
            )
        };
        let is_main_memory = self.module(module).kind == ModuleKind::MainMemory;

        let (set, tag, mut way, mut hit, mut state, transient) = {
            let cache = self
                .module(module)
                .cache
                .as_ref()
                .unwrap_or_else(|| panic!("module {} has no cache", self.module(module).name));
            let lookup = cache.lookup(addr);
            let transient = if lookup.hit {
                None
            } else {
                cache.transient_way(addr)
            };
            let (_, tag, _) = cache.decode_address(addr);
            (lookup.set, tag, lookup.way, lookup.hit, lookup.state, transient)
        };
        self.frame_mut(id).tag = tag;

        if !stats_done {
            let stats = &mut self.module_mut(module).stats;
            stats.record_attempt(kind, hit, retry);
            if read {
                if blocking {
                    stats.blocking_reads += 1;
                } else {
                    stats.non_blocking_reads += 1;
                }
            } else if blocking {
                stats.blocking_writes += 1;
            } else {
                stats.non_blocking_writes += 1;
            }
            self.frame_mut(id).stats_recorded = true;
        }

        let mut allocating = false;
        if !hit {
            if let Some(transient_way) = transient {
                // A fill for this tag is in flight; wait on its lock and
                // re-run once it lands.
                way = transient_way;
            } else if kind == AccessKind::NcStore && !is_main_memory {
                // Write-through without allocation: nothing to lock on a
                // miss, just charge the array latency.
                let frame = self.frame_mut(id);
                frame.set = set;
                frame.way = 0;
                frame.hit = false;
                frame.state = BlockState::Invalid;
                frame.dir_lock = None;
                let latency = self.module(module).latency;
                self.sched(latency, EventKind::FindAndLockAction, id);
                return;
            } else {
                way = self
                    .module_mut(module)
                    .cache
                    .as_mut()
                    .map(|cache| cache.select_victim(set))
                    .unwrap_or_default();
                allocating = true;
            }
        }

        // A lock kept from a run before a handoff may point at a different
        // way by now.
        if let Some(old) = old_lock {
            if old.set != set || old.way != way {
                self.frame_mut(id).dir_lock = None;
                self.unlock_dir(old);
            }
        }

        let acquired = {
            let m = self.module_mut(module);
            let directory = m
                .directory
                .as_mut()
                .unwrap_or_else(|| panic!("module has no directory"));
            match directory.lock_holder(set, way) {
                None => {
                    let _ = directory.lock(set, way, EventKind::FindAndLockPort, id);
                    m.stats.dir_lock_acquisitions += 1;
                    true
                }
                Some(holder) if holder == id => true,
                Some(_) => {
                    m.stats.dir_lock_contentions += 1;
                    if blocking {
                        let _ = directory.lock(set, way, EventKind::FindAndLockPort, id);
                    }
                    false
                }
            }
        };
        if !acquired {
            if blocking {
                // Queued behind the holder with the port kept; resumed at
                // this event on handoff. The queued coordinates are recorded
                // so the handed lock can be released if the re-run lookup
                // resolves to a different way.
                self.frame_mut(id).dir_lock = Some(DirLockRef { module, set, way });
                trace!(module = %self.module(module).name, set, way, "directory lock contended, waiting");
                return;
            }
            debug!(
                module = %self.module(module).name,
                set,
                way,
                "directory lock contended, bouncing"
            );
            self.frame_mut(id).error = true;
            self.release_port_of(id);
            let parent = self.frame(id).parent;
            if let Some(parent) = parent {
                self.frame_mut(parent).error = true;
            }
            self.pop_frame(id);
            return;
        }

        self.frame_mut(id).dir_lock = Some(DirLockRef { module, set, way });

        if is_main_memory && !hit {
            // The backing store owns every block it serves; materialize the
            // line exclusively. The victim entry must be fully idle, or the
            // directory no longer covers the working set.
            let m = self.module_mut(module);
            let shared = m
                .directory
                .as_ref()
                .is_some_and(|d| d.group_shared_or_owned(set, way));
            assert!(
                !shared,
                "main-memory directory exhausted at {}: increase directory_sets/directory_assoc",
                m.name
            );
            if let Some(cache) = m.cache.as_mut() {
                cache.set_block(set, way, tag, BlockState::Exclusive);
            }
            hit = true;
            state = BlockState::Exclusive;
            allocating = false;
        }

        {
            let cache = self
                .module_mut(module)
                .cache
                .as_mut()
                .unwrap_or_else(|| panic!("module has no cache"));
            if allocating {
                cache.set_transient_tag(set, way, tag);
            }
            // Fills count as uses too: the locked way must leave the victim
            // position or the next allocation in this set picks it again.
            cache.touch(set, way);
        }

        {
            let frame = self.frame_mut(id);
            frame.set = set;
            frame.way = way;
            frame.hit = hit;
            frame.state = state;
        }
        let latency = self.module(module).latency;
        self.sched(latency, EventKind::FindAndLockAction, id);
    }

    pub(crate) fn handle_find_and_lock_action(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        self.release_port_of(id);

        let (hit, set, way, locked, seq_id, kind) = {
            let frame = self.frame(id);
            (
                frame.hit,
                frame.set,
                frame.way,
                frame.dir_lock.is_some(),
                frame.seq_id,
                frame.kind,
            )
        };
        let victim_valid = !hit
            && locked
            && self
                .module(module)
                .cache
                .as_ref()
                .is_some_and(|cache| cache.get_block(set, way).1.is_valid());
        if victim_valid {
            self.frame_mut(id).eviction = true;
            let child = Access {
                seq_id,
                kind,
                module: Some(module),
                src_set: set,
                src_way: way,
                stats_recorded: true,
                parent: Some(id),
                ret_event: Some(EventKind::FindAndLockFinish),
                ..Access::default()
            };
            let _ = self.push_frame(child, EventKind::Evict, 0);
        } else {
            self.sched(0, EventKind::FindAndLockFinish, id);
        }
    }

    pub(crate) fn handle_find_and_lock_finish(&mut self, id: AccessId) {
        let (set, way, mut hit, mut state, dir_lock, parent) = {
            let frame = self.frame(id);
            (
                frame.set,
                frame.way,
                frame.hit,
                frame.state,
                frame.dir_lock,
                frame.parent,
            )
        };
        if self.frame(id).eviction {
            // The victim way is clean and invalid now.
            hit = false;
            state = BlockState::Invalid;
        }
        let parent = parent.unwrap_or_else(|| panic!("find-and-lock has no parent"));
        {
            let p = self.frame_mut(parent);
            p.set = set;
            p.way = way;
            p.hit = hit;
            p.state = state;
            p.dir_lock = dir_lock;
        }
        self.pop_frame(id);
    }
}
