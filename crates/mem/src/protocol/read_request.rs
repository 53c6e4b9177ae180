//! Read-request chain between two adjacent modules.
//!
//! Up-down requests fetch a block into the level above the target, recalling
//! owned sub-blocks from sibling caches first; down-up requests recall data
//! from a module above the target and degrade its copy to shared. Either way
//! the target holds the block's directory lock for the whole exchange and
//! releases it when the reply leaves.

use tracing::debug;

use crate::access::{Access, AccessId, RequestDirection};
use crate::cache::BlockState;
use crate::protocol::EventKind;
use crate::System;

impl System {
    pub(crate) fn handle_read_request(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        let delay = self.module(target).transfer_cycles(0);
        self.sched(delay, EventKind::ReadRequestReceive, id);
    }

    pub(crate) fn handle_read_request_receive(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        let (seq_id, kind, addr, direction) = {
            let frame = self.frame(id);
            (frame.seq_id, frame.kind, frame.addr, frame.request_dir)
        };
        let tag = self.module(target).tag_of(addr);
        self.frame_mut(id).tag = tag;
        let blocking = direction == Some(RequestDirection::DownUp);
        let child = Access {
            seq_id,
            kind,
            module: Some(target),
            addr,
            read: true,
            blocking,
            parent: Some(id),
            ret_event: Some(EventKind::ReadRequestAction),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::FindAndLock, 0);
    }

    pub(crate) fn handle_read_request_action(&mut self, id: AccessId) {
        if self.frame(id).error {
            self.frame_mut(id).reply_size = 0;
            self.sched(0, EventKind::ReadRequestReply, id);
            return;
        }
        let next = match self.frame(id).request_dir {
            Some(RequestDirection::UpDown) => EventKind::ReadRequestUpDown,
            Some(RequestDirection::DownUp) => EventKind::ReadRequestDownUp,
            None => panic!("read request without a direction"),
        };
        self.sched(0, next, id);
    }

    pub(crate) fn handle_read_request_updown(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        if self.frame(id).hit {
            let requester = self.requester_of(id);
            let recalls = self.recall_owners(id, target, Some(requester));
            {
                let frame = self.frame_mut(id);
                frame.pending = 1 + recalls;
                frame.recalled = recalls > 0;
            }
            self.sched(0, EventKind::ReadRequestUpDownFinish, id);
            return;
        }

        let (seq_id, kind, tag) = {
            let frame = self.frame(id);
            (frame.seq_id, frame.kind, frame.tag)
        };
        let below = self.low_module_for(target, tag);
        let child = Access {
            seq_id,
            kind,
            module: Some(below),
            addr: tag,
            request_dir: Some(RequestDirection::UpDown),
            parent: Some(id),
            ret_event: Some(EventKind::ReadRequestUpDownMiss),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::ReadRequest, 0);
    }

    pub(crate) fn handle_read_request_updown_miss(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        if self.frame(id).error {
            if let Some(lock) = self.frame_mut(id).dir_lock.take() {
                self.unlock_dir(lock);
            }
            self.frame_mut(id).reply_size = 0;
            self.sched(0, EventKind::ReadRequestReply, id);
            return;
        }

        let (set, way, tag, shared) = {
            let frame = self.frame(id);
            (frame.set, frame.way, frame.tag, frame.shared)
        };
        let state = if shared {
            BlockState::Shared
        } else {
            BlockState::Exclusive
        };
        if let Some(cache) = self.module_mut(target).cache.as_mut() {
            cache.set_block(set, way, tag, state);
        }
        self.frame_mut(id).pending = 1;
        self.sched(0, EventKind::ReadRequestUpDownFinish, id);
    }

    pub(crate) fn handle_read_request_updown_finish(&mut self, id: AccessId) {
        {
            let frame = self.frame_mut(id);
            frame.pending -= 1;
            if frame.pending > 0 {
                return;
            }
        }
        let target = self.frame_module(id);
        let requester = self.requester_of(id);
        let (set, way, tag, addr, writeback) = {
            let frame = self.frame(id);
            (frame.set, frame.way, frame.tag, frame.addr, frame.writeback)
        };

        if writeback {
            self.absorb_writeback(target, set, way);
        }

        let state = self
            .module(target)
            .cache
            .as_ref()
            .map(|cache| cache.get_block(set, way).1)
            .unwrap_or_default();
        let node = self.node_index(target, requester);
        let zsize = self
            .module(target)
            .directory
            .as_ref()
            .map_or(0, crate::directory::Directory::zsize);

        // Another cache keeps a copy when the block is shared or owned here,
        // or when any sub-block lists a sharer other than the requester.
        let mut shared = matches!(state, BlockState::Shared | BlockState::Owned);
        if let Some(directory) = self.module(target).directory.as_ref() {
            for z in 0..zsize {
                let entry = directory.entry(set, way, z);
                if entry.sharers().any(|n| n != node) {
                    shared = true;
                }
            }
        }

        let sub_block_size = self.module(target).sub_block_size;
        let requester_block = self.module(requester).block_size;
        let z_first = ((addr - tag) / sub_block_size) as u32;
        let z_count = (requester_block / sub_block_size).max(1) as u32;
        if let Some(directory) = self.module_mut(target).directory.as_mut() {
            // Recalled owners degraded to plain sharers.
            for z in 0..zsize {
                if directory.entry(set, way, z).owner().is_some_and(|o| o != node) {
                    directory.set_owner(set, way, z, None);
                }
            }
            for z in z_first..z_first + z_count {
                directory.set_sharer(set, way, z, node);
                if !shared {
                    directory.set_owner(set, way, z, Some(node));
                }
            }
        }

        {
            let frame = self.frame_mut(id);
            frame.shared = shared;
            frame.reply_size = requester_block;
        }
        debug!(
            target = %self.module(target).name,
            requester = %self.module(requester).name,
            tag = format_args!("{tag:#x}"),
            shared,
            "read request served up-down"
        );
        self.sched(0, EventKind::ReadRequestReply, id);
    }

    pub(crate) fn handle_read_request_downup(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        assert!(
            self.frame(id).hit,
            "down-up read request missed at {}",
            self.module(target).name
        );
        let recalls = self.recall_owners(id, target, None);
        self.frame_mut(id).pending = 1 + recalls;
        self.sched(0, EventKind::ReadRequestDownUpFinish, id);
    }

    pub(crate) fn handle_read_request_downup_finish(&mut self, id: AccessId) {
        {
            let frame = self.frame_mut(id);
            frame.pending -= 1;
            if frame.pending > 0 {
                return;
            }
        }
        let target = self.frame_module(id);
        let (set, way, tag, writeback) = {
            let frame = self.frame(id);
            (frame.set, frame.way, frame.tag, frame.writeback)
        };
        if writeback {
            self.absorb_writeback(target, set, way);
        }

        let state = self
            .module(target)
            .cache
            .as_ref()
            .map(|cache| cache.get_block(set, way).1)
            .unwrap_or_default();
        let dirty = state.is_dirty();
        let block_size = self.module(target).block_size;
        if let Some(cache) = self.module_mut(target).cache.as_mut() {
            cache.set_block(set, way, tag, BlockState::Shared);
        }
        let zsize = self
            .module(target)
            .directory
            .as_ref()
            .map_or(0, crate::directory::Directory::zsize);
        if let Some(directory) = self.module_mut(target).directory.as_mut() {
            for z in 0..zsize {
                directory.set_owner(set, way, z, None);
            }
        }
        {
            let frame = self.frame_mut(id);
            frame.writeback = dirty;
            frame.reply_size = if dirty { block_size } else { 0 };
        }
        self.sched(0, EventKind::ReadRequestReply, id);
    }

    pub(crate) fn handle_read_request_reply(&mut self, id: AccessId) {
        if let Some(lock) = self.frame_mut(id).dir_lock.take() {
            self.unlock_dir(lock);
        }
        let requester = self.requester_of(id);
        let (error, recalled, reply_size) = {
            let frame = self.frame(id);
            (frame.error, frame.recalled, frame.reply_size)
        };
        // With peer transfers the recalled data goes straight from the
        // sibling to the requester; only the header crosses this link.
        let payload = if error || (recalled && self.peer_transfers()) {
            0
        } else {
            reply_size
        };
        let delay = self.module(requester).transfer_cycles(payload);
        self.sched(delay, EventKind::ReadRequestFinish, id);
    }

    pub(crate) fn handle_read_request_finish(&mut self, id: AccessId) {
        let parent = self
            .frame(id)
            .parent
            .unwrap_or_else(|| panic!("read request has no parent"));
        let (error, shared, writeback) = {
            let frame = self.frame(id);
            (frame.error, frame.shared, frame.writeback)
        };
        {
            let p = self.frame_mut(parent);
            p.error |= error;
            p.shared = shared;
            p.writeback |= writeback;
        }
        self.pop_frame(id);
    }

    /// Requester of a request frame: the module its parent runs in.
    pub(crate) fn requester_of(&self, id: AccessId) -> crate::module::ModuleId {
        let parent = self
            .frame(id)
            .parent
            .unwrap_or_else(|| panic!("request frame has no parent"));
        self.frame_module(parent)
    }

    /// Sends a down-up read to every sub-block owner above `target` except
    /// `keep`, returning the number of recalls issued. Each recall resumes
    /// the frame's current rendez-vous event.
    pub(crate) fn recall_owners(
        &mut self,
        id: AccessId,
        target: crate::module::ModuleId,
        keep: Option<crate::module::ModuleId>,
    ) -> u32 {
        let (set, way, tag, seq_id, kind) = {
            let frame = self.frame(id);
            (frame.set, frame.way, frame.tag, frame.seq_id, frame.kind)
        };
        let sub_block_size = self.module(target).sub_block_size;
        let zsize = self
            .module(target)
            .directory
            .as_ref()
            .map_or(0, crate::directory::Directory::zsize);

        let mut recalls = Vec::new();
        if let Some(directory) = self.module(target).directory.as_ref() {
            for z in 0..zsize {
                let Some(node) = directory.entry(set, way, z).owner() else {
                    continue;
                };
                let owner = self.module(target).high_modules[node];
                if keep == Some(owner) {
                    continue;
                }
                let sub_addr = tag + u64::from(z) * sub_block_size;
                // One recall per owner block, sent at its aligned sub-block.
                if sub_addr % self.module(owner).block_size != 0 {
                    continue;
                }
                recalls.push((owner, sub_addr));
            }
        }

        let count = recalls.len() as u32;
        let ret_event = EventKind::ReadRequestUpDownFinish;
        let ret_event = if self.frame(id).request_dir == Some(RequestDirection::DownUp) {
            EventKind::ReadRequestDownUpFinish
        } else {
            ret_event
        };
        for (owner, sub_addr) in recalls {
            let child = Access {
                seq_id,
                kind,
                module: Some(owner),
                addr: sub_addr,
                request_dir: Some(RequestDirection::DownUp),
                parent: Some(id),
                ret_event: Some(ret_event),
                ..Access::default()
            };
            let _ = self.push_frame(child, EventKind::ReadRequest, 0);
        }
        count
    }

    /// Applies dirty data written back from above: an exclusive block turns
    /// modified, a shared one owned.
    pub(crate) fn absorb_writeback(
        &mut self,
        module: crate::module::ModuleId,
        set: u32,
        way: u32,
    ) {
        let (tag, state) = self
            .module(module)
            .cache
            .as_ref()
            .map(|cache| cache.get_block(set, way))
            .unwrap_or_default();
        let upgraded = match state {
            BlockState::Exclusive => BlockState::Modified,
            BlockState::Shared => BlockState::Owned,
            other => other,
        };
        if upgraded != state {
            if let Some(cache) = self.module_mut(module).cache.as_mut() {
                cache.set_block(set, way, tag, upgraded);
            }
        }
    }
}
