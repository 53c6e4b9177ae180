//! Write-request chain between two adjacent modules.
//!
//! An up-down write makes the requester the exclusive owner of a block:
//! every other copy above the target is invalidated, exclusivity is obtained
//! from below when the target lacks it, and the directory records the
//! requester as sharer and owner. A down-up write surrenders the target's
//! copy entirely, returning dirty data to the module below.

use tracing::debug;

use crate::access::{Access, AccessId, RequestDirection};
use crate::cache::BlockState;
use crate::protocol::EventKind;
use crate::System;

impl System {
    pub(crate) fn handle_write_request(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        let delay = self.module(target).transfer_cycles(0);
        self.sched(delay, EventKind::WriteRequestReceive, id);
    }

    pub(crate) fn handle_write_request_receive(&mut self, id: AccessId) {
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
            read: false,
            blocking,
            parent: Some(id),
            ret_event: Some(EventKind::WriteRequestAction),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::FindAndLock, 0);
    }

    pub(crate) fn handle_write_request_action(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        if self.frame(id).error {
            self.frame_mut(id).reply_size = 0;
            self.sched(0, EventKind::WriteRequestReply, id);
            return;
        }

        let (hit, set, way, tag, seq_id, kind, direction) = {
            let frame = self.frame(id);
            (
                frame.hit,
                frame.set,
                frame.way,
                frame.tag,
                frame.seq_id,
                frame.kind,
                frame.request_dir,
            )
        };
        if !hit {
            self.sched(0, EventKind::WriteRequestExclusive, id);
            return;
        }

        // Every copy above the target other than the requester's must go.
        let except = if direction == Some(RequestDirection::UpDown) {
            Some(self.requester_of(id))
        } else {
            None
        };
        let child = Access {
            seq_id,
            kind,
            module: Some(target),
            addr: tag,
            tag,
            set,
            way,
            except_module: except,
            parent: Some(id),
            ret_event: Some(EventKind::WriteRequestExclusive),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::Invalidate, 0);
    }

    pub(crate) fn handle_write_request_exclusive(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        let (set, way, writeback, direction) = {
            let frame = self.frame(id);
            (frame.set, frame.way, frame.writeback, frame.request_dir)
        };
        if writeback {
            self.absorb_writeback(target, set, way);
        }
        let next = match direction {
            Some(RequestDirection::UpDown) => EventKind::WriteRequestUpDown,
            Some(RequestDirection::DownUp) => EventKind::WriteRequestDownUp,
            None => panic!("write request without a direction"),
        };
        self.sched(0, next, id);
    }

    pub(crate) fn handle_write_request_updown(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        let (hit, set, way, tag, seq_id, kind) = {
            let frame = self.frame(id);
            (
                frame.hit,
                frame.set,
                frame.way,
                frame.tag,
                frame.seq_id,
                frame.kind,
            )
        };
        let state = self
            .module(target)
            .cache
            .as_ref()
            .map(|cache| cache.get_block(set, way).1)
            .unwrap_or_default();
        if hit && matches!(state, BlockState::Modified | BlockState::Exclusive) {
            self.sched(0, EventKind::WriteRequestUpDownFinish, id);
            return;
        }

        // Shared, owned, or absent here: exclusivity must come from below.
        let below = self.low_module_for(target, tag);
        let child = Access {
            seq_id,
            kind,
            module: Some(below),
            addr: tag,
            request_dir: Some(RequestDirection::UpDown),
            parent: Some(id),
            ret_event: Some(EventKind::WriteRequestUpDownFinish),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::WriteRequest, 0);
    }

    pub(crate) fn handle_write_request_updown_finish(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        if self.frame(id).error {
            if let Some(lock) = self.frame_mut(id).dir_lock.take() {
                self.unlock_dir(lock);
            }
            self.frame_mut(id).reply_size = 0;
            self.sched(0, EventKind::WriteRequestReply, id);
            return;
        }

        let requester = self.requester_of(id);
        let (set, way, tag, addr) = {
            let frame = self.frame(id);
            (frame.set, frame.way, frame.tag, frame.addr)
        };
        let state = self
            .module(target)
            .cache
            .as_ref()
            .map(|cache| cache.get_block(set, way).1)
            .unwrap_or_default();
        // Dirty data stays dirty; anything else becomes exclusive-clean,
        // with the true modified copy living above.
        let new_state = match state {
            BlockState::Modified | BlockState::Owned => BlockState::Modified,
            _ => BlockState::Exclusive,
        };
        if let Some(cache) = self.module_mut(target).cache.as_mut() {
            cache.set_block(set, way, tag, new_state);
        }

        let node = self.node_index(target, requester);
        let sub_block_size = self.module(target).sub_block_size;
        let requester_block = self.module(requester).block_size;
        let z_first = ((addr - tag) / sub_block_size) as u32;
        let z_count = (requester_block / sub_block_size).max(1) as u32;
        if let Some(directory) = self.module_mut(target).directory.as_mut() {
            for z in z_first..z_first + z_count {
                directory.set_sharer(set, way, z, node);
                directory.set_owner(set, way, z, Some(node));
            }
        }
        self.frame_mut(id).reply_size = requester_block;
        debug!(
            target = %self.module(target).name,
            requester = %self.module(requester).name,
            tag = format_args!("{tag:#x}"),
            "write request served up-down"
        );
        self.sched(0, EventKind::WriteRequestReply, id);
    }

    pub(crate) fn handle_write_request_downup(&mut self, id: AccessId) {
        let target = self.frame_module(id);
        let (set, way, state, writeback) = {
            let frame = self.frame(id);
            (frame.set, frame.way, frame.state, frame.writeback)
        };
        let dirty = state.is_dirty() || writeback;
        let block_size = self.module(target).block_size;
        let zsize = self
            .module(target)
            .directory
            .as_ref()
            .map_or(0, crate::directory::Directory::zsize);
        if let Some(directory) = self.module_mut(target).directory.as_mut() {
            for z in 0..zsize {
                directory.clear_all_sharers(set, way, z);
                directory.set_owner(set, way, z, None);
            }
        }
        if let Some(cache) = self.module_mut(target).cache.as_mut() {
            cache.set_block(set, way, 0, BlockState::Invalid);
        }
        {
            let frame = self.frame_mut(id);
            frame.writeback = dirty;
            frame.reply_size = if dirty { block_size } else { 0 };
        }
        self.sched(0, EventKind::WriteRequestReply, id);
    }

    pub(crate) fn handle_write_request_reply(&mut self, id: AccessId) {
        if let Some(lock) = self.frame_mut(id).dir_lock.take() {
            self.unlock_dir(lock);
        }
        let requester = self.requester_of(id);
        let (error, reply_size) = {
            let frame = self.frame(id);
            (frame.error, frame.reply_size)
        };
        let payload = if error { 0 } else { reply_size };
        let delay = self.module(requester).transfer_cycles(payload);
        self.sched(delay, EventKind::WriteRequestFinish, id);
    }

    pub(crate) fn handle_write_request_finish(&mut self, id: AccessId) {
        let parent = self
            .frame(id)
            .parent
            .unwrap_or_else(|| panic!("write request has no parent"));
        let (error, writeback) = {
            let frame = self.frame(id);
            (frame.error, frame.writeback)
        };
        {
            let p = self.frame_mut(parent);
            p.error |= error;
            p.writeback |= writeback;
        }
        self.pop_frame(id);
    }
}
