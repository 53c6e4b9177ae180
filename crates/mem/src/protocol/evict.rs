//! Eviction chain: victim invalidation above, writeback below.
//!
//! Runs with the victim's directory lock already held by the parent
//! find-and-lock. Copies above the victim are invalidated first (collecting
//! any dirty data), then the victim leaves the evicting module and the level
//! below absorbs the writeback, drops the evictor from its sharer bitmap,
//! and acknowledges.

use tracing::debug;

use crate::access::{Access, AccessId};
use crate::cache::BlockState;
use crate::protocol::EventKind;
use crate::System;

impl System {
    pub(crate) fn handle_evict(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let (src_set, src_way) = {
            let frame = self.frame(id);
            (frame.src_set, frame.src_way)
        };
        let (tag, state) = self
            .module(module)
            .cache
            .as_ref()
            .map(|cache| cache.get_block(src_set, src_way))
            .unwrap_or_default();
        {
            let frame = self.frame_mut(id);
            frame.src_tag = tag;
            frame.state = state;
        }
        debug!(
            module = %self.module(module).name,
            tag = format_args!("{tag:#x}"),
            %state,
            "evicting block"
        );
        self.sched(0, EventKind::EvictInvalid, id);
    }

    pub(crate) fn handle_evict_invalid(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let (seq_id, kind, src_tag, src_set, src_way) = {
            let frame = self.frame(id);
            (
                frame.seq_id,
                frame.kind,
                frame.src_tag,
                frame.src_set,
                frame.src_way,
            )
        };
        let child = Access {
            seq_id,
            kind,
            module: Some(module),
            addr: src_tag,
            tag: src_tag,
            set: src_set,
            way: src_way,
            parent: Some(id),
            ret_event: Some(EventKind::EvictAction),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::Invalidate, 0);
    }

    pub(crate) fn handle_evict_action(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let (src_set, src_way, src_tag) = {
            let frame = self.frame(id);
            (frame.src_set, frame.src_way, frame.src_tag)
        };

        // Recalled dirty data from above may have upgraded the victim.
        let state = self
            .module(module)
            .cache
            .as_ref()
            .map(|cache| cache.get_block(src_set, src_way).1)
            .unwrap_or_default();
        // Dirty either in place or via data recalled from above.
        let writeback = state.is_dirty() || self.frame(id).writeback;
        let block_size = self.module(module).block_size;
        {
            let frame = self.frame_mut(id);
            frame.writeback = writeback;
            frame.reply_size = if writeback { block_size } else { 0 };
        }
        if let Some(cache) = self.module_mut(module).cache.as_mut() {
            cache.set_block(src_set, src_way, 0, BlockState::Invalid);
        }
        self.module_mut(module).stats.evictions += 1;

        let target = self.low_module_for(module, src_tag);
        self.frame_mut(id).target_module = Some(target);
        let payload = self.frame(id).reply_size;
        let delay = self.module(target).transfer_cycles(payload);
        self.sched(delay, EventKind::EvictReceive, id);
    }

    pub(crate) fn handle_evict_receive(&mut self, id: AccessId) {
        let (seq_id, kind, src_tag, target) = {
            let frame = self.frame(id);
            (
                frame.seq_id,
                frame.kind,
                frame.src_tag,
                frame
                    .target_module
                    .unwrap_or_else(|| panic!("eviction has no target")),
            )
        };
        let child = Access {
            seq_id,
            kind,
            module: Some(target),
            addr: src_tag,
            read: false,
            blocking: true,
            stats_recorded: true,
            parent: Some(id),
            ret_event: Some(EventKind::EvictProcess),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::FindAndLock, 0);
    }

    pub(crate) fn handle_evict_process(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let (target, set, way, state, writeback) = {
            let frame = self.frame(id);
            (
                frame
                    .target_module
                    .unwrap_or_else(|| panic!("eviction has no target")),
                frame.set,
                frame.way,
                frame.state,
                frame.writeback,
            )
        };

        if writeback {
            let upgraded = match state {
                BlockState::Exclusive => BlockState::Modified,
                BlockState::Shared => BlockState::Owned,
                other => other,
            };
            let tag = self
                .module(target)
                .cache
                .as_ref()
                .map(|cache| cache.get_block(set, way).0)
                .unwrap_or_default();
            if let Some(cache) = self.module_mut(target).cache.as_mut() {
                cache.set_block(set, way, tag, upgraded);
            }
        }

        // The evictor no longer holds the block.
        let node = self.node_index(target, module);
        let zsize = self
            .module(target)
            .directory
            .as_ref()
            .map_or(0, crate::directory::Directory::zsize);
        if let Some(directory) = self.module_mut(target).directory.as_mut() {
            for z in 0..zsize {
                directory.clear_sharer(set, way, z, node);
            }
        }
        self.sched(0, EventKind::EvictReply, id);
    }

    pub(crate) fn handle_evict_reply(&mut self, id: AccessId) {
        if let Some(lock) = self.frame_mut(id).dir_lock.take() {
            self.unlock_dir(lock);
        }
        let module = self.frame_module(id);
        let delay = self.module(module).transfer_cycles(0);
        self.sched(delay, EventKind::EvictReplyReceive, id);
    }

    pub(crate) fn handle_evict_reply_receive(&mut self, id: AccessId) {
        self.sched(0, EventKind::EvictFinish, id);
    }

    pub(crate) fn handle_evict_finish(&mut self, id: AccessId) {
        self.pop_frame(id);
    }
}
