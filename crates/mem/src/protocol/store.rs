//! Store chain: coalescing, ordering, and exclusive-ownership acquisition.

use tracing::debug;

use crate::access::{Access, AccessId, AccessKind, RequestDirection};
use crate::cache::BlockState;
use crate::protocol::EventKind;
use crate::System;

impl System {
    pub(crate) fn handle_store(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let addr = self.frame(id).addr;
        if let Some(master) = self.can_coalesce(module, id, AccessKind::Store, addr) {
            self.coalesce(master, id, EventKind::StoreFinish);
            return;
        }
        self.sched(0, EventKind::StoreLock, id);
    }

    pub(crate) fn handle_store_lock(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let tag = self.frame(id).tag;

        // Stores order behind every older access to the same block; wait on
        // the youngest one.
        let older = {
            let list = &self.module(module).access_list;
            let position = list.iter().position(|&a| a == id).unwrap_or(list.len());
            list[..position]
                .iter()
                .copied()
                .rev()
                .find(|&other| self.frame(other).tag == tag)
        };
        if let Some(older) = older {
            self.frame_mut(older)
                .followers
                .push((id, EventKind::StoreLock));
            return;
        }

        let (seq_id, kind, addr, retry) = {
            let frame = self.frame(id);
            (frame.seq_id, frame.kind, frame.addr, frame.retry)
        };
        let child = Access {
            seq_id,
            kind,
            module: Some(module),
            addr,
            read: false,
            blocking: false,
            retry,
            parent: Some(id),
            ret_event: Some(EventKind::StoreAction),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::FindAndLock, 0);
    }

    pub(crate) fn handle_store_action(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        if self.frame(id).error {
            self.module_mut(module).stats.record_retry(AccessKind::Store);
            let delay = self.retry_delay(module);
            let frame = self.frame_mut(id);
            frame.error = false;
            frame.retry = true;
            debug!(seq = frame.seq_id, delay, "store bounced, retrying");
            self.sched(delay, EventKind::StoreLock, id);
            return;
        }

        let (hit, state, seq_id, kind, tag) = {
            let frame = self.frame(id);
            (frame.hit, frame.state, frame.seq_id, frame.kind, frame.tag)
        };
        if hit && matches!(state, BlockState::Modified | BlockState::Exclusive) {
            self.sched(0, EventKind::StoreUnlock, id);
            return;
        }

        // Shared, owned, or absent: obtain exclusivity from below.
        let target = self.low_module_for(module, tag);
        let child = Access {
            seq_id,
            kind,
            module: Some(target),
            addr: tag,
            request_dir: Some(RequestDirection::UpDown),
            parent: Some(id),
            ret_event: Some(EventKind::StoreUnlock),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::WriteRequest, 0);
    }

    pub(crate) fn handle_store_unlock(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        if self.frame(id).error {
            if let Some(lock) = self.frame_mut(id).dir_lock.take() {
                self.unlock_dir(lock);
            }
            self.module_mut(module).stats.record_retry(AccessKind::Store);
            let delay = self.retry_delay(module);
            let frame = self.frame_mut(id);
            frame.error = false;
            frame.retry = true;
            self.sched(delay, EventKind::StoreLock, id);
            return;
        }

        let (set, way, tag, addr, value) = {
            let frame = self.frame(id);
            (frame.set, frame.way, frame.tag, frame.addr, frame.value)
        };
        if let Some(cache) = self.module_mut(module).cache.as_mut() {
            cache.set_block(set, way, tag, BlockState::Modified);
        }
        self.write_word(addr, value);
        if let Some(lock) = self.frame_mut(id).dir_lock.take() {
            self.unlock_dir(lock);
        }
        self.sched(0, EventKind::StoreFinish, id);
    }

    pub(crate) fn handle_store_finish(&mut self, id: AccessId) {
        self.finish_access(id);
    }
}
