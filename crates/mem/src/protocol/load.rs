//! Load chain: ordering, coalescing, lookup, and miss service.

use tracing::debug;

use crate::access::{Access, AccessId, AccessKind, RequestDirection};
use crate::cache::BlockState;
use crate::protocol::EventKind;
use crate::System;

impl System {
    pub(crate) fn handle_load(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let tag = self.frame(id).tag;

        // Loads order behind older in-flight writes to the same block.
        let seq_id = self.frame(id).seq_id;
        let older_write = self
            .module(module)
            .write_access_list
            .iter()
            .copied()
            .find(|&other| self.frame(other).seq_id < seq_id && self.frame(other).tag == tag);
        if let Some(write) = older_write {
            self.frame_mut(write).followers.push((id, EventKind::Load));
            return;
        }

        if let Some(master) = self.can_coalesce(module, id, AccessKind::Load, self.frame(id).addr)
        {
            self.coalesce(master, id, EventKind::LoadFinish);
            return;
        }

        self.sched(0, EventKind::LoadLock, id);
    }

    pub(crate) fn handle_load_lock(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let (seq_id, kind, addr, retry) = {
            let frame = self.frame(id);
            (frame.seq_id, frame.kind, frame.addr, frame.retry)
        };
        let child = Access {
            seq_id,
            kind,
            module: Some(module),
            addr,
            read: true,
            blocking: false,
            retry,
            parent: Some(id),
            ret_event: Some(EventKind::LoadAction),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::FindAndLock, 0);
    }

    pub(crate) fn handle_load_action(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        if self.frame(id).error {
            self.module_mut(module).stats.record_retry(AccessKind::Load);
            let delay = self.retry_delay(module);
            let frame = self.frame_mut(id);
            frame.error = false;
            frame.retry = true;
            debug!(seq = frame.seq_id, delay, "load bounced, retrying");
            self.sched(delay, EventKind::LoadLock, id);
            return;
        }
        if self.frame(id).hit {
            self.sched(0, EventKind::LoadUnlock, id);
            return;
        }

        let (seq_id, kind, tag) = {
            let frame = self.frame(id);
            (frame.seq_id, frame.kind, frame.tag)
        };
        let target = self.low_module_for(module, tag);
        let child = Access {
            seq_id,
            kind,
            module: Some(target),
            addr: tag,
            request_dir: Some(RequestDirection::UpDown),
            parent: Some(id),
            ret_event: Some(EventKind::LoadMiss),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::ReadRequest, 0);
    }

    pub(crate) fn handle_load_miss(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        if self.frame(id).error {
            if let Some(lock) = self.frame_mut(id).dir_lock.take() {
                self.unlock_dir(lock);
            }
            self.module_mut(module).stats.record_retry(AccessKind::Load);
            let delay = self.retry_delay(module);
            let frame = self.frame_mut(id);
            frame.error = false;
            frame.retry = true;
            self.sched(delay, EventKind::LoadLock, id);
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
        if let Some(cache) = self.module_mut(module).cache.as_mut() {
            cache.set_block(set, way, tag, state);
        }
        self.sched(0, EventKind::LoadUnlock, id);
    }

    pub(crate) fn handle_load_unlock(&mut self, id: AccessId) {
        if let Some(lock) = self.frame_mut(id).dir_lock.take() {
            self.unlock_dir(lock);
        }
        self.sched(0, EventKind::LoadFinish, id);
    }

    pub(crate) fn handle_load_finish(&mut self, id: AccessId) {
        self.finish_access(id);
    }
}
