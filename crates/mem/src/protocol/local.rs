//! Local-memory chains: port admission and latency, no coherence.

use crate::access::{AccessId, AccessKind};
use crate::protocol::EventKind;
use crate::System;

impl System {
    pub(crate) fn handle_local_load(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let tag = self.frame(id).tag;
        let seq_id = self.frame(id).seq_id;
        let older_write = self
            .module(module)
            .write_access_list
            .iter()
            .copied()
            .find(|&other| self.frame(other).seq_id < seq_id && self.frame(other).tag == tag);
        if let Some(write) = older_write {
            self.frame_mut(write)
                .followers
                .push((id, EventKind::LocalLoad));
            return;
        }
        if let Some(master) = self.can_coalesce(module, id, AccessKind::Load, self.frame(id).addr)
        {
            self.coalesce(master, id, EventKind::LocalLoadFinish);
            return;
        }
        self.sched(0, EventKind::LocalLoadLock, id);
    }

    pub(crate) fn handle_local_load_lock(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        if self.frame(id).port.is_none()
            && !self.acquire_port(id, module, EventKind::LocalLoadLock)
        {
            return;
        }
        let retry = self.frame(id).retry;
        self.module_mut(module)
            .stats
            .record_attempt(AccessKind::Load, true, retry);
        let latency = self.module(module).latency;
        self.sched(latency, EventKind::LocalLoadFinish, id);
    }

    pub(crate) fn handle_local_load_finish(&mut self, id: AccessId) {
        if self.frame(id).port.is_some() {
            self.release_port_of(id);
        }
        self.finish_access(id);
    }

    pub(crate) fn handle_local_store(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let addr = self.frame(id).addr;
        if let Some(master) = self.can_coalesce(module, id, AccessKind::Store, addr) {
            self.coalesce(master, id, EventKind::LocalStoreFinish);
            return;
        }
        self.sched(0, EventKind::LocalStoreLock, id);
    }

    pub(crate) fn handle_local_store_lock(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        if self.frame(id).port.is_none()
            && !self.acquire_port(id, module, EventKind::LocalStoreLock)
        {
            return;
        }
        let (retry, kind) = {
            let frame = self.frame(id);
            (frame.retry, frame.kind.unwrap_or(AccessKind::Store))
        };
        self.module_mut(module).stats.record_attempt(kind, true, retry);
        let latency = self.module(module).latency;
        self.sched(latency, EventKind::LocalStoreFinish, id);
    }

    pub(crate) fn handle_local_store_finish(&mut self, id: AccessId) {
        let (addr, value) = {
            let frame = self.frame(id);
            (frame.addr, frame.value)
        };
        self.write_word(addr, value);
        if self.frame(id).port.is_some() {
            self.release_port_of(id);
        }
        self.finish_access(id);
    }
}
