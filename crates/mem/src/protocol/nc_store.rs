//! Non-coherent store chain: write-through without sharer bookkeeping.
//!
//! The write updates the functional image and any resident copy at each
//! level, then forwards one level down until it reaches the backing store.
//! Misses neither allocate nor disturb the directory, and non-coherent
//! stores never coalesce with other traffic.

use tracing::debug;

use crate::access::{Access, AccessId, AccessKind};
use crate::config::ModuleKind;
use crate::protocol::EventKind;
use crate::System;

impl System {
    pub(crate) fn handle_nc_store(&mut self, id: AccessId) {
        self.sched(0, EventKind::NcStoreLock, id);
    }

    pub(crate) fn handle_nc_store_lock(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let tag = self.frame(id).tag;

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
                .push((id, EventKind::NcStoreLock));
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
            ret_event: Some(EventKind::NcStoreAction),
            ..Access::default()
        };
        let _ = self.push_frame(child, EventKind::FindAndLock, 0);
    }

    pub(crate) fn handle_nc_store_action(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        if self.frame(id).error {
            self.module_mut(module)
                .stats
                .record_retry(AccessKind::NcStore);
            let delay = self.retry_delay(module);
            let frame = self.frame_mut(id);
            frame.error = false;
            frame.retry = true;
            debug!(seq = frame.seq_id, delay, "nc-store bounced, retrying");
            self.sched(delay, EventKind::NcStoreLock, id);
            return;
        }

        let (seq_id, kind, addr, value) = {
            let frame = self.frame(id);
            (frame.seq_id, frame.kind, frame.addr, frame.value)
        };
        self.write_word(addr, value);

        if self.module(module).kind == ModuleKind::MainMemory {
            self.sched(0, EventKind::NcStoreUnlock, id);
            return;
        }

        // Forward the word one level down; the chain bottoms out at the
        // backing store.
        let target = self.low_module_for(module, addr);
        let delay = self.module(target).transfer_cycles(8);
        let child = Access {
            seq_id,
            kind,
            module: Some(target),
            addr,
            value,
            parent: Some(id),
            ret_event: Some(EventKind::NcStoreUnlock),
            ..Access::default()
        };
        let child_id = self.push_frame(child, EventKind::NcStore, delay);
        let child_tag = self.module(target).tag_of(addr);
        self.frame_mut(child_id).tag = child_tag;
    }

    pub(crate) fn handle_nc_store_unlock(&mut self, id: AccessId) {
        if let Some(lock) = self.frame_mut(id).dir_lock.take() {
            self.unlock_dir(lock);
        }
        self.sched(0, EventKind::NcStoreFinish, id);
    }

    pub(crate) fn handle_nc_store_finish(&mut self, id: AccessId) {
        if self.frame(id).parent.is_some() {
            self.pop_frame(id);
        } else {
            self.finish_access(id);
        }
    }
}
