//! Invalidation fan-out over a block's sharer bitmap.
//!
//! Runs at the module whose directory lock for the block is already held.
//! One down-up write request goes to every sharer above (except the module
//! being kept), the bitmap is cleared as the requests leave, and the frame
//! waits at the rendez-vous until every acknowledgment is in. Dirty data
//! returned by a sharer upgrades the local copy.

use tracing::debug;

use crate::access::{Access, AccessId, RequestDirection};
use crate::protocol::EventKind;
use crate::System;

impl System {
    pub(crate) fn handle_invalidate(&mut self, id: AccessId) {
        let module = self.frame_module(id);
        let (set, way, tag, seq_id, kind, except) = {
            let frame = self.frame(id);
            (
                frame.set,
                frame.way,
                frame.tag,
                frame.seq_id,
                frame.kind,
                frame.except_module,
            )
        };
        let sub_block_size = self.module(module).sub_block_size;
        let zsize = self
            .module(module)
            .directory
            .as_ref()
            .map_or(0, crate::directory::Directory::zsize);

        let mut requests = Vec::new();
        for z in 0..zsize {
            let sharers: Vec<usize> = self
                .module(module)
                .directory
                .as_ref()
                .map(|d| d.entry(set, way, z).sharers().collect())
                .unwrap_or_default();
            for node in sharers {
                let sharer = self.module(module).high_modules[node];
                if except == Some(sharer) {
                    continue;
                }
                if let Some(directory) = self.module_mut(module).directory.as_mut() {
                    directory.clear_sharer(set, way, z, node);
                }
                let sub_addr = tag + u64::from(z) * sub_block_size;
                // One request per sharer block, sent at its aligned sub-block.
                if sub_addr % self.module(sharer).block_size != 0 {
                    continue;
                }
                requests.push((sharer, sub_addr));
            }
        }

        self.frame_mut(id).pending = 1 + requests.len() as u32;
        if !requests.is_empty() {
            debug!(
                module = %self.module(module).name,
                tag = format_args!("{tag:#x}"),
                count = requests.len(),
                "invalidating sharers"
            );
        }
        for (sharer, sub_addr) in requests {
            let child = Access {
                seq_id,
                kind,
                module: Some(sharer),
                addr: sub_addr,
                request_dir: Some(RequestDirection::DownUp),
                parent: Some(id),
                ret_event: Some(EventKind::InvalidateFinish),
                ..Access::default()
            };
            let _ = self.push_frame(child, EventKind::WriteRequest, 0);
        }
        self.sched(0, EventKind::InvalidateFinish, id);
    }

    pub(crate) fn handle_invalidate_finish(&mut self, id: AccessId) {
        {
            let frame = self.frame_mut(id);
            frame.pending -= 1;
            if frame.pending > 0 {
                return;
            }
        }
        let (writeback, parent) = {
            let frame = self.frame(id);
            (frame.writeback, frame.parent)
        };
        let parent = parent.unwrap_or_else(|| panic!("invalidation has no parent"));
        self.frame_mut(parent).writeback |= writeback;
        self.pop_frame(id);
    }
}
