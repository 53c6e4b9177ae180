//! NMOESI protocol engine.
//!
//! Each memory operation runs as a chain of scheduler events over one
//! [`Access`](crate::access::Access) frame. Chains nest by pushing child
//! frames: a load miss pushes a find-and-lock chain and a read-request
//! chain, an allocation pushes an eviction chain, a write pushes an
//! invalidation fan-out. Every handler is a method on
//! [`System`](crate::System); [`System::dispatch`] routes a popped event to
//! its handler.
//!
//! The chains follow a strict locking discipline: a frame acquires the
//! directory lock of the `(set, way)` it operates on through find-and-lock,
//! holds it across every state transition of that block, and releases it
//! exactly once on its unlock step. Lock waiters resume FIFO.

mod evict;
mod find_and_lock;
mod invalidate;
mod load;
mod local;
mod nc_store;
mod read_request;
mod store;
mod write_request;

use crate::access::AccessId;
use crate::System;

/// Protocol steps dispatched by the event scheduler.
///
/// Variant order groups the chains; the scheduler attaches no meaning to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Load entry: ordering and coalescing checks.
    Load,
    /// Load acquires its directory lock.
    LoadLock,
    /// Load inspects the lookup result.
    LoadAction,
    /// Load installs a block fetched from below.
    LoadMiss,
    /// Load releases its directory lock.
    LoadUnlock,
    /// Load completes and wakes followers.
    LoadFinish,

    /// Store entry: coalescing check.
    Store,
    /// Store orders behind older accesses and acquires its lock.
    StoreLock,
    /// Store inspects the lookup result.
    StoreAction,
    /// Store commits the write and releases its lock.
    StoreUnlock,
    /// Store completes and wakes followers.
    StoreFinish,

    /// Non-coherent store entry.
    NcStore,
    /// Non-coherent store orders behind older accesses and acquires its lock.
    NcStoreLock,
    /// Non-coherent store commits locally and forwards downward.
    NcStoreAction,
    /// Non-coherent store releases its lock.
    NcStoreUnlock,
    /// Non-coherent store completes.
    NcStoreFinish,

    /// Find-and-lock entry: port admission.
    FindAndLock,
    /// Find-and-lock holds a port: lookup, victim choice, lock attempt.
    FindAndLockPort,
    /// Find-and-lock charges the array latency and starts any eviction.
    FindAndLockAction,
    /// Find-and-lock returns its results to the parent frame.
    FindAndLockFinish,

    /// Eviction entry at the evicting module.
    Evict,
    /// Eviction invalidates copies above the victim.
    EvictInvalid,
    /// Eviction clears the victim and sends it below.
    EvictAction,
    /// Eviction arrives at the lower module.
    EvictReceive,
    /// Lower module applies the writeback and drops the evictor's sharing.
    EvictProcess,
    /// Lower module acknowledges the eviction.
    EvictReply,
    /// Acknowledgment arrives back at the evicting module.
    EvictReplyReceive,
    /// Eviction returns to the parent frame.
    EvictFinish,

    /// Read request entry at the requester.
    ReadRequest,
    /// Read request arrives at the target module.
    ReadRequestReceive,
    /// Read request inspects the target lookup result.
    ReadRequestAction,
    /// Up-down read: recall owned sub-blocks or fetch from below.
    ReadRequestUpDown,
    /// Up-down read installs a block fetched from below the target.
    ReadRequestUpDownMiss,
    /// Up-down read rendez-vous: directory update and reply sizing.
    ReadRequestUpDownFinish,
    /// Down-up read: recall from above, then degrade to shared.
    ReadRequestDownUp,
    /// Down-up read rendez-vous: state change and reply sizing.
    ReadRequestDownUpFinish,
    /// Read reply leaves the target.
    ReadRequestReply,
    /// Read reply arrives at the requester and returns to the parent.
    ReadRequestFinish,

    /// Write request entry at the requester.
    WriteRequest,
    /// Write request arrives at the target module.
    WriteRequestReceive,
    /// Write request inspects the target lookup result.
    WriteRequestAction,
    /// Write request resumes after the invalidation fan-out.
    WriteRequestExclusive,
    /// Up-down write: obtain exclusivity from below if needed.
    WriteRequestUpDown,
    /// Up-down write rendez-vous: directory update and reply sizing.
    WriteRequestUpDownFinish,
    /// Down-up write: surrender and invalidate the local copy.
    WriteRequestDownUp,
    /// Write reply leaves the target.
    WriteRequestReply,
    /// Write reply arrives at the requester and returns to the parent.
    WriteRequestFinish,

    /// Invalidation fan-out over the sharer bitmap.
    Invalidate,
    /// Invalidation rendez-vous once every sharer acknowledged.
    InvalidateFinish,

    /// Local-memory load entry.
    LocalLoad,
    /// Local-memory load holds a port and charges the latency.
    LocalLoadLock,
    /// Local-memory load completes.
    LocalLoadFinish,
    /// Local-memory store entry.
    LocalStore,
    /// Local-memory store holds a port and charges the latency.
    LocalStoreLock,
    /// Local-memory store completes.
    LocalStoreFinish,
}

impl System {
    /// Routes a popped event to its handler. Stale events are filtered by
    /// the caller; `access` is live here.
    pub(crate) fn dispatch(&mut self, kind: EventKind, access: AccessId) {
        match kind {
            EventKind::Load => self.handle_load(access),
            EventKind::LoadLock => self.handle_load_lock(access),
            EventKind::LoadAction => self.handle_load_action(access),
            EventKind::LoadMiss => self.handle_load_miss(access),
            EventKind::LoadUnlock => self.handle_load_unlock(access),
            EventKind::LoadFinish => self.handle_load_finish(access),

            EventKind::Store => self.handle_store(access),
            EventKind::StoreLock => self.handle_store_lock(access),
            EventKind::StoreAction => self.handle_store_action(access),
            EventKind::StoreUnlock => self.handle_store_unlock(access),
            EventKind::StoreFinish => self.handle_store_finish(access),

            EventKind::NcStore => self.handle_nc_store(access),
            EventKind::NcStoreLock => self.handle_nc_store_lock(access),
            EventKind::NcStoreAction => self.handle_nc_store_action(access),
            EventKind::NcStoreUnlock => self.handle_nc_store_unlock(access),
            EventKind::NcStoreFinish => self.handle_nc_store_finish(access),

            EventKind::FindAndLock => self.handle_find_and_lock(access),
            EventKind::FindAndLockPort => self.handle_find_and_lock_port(access),
            EventKind::FindAndLockAction => self.handle_find_and_lock_action(access),
            EventKind::FindAndLockFinish => self.handle_find_and_lock_finish(access),

            EventKind::Evict => self.handle_evict(access),
            EventKind::EvictInvalid => self.handle_evict_invalid(access),
            EventKind::EvictAction => self.handle_evict_action(access),
            EventKind::EvictReceive => self.handle_evict_receive(access),
            EventKind::EvictProcess => self.handle_evict_process(access),
            EventKind::EvictReply => self.handle_evict_reply(access),
            EventKind::EvictReplyReceive => self.handle_evict_reply_receive(access),
            EventKind::EvictFinish => self.handle_evict_finish(access),

            EventKind::ReadRequest => self.handle_read_request(access),
            EventKind::ReadRequestReceive => self.handle_read_request_receive(access),
            EventKind::ReadRequestAction => self.handle_read_request_action(access),
            EventKind::ReadRequestUpDown => self.handle_read_request_updown(access),
            EventKind::ReadRequestUpDownMiss => self.handle_read_request_updown_miss(access),
            EventKind::ReadRequestUpDownFinish => self.handle_read_request_updown_finish(access),
            EventKind::ReadRequestDownUp => self.handle_read_request_downup(access),
            EventKind::ReadRequestDownUpFinish => self.handle_read_request_downup_finish(access),
            EventKind::ReadRequestReply => self.handle_read_request_reply(access),
            EventKind::ReadRequestFinish => self.handle_read_request_finish(access),

            EventKind::WriteRequest => self.handle_write_request(access),
            EventKind::WriteRequestReceive => self.handle_write_request_receive(access),
            EventKind::WriteRequestAction => self.handle_write_request_action(access),
            EventKind::WriteRequestExclusive => self.handle_write_request_exclusive(access),
            EventKind::WriteRequestUpDown => self.handle_write_request_updown(access),
            EventKind::WriteRequestUpDownFinish => self.handle_write_request_updown_finish(access),
            EventKind::WriteRequestDownUp => self.handle_write_request_downup(access),
            EventKind::WriteRequestReply => self.handle_write_request_reply(access),
            EventKind::WriteRequestFinish => self.handle_write_request_finish(access),

            EventKind::Invalidate => self.handle_invalidate(access),
            EventKind::InvalidateFinish => self.handle_invalidate_finish(access),

            EventKind::LocalLoad => self.handle_local_load(access),
            EventKind::LocalLoadLock => self.handle_local_load_lock(access),
            EventKind::LocalLoadFinish => self.handle_local_load_finish(access),
            EventKind::LocalStore => self.handle_local_store(access),
            EventKind::LocalStoreLock => self.handle_local_store_lock(access),
            EventKind::LocalStoreFinish => self.handle_local_store_finish(access),
        }
    }
}
