//! The double-buffered per-map-output (MOF) staging area.
//!
//! Each MOF owns exactly two RDMA-registered buffers. While the reduce side
//! merges records out of one, the fetch client can be filling the other —
//! this double buffering lets fetch and merge overlap per MOF. State
//! transitions are guarded by the MOF's own mutex/condvar pair, independent
//! of any other MOF's lock, so many MOFs can make progress concurrently.
//!
//! This crate collapses the brief `FETCH_READY` window into an atomic
//! decode-on-completion step (see `complete_fetch`): because the fetch
//! client this crate ships is synchronous, there is never an observable
//! moment where a buffer sits `FETCH_READY` waiting for a decompressor to
//! get around to it. The state is kept in `BufferStatus` for API fidelity
//! and so a future asynchronous fetch client can reintroduce the window
//! without changing this type's public shape.

use std::sync::{Condvar, Mutex};

use crate::decompressor::Registry;
use crate::error::Result;
use crate::pool::{BufferDescriptor, BufferPool, BufferStatus};

#[derive(Debug, Clone)]
pub struct MofOrigin {
    pub job_id: String,
    pub map_id: String,
    pub reduce_id: String,
    pub host: String,
    pub mof_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSlot {
    First,
    Second,
}

impl BufferSlot {
    fn idx(self) -> usize {
        match self {
            BufferSlot::First => 0,
            BufferSlot::Second => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            BufferSlot::First => BufferSlot::Second,
            BufferSlot::Second => BufferSlot::First,
        }
    }

    fn both() -> [BufferSlot; 2] {
        [BufferSlot::First, BufferSlot::Second]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSignal {
    /// The first completion for this MOF: the manager publishes the MOF
    /// into `fetched_mops` on this signal.
    First,
    /// A refetch completion: only the MOF's own waiters are woken.
    Repeat,
}

struct Inner {
    status: [BufferStatus; 2],
    descriptors: [Option<BufferDescriptor>; 2],
    fetched_len: u64,
    total_len: u64,
    fetch_count: u32,
}

impl Inner {
    fn is_fully_fetched(&self) -> bool {
        self.fetched_len >= self.total_len
    }

    fn has_pending(&self) -> bool {
        self.status
            .iter()
            .any(|s| matches!(s, BufferStatus::Busy | BufferStatus::FetchReady))
    }
}

pub struct MapOutput {
    pub id: u64,
    pub origin: MofOrigin,
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl MapOutput {
    pub fn new(id: u64, origin: MofOrigin, total_len: u64, pool: &BufferPool) -> Result<Self> {
        let (a, b) = pool.try_acquire_pair()?;
        Ok(Self {
            id,
            origin,
            inner: Mutex::new(Inner {
                status: [BufferStatus::Free, BufferStatus::Free],
                descriptors: [Some(a), Some(b)],
                fetched_len: 0,
                total_len,
                fetch_count: 0,
            }),
            cond: Condvar::new(),
        })
    }

    pub fn fetch_count(&self) -> u32 {
        self.inner.lock().unwrap().fetch_count
    }

    pub fn fetched_len(&self) -> u64 {
        self.inner.lock().unwrap().fetched_len
    }

    pub fn total_len(&self) -> u64 {
        self.inner.lock().unwrap().total_len
    }

    pub fn is_fully_fetched(&self) -> bool {
        self.inner.lock().unwrap().is_fully_fetched()
    }

    pub fn status(&self, slot: BufferSlot) -> BufferStatus {
        self.inner.lock().unwrap().status[slot.idx()]
    }

    /// Claim a `Free` slot for the next fetch, marking it `Busy`. Returns
    /// `None` if both slots are currently occupied.
    pub fn begin_fetch(&self) -> Option<BufferSlot> {
        let mut inner = self.inner.lock().unwrap();
        let slot = BufferSlot::both()
            .into_iter()
            .find(|s| inner.status[s.idx()] == BufferStatus::Free)?;
        inner.status[slot.idx()] = BufferStatus::Busy;
        Some(slot)
    }

    /// Revert a `Busy` slot back to `Free` without publishing any data.
    /// Used when a fetch attempt comes back `Backlogged`: the transport
    /// never touched the buffer, so the slot is available again
    /// immediately rather than stuck `Busy` until a completion that will
    /// never come.
    pub fn cancel_fetch(&self, slot: BufferSlot) {
        let mut inner = self.inner.lock().unwrap();
        inner.status[slot.idx()] = BufferStatus::Free;
        self.cond.notify_all();
    }

    /// Copy freshly fetched bytes into `slot`'s backing storage. Called by
    /// the fetch client before reporting completion.
    pub fn write_fetched_bytes(&self, slot: BufferSlot, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let idx = slot.idx();
        let descriptor = inner.descriptors[idx]
            .as_mut()
            .expect("write_fetched_bytes called on a retired MOF buffer");
        descriptor.data.clear();
        descriptor.data.extend_from_slice(bytes);
        descriptor.len = bytes.len();
    }

    /// Report a fetch completion for `slot`. `recv_len` is the number of
    /// raw (pre-decompression) bytes the fetch client reported receiving,
    /// used to track progress toward `total_len`. If `registry` is
    /// provided, the bytes just written are framed compressed blocks:
    /// they're decoded into the peer slot, which becomes `MergeReady`
    /// while `slot` returns to `Free`. Otherwise `slot` itself becomes
    /// `MergeReady` directly.
    pub fn complete_fetch(
        &self,
        slot: BufferSlot,
        recv_len: u64,
        registry: Option<&Registry>,
    ) -> Result<FetchSignal> {
        let mut inner = self.inner.lock().unwrap();
        let idx = slot.idx();
        inner.fetched_len += recv_len;
        inner.fetch_count += 1;
        let signal = if inner.fetch_count == 1 {
            FetchSignal::First
        } else {
            FetchSignal::Repeat
        };

        match registry {
            Some(registry) => {
                let block = {
                    let descriptor = inner.descriptors[idx].as_ref().unwrap();
                    descriptor.data[..descriptor.len].to_vec()
                };
                let mut decoded = Vec::new();
                registry.decode_block(&block, &mut decoded)?;
                let peer = slot.other().idx();
                let peer_descriptor = inner.descriptors[peer].as_mut().unwrap();
                peer_descriptor.len = decoded.len();
                peer_descriptor.data = decoded;
                inner.status[peer] = BufferStatus::MergeReady;

                let descriptor = inner.descriptors[idx].as_mut().unwrap();
                descriptor.data.clear();
                descriptor.len = 0;
                inner.status[idx] = BufferStatus::Free;
            }
            None => {
                inner.status[idx] = BufferStatus::MergeReady;
            }
        }
        self.cond.notify_all();
        Ok(signal)
    }

    /// Block until a `MergeReady` buffer is available and take its bytes,
    /// or return `None` once the MOF is fully fetched and drained.
    pub fn take_merge_ready_block(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(slot) = BufferSlot::both()
                .into_iter()
                .find(|s| inner.status[s.idx()] == BufferStatus::MergeReady)
            {
                let idx = slot.idx();
                let descriptor = inner.descriptors[idx].as_mut().unwrap();
                let bytes = std::mem::take(&mut descriptor.data);
                descriptor.len = 0;
                inner.status[idx] = BufferStatus::Free;
                self.cond.notify_all();
                return Some(bytes);
            }
            if inner.is_fully_fetched() && !inner.has_pending() {
                return None;
            }
            tracing::trace!(mof_id = self.id, "parking on MOF condvar awaiting refill");
            inner = self.cond.wait(inner).unwrap();
            tracing::trace!(mof_id = self.id, "woke from MOF condvar");
        }
    }

    /// Hand both backing buffers back to the pool. Only valid once the MOF
    /// is retired (fully drained, no longer referenced by any in-flight
    /// fetch). Safe to call through a shared reference since a retired
    /// MOF has no more callers touching its buffers; any further call to
    /// `write_fetched_bytes`/`take_merge_ready_block` after this panics.
    pub fn release_buffers(&self, pool: &BufferPool) {
        let mut inner = self.inner.lock().unwrap();
        for idx in 0..2 {
            if let Some(descriptor) = inner.descriptors[idx].take() {
                pool.release(descriptor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> MofOrigin {
        MofOrigin {
            job_id: "job".into(),
            map_id: "m0".into(),
            reduce_id: "r0".into(),
            host: "localhost".into(),
            mof_path: "/tmp/job.m0.r0.mof".into(),
        }
    }

    #[test]
    fn uncompressed_fetch_marks_slot_merge_ready_directly() {
        let pool = BufferPool::new(2, 64);
        let mop = MapOutput::new(1, origin(), 5, &pool).unwrap();
        let slot = mop.begin_fetch().unwrap();
        mop.write_fetched_bytes(slot, b"hello");
        let signal = mop.complete_fetch(slot, 5, None).unwrap();
        assert_eq!(signal, FetchSignal::First);
        assert_eq!(mop.status(slot), BufferStatus::MergeReady);
        assert!(mop.is_fully_fetched());
        let bytes = mop.take_merge_ready_block().unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(mop.status(slot), BufferStatus::Free);
    }

    #[test]
    fn fully_drained_mof_returns_none() {
        let pool = BufferPool::new(2, 64);
        let mop = MapOutput::new(1, origin(), 3, &pool).unwrap();
        let slot = mop.begin_fetch().unwrap();
        mop.write_fetched_bytes(slot, b"abc");
        mop.complete_fetch(slot, 3, None).unwrap();
        assert!(mop.take_merge_ready_block().is_some());
        assert!(mop.take_merge_ready_block().is_none());
    }

    #[test]
    fn compressed_fetch_decodes_into_peer_slot() {
        use crate::decompressor::{frame_block, lzo_like, Registry};

        let pool = BufferPool::new(2, 64);
        let raw = b"sorted key value bytes sorted key value bytes".to_vec();
        let mop = MapOutput::new(1, origin(), raw.len() as u64, &pool).unwrap();
        let registry = Registry::resolve("LZO1X_SAFE").unwrap();

        let compressed = lzo_like::compress(&raw);
        let block = frame_block(raw.len() as u32, &compressed);
        let slot = mop.begin_fetch().unwrap();
        mop.write_fetched_bytes(slot, &block);
        mop.complete_fetch(slot, raw.len() as u64, Some(&registry))
            .unwrap();

        assert_eq!(mop.status(slot), BufferStatus::Free);
        assert_eq!(mop.status(slot.other()), BufferStatus::MergeReady);
        let bytes = mop.take_merge_ready_block().unwrap();
        assert_eq!(bytes, raw);
    }

    #[test]
    fn second_completion_reports_repeat_signal() {
        let pool = BufferPool::new(2, 64);
        let mop = MapOutput::new(1, origin(), 10, &pool).unwrap();
        let slot_a = mop.begin_fetch().unwrap();
        mop.write_fetched_bytes(slot_a, b"12345");
        assert_eq!(
            mop.complete_fetch(slot_a, 5, None).unwrap(),
            FetchSignal::First
        );
        mop.take_merge_ready_block().unwrap();
        let slot_b = mop.begin_fetch().unwrap();
        mop.write_fetched_bytes(slot_b, b"67890");
        assert_eq!(
            mop.complete_fetch(slot_b, 5, None).unwrap(),
            FetchSignal::Repeat
        );
    }

    #[test]
    fn release_buffers_returns_descriptors_to_the_pool() {
        let pool = BufferPool::new(2, 64);
        let mop = MapOutput::new(1, origin(), 0, &pool).unwrap();
        assert_eq!(pool.free_count(), 0);
        mop.release_buffers(&pool);
        assert_eq!(pool.free_count(), 2);
    }
}
