//! `SegmentMergeQueue`: a priority queue of merge cursors ordered by
//! current key under an externally supplied total order, with stable
//! (insertion-order) tie-breaking.
//!
//! Implemented the way the reference corpus's `estuary-flow` spill/combine
//! code implements its own segment heap: a `BinaryHeap<Reverse<_>>` so the
//! minimum-keyed entry sits at the top, with `Ord` comparing the key first
//! and the insertion sequence second.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::error::Result;
use crate::order::KeyOrder;
use crate::unit::MergeUnit;

struct HeapEntry<U: MergeUnit> {
    unit: U,
    order: Arc<dyn KeyOrder>,
}

impl<U: MergeUnit> PartialEq for HeapEntry<U> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl<U: MergeUnit> Eq for HeapEntry<U> {}

impl<U: MergeUnit> PartialOrd for HeapEntry<U> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<U: MergeUnit> Ord for HeapEntry<U> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .compare(self.unit.current_key(), other.unit.current_key())
            .then_with(|| self.unit.insertion_seq().cmp(&other.unit.insertion_seq()))
    }
}

/// A fixed-capacity priority queue over merge units. `capacity` is the
/// number of units this queue is sized to hold at once (an LPQ's target
/// fan-in, or the number of MOFs/spill files at the root); `staging_buf_len`
/// is nonzero only for queues that drain to a host-bridge sink rather than
/// to a spill file, matching the original only allocating staging buffers
/// for the queue whose merging phase feeds the consumer directly.
pub struct SegmentMergeQueue<U: MergeUnit> {
    heap: BinaryHeap<Reverse<HeapEntry<U>>>,
    order: Arc<dyn KeyOrder>,
    capacity: usize,
    staging_buf_len: usize,
    release: Option<Box<dyn Fn(&U) + Send + Sync>>,
}

impl<U: MergeUnit> SegmentMergeQueue<U> {
    pub fn new(capacity: usize, order: Arc<dyn KeyOrder>) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            order,
            capacity,
            staging_buf_len: 0,
            release: None,
        }
    }

    pub fn with_staging_buffers(mut self, staging_buf_len: usize) -> Self {
        self.staging_buf_len = staging_buf_len;
        self
    }

    pub fn set_release_callback(&mut self, cb: impl Fn(&U) + Send + Sync + 'static) {
        self.release = Some(Box::new(cb));
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn staging_buf_len(&self) -> usize {
        self.staging_buf_len
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Insert an already-primed unit. Units that reported exhaustion at
    /// prime time should not be inserted.
    pub fn insert(&mut self, unit: U) {
        self.heap.push(Reverse(HeapEntry {
            unit,
            order: self.order.clone(),
        }));
    }

    pub fn peek(&self) -> Option<&U> {
        self.heap.peek().map(|Reverse(entry)| &entry.unit)
    }

    /// Remove and return the minimum-keyed unit, invoking the release
    /// callback if one is set.
    pub fn pop(&mut self) -> Option<U> {
        self.heap.pop().map(|Reverse(entry)| {
            if let Some(cb) = &self.release {
                cb(&entry.unit);
            }
            entry.unit
        })
    }

    /// Advance the minimum-keyed unit in place: if it still has data,
    /// re-insert it at its new position; if it's now exhausted, drop it
    /// (invoking the release callback).
    pub fn advance_top(&mut self) -> Result<()> {
        if let Some(Reverse(mut entry)) = self.heap.pop() {
            let has_more = entry.unit.advance()?;
            if has_more {
                self.heap.push(Reverse(entry));
            } else if let Some(cb) = &self.release {
                cb(&entry.unit);
            }
        }
        Ok(())
    }
}
