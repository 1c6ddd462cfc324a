//! The common interface `SegmentMergeQueue` merges over.
//!
//! Both a live fetch-backed `Segment` and a spill-file-backed
//! `SuperSegment` implement this; the queue itself never needs to know
//! which kind of cursor it's holding.

use crate::error::Result;

pub trait MergeUnit: Send {
    /// The key at the current cursor position. Only valid to call when the
    /// unit has not reported exhaustion (the last `advance()` returned
    /// `Ok(true)`, or the unit was just primed and has data).
    fn current_key(&self) -> &[u8];

    /// The value at the current cursor position. Same validity rule as
    /// `current_key`.
    fn current_value(&self) -> &[u8];

    /// Move to the next record, pulling more backing data as needed.
    /// Returns `Ok(true)` if a new current record is available, `Ok(false)`
    /// if the unit is now exhausted and should be dropped from the queue.
    fn advance(&mut self) -> Result<bool>;

    /// Monotonic insertion order, used to break ties between units whose
    /// current keys compare equal under the configured `KeyOrder` so the
    /// merge is stable.
    fn insertion_seq(&self) -> u64;
}
