//! `Segment`: a merge cursor over one MOF's live fetch stream.
//!
//! A `Segment` is constructed with no side effects and primed explicitly by
//! its caller (the fetching phase) afterward — the original's constructor
//! made a virtual call to request the next buffer; here that call is moved
//! out to `Segment::prime`, called once right after construction, right
//! where the design note says the virtual dispatch used to happen.

use std::sync::Arc;

use crate::decompressor::Registry;
use crate::error::{MergeError, Result};
use crate::fetch::{FetchClient, FetchOutcome, FetchRequest};
use crate::mapoutput::MapOutput;
use crate::record::{self, Record};
use crate::unit::MergeUnit;

/// Bundles what a `Segment` needs to ask for more data as it drains its
/// current block, without needing to know about fetch-list bookkeeping.
pub struct RefillHandle {
    client: Arc<dyn FetchClient>,
    request: Arc<FetchRequest>,
    mop: Arc<MapOutput>,
    registry: Option<Arc<Registry>>,
}

impl RefillHandle {
    pub fn new(
        client: Arc<dyn FetchClient>,
        request: Arc<FetchRequest>,
        mop: Arc<MapOutput>,
        registry: Option<Arc<Registry>>,
    ) -> Self {
        Self {
            client,
            request,
            mop,
            registry,
        }
    }

    pub fn request_more(&self) -> Result<FetchOutcome> {
        let slot = match self.mop.begin_fetch() {
            Some(slot) => slot,
            None => return Ok(FetchOutcome::Backlogged),
        };
        let outcome =
            self.client
                .start_fetch_req(&self.request, &self.mop, slot, self.registry.as_deref())?;
        if matches!(outcome, FetchOutcome::Backlogged) {
            self.mop.cancel_fetch(slot);
        }
        Ok(outcome)
    }
}

pub struct Segment {
    mop: Arc<MapOutput>,
    refill: Option<RefillHandle>,
    records: Vec<Record>,
    idx: usize,
    seq: u64,
    /// Decoded bytes carried over from the previous fetch buffer that
    /// didn't add up to a complete record — a fetch buffer boundary has
    /// no relationship to record boundaries, so a record can straddle two
    /// buffers. Joined with the next buffer's bytes before decoding again.
    pending: Vec<u8>,
}

impl Segment {
    pub fn new(mop: Arc<MapOutput>, refill: Option<RefillHandle>, seq: u64) -> Self {
        Self {
            mop,
            refill,
            records: Vec::new(),
            idx: 0,
            seq,
            pending: Vec::new(),
        }
    }

    pub fn mop(&self) -> &Arc<MapOutput> {
        &self.mop
    }

    pub fn is_exhausted(&self) -> bool {
        self.idx >= self.records.len()
    }

    /// First pull of data. Must be called exactly once, by the caller,
    /// immediately after construction and before inserting the segment
    /// into a queue. Returns `Ok(false)` if the MOF turned out to be
    /// empty.
    pub fn prime(&mut self) -> Result<bool> {
        self.pull_next_block()
    }

    fn pull_next_block(&mut self) -> Result<bool> {
        loop {
            match self.mop.take_merge_ready_block() {
                Some(bytes) => {
                    if self.pending.is_empty() {
                        self.pending = bytes;
                    } else {
                        self.pending.extend_from_slice(&bytes);
                    }
                    let (records, consumed) = record::decode_records_prefix(&self.pending)?;
                    self.pending.drain(..consumed);
                    self.records = records;
                    self.idx = 0;
                    if let Some(refill) = &self.refill {
                        if !self.mop.is_fully_fetched() {
                            refill.request_more()?;
                        }
                    }
                    if !self.records.is_empty() {
                        return Ok(true);
                    }
                    // Either an empty framed block, or this buffer's bytes
                    // only completed a partial record (now sitting in
                    // `pending`); either way keep pulling rather than
                    // reporting spurious exhaustion.
                }
                None => {
                    if !self.pending.is_empty() {
                        return Err(MergeError::MalformedRecordStream);
                    }
                    self.records.clear();
                    self.idx = 0;
                    return Ok(false);
                }
            }
        }
    }
}

impl MergeUnit for Segment {
    fn current_key(&self) -> &[u8] {
        &self.records[self.idx].key
    }

    fn current_value(&self) -> &[u8] {
        &self.records[self.idx].value
    }

    fn advance(&mut self) -> Result<bool> {
        self.idx += 1;
        if self.idx < self.records.len() {
            return Ok(true);
        }
        self.pull_next_block()
    }

    fn insertion_seq(&self) -> u64 {
        self.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapoutput::MofOrigin;
    use crate::pool::BufferPool;

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
    fn primes_and_iterates_over_a_single_block() {
        let pool = BufferPool::new(2, 256);
        let records = vec![
            Record::new(b"a".to_vec(), b"1".to_vec()),
            Record::new(b"b".to_vec(), b"2".to_vec()),
        ];
        let encoded = record::encode_records(&records);
        let mop = Arc::new(MapOutput::new(1, origin(), encoded.len() as u64, &pool).unwrap());
        let slot = mop.begin_fetch().unwrap();
        mop.write_fetched_bytes(slot, &encoded);
        mop.complete_fetch(slot, encoded.len() as u64, None).unwrap();

        let mut segment = Segment::new(mop, None, 0);
        assert!(segment.prime().unwrap());
        assert_eq!(segment.current_key(), b"a");
        assert!(segment.advance().unwrap());
        assert_eq!(segment.current_key(), b"b");
        assert!(!segment.advance().unwrap());
    }

    #[test]
    fn a_record_split_across_two_fetch_buffers_still_decodes() {
        let pool = BufferPool::new(2, 256);
        let records = vec![
            Record::new(b"a".to_vec(), b"1".to_vec()),
            Record::new(b"bb".to_vec(), b"22".to_vec()),
        ];
        let encoded = record::encode_records(&records);
        // Split partway through the second record's header, independent
        // of any record boundary.
        let split = records[0].encoded_len() + 3;
        let (first_chunk, second_chunk) = encoded.split_at(split);

        let mop = Arc::new(MapOutput::new(1, origin(), encoded.len() as u64, &pool).unwrap());
        let slot_a = mop.begin_fetch().unwrap();
        mop.write_fetched_bytes(slot_a, first_chunk);
        mop.complete_fetch(slot_a, first_chunk.len() as u64, None)
            .unwrap();

        let mut segment = Segment::new(mop.clone(), None, 0);
        assert!(segment.prime().unwrap());
        assert_eq!(segment.current_key(), b"a");

        // Deliver the rest of the split record before draining further —
        // there's no refill handle driving this segment, so a second
        // `advance()` would otherwise park forever on the MOF's condvar
        // waiting for data this test hadn't produced yet.
        let slot_b = mop.begin_fetch().unwrap();
        mop.write_fetched_bytes(slot_b, second_chunk);
        mop.complete_fetch(slot_b, second_chunk.len() as u64, None)
            .unwrap();

        // The first buffer only held a partial header for the second
        // record; joined with the second buffer's bytes, it now decodes.
        assert!(segment.advance().unwrap());
        assert_eq!(segment.current_key(), b"bb");
        assert!(!segment.advance().unwrap());
    }

    #[test]
    fn priming_an_empty_mof_reports_no_data() {
        let pool = BufferPool::new(2, 256);
        let mop = Arc::new(MapOutput::new(1, origin(), 0, &pool).unwrap());
        let slot = mop.begin_fetch().unwrap();
        mop.write_fetched_bytes(slot, &[]);
        mop.complete_fetch(slot, 0, None).unwrap();

        let mut segment = Segment::new(mop, None, 0);
        assert!(!segment.prime().unwrap());
    }
}
