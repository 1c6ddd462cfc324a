//! The two phases every merge strategy is built from: fetching (turn
//! `FetchRequest`s into primed `Segment`s) and merging (drain a
//! `SegmentMergeQueue` to a sink, either the host bridge or a spill file).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::bridge::HostBridge;
use crate::config::PROGRESS_REPORT_LIMIT;
use crate::decompressor::Registry;
use crate::error::Result;
use crate::fetch::{FetchClient, FetchOutcome, FetchRequest};
use crate::mapoutput::FetchSignal;
use crate::merge_queue::SegmentMergeQueue;
use crate::pool::BufferPool;
use crate::record::Record;
use crate::segment::{RefillHandle, Segment};
use crate::spill::SpillWriter;
use crate::unit::MergeUnit;

/// Drain `fetch_list`, issuing the first fetch for each request and
/// priming a `Segment` for every MOF that turns out to be nonempty.
/// Requests the fetch client reports as backlogged are requeued to the
/// back of the list rather than treated as failures.
pub fn fetching_phase(
    mut fetch_list: VecDeque<Arc<FetchRequest>>,
    pool: &BufferPool,
    fetch_client: &Arc<dyn FetchClient>,
    registry: Option<&Arc<Registry>>,
    next_mop_id: &AtomicU64,
    bridge: &dyn HostBridge,
) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut seq: u64 = 0;
    let mut progress_since_report: u32 = 0;
    let total = fetch_list.len();
    let mut consecutive_backlogs = 0usize;

    while let Some(req) = fetch_list.pop_front() {
        let mop = req.ensure_mop(next_mop_id.fetch_add(1, Ordering::Relaxed), pool)?;
        let slot = mop
            .begin_fetch()
            .expect("a freshly allocated MOF always has a free slot");

        let outcome =
            fetch_client.start_fetch_req(&req, &mop, slot, registry.map(|r| r.as_ref()))?;
        match outcome {
            FetchOutcome::Completed(FetchSignal::First) => {
                consecutive_backlogs = 0;
                let refill = RefillHandle::new(
                    fetch_client.clone(),
                    req.clone(),
                    mop.clone(),
                    registry.cloned(),
                );
                let mut segment = Segment::new(mop, Some(refill), seq);
                seq += 1;
                if segment.prime()? {
                    segments.push(segment);
                }

                progress_since_report += 1;
                if progress_since_report >= PROGRESS_REPORT_LIMIT {
                    bridge.fetch_over();
                    debug!(total, fetched = seq, "fetch progress");
                    progress_since_report = 0;
                }
            }
            FetchOutcome::Completed(FetchSignal::Repeat) => {
                unreachable!("the first fetch on a freshly allocated MOF cannot be a repeat")
            }
            FetchOutcome::Backlogged => {
                mop.cancel_fetch(slot);
                consecutive_backlogs += 1;
                fetch_list.push_back(req);
                if consecutive_backlogs > fetch_list.len() {
                    // Every remaining request just backlogged in a row;
                    // nothing will change by spinning further this pass.
                    break;
                }
            }
        }
    }

    if progress_since_report > 0 {
        bridge.fetch_over();
    }
    Ok(segments)
}

fn flush_staging(buf: &mut Vec<u8>, sink: impl FnOnce(&[u8]) -> Result<()>) -> Result<()> {
    if !buf.is_empty() {
        sink(buf)?;
        buf.clear();
    }
    Ok(())
}

/// Drain `queue` to the host bridge, batching encoded records into
/// `staging_buf_len`-sized chunks before calling `data_ready`.
pub fn merging_phase_to_sink<U: MergeUnit>(
    queue: &mut SegmentMergeQueue<U>,
    bridge: &dyn HostBridge,
) -> Result<()> {
    let staging_buf_len = queue.staging_buf_len().max(1);
    let mut staging = Vec::with_capacity(staging_buf_len);

    while let Some(top) = queue.peek() {
        let record = Record::new(top.current_key().to_vec(), top.current_value().to_vec());
        if !staging.is_empty() && staging.len() + record.encoded_len() > staging_buf_len {
            flush_staging(&mut staging, |buf| {
                bridge.data_ready(buf);
                Ok(())
            })?;
        }
        record.encode_into(&mut staging);
        queue.advance_top()?;
    }
    flush_staging(&mut staging, |buf| {
        bridge.data_ready(buf);
        Ok(())
    })?;
    Ok(())
}

/// Drain `queue` to a spill file, framing accumulated records into blocks
/// of roughly `block_target_len` bytes.
pub fn merging_phase_to_spill<U: MergeUnit>(
    queue: &mut SegmentMergeQueue<U>,
    writer: &mut SpillWriter,
    block_target_len: usize,
) -> Result<()> {
    let block_target_len = block_target_len.max(1);
    let mut staging = Vec::with_capacity(block_target_len);

    while let Some(top) = queue.peek() {
        let record = Record::new(top.current_key().to_vec(), top.current_value().to_vec());
        if !staging.is_empty() && staging.len() + record.encoded_len() > block_target_len {
            flush_staging(&mut staging, |buf| writer.write_block(buf))?;
        }
        record.encode_into(&mut staging);
        queue.advance_top()?;
    }
    if !staging.is_empty() {
        writer.write_block(&staging)?;
    }
    Ok(())
}
