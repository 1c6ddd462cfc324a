use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use merge_core::error::Result;
use merge_core::merge_queue::SegmentMergeQueue;
use merge_core::order::LexicalOrder;
use merge_core::unit::MergeUnit;

/// A merge unit over an in-memory, already-sorted run, used to isolate the
/// heap's own overhead from any fetching or decoding cost.
struct SortedRun {
    keys: Vec<Vec<u8>>,
    idx: usize,
    seq: u64,
}

impl MergeUnit for SortedRun {
    fn current_key(&self) -> &[u8] {
        &self.keys[self.idx]
    }
    fn current_value(&self) -> &[u8] {
        &self.keys[self.idx]
    }
    fn advance(&mut self) -> Result<bool> {
        self.idx += 1;
        Ok(self.idx < self.keys.len())
    }
    fn insertion_seq(&self) -> u64 {
        self.seq
    }
}

fn interleaved_runs(num_runs: usize, run_len: usize) -> Vec<SortedRun> {
    (0..num_runs)
        .map(|seq| SortedRun {
            keys: (0..run_len)
                .map(|i| format!("{:08}", i * num_runs + seq).into_bytes())
                .collect(),
            idx: 0,
            seq: seq as u64,
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    const NUM_RUNS: usize = 16;
    const RUN_LEN: usize = 2000;

    let mut group = c.benchmark_group("merge_queue");
    group.throughput(Throughput::Elements((NUM_RUNS * RUN_LEN) as u64));

    group.bench_function("drain_sorted_union", |b| {
        b.iter(|| {
            let mut queue: SegmentMergeQueue<SortedRun> =
                SegmentMergeQueue::new(NUM_RUNS, Arc::new(LexicalOrder));
            for run in interleaved_runs(NUM_RUNS, RUN_LEN) {
                queue.insert(run);
            }
            let mut count = 0usize;
            while queue.peek().is_some() {
                count += 1;
                queue.advance_top().unwrap();
            }
            count
        })
    });

    group.finish();
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
