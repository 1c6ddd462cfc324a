//! `MergeManager`: construction, strategy selection, and orchestration of
//! the fetching and merging phases into a complete reduce-side shuffle
//! merge run.

use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread;

use tracing::info;

use crate::bridge::HostBridge;
use crate::config::{self, MIN_PARALLEL_LPQS, NUM_STAGE_MEM};
use crate::decompressor::Registry;
use crate::error::Result;
use crate::fetch::{FetchClient, FetchRequest, FetchTarget};
use crate::merge_queue::SegmentMergeQueue;
use crate::order::{KeyOrder, LexicalOrder};
use crate::phases;
use crate::pool::BufferPool;
use crate::reservation::ReservationQueue;
use crate::segment::Segment;
use crate::spill::{LocalDirRotation, SpillWriter};
use crate::super_segment::SuperSegment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Fetch everything, merge once, write straight to the host bridge.
    Online,
    /// Two-level merge: per-leaf fetch+merge to a spill file, then merge
    /// the spill files at the root.
    Hybrid,
}

pub struct MergeManagerConfig {
    pub num_maps: usize,
    pub mode: MergeMode,
    pub buffer_len: usize,
    pub local_dirs: Vec<std::path::PathBuf>,
    /// Number of leaf priority queues to build in hybrid mode. Ignored in
    /// online mode. Matches spec.md's "owning task supplies num_lpqs"
    /// construction parameter; unlike `num_parallel_lpqs` this is never
    /// read from host configuration.
    pub num_lpqs: usize,
    /// The `<prefix>.<reduce_task_id>` portion of hybrid-mode spill
    /// filenames, per spec.md §6's `<local_dir>/<prefix>.<reduce_task_id>.lpq-<NNN>`
    /// layout. Ignored in online mode.
    pub spill_file_stem: String,
}

/// `num_parallel_lpqs`'s own bound: how many leaf queues the hybrid
/// strategy may run concurrently, separate from `num_lpqs` (how many
/// leaves exist in total). Resolved from host configuration, not from the
/// constructor.
struct ResolvedConfig {
    num_maps: usize,
    num_lpqs: usize,
    num_parallel_lpqs: usize,
    num_mofs_in_lpq: usize,
    max_mofs_in_lpqs: usize,
    num_regular_lpqs: usize,
    num_kv_bufs: usize,
    mode: MergeMode,
}

impl ResolvedConfig {
    fn new(num_maps: usize, mode: MergeMode, num_lpqs: usize, num_parallel_lpqs: usize) -> Self {
        let num_maps = num_maps.max(1);
        let num_lpqs = num_lpqs.clamp(MIN_PARALLEL_LPQS, num_maps);
        // Can't usefully run more LPQs concurrently than there are LPQs.
        let num_parallel_lpqs = num_parallel_lpqs.clamp(MIN_PARALLEL_LPQS, num_lpqs);
        let num_mofs_in_lpq = num_maps / num_lpqs;
        let max_mofs_in_lpqs = num_mofs_in_lpq + 1;
        let num_regular_lpqs = num_lpqs - (num_maps % num_lpqs);
        // Treated as a sizing upper bound only, never asserted against
        // actual pool occupancy elsewhere.
        let num_kv_bufs = if mode == MergeMode::Hybrid {
            max_mofs_in_lpqs * num_parallel_lpqs
        } else {
            num_maps
        };
        // Degrade hybrid down to a single-level (online-shaped) merge when
        // there aren't enough maps to make two-level merging worthwhile.
        let mode = if mode == MergeMode::Hybrid && num_maps <= num_lpqs {
            MergeMode::Online
        } else {
            mode
        };
        Self {
            num_maps,
            num_lpqs,
            num_parallel_lpqs,
            num_mofs_in_lpq,
            max_mofs_in_lpqs,
            num_regular_lpqs,
            num_kv_bufs,
            mode,
        }
    }
}

pub struct MergeManager {
    resolved: ResolvedConfig,
    order: Arc<dyn KeyOrder>,
    bridge: Arc<dyn HostBridge>,
    fetch_client: Arc<dyn FetchClient>,
    pool: Arc<BufferPool>,
    registry: Option<Arc<Registry>>,
    local_dirs: Option<Arc<LocalDirRotation>>,
    spill_file_stem: String,
    next_mop_id: AtomicU64,
}

impl MergeManager {
    pub fn new(
        config: MergeManagerConfig,
        bridge: Arc<dyn HostBridge>,
        fetch_client: Arc<dyn FetchClient>,
    ) -> Result<Self> {
        Self::with_order(config, bridge, fetch_client, Arc::new(LexicalOrder))
    }

    pub fn with_order(
        config: MergeManagerConfig,
        bridge: Arc<dyn HostBridge>,
        fetch_client: Arc<dyn FetchClient>,
        order: Arc<dyn KeyOrder>,
    ) -> Result<Self> {
        let num_parallel_lpqs = config::resolve_num_parallel_lpqs(bridge.as_ref())?;
        let resolved =
            ResolvedConfig::new(config.num_maps, config.mode, config.num_lpqs, num_parallel_lpqs);

        let registry = match config::resolve_compression(bridge.as_ref()) {
            Some(name) => Some(Arc::new(Registry::resolve(&name)?)),
            None => None,
        };

        let pool = Arc::new(BufferPool::new(resolved.num_kv_bufs * 2, config.buffer_len));

        let local_dirs = if resolved.mode == MergeMode::Hybrid {
            Some(Arc::new(LocalDirRotation::new(config.local_dirs)?))
        } else {
            None
        };

        Ok(Self {
            resolved,
            order,
            bridge,
            fetch_client,
            pool,
            registry,
            local_dirs,
            spill_file_stem: config.spill_file_stem,
            next_mop_id: AtomicU64::new(0),
        })
    }

    pub fn mode(&self) -> MergeMode {
        self.resolved.mode
    }

    pub fn num_lpqs(&self) -> usize {
        self.resolved.num_lpqs
    }

    fn build_fetch_list(&self, targets: Vec<FetchTarget>) -> VecDeque<Arc<FetchRequest>> {
        targets
            .into_iter()
            .enumerate()
            .map(|(i, target)| Arc::new(FetchRequest::new(i as u64, target)))
            .collect()
    }

    pub fn run(&self, targets: Vec<FetchTarget>) -> Result<()> {
        match self.resolved.mode {
            MergeMode::Online => self.run_online(targets),
            MergeMode::Hybrid => self.run_hybrid(targets),
        }
    }

    /// Return buffers to `pool` whenever a `Segment` is dropped from a
    /// queue, per spec.md's release-callback contract on `SegmentMergeQueue`.
    fn release_segment_buffers(queue: &mut SegmentMergeQueue<Segment>, pool: Arc<BufferPool>) {
        queue.set_release_callback(move |segment: &Segment| {
            segment.mop().release_buffers(&pool);
        });
    }

    fn run_online(&self, targets: Vec<FetchTarget>) -> Result<()> {
        let fetch_list = self.build_fetch_list(targets);
        let segments = phases::fetching_phase(
            fetch_list,
            &self.pool,
            &self.fetch_client,
            self.registry.as_ref(),
            &self.next_mop_id,
            self.bridge.as_ref(),
        )?;

        let mut queue: SegmentMergeQueue<Segment> =
            SegmentMergeQueue::new(self.resolved.num_maps, self.order.clone())
                .with_staging_buffers(self.pool.buffer_len() * NUM_STAGE_MEM);
        Self::release_segment_buffers(&mut queue, self.pool.clone());
        for segment in segments {
            queue.insert(segment);
        }

        info!(num_maps = self.resolved.num_maps, "running online merge");
        phases::merging_phase_to_sink(&mut queue, self.bridge.as_ref())
    }

    fn run_hybrid(&self, targets: Vec<FetchTarget>) -> Result<()> {
        let local_dirs = self
            .local_dirs
            .as_ref()
            .expect("hybrid mode always resolves local_dirs")
            .clone();

        let fetch_list = self.build_fetch_list(targets);
        // Used as a back-pressure semaphore bounding how many leaf
        // priority queues run concurrently: each worker reserves a slot
        // before fetching and dereserves only once its spill file is
        // fully written, so a slow LPQ can't let the rest run unbounded.
        let reservation: Arc<ReservationQueue<()>> =
            Arc::new(ReservationQueue::new(self.resolved.num_parallel_lpqs));

        // Partition the fetch list into num_lpqs chunks up front; each
        // chunk becomes one leaf priority queue's fetch workload.
        let mut chunks: Vec<VecDeque<Arc<FetchRequest>>> =
            (0..self.resolved.num_lpqs).map(|_| VecDeque::new()).collect();
        for (i, req) in fetch_list.into_iter().enumerate() {
            chunks[i % self.resolved.num_lpqs].push_back(req);
        }

        info!(
            num_lpqs = self.resolved.num_lpqs,
            num_parallel_lpqs = self.resolved.num_parallel_lpqs,
            num_mofs_in_lpq = self.resolved.num_mofs_in_lpq,
            num_regular_lpqs = self.resolved.num_regular_lpqs,
            "running hybrid merge"
        );

        let spill_paths: Arc<std::sync::Mutex<Vec<std::path::PathBuf>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));

        thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::new();
            for (lpq_idx, chunk) in chunks.into_iter().enumerate() {
                let reservation = reservation.clone();
                let pool = self.pool.clone();
                let fetch_client = self.fetch_client.clone();
                let registry = self.registry.clone();
                let order = self.order.clone();
                let bridge = self.bridge.clone();
                let local_dirs = local_dirs.clone();
                let spill_paths = spill_paths.clone();
                let spill_file_stem = self.spill_file_stem.clone();
                let next_mop_id = &self.next_mop_id;

                let handle = scope.spawn(move || -> Result<()> {
                    let reservation_token = reservation.wait_and_reserve();
                    let segments = phases::fetching_phase(
                        chunk,
                        &pool,
                        &fetch_client,
                        registry.as_ref(),
                        next_mop_id,
                        bridge.as_ref(),
                    )?;

                    let mut lpq: SegmentMergeQueue<Segment> =
                        SegmentMergeQueue::new(segments.len().max(1), order.clone());
                    Self::release_segment_buffers(&mut lpq, pool.clone());
                    for segment in segments {
                        lpq.insert(segment);
                    }

                    let spill_path = local_dirs
                        .next_path(&format!("{spill_file_stem}.lpq-{lpq_idx:03}"));
                    let mut writer = SpillWriter::create(spill_path.clone())?;
                    phases::merging_phase_to_spill(&mut lpq, &mut writer, pool.buffer_len())?;
                    writer.finish()?;
                    spill_paths.lock().unwrap().push(spill_path);

                    reservation.push_reserved(reservation_token, ());
                    Ok(())
                });
                handles.push(handle);
            }

            for _ in 0..handles.len() {
                let (_, lease) = reservation.wait_and_pop_without_dereserve();
                reservation.dereserve(lease);
            }
            for handle in handles {
                handle
                    .join()
                    .expect("leaf priority queue worker thread panicked")?;
            }
            Ok(())
        })?;

        let spill_paths = Arc::try_unwrap(spill_paths)
            .expect("all leaf workers have joined")
            .into_inner()
            .unwrap();

        let mut root: SegmentMergeQueue<SuperSegment> =
            SegmentMergeQueue::new(spill_paths.len().max(1), self.order.clone())
                .with_staging_buffers(self.pool.buffer_len() * NUM_STAGE_MEM);
        for (seq, path) in spill_paths.into_iter().enumerate() {
            let mut super_segment = SuperSegment::open(path, seq as u64)?;
            if super_segment.prime()? {
                root.insert(super_segment);
            }
        }
        phases::merging_phase_to_sink(&mut root, self.bridge.as_ref())
    }
}
