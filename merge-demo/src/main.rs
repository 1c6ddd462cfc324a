//! Thin CLI wiring a filesystem-backed fetch client into `merge-core`.
//!
//! Not a production shuffle client: map outputs are plain files on disk
//! instead of RDMA/socket fetches from remote map tasks. It exists to
//! exercise the fetch-completion, buffer-lifecycle, and merge-strategy
//! code paths end to end without a real network fabric.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use merge_core::bridge::{HostBridge, StaticHostBridge};
use merge_core::decompressor::{frame_block, lzo_like, Registry};
use merge_core::error::MergeError;
use merge_core::fetch::{
    format_fetch_reply, parse_fetch_reply, FetchClient, FetchOutcome, FetchReply, FetchRequest,
    FetchTarget, HostDescriptor,
};
use merge_core::manager::{MergeManager, MergeManagerConfig, MergeMode};
use merge_core::mapoutput::{BufferSlot, MapOutput};

#[derive(Parser, Debug)]
#[command(about = "Demo reduce-side shuffle merge over a directory of map output files")]
struct Args {
    /// Directory containing one file per map output.
    #[arg(long)]
    mof_dir: PathBuf,

    /// Job id to present in synthesized MOF paths.
    #[arg(long, default_value = "demo-job")]
    job_id: String,

    /// Reduce id this merge run is for.
    #[arg(long, default_value = "0")]
    reduce_id: String,

    #[arg(long, value_enum, default_value = "online")]
    mode: CliMode,

    /// Target leaf-priority-queue fan-out for hybrid mode.
    #[arg(long, default_value_t = 2)]
    num_lpqs: usize,

    /// Enable map-output compression over the in-house LZO-style codec.
    #[arg(long, default_value_t = false)]
    compress: bool,

    /// Bytes fetched per `start_fetch_req` call; small values exercise
    /// double buffering across several completions per MOF.
    #[arg(long, default_value_t = 1 << 16)]
    chunk_len: usize,

    /// Write merged output here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Scratch directory for hybrid-mode spill files.
    #[arg(long)]
    local_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliMode {
    Online,
    Hybrid,
}

struct FileFetchClient {
    paths: HashMap<(String, String, String), PathBuf>,
    chunk_len: usize,
}

impl FetchClient for FileFetchClient {
    fn start_fetch_req(
        &self,
        req: &FetchRequest,
        mop: &MapOutput,
        slot: BufferSlot,
        registry: Option<&Registry>,
    ) -> merge_core::error::Result<FetchOutcome> {
        let key = (
            req.target.job_id.clone(),
            req.target.map_id.clone(),
            req.target.reduce_id.clone(),
        );
        let path = self.paths.get(&key).ok_or_else(|| MergeError::FetchFailed {
            reason: format!("no local file registered for {:?}", key),
        })?;
        let data = fs::read(path).map_err(|e| MergeError::FetchFailed {
            reason: format!("reading {}: {e}", path.display()),
        })?;

        let offset = mop.fetched_len() as usize;
        let remaining = &data[offset.min(data.len())..];
        let take = remaining.len().min(self.chunk_len);
        let chunk = &remaining[..take];

        if registry.is_some() {
            let compressed = lzo_like::compress(chunk);
            let block = frame_block(chunk.len() as u32, &compressed);
            mop.write_fetched_bytes(slot, &block);
        } else {
            mop.write_fetched_bytes(slot, chunk);
        }

        let reply = FetchReply {
            raw_len: data.len() as u64,
            part_len: take as u64,
            recv: take as u64,
            mof_offset: offset as u64,
            mof_path: path.display().to_string(),
        };
        // Round-trip through the wire envelope format even locally, so the
        // parsing path is exercised the same way a real transport would.
        let parsed = parse_fetch_reply(&format_fetch_reply(&reply))?;

        let signal = mop.complete_fetch(slot, parsed.recv, registry)?;
        Ok(FetchOutcome::Completed(signal))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut paths = HashMap::new();
    let mut targets = Vec::new();
    for entry in fs::read_dir(&args.mof_dir)
        .with_context(|| format!("reading MOF directory {}", args.mof_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let map_id = entry
            .path()
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let expected_len = entry.metadata()?.len();
        paths.insert(
            (args.job_id.clone(), map_id.clone(), args.reduce_id.clone()),
            entry.path(),
        );
        targets.push(FetchTarget {
            job_id: args.job_id.clone(),
            map_id,
            reduce_id: args.reduce_id.clone(),
            host: HostDescriptor {
                host: "localhost".to_string(),
                port: 0,
            },
            expected_len,
        });
    }
    anyhow::ensure!(!targets.is_empty(), "no map output files found in {}", args.mof_dir.display());
    info!(num_maps = targets.len(), mode = ?args.mode, "starting merge run");

    let mut conf = HashMap::new();
    conf.insert(
        "mapred.compress.map.output".to_string(),
        args.compress.to_string(),
    );
    let bridge = Arc::new(StaticHostBridge::new(conf));

    let fetch_client = Arc::new(FileFetchClient {
        paths,
        chunk_len: args.chunk_len,
    });

    let mode = match args.mode {
        CliMode::Online => MergeMode::Online,
        CliMode::Hybrid => MergeMode::Hybrid,
    };
    let local_dirs = vec![args.local_dir.unwrap_or_else(std::env::temp_dir)];

    let manager = MergeManager::new(
        MergeManagerConfig {
            num_maps: targets.len(),
            mode,
            buffer_len: 1 << 20,
            local_dirs,
            num_lpqs: args.num_lpqs,
            spill_file_stem: format!("{}.{}", args.job_id, args.reduce_id),
        },
        bridge.clone(),
        fetch_client,
    )?;

    manager.run(targets).context("merge run failed")?;

    let merged = bridge.delivered_bytes();
    match args.output {
        Some(path) => fs::write(&path, &merged)
            .with_context(|| format!("writing merged output to {}", path.display()))?,
        None => std::io::stdout().write_all(&merged)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_fetch_client_reports_failure_for_unregistered_target() {
        use merge_core::pool::BufferPool;

        let client = FileFetchClient {
            paths: HashMap::new(),
            chunk_len: 4096,
        };
        let req = FetchRequest::new(
            0,
            FetchTarget {
                job_id: "job".into(),
                map_id: "m0".into(),
                reduce_id: "r0".into(),
                host: HostDescriptor {
                    host: "localhost".into(),
                    port: 0,
                },
                expected_len: 0,
            },
        );
        let pool = BufferPool::new(2, 64);
        let mop = req.ensure_mop(0, &pool).unwrap();
        let slot = mop.begin_fetch().unwrap();
        let result = client.start_fetch_req(&req, &mop, slot, None);
        assert!(matches!(result, Err(MergeError::FetchFailed { .. })));
    }
}
