//! Reduce-side shuffle merge engine.
//!
//! This crate implements the reduce-side half of a MapReduce shuffle: given
//! a set of map outputs to fetch, it pipelines fetching them in via a
//! pluggable [`fetch::FetchClient`] with pulling sorted records out of them
//! in key order via a priority-queue merge, handing the merged stream to a
//! [`bridge::HostBridge`]. Two merge strategies are supported —
//! [`manager::MergeMode::Online`] (fetch everything, merge once) and
//! [`manager::MergeMode::Hybrid`] (fetch+merge per leaf queue to a spill
//! file, then merge the spill files at the root) — selected and tuned by
//! [`manager::MergeManager`].
//!
//! What this crate does *not* do: speak any particular wire protocol to a
//! map task (that's [`fetch::FetchClient`]'s job), manage pinned/registered
//! memory (that's [`pool::BufferPool`]'s job to request, not implement),
//! or package a CLI — see the `merge-demo` binary crate for that.

pub mod bridge;
pub mod config;
pub mod decompressor;
pub mod error;
pub mod fetch;
pub mod manager;
pub mod mapoutput;
pub mod merge_queue;
pub mod order;
pub mod phases;
pub mod pool;
pub mod record;
pub mod reservation;
pub mod segment;
pub mod spill;
pub mod super_segment;
pub mod unit;

pub use error::{MergeError, Result};
pub use manager::{MergeManager, MergeManagerConfig, MergeMode};
