//! Typed failure modes for the merge engine.
//!
//! Every variant here corresponds to one of the fatal error kinds enumerated
//! in the design ("configuration error", "resource exhaustion", ...). There
//! is deliberately no retry logic anywhere in this crate: a `MergeError` is
//! meant to propagate straight out to the caller, who owns the decision to
//! retry the whole reduce task.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("unknown compression codec {name:?} (conf key io.compression.codec.lzo.decompressor)")]
    UnknownCodec { name: String },

    #[error("decoder returned a non-OK status decoding a block (raw_len={raw_len}, compressed_len={compressed_len})")]
    DecoderFailed { raw_len: u32, compressed_len: u32 },

    #[error("decoded {actual} bytes but block header declared raw_len={expected}")]
    DecodedLengthMismatch { expected: u32, actual: usize },

    #[error("block header truncated: need at least 8 bytes, got {len}")]
    TruncatedBlockHeader { len: usize },

    #[error("insufficient free RDMA buffers to start a leaf priority queue (need {needed}, have {free})")]
    InsufficientBuffers { needed: usize, free: usize },

    #[error("MOF path exceeds the maximum supported length (reducer sentinel MOF_PATH_SIZE_TOO_LONG)")]
    OversizedMofPath,

    #[error("fetch client reported a hard failure: {reason}")]
    FetchFailed { reason: String },

    #[error("malformed fetch reply envelope: {envelope:?}")]
    MalformedEnvelope { envelope: String },

    #[error("spill I/O error at {path:?}: {source}")]
    SpillIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed key/value record stream")]
    MalformedRecordStream,

    #[error("invalid configuration value for {key:?}: {value:?}")]
    ConfigParse { key: String, value: String },

    #[error("no local directories configured for spill files")]
    NoLocalDirs,
}

pub type Result<T> = std::result::Result<T, MergeError>;
