//! The fetch request lifecycle and the reply-envelope wire format.
//!
//! The transport itself (RDMA verbs, sockets, whatever a real shuffle
//! plugin uses) is out of scope; this module only owns what the core needs
//! from it: a `FetchRequest` that lazily allocates its `MapOutput`, and the
//! narrow `FetchClient` trait a transport implements to drive one fetch
//! attempt and report completion back through the MOF's own state machine.

use std::sync::{Arc, Mutex};

use crate::decompressor::Registry;
use crate::error::{MergeError, Result};
use crate::mapoutput::{BufferSlot, FetchSignal, MapOutput, MofOrigin};
use crate::pool::BufferPool;

/// Sentinel `mofpath` value a transport reports in place of a real path
/// when the remote-side path string didn't fit its own fixed-size buffer.
/// Spec-mandated literal, not a length threshold this crate computes itself.
pub const MOF_PATH_TOO_LONG_SENTINEL: &str = "MOF_PATH_SIZE_TOO_LONG";

#[derive(Debug, Clone)]
pub struct HostDescriptor {
    pub host: String,
    pub port: u16,
}

/// One map output this reducer needs to fetch, as handed to
/// `MergeManager::run` by the caller (the demo binary enumerates these from
/// a directory; a real reduce task would get them from the job tracker).
#[derive(Debug, Clone)]
pub struct FetchTarget {
    pub job_id: String,
    pub map_id: String,
    pub reduce_id: String,
    pub host: HostDescriptor,
    pub expected_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReply {
    pub raw_len: u64,
    pub part_len: u64,
    pub recv: u64,
    pub mof_offset: u64,
    pub mof_path: String,
}

/// Parse a fetch-reply envelope of the form
/// `rawlen:partlen:recv:mofoff:mofpath:`.
pub fn parse_fetch_reply(envelope: &str) -> Result<FetchReply> {
    let malformed = || MergeError::MalformedEnvelope {
        envelope: envelope.to_string(),
    };

    let mut fields = envelope.splitn(5, ':');
    let raw_len = fields.next().ok_or_else(malformed)?;
    let part_len = fields.next().ok_or_else(malformed)?;
    let recv = fields.next().ok_or_else(malformed)?;
    let mof_offset = fields.next().ok_or_else(malformed)?;
    let path_field = fields.next().ok_or_else(malformed)?;
    let mof_path = path_field.strip_suffix(':').unwrap_or(path_field).to_string();

    if mof_path == MOF_PATH_TOO_LONG_SENTINEL {
        tracing::error!("fetch reply reported oversized MOF path sentinel");
        return Err(MergeError::OversizedMofPath);
    }

    Ok(FetchReply {
        raw_len: raw_len.parse().map_err(|_| malformed())?,
        part_len: part_len.parse().map_err(|_| malformed())?,
        recv: recv.parse().map_err(|_| malformed())?,
        mof_offset: mof_offset.parse().map_err(|_| malformed())?,
        mof_path,
    })
}

pub fn format_fetch_reply(reply: &FetchReply) -> String {
    format!(
        "{}:{}:{}:{}:{}:",
        reply.raw_len, reply.part_len, reply.recv, reply.mof_offset, reply.mof_path
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed(FetchSignal),
    /// The transport accepted the request but cannot make progress right
    /// now (e.g. reservation-queue backpressure on the remote host). This
    /// is explicitly not an error: callers retry later.
    Backlogged,
}

pub struct FetchRequest {
    pub id: u64,
    pub target: FetchTarget,
    mop: Mutex<Option<Arc<MapOutput>>>,
}

impl FetchRequest {
    pub fn new(id: u64, target: FetchTarget) -> Self {
        Self {
            id,
            target,
            mop: Mutex::new(None),
        }
    }

    pub fn mop(&self) -> Option<Arc<MapOutput>> {
        self.mop.lock().unwrap().clone()
    }

    /// Lazily allocate this request's `MapOutput`, acquiring its buffer
    /// pair from `pool`. A no-op returning the existing MOF if already
    /// allocated (refetches reuse the same MOF for the request's whole
    /// lifetime).
    pub fn ensure_mop(&self, mop_id: u64, pool: &BufferPool) -> Result<Arc<MapOutput>> {
        let mut guard = self.mop.lock().unwrap();
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        let mof_path = format!(
            "{}.{}.{}.mof",
            self.target.job_id, self.target.map_id, self.target.reduce_id
        );
        let origin = MofOrigin {
            job_id: self.target.job_id.clone(),
            map_id: self.target.map_id.clone(),
            reduce_id: self.target.reduce_id.clone(),
            host: self.target.host.host.clone(),
            mof_path,
        };
        let mop = Arc::new(MapOutput::new(mop_id, origin, self.target.expected_len, pool)?);
        *guard = Some(mop.clone());
        Ok(mop)
    }
}

/// What a transport implements to actually move bytes for one fetch
/// attempt. Implementations write fetched bytes into `mop`'s `slot` via
/// `MapOutput::write_fetched_bytes` and then call
/// `MapOutput::complete_fetch`, returning the resulting signal.
pub trait FetchClient: Send + Sync {
    fn start_fetch_req(
        &self,
        req: &FetchRequest,
        mop: &MapOutput,
        slot: BufferSlot,
        registry: Option<&Registry>,
    ) -> Result<FetchOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_envelope() {
        let reply = parse_fetch_reply("1024:512:512:0:/tmp/job.m0.r0.mof:").unwrap();
        assert_eq!(
            reply,
            FetchReply {
                raw_len: 1024,
                part_len: 512,
                recv: 512,
                mof_offset: 0,
                mof_path: "/tmp/job.m0.r0.mof".to_string(),
            }
        );
    }

    #[test]
    fn format_and_parse_round_trip() {
        let reply = FetchReply {
            raw_len: 99,
            part_len: 33,
            recv: 33,
            mof_offset: 66,
            mof_path: "job.m1.r2.mof".to_string(),
        };
        let envelope = format_fetch_reply(&reply);
        assert_eq!(parse_fetch_reply(&envelope).unwrap(), reply);
    }

    #[test]
    fn rejects_malformed_envelope() {
        assert!(matches!(
            parse_fetch_reply("not-enough-fields"),
            Err(MergeError::MalformedEnvelope { .. })
        ));
    }

    #[test]
    fn rejects_oversized_mof_path_sentinel() {
        let envelope = format!("0:0:0:0:{}:", MOF_PATH_TOO_LONG_SENTINEL);
        assert!(matches!(
            parse_fetch_reply(&envelope),
            Err(MergeError::OversizedMofPath)
        ));
    }
}
