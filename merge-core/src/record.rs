//! Key/value record wire format used inside a decompressed block.
//!
//! No fixed intra-block record layout is pinned down upstream of this
//! crate (only "sorted key/value records" is required); this is a
//! straightforward length-prefixed scheme invented for this crate:
//! `u32 key_len (BE) | u32 val_len (BE) | key bytes | value bytes`, repeated
//! until the block is exhausted.

use crate::error::{MergeError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Bytes this record occupies when encoded.
    pub fn encoded_len(&self) -> usize {
        8 + self.key.len() + self.value.len()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        out.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.value);
    }
}

pub fn encode_records(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.iter().map(Record::encoded_len).sum());
    for record in records {
        record.encode_into(&mut out);
    }
    out
}

/// Decode as many complete records as `buf` holds, stopping (without error)
/// at a trailing partial header or payload rather than treating it as
/// malformed. Returns the decoded records plus how many leading bytes of
/// `buf` they consumed; the caller is responsible for carrying the
/// unconsumed tail forward to be joined with more bytes, since a fetch
/// buffer boundary can split a record in two.
pub fn decode_records_prefix(buf: &[u8]) -> Result<(Vec<Record>, usize)> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    loop {
        if buf.len() - pos < 8 {
            break;
        }
        let key_len = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        let val_len = u32::from_be_bytes(buf[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let body_start = pos + 8;
        if buf.len() - body_start < key_len + val_len {
            break;
        }
        let key = buf[body_start..body_start + key_len].to_vec();
        let value_start = body_start + key_len;
        let value = buf[value_start..value_start + val_len].to_vec();
        pos = value_start + val_len;
        records.push(Record { key, value });
    }
    Ok((records, pos))
}

/// Decode a full buffer of back-to-back encoded records. The buffer must
/// contain zero or more complete records and nothing else.
pub fn decode_records(buf: &[u8]) -> Result<Vec<Record>> {
    let (records, consumed) = decode_records_prefix(buf)?;
    if consumed != buf.len() {
        return Err(MergeError::MalformedRecordStream);
    }
    Ok(records)
}
