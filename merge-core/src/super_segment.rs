//! `SuperSegment`: a merge cursor over one spill file.
//!
//! The root merge pass in the hybrid strategy runs over `SuperSegment`s
//! instead of live `Segment`s — one per leaf priority queue's spill output.
//! Grounded on the spill-reading cursor pattern in the reference corpus's
//! `estuary-flow` combine/spill code: lazily read one framed block at a
//! time rather than loading the whole file, since a spill file can be
//! arbitrarily large.

use std::path::PathBuf;

use crate::error::Result;
use crate::record::{self, Record};
use crate::spill::SpillReader;
use crate::unit::MergeUnit;

pub struct SuperSegment {
    reader: SpillReader,
    records: Vec<Record>,
    idx: usize,
    seq: u64,
}

impl SuperSegment {
    pub fn open(path: PathBuf, seq: u64) -> Result<Self> {
        Ok(Self {
            reader: SpillReader::open(path)?,
            records: Vec::new(),
            idx: 0,
            seq,
        })
    }

    pub fn prime(&mut self) -> Result<bool> {
        self.pull_next_block()
    }

    fn pull_next_block(&mut self) -> Result<bool> {
        loop {
            match self.reader.read_block()? {
                Some(bytes) => {
                    self.records = record::decode_records(&bytes)?;
                    self.idx = 0;
                    if !self.records.is_empty() {
                        return Ok(true);
                    }
                }
                None => {
                    self.records.clear();
                    self.idx = 0;
                    return Ok(false);
                }
            }
        }
    }
}

impl MergeUnit for SuperSegment {
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
    use crate::spill::SpillWriter;

    #[test]
    fn iterates_records_across_multiple_spilled_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spill.bin");
        let block_a = record::encode_records(&[Record::new(b"a".to_vec(), b"1".to_vec())]);
        let block_b = record::encode_records(&[
            Record::new(b"b".to_vec(), b"2".to_vec()),
            Record::new(b"c".to_vec(), b"3".to_vec()),
        ]);
        let mut writer = SpillWriter::create(path.clone()).unwrap();
        writer.write_block(&block_a).unwrap();
        writer.write_block(&block_b).unwrap();
        writer.finish().unwrap();

        let mut segment = SuperSegment::open(path, 0).unwrap();
        assert!(segment.prime().unwrap());
        assert_eq!(segment.current_key(), b"a");
        assert!(segment.advance().unwrap());
        assert_eq!(segment.current_key(), b"b");
        assert!(segment.advance().unwrap());
        assert_eq!(segment.current_key(), b"c");
        assert!(!segment.advance().unwrap());
    }

    #[test]
    fn empty_spill_file_primes_to_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spill.bin");
        SpillWriter::create(path.clone()).unwrap().finish().unwrap();
        let mut segment = SuperSegment::open(path, 0).unwrap();
        assert!(!segment.prime().unwrap());
    }
}
