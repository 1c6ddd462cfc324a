//! Spill files: the on-disk intermediate the hybrid merge strategy uses
//! between its leaf (LPQ) and root (RPQ) merge passes.
//!
//! Spill files reuse the same 8-byte block-header framing the wire format
//! uses, but always uncompressed (`raw_len == compressed_len`) — the
//! original disables compression on the root merge path entirely, and
//! there is no reason to pay a second compress/decompress round trip on
//! data this process just merged itself.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::decompressor::{frame_block, read_block_header, BLOCK_HEADER_LEN};
use crate::error::{MergeError, Result};

/// Round-robins spill file placement across the configured local
/// directories. Starts from a randomly chosen directory per `MergeManager`
/// instance rather than a process-wide static counter, since (unlike the
/// original, one reducer per process) this crate may run several
/// `MergeManager`s in one process.
pub struct LocalDirRotation {
    dirs: Vec<PathBuf>,
    next: AtomicUsize,
}

impl LocalDirRotation {
    pub fn new(dirs: Vec<PathBuf>) -> Result<Self> {
        if dirs.is_empty() {
            return Err(MergeError::NoLocalDirs);
        }
        let start = rand::thread_rng().gen_range(0..dirs.len());
        Ok(Self {
            dirs,
            next: AtomicUsize::new(start),
        })
    }

    pub fn next_dir(&self) -> &Path {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.dirs.len();
        &self.dirs[idx]
    }

    pub fn next_path(&self, file_name: &str) -> PathBuf {
        self.next_dir().join(file_name)
    }
}

pub struct SpillWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SpillWriter {
    pub fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "failed to create spill file");
            MergeError::SpillIo {
                path: path.clone(),
                source: e,
            }
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one block of already record-encoded bytes.
    pub fn write_block(&mut self, raw: &[u8]) -> Result<()> {
        let framed = frame_block(raw.len() as u32, raw);
        self.writer.write_all(&framed).map_err(|e| MergeError::SpillIo {
            path: self.path.clone(),
            source: e,
        })
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer.flush().map_err(|e| MergeError::SpillIo {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(self.path)
    }
}

pub struct SpillReader {
    path: PathBuf,
    reader: BufReader<File>,
}

impl SpillReader {
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = File::open(&path).map_err(|e| MergeError::SpillIo {
            path: path.clone(),
            source: e,
        })?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
        })
    }

    /// Read the next framed block's decoded payload, or `None` at EOF.
    pub fn read_block(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; BLOCK_HEADER_LEN];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(MergeError::SpillIo {
                    path: self.path.clone(),
                    source: e,
                })
            }
        }
        let (_raw_len, compressed_len) = read_block_header(&header)?;
        let mut payload = vec![0u8; compressed_len as usize];
        self.reader
            .read_exact(&mut payload)
            .map_err(|e| MergeError::SpillIo {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_back_blocks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spill.bin");
        let mut writer = SpillWriter::create(path.clone()).unwrap();
        writer.write_block(b"first block").unwrap();
        writer.write_block(b"second block, longer").unwrap();
        writer.finish().unwrap();

        let mut reader = SpillReader::open(path).unwrap();
        assert_eq!(reader.read_block().unwrap().unwrap(), b"first block");
        assert_eq!(
            reader.read_block().unwrap().unwrap(),
            b"second block, longer"
        );
        assert!(reader.read_block().unwrap().is_none());
    }

    #[test]
    fn local_dir_rotation_cycles_through_all_dirs() {
        let dirs = vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")];
        let rotation = LocalDirRotation::new(dirs.clone()).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..dirs.len() {
            seen.insert(rotation.next_dir().to_path_buf());
        }
        assert_eq!(seen.len(), dirs.len());
    }

    #[test]
    fn rotation_rejects_empty_dir_list() {
        assert!(matches!(
            LocalDirRotation::new(Vec::new()),
            Err(MergeError::NoLocalDirs)
        ));
    }
}
