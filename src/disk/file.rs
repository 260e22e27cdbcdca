//! File-backed overflow store
//!
//! # Record Layout
//!
//! ```text
//! ┌────────┬─────┬─────┬──────────┬─────────┬─────────────┬──────────┬─────────┐
//! │ magic  │ alg │ pad │ key hash │ version │ payload len │ checksum │ payload │
//! │ u32    │ u8  │ 3B  │ u64      │ u64     │ u32         │ u32      │ ...     │
//! └────────┴─────┴─────┴──────────┴─────────┴─────────────┴──────────┴─────────┘
//!  little-endian, 32-byte header
//! ```
//!
//! Freed records become holes. New records take the first hole large enough
//! (first fit); adjacent holes are merged and a hole at the end of the file is
//! truncated away.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{DiskSlot, DiskToken, OverflowStats, OverflowStore};
use crate::compression::{CompressionAlgorithm, CompressionManager};
use crate::error::{Error, Result};
use crate::key::fx_hash;

const RECORD_MAGIC: u32 = 0x5253_4f56;
const HEADER_LEN: usize = 32;

/// Name of the overflow file inside the store directory
pub const OVERFLOW_FILE_NAME: &str = "overflow.dat";

#[derive(Debug, Clone, Copy)]
struct Extent {
    offset: u64,
    len: u64,
}

struct FileState {
    file: File,
    /// Current file length
    end: u64,
    /// offset -> length of free extents
    holes: BTreeMap<u64, u64>,
}

impl FileState {
    /// First hole that fits `len`, carved from its front
    fn take_hole(&mut self, len: u64) -> Option<u64> {
        let (&offset, &hole_len) = self.holes.iter().find(|&(_, &hole)| hole >= len)?;
        self.holes.remove(&offset);
        if hole_len > len {
            self.holes.insert(offset + len, hole_len - len);
        }
        Some(offset)
    }

    /// Return an extent, merging with neighbours
    fn give_back(&mut self, extent: Extent) -> Result<()> {
        let mut offset = extent.offset;
        let mut len = extent.len;

        if let Some((&prev_off, &prev_len)) = self.holes.range(..offset).next_back() {
            if prev_off + prev_len == offset {
                self.holes.remove(&prev_off);
                offset = prev_off;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.holes.remove(&(offset + len)) {
            len += next_len;
        }

        if offset + len == self.end {
            self.file.set_len(offset)?;
            self.end = offset;
        } else {
            self.holes.insert(offset, len);
        }
        Ok(())
    }
}

/// Overflow store writing slots to a single file
pub struct FileOverflowStore {
    path: PathBuf,
    state: Mutex<FileState>,
    index: DashMap<u64, Extent>,
    next_token: AtomicU64,
    max_bytes: u64,
    stored: AtomicU64,
    compression: CompressionManager,
    persists: AtomicU64,
    recalls: AtomicU64,
    frees: AtomicU64,
}

impl FileOverflowStore {
    /// Create the store in `directory`, truncating any previous overflow file.
    ///
    /// Slots are only addressed by in-memory tokens, so nothing survives a
    /// restart.
    pub fn open(
        directory: impl AsRef<Path>,
        max_bytes: u64,
        compression: CompressionManager,
    ) -> Result<Self> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;
        let path = directory.join(OVERFLOW_FILE_NAME);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        info!(
            "Opened overflow store at {} (max {} bytes, compression {})",
            path.display(),
            max_bytes,
            compression.algorithm()
        );

        Ok(Self {
            path,
            state: Mutex::new(FileState {
                file,
                end: 0,
                holes: BTreeMap::new(),
            }),
            index: DashMap::new(),
            next_token: AtomicU64::new(1),
            max_bytes,
            stored: AtomicU64::new(0),
            compression,
            persists: AtomicU64::new(0),
            recalls: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        })
    }

    /// Path of the overflow file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the overflow file
    pub fn file_len(&self) -> u64 {
        self.state.lock().end
    }

    /// Number of free extents awaiting reuse
    pub fn hole_count(&self) -> usize {
        self.state.lock().holes.len()
    }

    fn encode_record(
        key_hash: u64,
        version: u64,
        algorithm: CompressionAlgorithm,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            Error::Internal(format!("slot of {} bytes exceeds record limit", payload.len()))
        })?;

        let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
        record.extend_from_slice(&RECORD_MAGIC.to_le_bytes());
        record.push(algorithm.tag());
        record.extend_from_slice(&[0u8; 3]);
        record.extend_from_slice(&key_hash.to_le_bytes());
        record.extend_from_slice(&version.to_le_bytes());
        record.extend_from_slice(&payload_len.to_le_bytes());
        record.extend_from_slice(&checksum(payload).to_le_bytes());
        record.extend_from_slice(payload);
        Ok(record)
    }

    fn decode_record(&self, token: DiskToken, record: &[u8]) -> Result<DiskSlot> {
        let corrupt = |reason: &str| Error::CorruptSlot {
            token: token.id(),
            reason: reason.to_string(),
        };

        if record.len() < HEADER_LEN {
            return Err(corrupt("short record"));
        }
        let u32_at = |at: usize| {
            u32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]])
        };
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&record[at..at + 8]);
            u64::from_le_bytes(raw)
        };

        if u32_at(0) != RECORD_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let algorithm =
            CompressionAlgorithm::from_tag(record[4]).ok_or_else(|| corrupt("unknown algorithm"))?;
        let key_hash = u64_at(8);
        let version = u64_at(16);
        let payload_len = u32_at(24) as usize;
        let expected = u32_at(28);

        let payload = &record[HEADER_LEN..];
        if payload.len() != payload_len {
            return Err(corrupt("payload length mismatch"));
        }
        if checksum(payload) != expected {
            return Err(corrupt("checksum mismatch"));
        }

        Ok(DiskSlot {
            key_hash,
            version,
            bytes: self.compression.decode(payload, algorithm)?,
        })
    }
}

impl OverflowStore for FileOverflowStore {
    fn persist(&self, key_hash: u64, version: u64, bytes: &[u8]) -> Result<DiskToken> {
        let (payload, algorithm) = self.compression.encode(bytes);
        let record = Self::encode_record(key_hash, version, algorithm, &payload)?;
        let len = record.len() as u64;

        let offset = {
            let mut state = self.state.lock();
            let offset = match state.take_hole(len) {
                Some(offset) => offset,
                None => {
                    if state.end + len > self.max_bytes {
                        return Err(Error::DiskFull {
                            requested: len,
                            capacity: self.max_bytes,
                        });
                    }
                    let offset = state.end;
                    state.end += len;
                    offset
                }
            };

            let written = state
                .file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| state.file.write_all(&record));
            if let Err(e) = written {
                // hand the extent back so the space is not lost
                state.give_back(Extent { offset, len })?;
                return Err(e.into());
            }
            offset
        };

        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.index.insert(id, Extent { offset, len });
        self.stored.fetch_add(len, Ordering::AcqRel);
        self.persists.fetch_add(1, Ordering::Relaxed);
        debug!(token = id, offset, len, "persisted overflow slot");

        Ok(DiskToken::new(id))
    }

    fn recall(&self, token: DiskToken) -> Result<DiskSlot> {
        let extent = *self
            .index
            .get(&token.id())
            .ok_or(Error::UnknownDiskToken(token.id()))?;

        let mut record = vec![0u8; extent.len as usize];
        {
            let mut state = self.state.lock();
            state.file.seek(SeekFrom::Start(extent.offset))?;
            state.file.read_exact(&mut record)?;
        }

        let slot = self.decode_record(token, &record)?;
        self.recalls.fetch_add(1, Ordering::Relaxed);
        Ok(slot)
    }

    fn free(&self, token: DiskToken) -> Result<()> {
        let (_, extent) = self
            .index
            .remove(&token.id())
            .ok_or(Error::UnknownDiskToken(token.id()))?;

        self.state.lock().give_back(extent)?;
        self.stored.fetch_sub(extent.len, Ordering::AcqRel);
        self.frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> OverflowStats {
        OverflowStats {
            slots: self.index.len(),
            stored_bytes: self.stored.load(Ordering::Acquire),
            capacity_bytes: self.max_bytes,
            persists: self.persists.load(Ordering::Relaxed),
            recalls: self.recalls.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
        }
    }
}

fn checksum(payload: &[u8]) -> u32 {
    let hash = fx_hash(payload);
    (hash ^ (hash >> 32)) as u32
}
