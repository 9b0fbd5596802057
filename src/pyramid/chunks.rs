//! Lazily fetched offset / byte-count tables of the packed formats.
//!
//! A packed file stores one record per tile. Large tables are never read in
//! one piece: they are split into fixed-size chunks and a chunk is fetched
//! only when a tile inside it is first needed. The [`ChunkStore`] remembers
//! which chunks are resident and which have a fetch outstanding, so a chunk is
//! requested at most once no matter how many tiles wait on it.

use std::collections::HashMap;

use bytes::Bytes;

use crate::io::ByteRange;

/// Which lookup table a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// ZIF tile offsets (tag 324)
    Offsets,
    /// ZIF tile byte counts (tag 325)
    ByteCounts,
    /// PFF unified tile index (offset + byte count per record)
    TileIndex,
}

/// Identifies one chunk of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub kind: TableKind,
    /// Tier the table belongs to (0 for tables spanning all tiers)
    pub tier: usize,
    pub chunk: u64,
}

impl ChunkKey {
    pub const fn new(kind: TableKind, tier: usize, chunk: u64) -> Self {
        Self { kind, tier, chunk }
    }
}

/// A chunk that must be fetched before some tile can be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub key: ChunkKey,
    pub range: ByteRange,
}

// =============================================================================
// ChunkedTable
// =============================================================================

/// Location and shape of a table stored elsewhere in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedTable {
    pub kind: TableKind,
    pub tier: usize,
    /// File offset of record 0
    pub start: u64,
    /// Number of records in the table
    pub records: u64,
    /// Size of one record in bytes
    pub record_size: u32,
    /// Records per chunk
    pub chunk_size: u64,
}

impl ChunkedTable {
    /// Table of `records` records of `record_size` bytes at `start`.
    ///
    /// Returns `None` when the table would end past the addressable range,
    /// which only a corrupt file can describe.
    pub fn new(
        kind: TableKind,
        tier: usize,
        start: u64,
        records: u64,
        record_size: u32,
        chunk_size: u64,
    ) -> Option<Self> {
        records
            .checked_mul(record_size as u64)
            .and_then(|len| start.checked_add(len))?;
        Some(Self {
            kind,
            tier,
            start,
            records,
            record_size,
            chunk_size: chunk_size.max(1),
        })
    }

    /// Chunk holding record `index`.
    ///
    /// Callers bound-check `index` against `records` first.
    #[inline]
    pub fn chunk_for(&self, index: u64) -> u64 {
        index / self.chunk_size
    }

    pub fn chunk_count(&self) -> u64 {
        self.records.div_ceil(self.chunk_size)
    }

    pub fn key(&self, chunk: u64) -> ChunkKey {
        ChunkKey::new(self.kind, self.tier, chunk)
    }

    /// Byte range of a chunk; the last chunk may be short.
    ///
    /// Chunks past the end of the table come back empty.
    pub fn chunk_range(&self, chunk: u64) -> ByteRange {
        let first = chunk.saturating_mul(self.chunk_size);
        let count = self.chunk_size.min(self.records.saturating_sub(first));
        let record_size = self.record_size as u64;
        let offset = first.min(self.records).saturating_mul(record_size);
        ByteRange::try_new(self.start.saturating_add(offset), count * record_size)
            .unwrap_or(ByteRange::new(self.start, 0))
    }

    pub fn request_for(&self, index: u64) -> ChunkRequest {
        let chunk = self.chunk_for(index);
        ChunkRequest {
            key: self.key(chunk),
            range: self.chunk_range(chunk),
        }
    }

    /// Byte slice of record `index` inside its resident chunk.
    pub fn record<'a>(&self, chunk_bytes: &'a [u8], index: u64) -> Option<&'a [u8]> {
        let within = (index % self.chunk_size) as usize * self.record_size as usize;
        chunk_bytes.get(within..within + self.record_size as usize)
    }
}

// =============================================================================
// ChunkStore
// =============================================================================

#[derive(Debug, Clone)]
enum ChunkState {
    Pending,
    Resident(Bytes),
}

/// Resident and pending chunks for the current image.
///
/// Mutated only from the session's update loop.
#[derive(Debug, Default, Clone)]
pub struct ChunkStore {
    chunks: HashMap<ChunkKey, ChunkState>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resident bytes for `key`, if loaded.
    pub fn get(&self, key: &ChunkKey) -> Option<&Bytes> {
        match self.chunks.get(key) {
            Some(ChunkState::Resident(bytes)) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_pending(&self, key: &ChunkKey) -> bool {
        matches!(self.chunks.get(key), Some(ChunkState::Pending))
    }

    /// Record that a fetch for `key` is about to be issued.
    ///
    /// Returns `false` if the chunk is already pending or resident, in which
    /// case no new fetch must be issued.
    pub fn mark_pending(&mut self, key: ChunkKey) -> bool {
        if self.chunks.contains_key(&key) {
            return false;
        }
        self.chunks.insert(key, ChunkState::Pending);
        true
    }

    /// Store a fetched chunk.
    pub fn install(&mut self, key: ChunkKey, bytes: Bytes) {
        self.chunks.insert(key, ChunkState::Resident(bytes));
    }

    /// Forget a failed fetch so that a later request can retry it.
    pub fn clear_pending(&mut self, key: &ChunkKey) {
        if self.is_pending(key) {
            self.chunks.remove(key);
        }
    }

    pub fn resident_count(&self) -> usize {
        self.chunks
            .values()
            .filter(|s| matches!(s, ChunkState::Resident(_)))
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.chunks
            .values()
            .filter(|s| matches!(s, ChunkState::Pending))
            .count()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}
