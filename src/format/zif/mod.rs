//! ZIF packed pyramids.
//!
//! A ZIF file is a little-endian BigTIFF whose IFD chain holds one directory
//! per tier, full resolution first. Tile offsets (tag 324) and byte counts
//! (tag 325) are stored inline when they fit in the 8-byte value field and
//! in out-of-line tables otherwise. Tables are fetched lazily in chunks of
//! `zif_chunk_size` records.

pub mod ifd;

use std::collections::HashSet;

use bytes::Bytes;
use tracing::debug;

use self::ifd::{parse_header, FieldType, Ifd, IfdEntry, ZifTag, IFD_COUNT_SIZE, ZIF_HEADER_SIZE};
use super::{FetchDescriptor, FormatOptions};
use crate::error::{FormatError, IoError, PackedError, TileError};
use crate::io::{ByteRange, NetConnector};
use crate::pyramid::{ChunkRequest, ChunkedTable, PyramidDescriptor, TableKind, TierDims};
use crate::tile::TileId;

/// Upper bound on directories followed in the IFD chain.
const MAX_IFDS: usize = 64;

/// Where a tier's offsets or byte counts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    /// One or two values stored in the IFD entry itself
    Inline(Vec<u64>),
    /// Out-of-line table fetched chunk by chunk
    Chunked(ChunkedTable),
}

impl TableSource {
    fn from_entry(
        entry: &IfdEntry,
        tag: ZifTag,
        kind: TableKind,
        chunk_size: u64,
    ) -> Result<Self, PackedError> {
        let ty = entry.field_type()?;
        if ty.fits_inline(entry.count) {
            return Ok(TableSource::Inline(entry.inline_values()?));
        }
        let start = entry.value_offset();
        ChunkedTable::new(kind, 0, start, entry.count, ty.size_in_bytes(), chunk_size)
            .map(TableSource::Chunked)
            .ok_or_else(|| PackedError::InvalidTagValue {
                tag: tag.name(),
                message: format!("table of {} records at offset {} overflows", entry.count, start),
            })
    }

    fn set_tier(&mut self, tier: usize) {
        if let TableSource::Chunked(table) = self {
            table.tier = tier;
        }
    }

    /// Value of record `index`, or the chunk to fetch first.
    fn lookup(&self, desc: &PyramidDescriptor, index: u64) -> Result<u64, ChunkRequest> {
        match self {
            TableSource::Inline(values) => Ok(values.get(index as usize).copied().unwrap_or(0)),
            TableSource::Chunked(table) => {
                let request = table.request_for(index);
                let Some(chunk) = desc.chunks.get(&request.key) else {
                    return Err(request);
                };
                let ty = match table.record_size {
                    2 => FieldType::Short,
                    4 => FieldType::Long,
                    _ => FieldType::Long8,
                };
                Ok(table
                    .record(chunk, index)
                    .map(|record| ty.read(record))
                    .unwrap_or(0))
            }
        }
    }
}

/// Offset and byte-count sources of one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTables {
    pub offsets: TableSource,
    pub byte_counts: TableSource,
}

/// Adapter for ZIF files.
#[derive(Debug, Clone)]
pub struct ZifAdapter {
    path: String,
    tiers: Vec<TierTables>,
}

impl ZifAdapter {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            tiers: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Per-tier tables, thumbnail first.
    pub fn tier_tables(&self) -> &[TierTables] {
        &self.tiers
    }

    pub async fn parse(
        &mut self,
        connector: &dyn NetConnector,
        options: &FormatOptions,
    ) -> Result<PyramidDescriptor, FormatError> {
        let prefix = self
            .fetch_prefix(connector, options.zif_header_bytes.max(ZIF_HEADER_SIZE as u64))
            .await?;
        let first = parse_header(&prefix)?;

        let mut ifds = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = first;
        while offset != 0 {
            if ifds.len() >= MAX_IFDS || !seen.insert(offset) {
                return Err(PackedError::InvalidIfdOffset(offset).into());
            }
            let ifd = self.read_ifd(connector, &prefix, offset).await?;
            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }
        if ifds.is_empty() {
            return Err(PackedError::InvalidIfdOffset(first).into());
        }
        debug!(path = %self.path, ifds = ifds.len(), "read ZIF directory chain");

        let mut dims = Vec::with_capacity(ifds.len());
        let mut tables = Vec::with_capacity(ifds.len());
        let mut tile_size: Option<(u32, u32)> = None;

        for (index, ifd) in ifds.iter().enumerate() {
            let width = scalar_u32(ifd, ZifTag::ImageWidth, index)?;
            let height = scalar_u32(ifd, ZifTag::ImageLength, index)?;
            let tw = scalar_u32(ifd, ZifTag::TileWidth, index)?;
            let th = scalar_u32(ifd, ZifTag::TileLength, index)?;
            if width == 0 || height == 0 || tw == 0 || th == 0 {
                return Err(FormatError::InvalidGeometry(format!(
                    "IFD {}: {}x{} with {}x{} tiles",
                    index, width, height, tw, th
                )));
            }
            match tile_size {
                None => tile_size = Some((tw, th)),
                Some(expected) if expected != (tw, th) => {
                    return Err(PackedError::InvalidTagValue {
                        tag: ZifTag::TileWidth.name(),
                        message: format!(
                            "IFD {} uses {}x{} tiles, expected {}x{}",
                            index, tw, th, expected.0, expected.1
                        ),
                    }
                    .into())
                }
                Some(_) => {}
            }

            let tier = TierDims::new(width, height);
            let tiles = tier.tile_count(tw, th);
            let offsets = ifd.require(ZifTag::TileOffsets, index)?;
            let byte_counts = ifd.require(ZifTag::TileByteCounts, index)?;
            for (entry, tag) in [
                (offsets, ZifTag::TileOffsets),
                (byte_counts, ZifTag::TileByteCounts),
            ] {
                if entry.count != tiles {
                    return Err(PackedError::InvalidTagValue {
                        tag: tag.name(),
                        message: format!(
                            "IFD {} lists {} values for {} tiles",
                            index, entry.count, tiles
                        ),
                    }
                    .into());
                }
            }

            dims.push(tier);
            tables.push(TierTables {
                offsets: TableSource::from_entry(
                    offsets,
                    ZifTag::TileOffsets,
                    TableKind::Offsets,
                    options.zif_chunk_size,
                )?,
                byte_counts: TableSource::from_entry(
                    byte_counts,
                    ZifTag::TileByteCounts,
                    TableKind::ByteCounts,
                    options.zif_chunk_size,
                )?,
            });
        }

        // File order is full resolution first
        dims.reverse();
        tables.reverse();
        for (tier, t) in tables.iter_mut().enumerate() {
            t.offsets.set_tier(tier);
            t.byte_counts.set_tier(tier);
        }
        self.tiers = tables;

        let (tw, th) = tile_size.unwrap_or((0, 0));
        Ok(PyramidDescriptor::from_tiers(tw, th, &dims))
    }

    /// Fetch the header prefix, shrinking the request for files smaller than it.
    async fn fetch_prefix(
        &self,
        connector: &dyn NetConnector,
        len: u64,
    ) -> Result<Bytes, FormatError> {
        match connector.load_bytes(&self.path, ByteRange::new(0, len)).await {
            Ok(bytes) => Ok(bytes),
            Err(IoError::RangeOutOfBounds { size, .. }) if size > 0 && size < len => {
                debug!(path = %self.path, size, "file shorter than header prefix");
                Ok(connector.load_bytes(&self.path, ByteRange::new(0, size)).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_ifd(
        &self,
        connector: &dyn NetConnector,
        prefix: &Bytes,
        offset: u64,
    ) -> Result<Ifd, FormatError> {
        let head = self
            .span(connector, prefix, offset, IFD_COUNT_SIZE as u64)
            .await?;
        let count = Ifd::parse_entry_count(&head)?;
        let body = self
            .span(connector, prefix, offset, Ifd::byte_size(count))
            .await?;
        Ok(Ifd::parse(&body, offset)?)
    }

    /// Bytes `[offset, offset + len)`, from the prefix when it covers them.
    async fn span(
        &self,
        connector: &dyn NetConnector,
        prefix: &Bytes,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, FormatError> {
        let end = offset.saturating_add(len);
        if end <= prefix.len() as u64 {
            return Ok(prefix.slice(offset as usize..end as usize));
        }
        debug!(path = %self.path, offset, len, "IFD outside header prefix");
        let range = ByteRange::try_new(offset, len).ok_or(PackedError::InvalidIfdOffset(offset))?;
        match connector.load_bytes(&self.path, range).await {
            Ok(bytes) => Ok(bytes),
            Err(IoError::RangeOutOfBounds { .. }) => {
                Err(PackedError::InvalidIfdOffset(offset).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch descriptor of a tile.
    ///
    /// An offset and byte count that overflow the file's address space fail
    /// the tile.
    pub fn resolve(&self, desc: &PyramidDescriptor, id: TileId) -> Result<FetchDescriptor, TileError> {
        let Some(tables) = self.tiers.get(id.tier) else {
            return Ok(FetchDescriptor::Skip);
        };
        let index = desc.index_in_tier(id.tier, id.col, id.row).unwrap_or(0);

        let offset = tables.offsets.lookup(desc, index);
        let count = tables.byte_counts.lookup(desc, index);
        Ok(match (offset, count) {
            (Ok(_), Ok(0)) => FetchDescriptor::Skip,
            (Ok(offset), Ok(count)) => FetchDescriptor::Range {
                path: self.path.clone(),
                range: ByteRange::try_new(offset, count).ok_or_else(|| TileError::InvalidLocation {
                    name: id.name(),
                    message: format!("{} bytes at offset {} overflow", count, offset),
                })?,
                headers: None,
            },
            (offset, count) => FetchDescriptor::Pending(
                [offset.err(), count.err()].into_iter().flatten().collect(),
            ),
        })
    }
}

fn scalar_u32(ifd: &Ifd, tag: ZifTag, index: usize) -> Result<u32, PackedError> {
    let value = ifd.require(tag, index)?.scalar(tag)?;
    u32::try_from(value).map_err(|_| PackedError::InvalidTagValue {
        tag: tag.name(),
        message: format!("{} does not fit in 32 bits", value),
    })
}
