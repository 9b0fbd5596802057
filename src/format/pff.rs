//! PFF packed pyramids.
//!
//! Big-endian layout:
//!
//! ```text
//! [0, 1060)                fixed header
//!   @8    u32 version (1 or 2)
//!   @108  u32 tile size
//!   @116  u32 JPEG header region size
//!   @124  u32 total tile count
//!   @1052 u32 image width
//!   @1056 u32 image height
//! [1060, 1060 + region)    JPEG headers: u32 count, count x u32 length, bytes
//! [1060 + region, ...)     tile index: 12-byte records (u64 offset, u32 length)
//! ```
//!
//! The tile index covers every tile of the pyramid, thumbnail tier first.
//! When a header region is present each tile body ends with the index of
//! the header it needs.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::{FetchDescriptor, FormatOptions};
use crate::error::{FormatError, PackedError, TileError};
use crate::io::{read_u32_be, read_u64_be, ByteRange, NetConnector};
use crate::pyramid::{calculate_tier_values, ChunkedTable, PyramidDescriptor, TableKind};
use crate::tile::{JpegHeaderTable, TileId};

/// Size of the fixed header.
pub const PFF_HEADER_SIZE: u64 = 1060;

/// Size of one tile index record.
pub const PFF_INDEX_RECORD_SIZE: u32 = 12;

const VERSION_OFFSET: usize = 8;
const TILE_SIZE_OFFSET: usize = 108;
const HEADER_REGION_OFFSET: usize = 116;
const TILE_COUNT_OFFSET: usize = 124;
const WIDTH_OFFSET: usize = 1052;
const HEIGHT_OFFSET: usize = 1056;

/// Fields of the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PffHeader {
    pub version: u32,
    pub tile_size: u32,
    pub header_region_size: u32,
    pub tile_count: u32,
    pub width: u32,
    pub height: u32,
}

impl PffHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, PackedError> {
        if (bytes.len() as u64) < PFF_HEADER_SIZE {
            return Err(PackedError::Truncated {
                required: PFF_HEADER_SIZE,
                actual: bytes.len() as u64,
            });
        }
        let field = |at: usize| read_u32_be(&bytes[at..at + 4]);

        let version = field(VERSION_OFFSET);
        if !(1..=2).contains(&version) {
            return Err(PackedError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            tile_size: field(TILE_SIZE_OFFSET),
            header_region_size: field(HEADER_REGION_OFFSET),
            tile_count: field(TILE_COUNT_OFFSET),
            width: field(WIDTH_OFFSET),
            height: field(HEIGHT_OFFSET),
        })
    }
}

/// Parse the JPEG header region.
pub fn parse_header_region(bytes: &[u8]) -> Result<JpegHeaderTable, PackedError> {
    let truncated = |required: usize| PackedError::Truncated {
        required: required as u64,
        actual: bytes.len() as u64,
    };
    if bytes.len() < 4 {
        return Err(truncated(4));
    }
    let count = read_u32_be(&bytes[0..4]) as usize;
    if count > 256 {
        return Err(PackedError::InvalidTagValue {
            tag: "JpegHeaderCount",
            message: format!("{} headers, at most 256 are addressable", count),
        });
    }

    let lengths_end = 4 + count * 4;
    if bytes.len() < lengths_end {
        return Err(truncated(lengths_end));
    }
    let mut headers = Vec::with_capacity(count);
    let mut at = lengths_end;
    for i in 0..count {
        let len = read_u32_be(&bytes[4 + i * 4..8 + i * 4]) as usize;
        let end = at + len;
        if bytes.len() < end {
            return Err(truncated(end));
        }
        headers.push(Bytes::copy_from_slice(&bytes[at..end]));
        at = end;
    }
    Ok(JpegHeaderTable::new(headers))
}

/// Adapter for PFF files.
#[derive(Debug, Clone)]
pub struct PffAdapter {
    path: String,
    index: Option<ChunkedTable>,
    headers: Option<Arc<JpegHeaderTable>>,
}

impl PffAdapter {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            index: None,
            headers: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Tile index table, once the header is parsed.
    pub fn index_table(&self) -> Option<&ChunkedTable> {
        self.index.as_ref()
    }

    pub fn jpeg_headers(&self) -> Option<&JpegHeaderTable> {
        self.headers.as_deref()
    }

    pub async fn parse(
        &mut self,
        connector: &dyn NetConnector,
        options: &FormatOptions,
    ) -> Result<PyramidDescriptor, FormatError> {
        let fixed = connector
            .load_bytes(&self.path, ByteRange::new(0, PFF_HEADER_SIZE))
            .await?;
        let header = PffHeader::parse(&fixed)?;
        debug!(path = %self.path, ?header, "PFF header");

        if header.width == 0 || header.height == 0 || header.tile_size == 0 {
            return Err(FormatError::InvalidGeometry(format!(
                "{}x{} with tile size {}",
                header.width, header.height, header.tile_size
            )));
        }

        let region = header.header_region_size as u64;
        self.headers = if region > 0 {
            let bytes = connector
                .load_bytes(&self.path, ByteRange::new(PFF_HEADER_SIZE, region))
                .await?;
            let table = parse_header_region(&bytes)?;
            debug!(path = %self.path, headers = table.len(), "JPEG header region");
            Some(Arc::new(table))
        } else {
            None
        };

        let (tiers, rounding) = calculate_tier_values(
            header.width,
            header.height,
            header.tile_size,
            header.tile_size,
            Some(header.tile_count as u64),
        )?;
        debug!(path = %self.path, tiers = tiers.len(), ?rounding, "reconstructed PFF tiers");

        let index = ChunkedTable::new(
            TableKind::TileIndex,
            0,
            PFF_HEADER_SIZE + region,
            header.tile_count as u64,
            PFF_INDEX_RECORD_SIZE,
            options.pff_chunk_size,
        )
        .ok_or_else(|| PackedError::InvalidTagValue {
            tag: "TileIndex",
            message: format!("{} records after a {} byte header region", header.tile_count, region),
        })?;
        self.index = Some(index);

        Ok(PyramidDescriptor::from_tiers(
            header.tile_size,
            header.tile_size,
            &tiers,
        ))
    }

    /// Fetch descriptor of a tile.
    ///
    /// A loaded chunk too short to hold the tile's record, or a record
    /// pointing past the end of the address space, fails the tile.
    pub fn resolve(&self, desc: &PyramidDescriptor, id: TileId) -> Result<FetchDescriptor, TileError> {
        let (Some(table), Some(index)) = (
            self.index.as_ref(),
            desc.linear_index(id.tier, id.col, id.row),
        ) else {
            return Ok(FetchDescriptor::Skip);
        };

        let request = table.request_for(index);
        let Some(chunk) = desc.chunks.get(&request.key) else {
            return Ok(FetchDescriptor::Pending(vec![request]));
        };
        let record = table.record(chunk, index).ok_or_else(|| TileError::InvalidLocation {
            name: id.name(),
            message: format!("index chunk {} holds no record {}", request.key.chunk, index),
        })?;

        let offset = read_u64_be(&record[0..8]);
        let len = read_u32_be(&record[8..12]) as u64;
        if len == 0 {
            return Ok(FetchDescriptor::Skip);
        }
        let range = ByteRange::try_new(offset, len).ok_or_else(|| TileError::InvalidLocation {
            name: id.name(),
            message: format!("{} bytes at offset {} overflow", len, offset),
        })?;
        Ok(FetchDescriptor::Range {
            path: self.path.clone(),
            range,
            headers: self.headers.clone(),
        })
    }
}
