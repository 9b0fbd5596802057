//! BigTIFF header and IFD parsing for ZIF files.
//!
//! # Header (16 bytes)
//! ```text
//! Bytes 0-1:  "II" (little-endian only)
//! Bytes 2-3:  Version 43 (BigTIFF)
//! Bytes 4-5:  Offset byte size (8)
//! Bytes 6-7:  Reserved (0)
//! Bytes 8-15: Offset of the first IFD
//! ```
//!
//! # IFD
//! ```text
//! u64         entry count
//! 20 * count  entries: tag u16 @0, type u16 @2, count u64 @4, value u64 @12
//! u64         offset of the next IFD (0 terminates the chain)
//! ```

use crate::error::PackedError;
use crate::io::{read_u16_le, read_u32_le, read_u64_le};

/// Expected leading bytes of every ZIF file.
pub const ZIF_MAGIC: [u8; 8] = [0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00];

/// Size of the BigTIFF header in bytes.
pub const ZIF_HEADER_SIZE: usize = 16;

/// Size of one IFD entry.
pub const IFD_ENTRY_SIZE: usize = 20;

/// Size of the entry count field and of the next-IFD field.
pub const IFD_COUNT_SIZE: usize = 8;

/// Bytes available for an inline value.
const INLINE_THRESHOLD: u64 = 8;

/// Upper bound on entries per IFD; anything above is treated as corruption.
const MAX_IFD_ENTRIES: u64 = 4096;

// =============================================================================
// Tags and field types
// =============================================================================

/// Tags read from a ZIF directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ZifTag {
    ImageWidth = 256,
    ImageLength = 257,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
}

impl ZifTag {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    pub const fn name(self) -> &'static str {
        match self {
            ZifTag::ImageWidth => "ImageWidth",
            ZifTag::ImageLength => "ImageLength",
            ZifTag::TileWidth => "TileWidth",
            ZifTag::TileLength => "TileLength",
            ZifTag::TileOffsets => "TileOffsets",
            ZifTag::TileByteCounts => "TileByteCounts",
        }
    }
}

/// Integer field types that can appear in the tags above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Short = 3,
    Long = 4,
    Long8 = 16,
}

impl FieldType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            16 => Some(FieldType::Long8),
            _ => None,
        }
    }

    #[inline]
    pub const fn size_in_bytes(self) -> u32 {
        match self {
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Long8 => 8,
        }
    }

    /// Whether `count` values fit in the 8-byte value field.
    #[inline]
    pub fn fits_inline(self, count: u64) -> bool {
        self.size_in_bytes() as u64 * count <= INLINE_THRESHOLD
    }

    /// Decode one little-endian value of this type.
    pub fn read(self, bytes: &[u8]) -> u64 {
        match self {
            FieldType::Short => read_u16_le(bytes) as u64,
            FieldType::Long => read_u32_le(bytes) as u64,
            FieldType::Long8 => read_u64_le(bytes),
        }
    }
}

// =============================================================================
// Header
// =============================================================================

/// Validate the ZIF header and return the first IFD offset.
pub fn parse_header(bytes: &[u8]) -> Result<u64, PackedError> {
    if bytes.len() < ZIF_HEADER_SIZE {
        return Err(PackedError::Truncated {
            required: ZIF_HEADER_SIZE as u64,
            actual: bytes.len() as u64,
        });
    }
    if bytes[..8] != ZIF_MAGIC {
        return Err(PackedError::InvalidMagic {
            expected: "49 49 2B 00 08 00 00 00",
            actual: hex_prefix(&bytes[..8]),
        });
    }

    let first = read_u64_le(&bytes[8..16]);
    if first < ZIF_HEADER_SIZE as u64 {
        return Err(PackedError::InvalidIfdOffset(first));
    }
    Ok(first)
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// IFD
// =============================================================================

/// One 20-byte directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type_raw: u16,
    pub count: u64,
    /// Raw 8-byte value field: inline values or the offset of the values
    pub value: [u8; 8],
}

impl IfdEntry {
    pub fn parse(bytes: &[u8]) -> Self {
        let mut value = [0u8; 8];
        value.copy_from_slice(&bytes[12..20]);
        Self {
            tag: read_u16_le(&bytes[0..2]),
            field_type_raw: read_u16_le(&bytes[2..4]),
            count: read_u64_le(&bytes[4..12]),
            value,
        }
    }

    pub fn field_type(&self) -> Result<FieldType, PackedError> {
        FieldType::from_u16(self.field_type_raw)
            .ok_or(PackedError::UnknownFieldType(self.field_type_raw))
    }

    pub fn is_inline(&self) -> Result<bool, PackedError> {
        Ok(self.field_type()?.fits_inline(self.count))
    }

    /// Offset of the out-of-line values.
    pub fn value_offset(&self) -> u64 {
        read_u64_le(&self.value)
    }

    /// Inline values, in order.
    ///
    /// A single 8-byte value occupies the whole field; two 4-byte values sit
    /// at field offsets 0 and 4.
    pub fn inline_values(&self) -> Result<Vec<u64>, PackedError> {
        let ty = self.field_type()?;
        if !ty.fits_inline(self.count) {
            return Err(PackedError::InvalidTagValue {
                tag: "inline",
                message: format!("{} values of {:?} do not fit inline", self.count, ty),
            });
        }
        let size = ty.size_in_bytes() as usize;
        Ok((0..self.count as usize)
            .map(|i| ty.read(&self.value[i * size..(i + 1) * size]))
            .collect())
    }

    /// Single scalar value (dimensions and tile sizes).
    pub fn scalar(&self, tag: ZifTag) -> Result<u64, PackedError> {
        if self.count != 1 {
            return Err(PackedError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected count 1, got {}", self.count),
            });
        }
        Ok(self.inline_values()?[0])
    }
}

/// A parsed image file directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    /// File offset the directory was read from
    pub offset: u64,
    pub entries: Vec<IfdEntry>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Size of an IFD with `entry_count` entries, including both count fields.
    pub fn byte_size(entry_count: u64) -> u64 {
        IFD_COUNT_SIZE as u64 * 2 + entry_count * IFD_ENTRY_SIZE as u64
    }

    /// Read the entry count at the start of a directory.
    pub fn parse_entry_count(bytes: &[u8]) -> Result<u64, PackedError> {
        if bytes.len() < IFD_COUNT_SIZE {
            return Err(PackedError::Truncated {
                required: IFD_COUNT_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }
        let count = read_u64_le(&bytes[..IFD_COUNT_SIZE]);
        if count == 0 || count > MAX_IFD_ENTRIES {
            return Err(PackedError::InvalidTagValue {
                tag: "IFD",
                message: format!("implausible entry count {}", count),
            });
        }
        Ok(count)
    }

    /// Parse a directory from bytes starting at its entry count.
    pub fn parse(bytes: &[u8], offset: u64) -> Result<Self, PackedError> {
        let count = Self::parse_entry_count(bytes)?;
        let required = Self::byte_size(count);
        if (bytes.len() as u64) < required {
            return Err(PackedError::Truncated {
                required,
                actual: bytes.len() as u64,
            });
        }

        let entries = (0..count as usize)
            .map(|i| {
                let start = IFD_COUNT_SIZE + i * IFD_ENTRY_SIZE;
                IfdEntry::parse(&bytes[start..start + IFD_ENTRY_SIZE])
            })
            .collect();
        let next_start = IFD_COUNT_SIZE + count as usize * IFD_ENTRY_SIZE;
        let next_ifd_offset = read_u64_le(&bytes[next_start..next_start + IFD_COUNT_SIZE]);

        Ok(Self {
            offset,
            entries,
            next_ifd_offset,
        })
    }

    pub fn get(&self, tag: ZifTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag.as_u16())
    }

    /// Entry for a tag that must be present.
    pub fn require(&self, tag: ZifTag, ifd: usize) -> Result<&IfdEntry, PackedError> {
        self.get(tag).ok_or(PackedError::MissingTag {
            tag: tag.name(),
            ifd,
        })
    }
}
