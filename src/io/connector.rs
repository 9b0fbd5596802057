use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{IoError, TileError};
use crate::tile::{decode_tile_blocking, TileImage};

// =============================================================================
// ByteRange
// =============================================================================

/// Half-open byte range `[start, end)` within a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Range covering `len` bytes from `start`, clamped to the end of the
    /// address space. Use [`ByteRange::try_new`] for offsets read from files.
    pub const fn new(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    /// Range covering `len` bytes from `start`, or `None` when the end
    /// overflows.
    pub const fn try_new(start: u64, len: u64) -> Option<Self> {
        match start.checked_add(len) {
            Some(end) => Some(Self { start, end }),
            None => None,
        }
    }

    #[inline]
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// HTTP `Range` header value ("bytes=start-end", inclusive on both ends).
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

// =============================================================================
// NetConnector Trait
// =============================================================================

/// Transport used by the viewer for every byte it needs.
///
/// Header fetches, chunk fetches and tile fetches are the only asynchronous
/// boundaries of the engine and all of them go through this trait.
/// Implementations must be thread-safe, since tile loads run on spawned tasks.
#[async_trait]
pub trait NetConnector: Send + Sync {
    /// Read a byte range of the resource at `path`.
    ///
    /// Must honour partial-content semantics: exactly `range.len()` bytes are
    /// returned, or an error.
    async fn load_bytes(&self, path: &str, range: ByteRange) -> Result<Bytes, IoError>;

    /// Fetch a complete resource.
    async fn load_resource(&self, path: &str) -> Result<Bytes, IoError>;

    /// Fetch a properties document (XML or JSON) as text.
    async fn load_properties(&self, path: &str) -> Result<String, IoError> {
        let bytes = self.load_resource(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Fetch and decode an image resource.
    async fn load_image(&self, url: &str) -> Result<TileImage, TileError> {
        let bytes = self.load_resource(url).await?;
        decode_tile_blocking(url.to_string(), bytes).await
    }

    /// Whether byte-range reads are available.
    ///
    /// Packed single-file formats cannot be opened without them.
    fn supports_byte_ranges(&self) -> bool {
        true
    }

    /// Identifier used in log lines.
    fn identifier(&self) -> &str;
}

// =============================================================================
// MemoryConnector
// =============================================================================

/// Connector over in-memory blobs.
///
/// Serves images that are already client-side (dropped files, embedded
/// resources) and counts every request it answers.
#[derive(Default)]
pub struct MemoryConnector {
    blobs: HashMap<String, Bytes>,
    range_requests: AtomicUsize,
    resource_requests: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blob under `path`.
    pub fn with_blob(mut self, path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.blobs.insert(path.into(), data.into());
        self
    }

    pub fn range_requests(&self) -> usize {
        self.range_requests.load(Ordering::SeqCst)
    }

    pub fn resource_requests(&self) -> usize {
        self.resource_requests.load(Ordering::SeqCst)
    }

    fn blob(&self, path: &str) -> Result<&Bytes, IoError> {
        self.blobs
            .get(path)
            .ok_or_else(|| IoError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl NetConnector for MemoryConnector {
    async fn load_bytes(&self, path: &str, range: ByteRange) -> Result<Bytes, IoError> {
        self.range_requests.fetch_add(1, Ordering::SeqCst);
        let blob = self.blob(path)?;
        if range.end > blob.len() as u64 {
            return Err(IoError::RangeOutOfBounds {
                offset: range.start,
                requested: range.len(),
                size: blob.len() as u64,
            });
        }
        Ok(blob.slice(range.start as usize..range.end as usize))
    }

    async fn load_resource(&self, path: &str) -> Result<Bytes, IoError> {
        self.resource_requests.fetch_add(1, Ordering::SeqCst);
        self.blob(path).cloned()
    }

    fn identifier(&self) -> &str {
        "memory://"
    }
}

// =============================================================================
// Endian Helper Functions
// =============================================================================
//
// ZIF is little-endian BigTIFF, PFF stores big-endian fields. Both parsers
// read through these helpers.

/// Read a little-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read a big-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// Read a little-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a big-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Read a big-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_be(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
