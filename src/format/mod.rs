//! Pyramid source formats.
//!
//! A [`FormatAdapter`] turns a source path into a [`PyramidDescriptor`] and
//! turns `(tier, col, row)` into a [`FetchDescriptor`]. One adapter variant
//! exists per container:
//!
//! | Variant | Source |
//! |---|---|
//! | `TileFolder` | `ImageProperties.xml` + `TileGroupN/` folders |
//! | `PackedA` | ZIF: single BigTIFF-style file, tiles by byte range |
//! | `PackedB` | PFF: single file with a chunked unified tile index |
//! | `DeepZoom` | `.dzi` descriptor + `_files/` folders |
//! | `ImageServer` | Slide tile server with JSON metadata |
//!
//! Folder formats are ready after one properties fetch. Packed formats read
//! a header up front and fetch their offset tables chunk by chunk later, as
//! tiles need them.

mod deepzoom;
mod folder;
mod pff;
mod server;
pub mod zif;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

pub use deepzoom::DeepZoomAdapter;
pub use folder::FolderAdapter;
pub use pff::{PffAdapter, PFF_HEADER_SIZE};
pub use server::{ServerAdapter, SlideLevel, SlideMetadata};
pub use zif::ZifAdapter;

use crate::error::{FormatError, TileError};
use crate::io::{ByteRange, NetConnector};
use crate::pyramid::{ChunkRequest, PyramidDescriptor};
use crate::tile::{JpegHeaderTable, TileId};

/// Default size of the ZIF header prefix fetched at open time.
pub const DEFAULT_ZIF_HEADER_BYTES: u64 = 8192;

/// Default records per ZIF offset / byte-count chunk.
pub const DEFAULT_ZIF_CHUNK_SIZE: u64 = 1024;

/// Default records per PFF tile-index chunk.
pub const DEFAULT_PFF_CHUNK_SIZE: u64 = 256;

// =============================================================================
// SourceFormat
// =============================================================================

/// Container format of an image source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    TileFolder,
    Zif,
    Pff,
    DeepZoom,
    ImageServer,
}

impl SourceFormat {
    /// Guess the format from a path or URL.
    pub fn detect(path: &str) -> Self {
        let trimmed = path.split(['?', '#']).next().unwrap_or(path);
        let lower = trimmed.trim_end_matches('/').to_ascii_lowercase();

        if lower.ends_with(".zif") {
            SourceFormat::Zif
        } else if lower.ends_with(".pff") {
            SourceFormat::Pff
        } else if lower.ends_with("imageproperties.xml") {
            SourceFormat::TileFolder
        } else if lower.ends_with(".dzi") || lower.ends_with(".xml") {
            SourceFormat::DeepZoom
        } else if lower.contains("/slides/") {
            SourceFormat::ImageServer
        } else {
            SourceFormat::TileFolder
        }
    }

    /// Whether the format addresses tiles by byte range.
    pub const fn is_packed(&self) -> bool {
        matches!(self, SourceFormat::Zif | SourceFormat::Pff)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            SourceFormat::TileFolder => "folder",
            SourceFormat::Zif => "zif",
            SourceFormat::Pff => "pff",
            SourceFormat::DeepZoom => "dzi",
            SourceFormat::ImageServer => "server",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "folder" | "zoomify" => Ok(SourceFormat::TileFolder),
            "zif" => Ok(SourceFormat::Zif),
            "pff" => Ok(SourceFormat::Pff),
            "dzi" | "deepzoom" => Ok(SourceFormat::DeepZoom),
            "server" => Ok(SourceFormat::ImageServer),
            other => Err(format!(
                "unknown format '{}', expected folder, zif, pff, dzi or server",
                other
            )),
        }
    }
}

// =============================================================================
// FetchDescriptor / AdapterState
// =============================================================================

/// How to obtain the bytes of one tile.
#[derive(Debug, Clone)]
pub enum FetchDescriptor {
    /// Whole resource at a path or URL
    Url(String),

    /// Byte range inside a packed file
    Range {
        path: String,
        range: ByteRange,
        /// Shared JPEG headers to prepend, selected by the body's last byte
        headers: Option<Arc<JpegHeaderTable>>,
    },

    /// The offset or byte count is in table chunks that are not loaded yet
    Pending(Vec<ChunkRequest>),

    /// Sparse tile: zero stored bytes, resolved without a fetch
    Skip,
}

impl FetchDescriptor {
    pub fn is_pending(&self) -> bool {
        matches!(self, FetchDescriptor::Pending(_))
    }
}

/// Readiness of a parsed adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Table chunks are still being fetched on demand
    ChunksPending,
    Ready,
}

/// Tunables consumed while parsing packed headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub zif_header_bytes: u64,
    pub zif_chunk_size: u64,
    pub pff_chunk_size: u64,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            zif_header_bytes: DEFAULT_ZIF_HEADER_BYTES,
            zif_chunk_size: DEFAULT_ZIF_CHUNK_SIZE,
            pff_chunk_size: DEFAULT_PFF_CHUNK_SIZE,
        }
    }
}

// =============================================================================
// FormatAdapter
// =============================================================================

/// Source-specific pyramid parsing and tile addressing.
#[derive(Debug, Clone)]
pub enum FormatAdapter {
    TileFolder(FolderAdapter),
    PackedA(ZifAdapter),
    PackedB(PffAdapter),
    DeepZoom(DeepZoomAdapter),
    ImageServer(ServerAdapter),
}

impl FormatAdapter {
    /// Adapter for `path`, using `format` or detecting it from the path.
    pub fn new(path: &str, format: Option<SourceFormat>) -> Self {
        match format.unwrap_or_else(|| SourceFormat::detect(path)) {
            SourceFormat::TileFolder => FormatAdapter::TileFolder(FolderAdapter::new(path)),
            SourceFormat::Zif => FormatAdapter::PackedA(ZifAdapter::new(path)),
            SourceFormat::Pff => FormatAdapter::PackedB(PffAdapter::new(path)),
            SourceFormat::DeepZoom => FormatAdapter::DeepZoom(DeepZoomAdapter::new(path)),
            SourceFormat::ImageServer => FormatAdapter::ImageServer(ServerAdapter::new(path)),
        }
    }

    pub fn format(&self) -> SourceFormat {
        match self {
            FormatAdapter::TileFolder(_) => SourceFormat::TileFolder,
            FormatAdapter::PackedA(_) => SourceFormat::Zif,
            FormatAdapter::PackedB(_) => SourceFormat::Pff,
            FormatAdapter::DeepZoom(_) => SourceFormat::DeepZoom,
            FormatAdapter::ImageServer(_) => SourceFormat::ImageServer,
        }
    }

    /// Path the image was opened from.
    pub fn format_path(&self) -> &str {
        match self {
            FormatAdapter::TileFolder(a) => a.root(),
            FormatAdapter::PackedA(a) => a.path(),
            FormatAdapter::PackedB(a) => a.path(),
            FormatAdapter::DeepZoom(a) => a.path(),
            FormatAdapter::ImageServer(a) => a.path(),
        }
    }

    /// Fetch and parse the pyramid header.
    ///
    /// Packed formats need byte-range reads; a connector without them is an
    /// environment error raised before any request is made.
    pub async fn parse_header(
        &mut self,
        connector: &dyn NetConnector,
        options: &FormatOptions,
    ) -> Result<PyramidDescriptor, FormatError> {
        let format = self.format();
        if format.is_packed() && !connector.supports_byte_ranges() {
            return Err(FormatError::Environment(format!(
                "{} sources need byte-range reads, which {} does not provide",
                format,
                connector.identifier()
            )));
        }

        debug!(format = %format, path = %self.format_path(), "requesting pyramid header");
        let desc = match self {
            FormatAdapter::TileFolder(a) => a.parse(connector).await?,
            FormatAdapter::PackedA(a) => a.parse(connector, options).await?,
            FormatAdapter::PackedB(a) => a.parse(connector, options).await?,
            FormatAdapter::DeepZoom(a) => a.parse(connector).await?,
            FormatAdapter::ImageServer(a) => a.parse(connector).await?,
        };

        info!(
            format = %format,
            width = desc.image_width(),
            height = desc.image_height(),
            tiers = desc.tier_count(),
            tiles = desc.total_tile_count(),
            "pyramid header parsed"
        );
        Ok(desc)
    }

    /// Resolve a tile to a fetch descriptor.
    ///
    /// Coordinates outside the tier grid are an error, as are table entries
    /// that point outside the file.
    pub fn resolve_tile(
        &self,
        desc: &PyramidDescriptor,
        id: TileId,
    ) -> Result<FetchDescriptor, TileError> {
        if !desc.is_valid_tile(id.tier, id.col, id.row) {
            return Err(TileError::OutOfBounds {
                tier: id.tier,
                col: id.col,
                row: id.row,
            });
        }

        Ok(match self {
            FormatAdapter::TileFolder(a) => a.resolve(desc, id),
            FormatAdapter::PackedA(a) => a.resolve(desc, id)?,
            FormatAdapter::PackedB(a) => a.resolve(desc, id)?,
            FormatAdapter::DeepZoom(a) => a.resolve(id),
            FormatAdapter::ImageServer(a) => a.resolve(desc, id),
        })
    }

    /// Path byte-range chunk requests are issued against.
    pub fn data_path(&self) -> &str {
        self.format_path()
    }

    /// Pixels each tile image extends past its nominal cell on the left and
    /// top (deep zoom overlap).
    pub fn overlap(&self) -> u32 {
        match self {
            FormatAdapter::DeepZoom(a) => a.overlap(),
            _ => 0,
        }
    }

    /// Top-left corner of a tile in tier pixels.
    pub fn tile_origin(&self, desc: &PyramidDescriptor, id: TileId) -> (i64, i64) {
        let overlap = self.overlap() as i64;
        let mut x = id.col as i64 * desc.tile_width() as i64;
        let mut y = id.row as i64 * desc.tile_height() as i64;
        if id.col > 0 {
            x -= overlap;
        }
        if id.row > 0 {
            y -= overlap;
        }
        (x, y)
    }

    /// State of a parsed adapter given the chunks still in flight.
    pub fn state_for(&self, desc: &PyramidDescriptor) -> AdapterState {
        if desc.chunks.pending_count() > 0 {
            AdapterState::ChunksPending
        } else {
            AdapterState::Ready
        }
    }
}
