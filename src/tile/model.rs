//! Tile identity and loaded tile values.

use std::fmt;
use std::str::FromStr;

use image::RgbaImage;

// =============================================================================
// TileId
// =============================================================================

/// Coordinates of one tile in the pyramid.
///
/// The canonical name is `"{tier}-{col}-{row}"`. It is the key of the tile
/// cache and of every in-flight bookkeeping map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub tier: usize,
    pub col: u32,
    pub row: u32,
}

impl TileId {
    pub const fn new(tier: usize, col: u32, row: u32) -> Self {
        Self { tier, col, row }
    }

    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.tier, self.col, self.row)
    }
}

impl FromStr for TileId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        let mut next = |what: &str| {
            parts
                .next()
                .ok_or_else(|| format!("tile name '{}' is missing {}", s, what))
        };
        let tier = next("tier")?;
        let col = next("column")?;
        let row = next("row")?;
        if parts.next().is_some() {
            return Err(format!("tile name '{}' has extra components", s));
        }
        let bad = |e: std::num::ParseIntError| format!("tile name '{}': {}", s, e);
        Ok(TileId::new(
            tier.parse().map_err(bad)?,
            col.parse().map_err(bad)?,
            row.parse().map_err(bad)?,
        ))
    }
}

// =============================================================================
// Request classification
// =============================================================================

/// Why a tile is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Current tier, drawn on the frontfill layer
    Frontfill,
    /// Low tier drawn beneath frontfill
    Backfill,
    /// Preloaded region; cached but never drawn into the view layers
    Magnifier,
}

/// Dispatch order of a tile request batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawOrder {
    /// As given (row-major for a bounding box)
    #[default]
    Sequential,
    /// Nearest to the center of the requested set first
    CenterOut,
}

// =============================================================================
// TileImage / Tile
// =============================================================================

/// Decoded RGBA pixels of a tile.
#[derive(Clone)]
pub struct TileImage {
    pixels: RgbaImage,
}

impl TileImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

impl fmt::Debug for TileImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// A resolved tile.
///
/// Tiles are immutable once built and shared as `Arc<Tile>` between the
/// cache and both draw layers. Fade-in progress is tracked by the renderer.
#[derive(Debug, Clone)]
pub struct Tile {
    pub id: TileId,
    /// Left edge in tier pixels (negative only for overlapping formats)
    pub pixel_x: i64,
    /// Top edge in tier pixels
    pub pixel_y: i64,
    /// `None` for sparse tiles, which resolve without a fetch and draw nothing
    pub image: Option<TileImage>,
}

impl Tile {
    pub fn loaded(id: TileId, pixel_x: i64, pixel_y: i64, image: TileImage) -> Self {
        Self {
            id,
            pixel_x,
            pixel_y,
            image: Some(image),
        }
    }

    pub fn sparse(id: TileId, pixel_x: i64, pixel_y: i64) -> Self {
        Self {
            id,
            pixel_x,
            pixel_y,
            image: None,
        }
    }

    pub fn is_sparse(&self) -> bool {
        self.image.is_none()
    }

    pub fn name(&self) -> String {
        self.id.name()
    }
}
