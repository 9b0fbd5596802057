//! Pyramid geometry shared by every source format.
//!
//! A [`PyramidDescriptor`] lists the tiers from thumbnail to full resolution
//! and maps tile coordinates to linear indices in packed lookup tables.

use super::chunks::ChunkStore;
use super::reconstruct::TierDims;

// =============================================================================
// Tier
// =============================================================================

/// Geometry of one pyramid tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    /// Width of this tier in pixels
    pub width: u32,

    /// Height of this tier in pixels
    pub height: u32,

    /// Number of tiles in X direction
    pub tiles_x: u32,

    /// Number of tiles in Y direction
    pub tiles_y: u32,

    /// Total number of tiles in this tier
    pub tile_count: u64,

    /// Linear index of this tier's first tile, counting every tile of the
    /// lower tiers (thumbnail first)
    pub first_tile: u64,
}

// =============================================================================
// PyramidDescriptor
// =============================================================================

/// Parsed structure of an image pyramid.
///
/// Tier 0 is the thumbnail, `max_tier()` the full-resolution image. The
/// descriptor starts empty when an image is opened, is filled by one format
/// adapter parse, and is discarded when the displayed image changes. Packed
/// formats keep filling [`PyramidDescriptor::chunks`] as lookup-table chunks
/// arrive.
#[derive(Debug, Clone, Default)]
pub struct PyramidDescriptor {
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
    tiers: Vec<Tier>,

    /// Offset / byte-count chunks fetched so far (packed formats only)
    pub chunks: ChunkStore,
}

impl PyramidDescriptor {
    /// Descriptor with no tiers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a descriptor from thumbnail-first tier dimensions.
    ///
    /// The full image size is taken from the last tier.
    pub fn from_tiers(tile_width: u32, tile_height: u32, dims: &[TierDims]) -> Self {
        let (image_width, image_height) = dims
            .last()
            .map(|d| (d.width, d.height))
            .unwrap_or((0, 0));

        let mut tiers = Vec::with_capacity(dims.len());
        let mut first_tile = 0u64;
        for d in dims {
            let tiles_x = d.tiles_x(tile_width);
            let tiles_y = d.tiles_y(tile_height);
            let tile_count = tiles_x as u64 * tiles_y as u64;
            tiers.push(Tier {
                width: d.width,
                height: d.height,
                tiles_x,
                tiles_y,
                tile_count,
                first_tile,
            });
            first_tile += tile_count;
        }

        Self {
            image_width,
            image_height,
            tile_width,
            tile_height,
            tiers,
            chunks: ChunkStore::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Index of the full-resolution tier (0 when empty).
    pub fn max_tier(&self) -> usize {
        self.tiers.len().saturating_sub(1)
    }

    pub fn tier(&self, tier: usize) -> Option<&Tier> {
        self.tiers.get(tier)
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn tier_widths(&self) -> Vec<u32> {
        self.tiers.iter().map(|t| t.width).collect()
    }

    pub fn tier_heights(&self) -> Vec<u32> {
        self.tiers.iter().map(|t| t.height).collect()
    }

    pub fn tier_tile_counts(&self) -> Vec<u64> {
        self.tiers.iter().map(|t| t.tile_count).collect()
    }

    pub fn total_tile_count(&self) -> u64 {
        self.tiers.iter().map(|t| t.tile_count).sum()
    }

    /// Whether `(tier, col, row)` addresses a tile of this pyramid.
    pub fn is_valid_tile(&self, tier: usize, col: u32, row: u32) -> bool {
        self.tiers
            .get(tier)
            .is_some_and(|t| col < t.tiles_x && row < t.tiles_y)
    }

    /// Row-major index of a tile within its tier.
    pub fn index_in_tier(&self, tier: usize, col: u32, row: u32) -> Option<u64> {
        let t = self.tiers.get(tier)?;
        if col >= t.tiles_x || row >= t.tiles_y {
            return None;
        }
        Some(row as u64 * t.tiles_x as u64 + col as u64)
    }

    /// Index of a tile across the whole pyramid, thumbnail tier first.
    pub fn linear_index(&self, tier: usize, col: u32, row: u32) -> Option<u64> {
        let within = self.index_in_tier(tier, col, row)?;
        Some(self.tiers[tier].first_tile + within)
    }

    /// Zoom at which `tier` is displayed at its native resolution.
    pub fn native_zoom(&self, tier: usize) -> f64 {
        match self.tiers.get(tier) {
            Some(t) if self.image_width > 0 => t.width as f64 / self.image_width as f64,
            _ => 1.0,
        }
    }

    /// Canvas scale applied on top of `tier`'s native resolution to reach `zoom`.
    pub fn tier_scale_for(&self, tier: usize, zoom: f64) -> f64 {
        zoom / self.native_zoom(tier)
    }

    /// Zoom reached when `tier` is drawn at `scale`.
    pub fn zoom_for(&self, tier: usize, scale: f64) -> f64 {
        scale * self.native_zoom(tier)
    }

    /// Full-resolution pixel rectangle `(x, y, w, h)` covered by a tile.
    ///
    /// Edge tiles are clipped to the tier bounds.
    pub fn tile_image_rect(&self, tier: usize, col: u32, row: u32) -> Option<(f64, f64, f64, f64)> {
        let t = self.tiers.get(tier)?;
        if col >= t.tiles_x || row >= t.tiles_y {
            return None;
        }
        let x0 = col as u64 * self.tile_width as u64;
        let y0 = row as u64 * self.tile_height as u64;
        let x1 = (x0 + self.tile_width as u64).min(t.width as u64);
        let y1 = (y0 + self.tile_height as u64).min(t.height as u64);

        let sx = self.image_width as f64 / t.width as f64;
        let sy = self.image_height as f64 / t.height as f64;
        Some((
            x0 as f64 * sx,
            y0 as f64 * sy,
            (x1 - x0) as f64 * sx,
            (y1 - y0) as f64 * sy,
        ))
    }
}
