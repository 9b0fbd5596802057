//! Tile bounding boxes and fit/fill zoom.

use super::transform::{rotated_extent, Point, ViewTransform};
use crate::pyramid::PyramidDescriptor;

/// Inclusive rectangle of tile indices within one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileBounds {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl TileBounds {
    pub const fn new(left: u32, right: u32, top: u32, bottom: u32) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    pub fn contains(&self, col: u32, row: u32) -> bool {
        col >= self.left && col <= self.right && row >= self.top && row <= self.bottom
    }

    pub fn width(&self) -> u32 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top + 1
    }

    pub fn count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Geometric center in tile units.
    pub fn center(&self) -> Point {
        Point::new(
            (self.left + self.right) as f64 / 2.0,
            (self.top + self.bottom) as f64 / 2.0,
        )
    }

    /// Row-major iteration over `(col, row)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> {
        let (left, right) = (self.left, self.right);
        (self.top..=self.bottom).flat_map(move |row| (left..=right).map(move |col| (col, row)))
    }
}

/// Tiles of `tier` intersecting the viewport described by `view`.
///
/// `pan_buffer` scales the visible area about the view center before
/// conversion to tile indices. The result is clamped to the tier grid, so an
/// off-image view still yields the nearest edge tiles. Returns `None` for an
/// unknown tier.
pub fn viewport_bounding_box_in_tiles(
    desc: &PyramidDescriptor,
    tier: usize,
    view: &ViewTransform,
    pan_buffer: f64,
) -> Option<TileBounds> {
    let t = desc.tier(tier)?;
    // Rounded tier sizes can shrink the axes by different ratios
    let native_x = desc.native_zoom(tier);
    let native_y = match desc.image_height() {
        0 => 1.0,
        h => t.height as f64 / h as f64,
    };
    let (x0, y0, x1, y1) = view.visible_image_rect(pan_buffer);

    let tw = desc.tile_width() as f64;
    let th = desc.tile_height() as f64;
    let to_col = |x: f64| clamp_index((x * native_x / tw).floor(), t.tiles_x);
    let to_row = |y: f64| clamp_index((y * native_y / th).floor(), t.tiles_y);

    Some(TileBounds::new(to_col(x0), to_col(x1), to_row(y0), to_row(y1)))
}

fn clamp_index(v: f64, count: u32) -> u32 {
    let max = count.saturating_sub(1) as f64;
    if v.is_nan() {
        return 0;
    }
    v.clamp(0.0, max) as u32
}

/// Zoom at which the whole image fits inside the viewport.
pub fn zoom_to_fit(
    viewport_width: f64,
    viewport_height: f64,
    image_width: f64,
    image_height: f64,
    rotation: f64,
) -> f64 {
    let (w, h) = rotated_extent(image_width, image_height, rotation);
    if w <= 0.0 || h <= 0.0 {
        return 1.0;
    }
    (viewport_width / w).min(viewport_height / h)
}

/// Zoom at which the image covers the whole viewport.
pub fn zoom_to_fill(
    viewport_width: f64,
    viewport_height: f64,
    image_width: f64,
    image_height: f64,
    rotation: f64,
) -> f64 {
    let (w, h) = rotated_extent(image_width, image_height, rotation);
    if w <= 0.0 || h <= 0.0 {
        return 1.0;
    }
    (viewport_width / w).max(viewport_height / h)
}
