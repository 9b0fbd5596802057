//! Draw targets.
//!
//! A [`Surface`] has three stacked layers, drawn bottom to top:
//! oversize backfill, backfill and frontfill. Tiles are placed by their
//! full-resolution image rectangle and the view transform, so a surface can
//! honour zoom and rotation however it likes.

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::geometry::{Point, ViewTransform};
use crate::tile::{Tile, TileId};

/// One of the stacked draw layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    OversizeBackfill,
    Backfill,
    Frontfill,
}

impl Layer {
    /// Bottom to top.
    pub const ALL: [Layer; 3] = [Layer::OversizeBackfill, Layer::Backfill, Layer::Frontfill];

    const fn index(self) -> usize {
        match self {
            Layer::OversizeBackfill => 0,
            Layer::Backfill => 1,
            Layer::Frontfill => 2,
        }
    }
}

/// Where a tile image lands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePlacement {
    /// Left edge in full-resolution image pixels
    pub x: f64,
    pub y: f64,
    /// Extent in full-resolution image pixels
    pub width: f64,
    pub height: f64,
    pub transform: ViewTransform,
}

impl TilePlacement {
    /// Viewport positions of the top-left, top-right, bottom-right and
    /// bottom-left corners.
    pub fn viewport_corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.x + self.width, self.y),
            Point::new(self.x + self.width, self.y + self.height),
            Point::new(self.x, self.y + self.height),
        ]
        .map(|p| self.transform.image_to_viewport(p))
    }
}

/// Rendering collaborator of the view engine.
pub trait Surface: Send {
    fn resize(&mut self, width: u32, height: u32);

    fn clear(&mut self, layer: Layer);

    /// Draw a loaded tile at `alpha` in `[0, 1]`.
    fn draw_tile(&mut self, layer: Layer, tile: &Tile, placement: &TilePlacement, alpha: f64);

    /// Interactive offset applied on top of the drawn content: the layer is
    /// scaled by `scale` about the viewport center and moved by `(dx, dy)`.
    fn set_offset(&mut self, layer: Layer, dx: f64, dy: f64, scale: f64);

    /// Finish a frame.
    fn present(&mut self);
}

// =============================================================================
// RecordingSurface
// =============================================================================

/// A call made on a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    Resize(u32, u32),
    Clear(Layer),
    Tile {
        layer: Layer,
        id: TileId,
        alpha: f64,
    },
    Offset {
        layer: Layer,
        dx: f64,
        dy: f64,
        scale: f64,
    },
    Present,
}

/// Surface that records every call.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    calls: Vec<DrawCall>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[DrawCall] {
        &self.calls
    }

    /// Drain the recorded calls.
    pub fn take(&mut self) -> Vec<DrawCall> {
        std::mem::take(&mut self.calls)
    }

    /// Tiles drawn on `layer`, in draw order.
    pub fn tiles_drawn(&self, layer: Layer) -> Vec<TileId> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DrawCall::Tile { layer: l, id, .. } if *l == layer => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn frames(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DrawCall::Present))
            .count()
    }
}

impl Surface for RecordingSurface {
    fn resize(&mut self, width: u32, height: u32) {
        self.calls.push(DrawCall::Resize(width, height));
    }

    fn clear(&mut self, layer: Layer) {
        self.calls.push(DrawCall::Clear(layer));
    }

    fn draw_tile(&mut self, layer: Layer, tile: &Tile, _placement: &TilePlacement, alpha: f64) {
        self.calls.push(DrawCall::Tile {
            layer,
            id: tile.id,
            alpha,
        });
    }

    fn set_offset(&mut self, layer: Layer, dx: f64, dy: f64, scale: f64) {
        self.calls.push(DrawCall::Offset {
            layer,
            dx,
            dy,
            scale,
        });
    }

    fn present(&mut self) {
        self.calls.push(DrawCall::Present);
    }
}

// =============================================================================
// RasterSurface
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Offset {
    dx: f64,
    dy: f64,
    scale: f64,
}

impl Default for Offset {
    fn default() -> Self {
        Self {
            dx: 0.0,
            dy: 0.0,
            scale: 1.0,
        }
    }
}

/// Software surface compositing tiles into RGBA layers.
///
/// Tiles are sampled nearest-neighbour through the inverse view transform.
pub struct RasterSurface {
    layers: [RgbaImage; 3],
    offsets: [Offset; 3],
    background: Rgba<u8>,
    frames: usize,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            layers: std::array::from_fn(|_| RgbaImage::new(width, height)),
            offsets: [Offset::default(); 3],
            background: Rgba([0, 0, 0, 0]),
            frames: 0,
        }
    }

    /// Color under all layers in [`RasterSurface::composite`].
    pub fn with_background(mut self, background: Rgba<u8>) -> Self {
        self.background = background;
        self
    }

    pub fn width(&self) -> u32 {
        self.layers[0].width()
    }

    pub fn height(&self) -> u32 {
        self.layers[0].height()
    }

    pub fn layer(&self, layer: Layer) -> &RgbaImage {
        &self.layers[layer.index()]
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Flatten the layers, bottom to top, applying each layer's offset.
    pub fn composite(&self) -> RgbaImage {
        let (w, h) = (self.width(), self.height());
        let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
        let mut out = RgbaImage::from_pixel(w, h, self.background);

        for layer in Layer::ALL {
            let src = &self.layers[layer.index()];
            let off = self.offsets[layer.index()];
            for (px, py, dst) in out.enumerate_pixels_mut() {
                let sx = cx + (px as f64 + 0.5 - cx - off.dx) / off.scale;
                let sy = cy + (py as f64 + 0.5 - cy - off.dy) / off.scale;
                if sx < 0.0 || sy < 0.0 || sx >= w as f64 || sy >= h as f64 {
                    continue;
                }
                let s = src.get_pixel(sx as u32, sy as u32);
                blend(dst, *s, 1.0);
            }
        }
        out
    }

    /// Write the composite as PNG.
    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        self.composite().save_with_format(path, image::ImageFormat::Png)
    }
}

impl Surface for RasterSurface {
    fn resize(&mut self, width: u32, height: u32) {
        self.layers = std::array::from_fn(|_| RgbaImage::new(width, height));
    }

    fn clear(&mut self, layer: Layer) {
        for p in self.layers[layer.index()].pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    fn draw_tile(&mut self, layer: Layer, tile: &Tile, placement: &TilePlacement, alpha: f64) {
        let Some(image) = tile.image.as_ref() else {
            return;
        };
        if placement.width <= 0.0 || placement.height <= 0.0 || alpha <= 0.0 {
            return;
        }
        let pixels = image.pixels();
        let target = &mut self.layers[layer.index()];
        let (w, h) = (target.width(), target.height());

        let corners = placement.viewport_corners();
        let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min).floor().max(0.0);
        let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min).floor().max(0.0);
        let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max).ceil().min(w as f64);
        let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max).ceil().min(h as f64);
        if min_x >= max_x || min_y >= max_y {
            return;
        }

        let sx_scale = pixels.width() as f64 / placement.width;
        let sy_scale = pixels.height() as f64 / placement.height;
        for vy in min_y as u32..max_y as u32 {
            for vx in min_x as u32..max_x as u32 {
                let p = placement
                    .transform
                    .viewport_to_image(Point::new(vx as f64 + 0.5, vy as f64 + 0.5));
                let u = (p.x - placement.x) * sx_scale;
                let v = (p.y - placement.y) * sy_scale;
                if u < 0.0 || v < 0.0 || u >= pixels.width() as f64 || v >= pixels.height() as f64 {
                    continue;
                }
                let s = *pixels.get_pixel(u as u32, v as u32);
                blend(target.get_pixel_mut(vx, vy), s, alpha);
            }
        }
    }

    fn set_offset(&mut self, layer: Layer, dx: f64, dy: f64, scale: f64) {
        self.offsets[layer.index()] = Offset {
            dx,
            dy,
            scale: if scale > 0.0 { scale } else { 1.0 },
        };
    }

    fn present(&mut self) {
        self.frames += 1;
    }
}

/// Source-over blend of `src` at `alpha` onto `dst`.
fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, alpha: f64) {
    let sa = src[3] as f64 / 255.0 * alpha.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for i in 0..3 {
        let c = (src[i] as f64 * sa + dst[i] as f64 * da * (1.0 - sa)) / out_a;
        dst[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round() as u8;
}
