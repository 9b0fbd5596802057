//! Layered tile drawing with fade-in.

use std::collections::HashMap;
use std::sync::Arc;

use super::surface::{Layer, Surface, TilePlacement};
use crate::geometry::{TileBounds, ViewTransform};
use crate::pyramid::PyramidDescriptor;
use crate::tile::{Tile, TileId};

/// Default alpha added per fade tick, before the speed factor.
pub const DEFAULT_FADE_STEP: f64 = 0.067;

/// Tiles of one tier to draw on one layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerPlan {
    pub tier: usize,
    pub bounds: TileBounds,
}

impl LayerPlan {
    pub fn ids(&self) -> impl Iterator<Item = TileId> + '_ {
        self.bounds
            .iter()
            .map(move |(col, row)| TileId::new(self.tier, col, row))
    }

    pub fn contains(&self, id: &TileId) -> bool {
        id.tier == self.tier && self.bounds.contains(id.col, id.row)
    }
}

/// Everything needed to draw one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawPlan {
    pub transform: ViewTransform,
    pub frontfill: LayerPlan,
    pub backfill: LayerPlan,
    /// Static precached tier drawn under dynamic backfill
    pub oversize: Option<LayerPlan>,
}

impl DrawPlan {
    pub fn layers(&self) -> impl Iterator<Item = (Layer, &LayerPlan)> {
        self.oversize
            .as_ref()
            .map(|p| (Layer::OversizeBackfill, p))
            .into_iter()
            .chain([(Layer::Backfill, &self.backfill), (Layer::Frontfill, &self.frontfill)])
    }
}

/// Per-layer result of a draw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    /// Required tiles
    pub required: usize,
    /// Required tiles present in a cache (sparse tiles included)
    pub resolved: usize,
    /// Resolved tiles drawn at full opacity, or sparse
    pub opaque: usize,
}

impl LayerStats {
    pub fn all_resolved(&self) -> bool {
        self.resolved == self.required
    }

    pub fn all_opaque(&self) -> bool {
        self.opaque == self.required
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub frontfill: LayerStats,
    pub backfill: LayerStats,
    pub oversize: LayerStats,
}

/// Draws cached tiles for a [`DrawPlan`] and tracks fade-in progress.
///
/// Tiles restored from cache draw at full opacity. Tiles that arrived from
/// the network start at alpha 0 and gain `step * speed` per tick.
#[derive(Debug, Clone)]
pub struct ViewRenderer {
    increment: f64,
    fading: HashMap<TileId, f64>,
}

impl ViewRenderer {
    pub fn new(fade_step: f64, fade_speed: f64) -> Self {
        Self {
            increment: (fade_step * fade_speed).max(0.0),
            fading: HashMap::new(),
        }
    }

    /// Begin fading in a newly loaded tile.
    ///
    /// With a zero increment tiles appear at once.
    pub fn start_fade(&mut self, id: TileId) {
        if self.increment > 0.0 && self.increment < 1.0 {
            self.fading.insert(id, 0.0);
        }
    }

    pub fn alpha(&self, id: &TileId) -> f64 {
        self.fading.get(id).copied().unwrap_or(1.0)
    }

    pub fn is_fading(&self) -> bool {
        !self.fading.is_empty()
    }

    /// Advance every fade by one tick. Returns whether anything changed.
    pub fn tick(&mut self) -> bool {
        if self.fading.is_empty() {
            return false;
        }
        let step = self.increment;
        self.fading.retain(|_, alpha| {
            *alpha += step;
            *alpha < 1.0
        });
        true
    }

    /// Drop fades of tiles no longer in `plan`.
    pub fn retain_planned(&mut self, plan: &DrawPlan) {
        self.fading
            .retain(|id, _| plan.layers().any(|(_, layer)| layer.contains(id)));
    }

    pub fn clear(&mut self) {
        self.fading.clear();
    }

    /// Image-space placement of a tile.
    pub fn placement(desc: &PyramidDescriptor, tile: &Tile, transform: ViewTransform) -> TilePlacement {
        let native = desc.native_zoom(tile.id.tier);
        let (w, h) = tile
            .image
            .as_ref()
            .map(|i| (i.width() as f64, i.height() as f64))
            .unwrap_or((desc.tile_width() as f64, desc.tile_height() as f64));
        TilePlacement {
            x: tile.pixel_x as f64 / native,
            y: tile.pixel_y as f64 / native,
            width: w / native,
            height: h / native,
            transform,
        }
    }

    /// Clear and redraw every layer of `plan` from cached tiles.
    pub fn draw<S, F>(
        &self,
        surface: &mut S,
        plan: &DrawPlan,
        desc: &PyramidDescriptor,
        lookup: F,
    ) -> DrawStats
    where
        S: Surface + ?Sized,
        F: Fn(&TileId) -> Option<Arc<Tile>>,
    {
        let mut stats = DrawStats::default();
        if plan.oversize.is_none() {
            surface.clear(Layer::OversizeBackfill);
        }

        for (layer, layer_plan) in plan.layers() {
            surface.clear(layer);
            let mut s = LayerStats::default();
            for id in layer_plan.ids() {
                s.required += 1;
                let Some(tile) = lookup(&id) else {
                    continue;
                };
                s.resolved += 1;
                if tile.is_sparse() {
                    s.opaque += 1;
                    continue;
                }
                let alpha = self.alpha(&id);
                if alpha >= 1.0 {
                    s.opaque += 1;
                }
                let placement = Self::placement(desc, &tile, plan.transform);
                surface.draw_tile(layer, &tile, &placement, alpha);
            }
            match layer {
                Layer::Frontfill => stats.frontfill = s,
                Layer::Backfill => stats.backfill = s,
                Layer::OversizeBackfill => stats.oversize = s,
            }
        }
        surface.present();
        stats
    }
}
