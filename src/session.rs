//! The viewer session: single owner of all mutable viewer state.
//!
//! A [`ViewerSession`] holds the open image (format adapter and pyramid
//! descriptor), both tile caches, the load scheduler, the view state and the
//! renderer. Every mutation happens on the task that owns the session; tile
//! and chunk loads run on their own tasks and report back over a channel
//! that the session drains with [`ViewerSession::handle_event`] or
//! [`ViewerSession::run_until_settled`].
//!
//! # Update protocol
//!
//! ```text
//! Idle -> Resetting -> TierSelecting -> TileSelecting -> Drawing -> Validating -> Idle
//!           |              |                 |              |
//!     bake drag/pinch   frontfill +      bounding boxes   draw cached tiles,
//!     offsets into      backfill tier    per layer        then request the
//!     the pose                                            missing ones
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ViewerConfig;
use crate::error::{TileError, ViewerError};
use crate::format::{FormatAdapter, SourceFormat};
use crate::geometry::{
    constrain_pan, constrain_zoom, viewport_bounding_box_in_tiles, Point, TileBounds,
};
use crate::io::NetConnector;
use crate::pyramid::PyramidDescriptor;
use crate::tile::{
    BackfillCache, DrawOrder, LoadEvent, Purpose, RequestOutcome, Tile, TileCache, TileId,
    TileLoadScheduler, TileLoader,
};
use crate::view::{
    normalize_api_zoom, normalize_rotation, select_tier, DrawPlan, DrawStats, EventBus, Layer,
    LayerPlan, LoadProgress, Surface, ValidationAction, ViewAnimation, ViewPose, ViewRenderer,
    ViewState, ViewValidator, ViewerEvent,
};

// =============================================================================
// Supporting types
// =============================================================================

/// Phase of the view update state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePhase {
    #[default]
    Idle,
    Resetting,
    TierSelecting,
    TileSelecting,
    Drawing,
    /// Drawn; tiles are still outstanding or awaiting a retry
    Validating,
}

/// Observable readiness of the current view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewStatus {
    pub initialized: bool,
    pub display_loaded: bool,
    pub display_drawn: bool,
    pub backfill_loaded: bool,
    pub backfill_drawn: bool,
    pub precache_loaded: bool,
}

/// The image currently open in a session.
struct OpenImage {
    adapter: FormatAdapter,
    desc: PyramidDescriptor,
    /// Precached backfill tier
    static_tier: usize,
}

// =============================================================================
// ViewerSession
// =============================================================================

/// Deep-zoom viewer engine drawing onto a [`Surface`].
pub struct ViewerSession<S: Surface> {
    config: ViewerConfig,
    connector: Arc<dyn NetConnector>,
    surface: S,
    events: EventBus,

    loads: mpsc::UnboundedReceiver<LoadEvent>,
    scheduler: TileLoadScheduler,
    cache: TileCache,
    backfill_cache: BackfillCache,

    image: Option<OpenImage>,
    /// Bumped on every image change; loads of older generations are stale
    generation: u64,

    view: ViewState,
    renderer: ViewRenderer,
    validator: ViewValidator,
    animation: Option<ViewAnimation>,
    plan: Option<DrawPlan>,
    status: ViewStatus,
    phase: UpdatePhase,
    /// Zoom the current tiers were selected for
    selected_zoom: Option<f64>,
}

impl<S: Surface> ViewerSession<S> {
    /// Create a session with no image open.
    pub fn new(
        config: ViewerConfig,
        connector: Arc<dyn NetConnector>,
        surface: S,
        viewport_width: u32,
        viewport_height: u32,
    ) -> Result<Self, ViewerError> {
        config.validate().map_err(ViewerError::Config)?;

        let (loader, loads) = TileLoader::new(
            Arc::clone(&connector),
            config.max_concurrent_loads,
            config.load_timeout,
        );
        let mut surface = surface;
        surface.resize(viewport_width, viewport_height);

        Ok(Self {
            cache: TileCache::with_capacity(config.tile_cache_capacity),
            backfill_cache: BackfillCache::new(),
            scheduler: TileLoadScheduler::new(loader),
            renderer: ViewRenderer::new(config.fade_step, config.fade_speed),
            validator: ViewValidator::new(config.validation_interval, config.validation_retry_limit),
            view: ViewState::new(viewport_width as f64, viewport_height as f64),
            events: EventBus::new(),
            image: None,
            generation: 0,
            animation: None,
            plan: None,
            status: ViewStatus::default(),
            phase: UpdatePhase::Idle,
            selected_zoom: None,
            loads,
            connector,
            surface,
            config,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn descriptor(&self) -> Option<&PyramidDescriptor> {
        self.image.as_ref().map(|i| &i.desc)
    }

    pub fn adapter(&self) -> Option<&FormatAdapter> {
        self.image.as_ref().map(|i| &i.adapter)
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn backfill_cache(&self) -> &BackfillCache {
        &self.backfill_cache
    }

    pub fn scheduler(&self) -> &TileLoadScheduler {
        &self.scheduler
    }

    pub fn draw_plan(&self) -> Option<&DrawPlan> {
        self.plan.as_ref()
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Subscribe to session events.
    pub fn events(&self) -> broadcast::Receiver<ViewerEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ViewStatus {
        self.status
    }

    pub fn initialized(&self) -> bool {
        self.status.initialized
    }

    pub fn display_loaded(&self) -> bool {
        self.status.display_loaded
    }

    pub fn display_drawn(&self) -> bool {
        self.status.display_drawn
    }

    pub fn backfill_loaded(&self) -> bool {
        self.status.backfill_loaded
    }

    pub fn backfill_drawn(&self) -> bool {
        self.status.backfill_drawn
    }

    pub fn precache_loaded(&self) -> bool {
        self.status.precache_loaded
    }

    pub fn get_zoom(&self) -> f64 {
        self.view.zoom
    }

    pub fn get_rotation(&self) -> f64 {
        self.view.rotation
    }

    /// Image pixel at the viewport center.
    pub fn get_coordinates(&self) -> Point {
        Point::new(self.view.x, self.view.y)
    }

    /// Tiles of `tier` (default: the frontfill tier) covering the viewport,
    /// without the pan buffer.
    pub fn viewport_bounding_box_in_tiles(&self, tier: Option<usize>) -> Option<TileBounds> {
        let image = self.image.as_ref()?;
        let tier = tier.unwrap_or(self.view.tier_current);
        viewport_bounding_box_in_tiles(&image.desc, tier, &self.view.transform(), 1.0)
    }

    /// Look a tile up in either cache.
    pub fn cached_tile(&self, id: &TileId) -> Option<Arc<Tile>> {
        self.backfill_cache.get(id).or_else(|| self.cache.get(id))
    }

    // -------------------------------------------------------------------------
    // Opening images
    // -------------------------------------------------------------------------

    /// Open `path`, replacing the current image.
    ///
    /// Caches, outstanding loads and the draw state are discarded first. A
    /// header that cannot be parsed leaves the session uninitialized and is
    /// reported once as [`ViewerEvent::FormatInvalid`].
    pub async fn set_image(
        &mut self,
        path: &str,
        format: Option<SourceFormat>,
    ) -> Result<(), ViewerError> {
        self.generation += 1;
        self.scheduler.reset(self.generation);
        self.cache.clear();
        self.backfill_cache.clear();
        self.renderer.clear();
        self.validator.reset();
        self.image = None;
        self.animation = None;
        self.plan = None;
        self.status = ViewStatus::default();
        self.phase = UpdatePhase::Idle;
        self.selected_zoom = None;
        for layer in Layer::ALL {
            self.surface.clear(layer);
        }

        let mut adapter = FormatAdapter::new(path, format);
        let desc = match adapter
            .parse_header(self.connector.as_ref(), &self.config.format)
            .await
        {
            Ok(desc) => desc,
            Err(e) => {
                error!(path = %path, error = %e, "cannot open image");
                self.events.emit(ViewerEvent::FormatInvalid {
                    path: path.to_string(),
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let static_tier = self.config.backfill.static_tier(desc.tier_count());
        let (width, height, tiers) = (desc.image_width(), desc.image_height(), desc.tier_count());
        info!(
            path = %path,
            format = %adapter.format(),
            width,
            height,
            tiers,
            static_backfill = static_tier,
            "image opened"
        );
        self.events.emit(ViewerEvent::ImageOpened {
            path: path.to_string(),
            format: adapter.format(),
            width,
            height,
            tiers,
        });
        self.image = Some(OpenImage {
            adapter,
            desc,
            static_tier,
        });

        // Initial view: whole image centered at the minimum zoom
        self.view.rotation = 0.0;
        self.refresh_zoom_limits();
        self.view.x = width as f64 / 2.0;
        self.view.y = height as f64 / 2.0;
        self.view.zoom = self.view.min_zoom.min(self.view.max_zoom);
        self.view.remember_prior();
        self.status.initialized = true;

        self.precache_backfill();
        self.update_view(true);
        Ok(())
    }

    /// Request every tile of the static backfill tier.
    fn precache_backfill(&mut self) {
        let Some(image) = self.image.as_mut() else {
            return;
        };
        let Some(tier) = image.desc.tier(image.static_tier).copied() else {
            return;
        };
        let bounds = TileBounds::new(0, tier.tiles_x.saturating_sub(1), 0, tier.tiles_y.saturating_sub(1));
        let ids: Vec<TileId> = bounds
            .iter()
            .map(|(col, row)| TileId::new(image.static_tier, col, row))
            .collect();
        debug!(tier = image.static_tier, tiles = ids.len(), "precaching backfill tier");

        let (cache, backfill) = (&self.cache, &self.backfill_cache);
        let outcome = self.scheduler.request_tiles(
            &ids,
            Purpose::Backfill,
            DrawOrder::Sequential,
            &image.adapter,
            &mut image.desc,
            |id| cache.contains(id) || backfill.contains(id),
        );
        self.absorb(outcome, "tile cannot be resolved");
    }

    // -------------------------------------------------------------------------
    // Interaction
    // -------------------------------------------------------------------------

    /// Move to a view. `zoom` values in `(1, 100]` are percentages;
    /// rotation snaps to right angles unless free rotation is enabled.
    pub fn set_view(&mut self, x: f64, y: f64, zoom: f64, rotation: f64, animate: bool) {
        self.set_view_pose(ViewPose::new(x, y, normalize_api_zoom(zoom), rotation), animate);
    }

    /// Move to a view given in internal units (zoom 1.0 = 100%).
    pub fn set_view_pose(&mut self, pose: ViewPose, animate: bool) {
        let rotation = normalize_rotation(pose.rotation, self.config.free_rotation);
        self.go_to(ViewPose { rotation, ..pose }, animate);
    }

    /// Pan the view center by `(dx, dy)` viewport pixels.
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        let transform = self.view.transform();
        let c = transform.viewport_center();
        let target = transform.viewport_to_image(Point::new(c.x + dx, c.y + dy));
        let pose = ViewPose::new(target.x, target.y, self.view.zoom, self.view.rotation);
        self.go_to(pose, false);
    }

    /// Multiply the zoom by `factor` about the view center.
    pub fn zoom_by(&mut self, factor: f64) {
        if !(factor > 0.0) {
            return;
        }
        let pose = ViewPose::new(self.view.x, self.view.y, self.view.zoom * factor, self.view.rotation);
        self.go_to(pose, false);
    }

    /// Rotate by `degrees`, snapped unless free rotation is enabled.
    pub fn rotate_by(&mut self, degrees: f64) {
        let rotation = normalize_rotation(self.view.rotation + degrees, self.config.free_rotation);
        let pose = ViewPose::new(self.view.x, self.view.y, self.view.zoom, rotation);
        self.go_to(pose, false);
    }

    /// Shift the drawn layers during a drag without touching the pose.
    ///
    /// The offset is baked into the pose by the next [`Self::update_view`].
    pub fn drag_by(&mut self, dx: f64, dy: f64) {
        self.view.add_pending_offset(dx, dy);
        self.apply_surface_offset();
    }

    /// Scale the drawn layers during a pinch without touching the pose.
    pub fn pinch_by(&mut self, scale: f64) {
        self.view.scale_pending_offset(scale);
        self.apply_surface_offset();
    }

    /// Go back to the view before the last `set_view`.
    pub fn return_to_prior_view(&mut self, animate: bool) {
        if let Some(prior) = self.view.prior() {
            self.go_to(prior, animate);
        }
    }

    /// Change the viewport size and redraw.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.view.viewport_width = width as f64;
        self.view.viewport_height = height as f64;
        self.surface.resize(width, height);
        if self.image.is_none() {
            return;
        }
        self.refresh_zoom_limits();
        let pose = self.constrain_pose(self.view.pose(), false);
        self.commit_pose(pose);
        self.update_view(true);
    }

    /// Load tiles of `tier` within `bounds` into the cache without drawing
    /// them.
    pub fn preload_region(&mut self, tier: usize, bounds: TileBounds) -> usize {
        let Some(image) = self.image.as_mut() else {
            return 0;
        };
        let Some(t) = image.desc.tier(tier).copied() else {
            return 0;
        };
        if t.tiles_x == 0 || t.tiles_y == 0 || bounds.left > bounds.right || bounds.top > bounds.bottom {
            return 0;
        }
        let clipped = TileBounds::new(
            bounds.left.min(t.tiles_x - 1),
            bounds.right.min(t.tiles_x - 1),
            bounds.top.min(t.tiles_y - 1),
            bounds.bottom.min(t.tiles_y - 1),
        );
        let ids: Vec<TileId> = clipped
            .iter()
            .map(|(col, row)| TileId::new(tier, col, row))
            .collect();

        let (cache, backfill) = (&self.cache, &self.backfill_cache);
        let outcome = self.scheduler.request_tiles(
            &ids,
            Purpose::Magnifier,
            DrawOrder::CenterOut,
            &image.adapter,
            &mut image.desc,
            |id| cache.contains(id) || backfill.contains(id),
        );
        let requested = outcome.dispatched.len() + outcome.parked.len();
        self.absorb(outcome, "tile cannot be resolved");
        requested
    }

    /// Constrain `target`, then apply it now or animate towards it.
    fn go_to(&mut self, target: ViewPose, animate: bool) {
        if self.image.is_none() {
            warn!("view change ignored: no image is open");
            return;
        }
        self.validator.reset();
        self.view.remember_prior();
        let target = self.constrain_pose(target, true);

        if animate && self.config.animation_steps > 1 {
            self.animation = Some(ViewAnimation::new(
                self.view.pose(),
                target,
                self.config.animation_steps,
            ));
            return;
        }
        self.animation = None;
        self.commit_pose(target);
        self.update_view(false);
    }

    /// Clamp zoom and pan of `target`, optionally reporting breaches.
    fn constrain_pose(&mut self, target: ViewPose, report: bool) -> ViewPose {
        let Some(image) = self.image.as_ref() else {
            return target;
        };
        let (iw, ih) = (image.desc.image_width() as f64, image.desc.image_height() as f64);

        let mut probe = self.view.clone();
        probe.rotation = target.rotation;
        probe.update_zoom_limits(iw, ih, self.config.min_zoom, self.config.max_zoom);

        let (zoom, limit) = constrain_zoom(target.zoom, probe.min_zoom, probe.max_zoom);
        if let Some(limit) = limit.filter(|_| report) {
            debug!(?limit, requested = target.zoom, zoom, "zoom constrained");
            self.events.emit(ViewerEvent::ZoomConstrained(limit));
        }

        let limits = probe.pan_limits(iw, ih, self.config.constrain_pan);
        let pan = constrain_pan(Point::new(target.x, target.y), zoom, target.rotation, &limits);
        if pan.constrained && report {
            self.events.emit(ViewerEvent::PanConstrained {
                x: pan.point.x,
                y: pan.point.y,
            });
        }
        ViewPose::new(pan.point.x, pan.point.y, zoom, target.rotation)
    }

    /// Make `pose` current and report what changed.
    fn commit_pose(&mut self, pose: ViewPose) {
        let before = self.view.pose();
        self.view.set_pose(pose);
        let after = self.view.pose();
        if after.rotation != before.rotation {
            self.refresh_zoom_limits();
        }

        let panned = after.x != before.x || after.y != before.y;
        if panned {
            self.events.emit(ViewerEvent::ViewPanned {
                x: after.x,
                y: after.y,
            });
        }
        if after.zoom != before.zoom {
            self.events.emit(ViewerEvent::ViewZoomed { zoom: after.zoom });
        }
        if after.rotation != before.rotation {
            self.events.emit(ViewerEvent::ViewRotated {
                rotation: after.rotation,
            });
        }
        if after != before {
            self.events.emit(ViewerEvent::ViewChanged {
                x: after.x,
                y: after.y,
                zoom: after.zoom,
                rotation: after.rotation,
            });
        }
    }

    fn refresh_zoom_limits(&mut self) {
        if let Some(image) = self.image.as_ref() {
            self.view.update_zoom_limits(
                image.desc.image_width() as f64,
                image.desc.image_height() as f64,
                self.config.min_zoom,
                self.config.max_zoom,
            );
        }
    }

    fn apply_surface_offset(&mut self) {
        let offset = self.view.pending_offset();
        for layer in Layer::ALL {
            self.surface.set_offset(layer, offset.dx, offset.dy, offset.scale);
        }
    }

    // -------------------------------------------------------------------------
    // Update protocol
    // -------------------------------------------------------------------------

    /// Recompute tiers and required tiles, draw what is cached and request
    /// the rest.
    ///
    /// With `force` the tiers are reselected even if the zoom is unchanged.
    pub fn update_view(&mut self, force: bool) {
        if self.image.is_none() {
            return;
        }

        // Resetting
        self.phase = UpdatePhase::Resetting;
        if let Some(pose) = self.view.take_pending_pose() {
            for layer in Layer::ALL {
                self.surface.set_offset(layer, 0.0, 0.0, 1.0);
            }
            let pose = self.constrain_pose(pose, true);
            self.view.remember_prior();
            self.commit_pose(pose);
        }

        // TierSelecting
        self.phase = UpdatePhase::TierSelecting;
        if force || self.selected_zoom != Some(self.view.zoom) {
            self.select_tiers();
        }

        // TileSelecting
        self.phase = UpdatePhase::TileSelecting;
        let Some(plan) = self.plan_layers() else {
            self.phase = UpdatePhase::Idle;
            return;
        };
        self.renderer.retain_planned(&plan);
        self.plan = Some(plan);

        // Drawing: cached tiles first, then requests for the rest
        self.phase = UpdatePhase::Drawing;
        self.redraw();
        let resolved = self.request_missing(&plan);
        if resolved {
            self.redraw();
        }

        self.phase = if self.scheduler.outstanding_count() > 0 || self.scheduler.failed_count() > 0 {
            UpdatePhase::Validating
        } else {
            UpdatePhase::Idle
        };
    }

    fn select_tiers(&mut self) {
        let Some(image) = self.image.as_ref() else {
            return;
        };
        let zoom = self.view.zoom;
        let tier = select_tier(&image.desc, zoom, self.config.tiers_scale_up_max);
        let choice = self.config.backfill.select(image.desc.tier_count(), tier);
        let scale = image.desc.tier_scale_for(tier, zoom);

        let changed = self.selected_zoom.is_none()
            || tier != self.view.tier_current
            || choice.tier != self.view.tier_backfill
            || choice.dynamic != self.view.backfill_dynamic;

        self.view.tier_current = tier;
        self.view.tier_backfill = choice.tier;
        self.view.backfill_dynamic = choice.dynamic;
        self.view.tier_scale = scale;
        self.selected_zoom = Some(zoom);

        if changed {
            debug!(
                tier,
                backfill = choice.tier,
                dynamic = choice.dynamic,
                scale,
                "tiers selected"
            );
            self.events.emit(ViewerEvent::TierChanged {
                tier,
                backfill: choice.tier,
                dynamic_backfill: choice.dynamic,
            });
        }
    }

    fn plan_layers(&self) -> Option<DrawPlan> {
        let image = self.image.as_ref()?;
        let transform = self.view.transform();
        let buffer = self.config.pan_buffer;
        let layer = |tier: usize, buffer: f64| {
            viewport_bounding_box_in_tiles(&image.desc, tier, &transform, buffer)
                .map(|bounds| LayerPlan { tier, bounds })
        };

        let frontfill = layer(self.view.tier_current, buffer)?;
        let backfill = layer(self.view.tier_backfill, buffer)?;
        let oversize = if self.view.backfill_dynamic {
            layer(image.static_tier, buffer * 2.0)
        } else {
            None
        };
        Some(DrawPlan {
            transform,
            frontfill,
            backfill,
            oversize,
        })
    }

    /// Request the uncached tiles of `plan`. Returns whether any resolved
    /// on the spot.
    fn request_missing(&mut self, plan: &DrawPlan) -> bool {
        let Some(image) = self.image.as_mut() else {
            return false;
        };
        let uncached = |layer: &LayerPlan, cache: &TileCache, backfill: &BackfillCache| {
            layer
                .ids()
                .filter(|id| !cache.contains(id) && !backfill.contains(id))
                .collect::<Vec<_>>()
        };

        let mut batches = vec![(
            uncached(&plan.frontfill, &self.cache, &self.backfill_cache),
            Purpose::Frontfill,
            DrawOrder::CenterOut,
        )];
        if plan.backfill.tier != plan.frontfill.tier {
            batches.push((
                uncached(&plan.backfill, &self.cache, &self.backfill_cache),
                Purpose::Backfill,
                DrawOrder::Sequential,
            ));
        }
        if let Some(oversize) = plan.oversize.as_ref() {
            batches.push((
                uncached(oversize, &self.cache, &self.backfill_cache),
                Purpose::Backfill,
                DrawOrder::Sequential,
            ));
        }

        let mut resolved = false;
        for (ids, purpose, order) in batches {
            if ids.is_empty() {
                continue;
            }
            let (cache, backfill) = (&self.cache, &self.backfill_cache);
            let outcome = self.scheduler.request_tiles(
                &ids,
                purpose,
                order,
                &image.adapter,
                &mut image.desc,
                |id| cache.contains(id) || backfill.contains(id),
            );
            resolved |= !outcome.sparse.is_empty();
            for (tile, _) in outcome.sparse {
                store_tile(&mut self.cache, &mut self.backfill_cache, image.static_tier, tile);
            }
            for (id, _) in outcome.failed {
                self.events.emit(ViewerEvent::TileFailed {
                    id,
                    message: "tile cannot be resolved".to_string(),
                });
            }
        }
        resolved
    }

    /// Redraw the current plan from the caches and update the status.
    fn redraw(&mut self) {
        let (Some(image), Some(plan)) = (self.image.as_ref(), self.plan.as_ref()) else {
            return;
        };
        let (cache, backfill) = (&self.cache, &self.backfill_cache);
        let stats = self.renderer.draw(&mut self.surface, plan, &image.desc, |id| {
            backfill.get(id).or_else(|| cache.get(id))
        });
        self.refresh_status(stats);
    }

    fn refresh_status(&mut self, stats: DrawStats) {
        let precache = self.image.as_ref().is_some_and(|image| {
            image.desc.tier(image.static_tier).is_some_and(|t| {
                self.backfill_cache.tier_len(image.static_tier) as u64 >= t.tile_count
            })
        });

        let next = ViewStatus {
            initialized: self.status.initialized,
            display_loaded: stats.frontfill.all_resolved(),
            display_drawn: stats.frontfill.all_opaque(),
            backfill_loaded: stats.backfill.all_resolved(),
            backfill_drawn: stats.backfill.all_opaque(),
            precache_loaded: precache,
        };
        let prev = std::mem::replace(&mut self.status, next);

        let rising = [
            (prev.display_loaded, next.display_loaded, ViewerEvent::DisplayLoaded),
            (prev.display_drawn, next.display_drawn, ViewerEvent::DisplayDrawn),
            (prev.backfill_loaded, next.backfill_loaded, ViewerEvent::BackfillLoaded),
            (prev.backfill_drawn, next.backfill_drawn, ViewerEvent::BackfillDrawn),
            (prev.precache_loaded, next.precache_loaded, ViewerEvent::PrecacheLoaded),
        ];
        for (was, is, event) in rising {
            if is && !was {
                self.events.emit(event);
            }
        }
    }

    /// Cache sparse tiles and report failures of a scheduler outcome.
    fn absorb(&mut self, outcome: RequestOutcome, failure: &str) -> bool {
        let Some(static_tier) = self.image.as_ref().map(|i| i.static_tier) else {
            return false;
        };
        let resolved = !outcome.sparse.is_empty() || !outcome.failed.is_empty();
        for (tile, _) in outcome.sparse {
            store_tile(&mut self.cache, &mut self.backfill_cache, static_tier, tile);
        }
        for (id, _) in outcome.failed {
            self.events.emit(ViewerEvent::TileFailed {
                id,
                message: failure.to_string(),
            });
        }
        resolved
    }

    // -------------------------------------------------------------------------
    // Event loop
    // -------------------------------------------------------------------------

    /// Apply a load completion.
    ///
    /// Completions for a replaced image, or for tiles that are no longer
    /// outstanding, are dropped.
    pub fn handle_event(&mut self, event: LoadEvent) {
        if event.generation() != self.generation {
            debug!(
                generation = event.generation(),
                current = self.generation,
                "dropping stale load"
            );
            return;
        }

        match event {
            LoadEvent::Tile {
                id,
                result,
                elapsed,
                ..
            } => self.on_tile(id, result, elapsed),
            LoadEvent::Chunk { key, result, .. } => {
                let failure = result.as_ref().err().map(|e| e.to_string());
                let Some(image) = self.image.as_mut() else {
                    return;
                };
                let outcome = self
                    .scheduler
                    .on_chunk(key, result, &image.adapter, &mut image.desc);
                if let Some(message) = failure.as_deref() {
                    self.events.emit(ViewerEvent::Message(format!(
                        "lookup table chunk failed: {}",
                        message
                    )));
                }
                let message = failure.unwrap_or_else(|| "tile cannot be resolved".to_string());
                if self.absorb(outcome, &message) {
                    self.redraw();
                }
            }
        }
    }

    fn on_tile(&mut self, id: TileId, result: Result<Tile, TileError>, elapsed: Duration) {
        let Some(_purposes) = self.scheduler.on_tile_loaded(id, result.is_ok(), elapsed) else {
            debug!(tile = %id, "dropping load that is no longer outstanding");
            return;
        };
        let Some(static_tier) = self.image.as_ref().map(|i| i.static_tier) else {
            return;
        };

        match result {
            Ok(tile) => {
                store_tile(&mut self.cache, &mut self.backfill_cache, static_tier, Arc::new(tile));
                let planned = self
                    .plan
                    .as_ref()
                    .is_some_and(|plan| plan.layers().any(|(_, layer)| layer.contains(&id)));
                if planned {
                    self.renderer.start_fade(id);
                    self.redraw();
                } else if id.tier == static_tier && !self.status.precache_loaded {
                    self.redraw();
                }
            }
            Err(e) => {
                self.events.emit(ViewerEvent::TileFailed {
                    id,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Deliver every load completion already queued, without waiting.
    pub fn process_pending_events(&mut self) -> usize {
        let mut n = 0;
        while let Ok(event) = self.loads.try_recv() {
            self.handle_event(event);
            n += 1;
        }
        n
    }

    /// Advance fades and any running animation by one tick.
    pub fn tick(&mut self) {
        if let Some(animation) = self.animation.as_mut() {
            match animation.advance() {
                Some(pose) => {
                    if animation.is_done() {
                        self.animation = None;
                    }
                    self.commit_pose(pose);
                    self.update_view(false);
                }
                None => self.animation = None,
            }
        }
        if self.renderer.tick() {
            self.redraw();
        }
    }

    fn load_progress(&self) -> LoadProgress {
        LoadProgress {
            outstanding: self.scheduler.outstanding_count(),
            failed: self.scheduler.failed_count(),
            mean_load_time: self.scheduler.mean_load_time(),
            oldest_in_flight: self.scheduler.oldest_in_flight(),
        }
    }

    /// Run one validation sweep.
    pub fn validate(&mut self) -> ValidationAction {
        if self.image.is_none() {
            return ValidationAction::Idle;
        }
        let progress = self.load_progress();
        let action = self.validator.tick(progress);
        match action {
            ValidationAction::Retrigger { attempt } => {
                let cleared = self.scheduler.clear_failed();
                debug!(attempt, cleared, "revalidating view");
                self.update_view(true);
            }
            ValidationAction::GiveUp {
                outstanding,
                failed,
            } => {
                self.events.emit(ViewerEvent::Message(format!(
                    "{} tiles failed and {} are still loading after retries",
                    failed, outstanding
                )));
            }
            ValidationAction::Idle => {
                if self.phase == UpdatePhase::Validating {
                    self.phase = UpdatePhase::Idle;
                }
            }
            ValidationAction::Wait => {}
        }
        action
    }

    /// Nothing outstanding, fading, animating or waiting for a retry.
    pub fn is_settled(&self) -> bool {
        if self.image.is_none() {
            return true;
        }
        let progress = self.load_progress();
        progress.outstanding == 0
            && !self.renderer.is_fading()
            && self.animation.is_none()
            && !self.validator.has_pending_retries(&progress)
    }

    /// Drive the session until it settles or `max_wait` elapses.
    ///
    /// Returns whether the session settled.
    pub async fn run_until_settled(&mut self, max_wait: Duration) -> bool {
        let start = Instant::now();
        let deadline = start + max_wait;
        let mut fade = interval_at(start + self.config.fade_tick, self.config.fade_tick);
        fade.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let period = self.validator.interval();
        let mut validation = interval_at(start + period, period);
        validation.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let timeout = sleep_until(deadline);
        tokio::pin!(timeout);

        loop {
            if self.is_settled() {
                if self.phase == UpdatePhase::Validating {
                    self.phase = UpdatePhase::Idle;
                }
                return true;
            }
            tokio::select! {
                Some(event) = self.loads.recv() => self.handle_event(event),
                _ = fade.tick() => self.tick(),
                _ = validation.tick() => {
                    self.validate();
                }
                _ = &mut timeout => {
                    warn!(
                        outstanding = self.scheduler.outstanding_count(),
                        failed = self.scheduler.failed_count(),
                        "view did not settle in time"
                    );
                    return false;
                }
            }
        }
    }
}

/// Put a resolved tile into the cache its tier belongs to.
fn store_tile(cache: &mut TileCache, backfill: &mut BackfillCache, static_tier: usize, tile: Arc<Tile>) {
    if tile.id.tier <= static_tier {
        backfill.put(tile);
    } else if let Some(evicted) = cache.put(tile) {
        debug!(tile = %evicted.id, "evicted from tile cache");
    }
}
