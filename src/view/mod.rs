//! View state, tier selection and drawing.
//!
//! # Components
//!
//! - [`ViewState`]: the authoritative pose, zoom bounds and selected tiers
//! - [`select_tier`], [`BackfillPolicy`]: frontfill and backfill tiers for a zoom
//! - [`ViewRenderer`]: layered drawing of cached tiles with fade-in
//! - [`Surface`]: draw target, with [`RecordingSurface`] and [`RasterSurface`]
//! - [`ViewValidator`]: bounded retry of stalled updates
//! - [`ViewAnimation`]: interpolated `set_view` transitions
//! - [`ViewerEvent`], [`EventBus`]: observable session events

mod animation;
mod events;
mod renderer;
mod state;
mod surface;
mod tiers;
mod validation;

pub use animation::{ViewAnimation, DEFAULT_ANIMATION_STEPS};
pub use events::{EventBus, ViewerEvent, EVENT_CHANNEL_CAPACITY};
pub use renderer::{DrawPlan, DrawStats, LayerPlan, LayerStats, ViewRenderer, DEFAULT_FADE_STEP};
pub use state::{
    normalize_api_zoom, normalize_rotation, PendingOffset, ViewPose, ViewState, ZoomBound,
};
pub use surface::{DrawCall, Layer, RasterSurface, RecordingSurface, Surface, TilePlacement};
pub use tiers::{select_tier, BackfillChoice, BackfillPolicy, DEFAULT_TIERS_SCALE_UP_MAX};
pub use validation::{
    LoadProgress, ValidationAction, ViewValidator, DEFAULT_VALIDATION_INTERVAL,
    DEFAULT_VALIDATION_RETRY_LIMIT,
};
