//! Configuration for the viewer engine and its CLI.
//!
//! [`ViewerConfig`] carries every tunable of a [`crate::ViewerSession`].
//! The CLI maps flags onto it; each flag can also be set through an
//! environment variable with the `PYRAMID_` prefix:
//!
//! - `PYRAMID_CACHE_TILES` - Tile cache capacity (default: 300)
//! - `PYRAMID_MAX_LOADS` - Concurrent loads (default: 300)
//! - `PYRAMID_LOAD_TIMEOUT` - Per-fetch timeout in seconds (default: 60)
//! - `PYRAMID_PAN_BUFFER` - Tile selection margin (default: 1.5)
//! - `PYRAMID_CONSTRAIN_PAN` - strict, relaxed or loose (default: strict)
//! - `PYRAMID_MIN_ZOOM` - fit, fill or a zoom value (default: fit)
//! - `PYRAMID_MAX_ZOOM` - Maximum zoom (default: 1.0)
//! - `PYRAMID_FREE_ROTATION` - Allow arbitrary rotation (default: false)
//! - `PYRAMID_ZIF_CHUNK_SIZE` / `PYRAMID_PFF_CHUNK_SIZE` - Table records per chunk
//! - `PYRAMID_S3_ENDPOINT` / `PYRAMID_S3_REGION` - S3 access for `s3://` sources

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::format::{
    FormatOptions, SourceFormat, DEFAULT_PFF_CHUNK_SIZE, DEFAULT_ZIF_CHUNK_SIZE,
    DEFAULT_ZIF_HEADER_BYTES,
};
use crate::geometry::PanPolicy;
use crate::tile::{DEFAULT_LOAD_TIMEOUT, DEFAULT_MAX_CONCURRENT_LOADS, DEFAULT_TILE_CACHE_CAPACITY};
use crate::view::{
    BackfillPolicy, ZoomBound, DEFAULT_ANIMATION_STEPS, DEFAULT_FADE_STEP,
    DEFAULT_TIERS_SCALE_UP_MAX, DEFAULT_VALIDATION_INTERVAL, DEFAULT_VALIDATION_RETRY_LIMIT,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default pan buffer.
pub const DEFAULT_PAN_BUFFER: f64 = 1.5;

/// Pan buffer for small touch viewports.
pub const MOBILE_PAN_BUFFER: f64 = 1.0;

/// Default maximum zoom (100%).
pub const DEFAULT_MAX_ZOOM: f64 = 1.0;

/// Default fade speed factor.
pub const DEFAULT_FADE_SPEED: f64 = 1.0;

/// Default fade and animation tick.
pub const DEFAULT_FADE_TICK: Duration = Duration::from_millis(50);

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default viewport size of the CLI.
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1024;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 768;

// =============================================================================
// ViewerConfig
// =============================================================================

/// Tunables of a viewer session.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    /// Tiles held by the FIFO tile cache
    pub tile_cache_capacity: usize,

    /// Loads allowed to run at once; the rest wait in FIFO order
    pub max_concurrent_loads: usize,

    /// Timeout of one tile or chunk fetch
    pub load_timeout: Duration,

    /// Multiplier on the visible area when selecting tiles
    pub pan_buffer: f64,

    /// Upscale allowed before switching to the next finer tier
    pub tiers_scale_up_max: f64,

    pub backfill: BackfillPolicy,

    /// Alpha gained per fade tick before `fade_speed`
    pub fade_step: f64,
    pub fade_speed: f64,
    pub fade_tick: Duration,

    pub validation_interval: Duration,
    pub validation_retry_limit: u32,

    pub constrain_pan: PanPolicy,
    pub min_zoom: ZoomBound,
    pub max_zoom: f64,
    pub free_rotation: bool,

    /// Header and chunk sizes of packed formats
    pub format: FormatOptions,

    /// Intermediate poses of an animated `set_view`
    pub animation_steps: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            tile_cache_capacity: DEFAULT_TILE_CACHE_CAPACITY,
            max_concurrent_loads: DEFAULT_MAX_CONCURRENT_LOADS,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            pan_buffer: DEFAULT_PAN_BUFFER,
            tiers_scale_up_max: DEFAULT_TIERS_SCALE_UP_MAX,
            backfill: BackfillPolicy::default(),
            fade_step: DEFAULT_FADE_STEP,
            fade_speed: DEFAULT_FADE_SPEED,
            fade_tick: DEFAULT_FADE_TICK,
            validation_interval: DEFAULT_VALIDATION_INTERVAL,
            validation_retry_limit: DEFAULT_VALIDATION_RETRY_LIMIT,
            constrain_pan: PanPolicy::Strict,
            min_zoom: ZoomBound::Fit,
            max_zoom: DEFAULT_MAX_ZOOM,
            free_rotation: false,
            format: FormatOptions::default(),
            animation_steps: DEFAULT_ANIMATION_STEPS,
        }
    }
}

impl ViewerConfig {
    /// Defaults for small touch viewports.
    pub fn mobile() -> Self {
        Self {
            pan_buffer: MOBILE_PAN_BUFFER,
            ..Self::default()
        }
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_cache_capacity == 0 {
            return Err("tile_cache_capacity must be greater than 0".to_string());
        }
        if self.max_concurrent_loads == 0 {
            return Err("max_concurrent_loads must be greater than 0".to_string());
        }
        if self.load_timeout.is_zero() {
            return Err("load_timeout must be greater than 0".to_string());
        }
        if !(self.pan_buffer >= 1.0) {
            return Err("pan_buffer must be at least 1.0".to_string());
        }
        if !(self.tiers_scale_up_max >= 1.0) {
            return Err("tiers_scale_up_max must be at least 1.0".to_string());
        }
        if !(self.fade_step > 0.0 && self.fade_step <= 1.0) {
            return Err("fade_step must be in (0, 1]".to_string());
        }
        if !(self.fade_speed > 0.0) {
            return Err("fade_speed must be greater than 0".to_string());
        }
        if self.fade_tick.is_zero() || self.validation_interval.is_zero() {
            return Err("fade_tick and validation_interval must be greater than 0".to_string());
        }
        if !(self.max_zoom > 0.0) {
            return Err("max_zoom must be greater than 0".to_string());
        }
        if let ZoomBound::Value(z) = self.min_zoom {
            if !(z > 0.0) || z > self.max_zoom {
                return Err("min_zoom must be in (0, max_zoom]".to_string());
            }
        }
        if self.backfill.thresholds.0 > self.backfill.thresholds.1 {
            return Err("backfill thresholds must be ascending".to_string());
        }
        if self.format.zif_chunk_size == 0 || self.format.pff_chunk_size == 0 {
            return Err("chunk sizes must be greater than 0".to_string());
        }
        if self.format.zif_header_bytes < 16 {
            return Err("zif_header_bytes must be at least 16".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pyramid Viewer - inspect and render deep-zoom tile pyramids.
#[derive(Parser, Debug, Clone)]
#[command(name = "pyramid-viewer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Open a pyramid and print its tiers.
    Inspect(InspectArgs),

    /// Print the tiers and tiles a view needs.
    Tiles(TilesArgs),

    /// Render a view headlessly to a PNG file.
    Render(RenderArgs),
}

/// Where the image comes from.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Local path, http(s):// URL or s3://bucket/key.
    pub source: String,

    /// Source format; detected from the path when omitted.
    #[arg(long)]
    pub format: Option<SourceFormat>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "PYRAMID_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "PYRAMID_S3_REGION")]
    pub s3_region: String,
}

/// The view to compute.
#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    /// View center X in image pixels (default: image center).
    #[arg(long)]
    pub x: Option<f64>,

    /// View center Y in image pixels (default: image center).
    #[arg(long)]
    pub y: Option<f64>,

    /// Zoom; values in (1, 100] are percentages (default: fit).
    #[arg(long)]
    pub zoom: Option<f64>,

    /// Rotation in degrees.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub rotation: f64,

    /// Viewport width in pixels.
    #[arg(long, default_value_t = DEFAULT_VIEWPORT_WIDTH)]
    pub width: u32,

    /// Viewport height in pixels.
    #[arg(long, default_value_t = DEFAULT_VIEWPORT_HEIGHT)]
    pub height: u32,
}

/// Engine tunables exposed on the command line.
#[derive(Args, Debug, Clone)]
pub struct TuningArgs {
    /// Maximum number of tiles to cache.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "PYRAMID_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Maximum number of concurrent loads.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_LOADS, env = "PYRAMID_MAX_LOADS")]
    pub max_loads: usize,

    /// Timeout of a single fetch in seconds.
    #[arg(long, default_value_t = DEFAULT_LOAD_TIMEOUT.as_secs(), env = "PYRAMID_LOAD_TIMEOUT")]
    pub load_timeout: u64,

    /// Multiplier on the visible area when selecting tiles.
    #[arg(long, default_value_t = DEFAULT_PAN_BUFFER, env = "PYRAMID_PAN_BUFFER")]
    pub pan_buffer: f64,

    /// Pan constraint: strict, relaxed or loose.
    #[arg(long, default_value_t = PanPolicy::Strict, env = "PYRAMID_CONSTRAIN_PAN")]
    pub constrain_pan: PanPolicy,

    /// Minimum zoom: fit, fill or a zoom value.
    #[arg(long, default_value_t = ZoomBound::Fit, env = "PYRAMID_MIN_ZOOM")]
    pub min_zoom: ZoomBound,

    /// Maximum zoom.
    #[arg(long, default_value_t = DEFAULT_MAX_ZOOM, env = "PYRAMID_MAX_ZOOM")]
    pub max_zoom: f64,

    /// Allow rotation by arbitrary angles.
    #[arg(long, default_value_t = false, env = "PYRAMID_FREE_ROTATION")]
    pub free_rotation: bool,

    /// Records per ZIF offset/byte-count chunk.
    #[arg(long, default_value_t = DEFAULT_ZIF_CHUNK_SIZE, env = "PYRAMID_ZIF_CHUNK_SIZE")]
    pub zif_chunk_size: u64,

    /// Records per PFF tile index chunk.
    #[arg(long, default_value_t = DEFAULT_PFF_CHUNK_SIZE, env = "PYRAMID_PFF_CHUNK_SIZE")]
    pub pff_chunk_size: u64,

    /// Bytes fetched for the ZIF header.
    #[arg(long, default_value_t = DEFAULT_ZIF_HEADER_BYTES)]
    pub zif_header_bytes: u64,
}

impl TuningArgs {
    pub fn to_config(&self) -> ViewerConfig {
        ViewerConfig {
            tile_cache_capacity: self.cache_tiles,
            max_concurrent_loads: self.max_loads,
            load_timeout: Duration::from_secs(self.load_timeout),
            pan_buffer: self.pan_buffer,
            constrain_pan: self.constrain_pan,
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
            free_rotation: self.free_rotation,
            format: FormatOptions {
                zif_header_bytes: self.zif_header_bytes,
                zif_chunk_size: self.zif_chunk_size,
                pff_chunk_size: self.pff_chunk_size,
            },
            ..ViewerConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args, Debug, Clone)]
pub struct TilesArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub view: ViewArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub view: ViewArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Output PNG file.
    #[arg(short, long)]
    pub out: PathBuf,

    /// Seconds to wait for tiles before writing what has arrived.
    #[arg(long, default_value_t = 30)]
    pub wait: u64,
}

// =============================================================================
// Tests
// =============================================================================
