//! # Pyramid Viewer
//!
//! Tile pyramid addressing, selection, caching and view synchronization for
//! deep-zoom image viewers.
//!
//! The engine opens a multi-resolution image pyramid, works out which tiles
//! a view at a given pan, zoom and rotation needs, loads them with bounded
//! concurrency through a pluggable [`NetConnector`], and draws them in
//! layers onto a [`Surface`] with a low-resolution backfill underneath.
//!
//! ## Features
//!
//! - **Five source formats**: Zoomify tile folders, ZIF and PFF packed files,
//!   Deep Zoom (DZI) folders, and slide tile servers
//! - **Incremental lookup tables**: packed formats fetch offset tables chunk
//!   by chunk, only as tiles need them
//! - **Bounded loading**: FIFO concurrency cap, per-fetch timeouts and
//!   deduplicated requests
//! - **Layered drawing**: frontfill over backfill over oversize backfill,
//!   with fade-in of newly loaded tiles
//! - **Headless rendering**: [`RasterSurface`] composites views into PNGs
//!
//! ## Architecture
//!
//! - [`io`] - Byte-range connectors for local files, HTTP and S3
//! - [`geometry`] - Coordinate transforms, tile bounds and pan/zoom limits
//! - [`pyramid`] - Pyramid descriptor, tier reconstruction and chunk tables
//! - [`mod@format`] - Format adapters turning tiles into fetch descriptors
//! - [`tile`] - Tile model, decoding, caches, loader and scheduler
//! - [`view`] - View state, tier selection, renderer, surfaces and events
//! - [`session`] - The session owning all state and running the update loop
//! - [`config`] - Viewer configuration and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pyramid_viewer::{FileConnector, RasterSurface, ViewerConfig, ViewerSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = Arc::new(FileConnector::new("."));
//!     let surface = RasterSurface::new(1024, 768);
//!     let mut session = ViewerSession::new(ViewerConfig::default(), connector, surface, 1024, 768)?;
//!
//!     session.set_image("images/slide.zif", None).await?;
//!     session.set_view(12000.0, 8000.0, 50.0, 0.0, false);
//!     session.run_until_settled(Duration::from_secs(30)).await;
//!     session.surface().save_png(std::path::Path::new("view.png"))?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod geometry;
pub mod io;
pub mod pyramid;
pub mod session;
pub mod tile;
pub mod view;

// Re-export commonly used types
pub use config::{Cli, Command, ViewerConfig};
pub use error::{FormatError, IoError, PackedError, TileError, ViewerError};
pub use format::{
    AdapterState, FetchDescriptor, FormatAdapter, FormatOptions, SourceFormat,
    DEFAULT_PFF_CHUNK_SIZE, DEFAULT_ZIF_CHUNK_SIZE, DEFAULT_ZIF_HEADER_BYTES,
};
pub use geometry::{
    constrain_pan, constrain_zoom, viewport_bounding_box_in_tiles, zoom_to_fill, zoom_to_fit,
    PanLimits, PanPolicy, Point, TileBounds, ViewTransform, ZoomLimit,
};
pub use io::{
    create_s3_client, parse_s3_uri, ByteRange, FileConnector, HttpConnector, MemoryConnector,
    NetConnector, S3Connector,
};
pub use pyramid::{calculate_tier_values, PyramidDescriptor, Tier, TierDims};
pub use session::{UpdatePhase, ViewStatus, ViewerSession};
pub use tile::{
    BackfillCache, DrawOrder, Purpose, Tile, TileCache, TileId, TileLoadScheduler, TileLoader,
    DEFAULT_TILE_CACHE_CAPACITY,
};
pub use view::{
    EventBus, Layer, RasterSurface, RecordingSurface, Surface, ViewRenderer, ViewState,
    ViewerEvent,
};
