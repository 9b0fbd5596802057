//! Tiles and their loading pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             ViewerSession               │
//! └──────────┬───────────────────▲──────────┘
//!            │ request_tiles     │ LoadEvent
//!            ▼                   │
//! ┌──────────────────────┐  ┌────┴─────────────────┐
//! │  TileLoadScheduler   │─▶│     TileLoader        │
//! │  dedup, park, retry  │  │  semaphore + timeout  │
//! └──────────────────────┘  └────┬─────────────────┘
//!                                │
//!                                ▼
//!                   NetConnector + decoder
//! ```
//!
//! # Components
//!
//! - [`TileId`], [`Tile`], [`TileImage`]: tile identity and decoded pixels
//! - [`TileCache`]: bounded FIFO cache of resolved tiles
//! - [`BackfillCache`]: unbounded cache for the precached low tiers
//! - [`TileLoader`]: bounded concurrent fetch + decode
//! - [`TileLoadScheduler`]: one outstanding load per tile, chunk parking

mod cache;
mod decoder;
mod loader;
mod model;
mod scheduler;

pub use cache::{BackfillCache, TileCache, DEFAULT_TILE_CACHE_CAPACITY};
pub use decoder::{decode_tile, decode_tile_blocking, JpegHeaderTable};
pub use loader::{LoadEvent, TileLoader, DEFAULT_LOAD_TIMEOUT, DEFAULT_MAX_CONCURRENT_LOADS};
pub use model::{DrawOrder, Purpose, Tile, TileId, TileImage};
pub use scheduler::{order_tiles, Purposes, RequestOutcome, TileLoadScheduler};
