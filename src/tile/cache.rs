//! Tile caches.
//!
//! Two caches hold resolved tiles for the current image:
//!
//! - [`TileCache`]: bounded by entry count. Insertion order is eviction
//!   order; re-inserting a present tile moves it to the back. Reads never
//!   change the order.
//! - [`BackfillCache`]: the few low tiers precached when an image opens. It
//!   is not bounded and lives as long as the image.
//!
//! Both are owned by the session's update loop and need no locking.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::model::{Tile, TileId};

/// Default number of tiles kept in the main cache.
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 300;

// =============================================================================
// TileCache
// =============================================================================

/// Count-bounded tile cache with FIFO eviction and promotion on re-insert.
pub struct TileCache {
    tiles: LruCache<TileId, Arc<Tile>>,
}

impl TileCache {
    /// Create a cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `capacity` tiles (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            tiles: LruCache::new(capacity),
        }
    }

    /// Look up a tile without touching eviction order.
    pub fn get(&self, id: &TileId) -> Option<Arc<Tile>> {
        self.tiles.peek(id).cloned()
    }

    pub fn contains(&self, id: &TileId) -> bool {
        self.tiles.contains(id)
    }

    /// Insert a tile, moving it to the back if already present.
    ///
    /// Returns the tile evicted to make room, if any.
    pub fn put(&mut self, tile: Arc<Tile>) -> Option<Arc<Tile>> {
        let id = tile.id;
        if self.tiles.contains(&id) {
            self.tiles.put(id, tile);
            return None;
        }
        self.tiles.push(id, tile).map(|(_, evicted)| evicted)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tiles.cap().get()
    }

    /// Tile ids from oldest to newest.
    pub fn ids(&self) -> Vec<TileId> {
        self.tiles.iter().rev().map(|(id, _)| *id).collect()
    }

    /// Drop every tile. Used when the displayed image changes.
    pub fn clear(&mut self) {
        self.tiles.clear();
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// BackfillCache
// =============================================================================

/// Always-resident low tiers of the current image.
#[derive(Default)]
pub struct BackfillCache {
    tiles: HashMap<TileId, Arc<Tile>>,
}

impl BackfillCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &TileId) -> Option<Arc<Tile>> {
        self.tiles.get(id).cloned()
    }

    pub fn contains(&self, id: &TileId) -> bool {
        self.tiles.contains_key(id)
    }

    pub fn put(&mut self, tile: Arc<Tile>) {
        self.tiles.insert(tile.id, tile);
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Number of cached tiles belonging to `tier`.
    pub fn tier_len(&self, tier: usize) -> usize {
        self.tiles.keys().filter(|id| id.tier == tier).count()
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
    }
}
