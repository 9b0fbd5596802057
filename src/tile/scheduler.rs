//! Tile request scheduling.
//!
//! The scheduler decides what to do with each requested tile: nothing when
//! it is cached, already loading, parked or failed; resolve it to a sparse
//! tile when it has no stored bytes; park it under a lookup-table chunk that
//! has not arrived yet; or hand it to the [`TileLoader`]. At most one load is
//! outstanding per tile. A tile wanted for several purposes is loaded once
//! and reported to every purpose when it completes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use super::loader::TileLoader;
use super::model::{DrawOrder, Purpose, Tile, TileId};
use crate::error::IoError;
use crate::format::{FetchDescriptor, FormatAdapter};
use crate::pyramid::{ChunkKey, PyramidDescriptor};

/// Load times kept for the throughput estimate.
const LOAD_TIME_WINDOW: usize = 32;

// =============================================================================
// Purposes
// =============================================================================

/// Set of [`Purpose`]s a tile is wanted for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Purposes(u8);

impl Purposes {
    const fn bit(purpose: Purpose) -> u8 {
        match purpose {
            Purpose::Frontfill => 1,
            Purpose::Backfill => 2,
            Purpose::Magnifier => 4,
        }
    }

    pub const fn of(purpose: Purpose) -> Self {
        Self(Self::bit(purpose))
    }

    pub fn insert(&mut self, purpose: Purpose) {
        self.0 |= Self::bit(purpose);
    }

    pub fn union(self, other: Purposes) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(&self, purpose: Purpose) -> bool {
        self.0 & Self::bit(purpose) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<Purpose> for Purposes {
    fn from(purpose: Purpose) -> Self {
        Self::of(purpose)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// What a request batch or a chunk arrival did.
#[derive(Debug, Default)]
pub struct RequestOutcome {
    /// Tiles handed to the loader, in dispatch order
    pub dispatched: Vec<TileId>,
    /// Tiles waiting for a table chunk
    pub parked: Vec<TileId>,
    /// Chunk fetches started
    pub chunk_fetches: Vec<ChunkKey>,
    /// Sparse tiles, resolved without a fetch
    pub sparse: Vec<(Arc<Tile>, Purposes)>,
    /// Tiles that cannot be loaded
    pub failed: Vec<(TileId, Purposes)>,
}

impl RequestOutcome {
    fn merge(&mut self, other: RequestOutcome) {
        self.dispatched.extend(other.dispatched);
        self.parked.extend(other.parked);
        self.chunk_fetches.extend(other.chunk_fetches);
        self.sparse.extend(other.sparse);
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Clone, Copy)]
enum LoadState {
    Loading { started: Instant },
    Parked(ChunkKey),
}

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    purposes: Purposes,
    state: LoadState,
}

// =============================================================================
// Ordering
// =============================================================================

/// Order a request batch for dispatch.
///
/// Center-out sorts by distance from the center of the batch's bounding
/// box. The sort is stable, so ties keep row-major order.
pub fn order_tiles(ids: &[TileId], order: DrawOrder) -> Vec<TileId> {
    let mut ordered = ids.to_vec();
    if order == DrawOrder::Sequential || ordered.len() < 2 {
        return ordered;
    }

    let (mut min_c, mut max_c, mut min_r, mut max_r) = (u32::MAX, 0u32, u32::MAX, 0u32);
    for id in &ordered {
        min_c = min_c.min(id.col);
        max_c = max_c.max(id.col);
        min_r = min_r.min(id.row);
        max_r = max_r.max(id.row);
    }
    let cx = (min_c as f64 + max_c as f64) / 2.0;
    let cy = (min_r as f64 + max_r as f64) / 2.0;
    let dist = |id: &TileId| {
        let dx = id.col as f64 - cx;
        let dy = id.row as f64 - cy;
        dx * dx + dy * dy
    };
    ordered.sort_by(|a, b| dist(a).total_cmp(&dist(b)));
    ordered
}

// =============================================================================
// TileLoadScheduler
// =============================================================================

/// Tracks outstanding tile loads for the current image.
pub struct TileLoadScheduler {
    loader: TileLoader,
    generation: u64,
    outstanding: HashMap<TileId, Outstanding>,
    parked: HashMap<ChunkKey, Vec<TileId>>,
    failed: HashSet<TileId>,
    load_times: VecDeque<Duration>,
}

impl TileLoadScheduler {
    pub fn new(loader: TileLoader) -> Self {
        Self {
            loader,
            generation: 0,
            outstanding: HashMap::new(),
            parked: HashMap::new(),
            failed: HashSet::new(),
            load_times: VecDeque::with_capacity(LOAD_TIME_WINDOW),
        }
    }

    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forget all state and tag future loads with `generation`.
    ///
    /// Loads already running are not cancelled; their completions carry the
    /// old generation and are dropped by the session.
    pub fn reset(&mut self, generation: u64) {
        self.generation = generation;
        self.outstanding.clear();
        self.parked.clear();
        self.failed.clear();
        self.load_times.clear();
    }

    /// Request tiles for `purpose`.
    ///
    /// `is_cached` reports tiles that are already resident in either cache.
    pub fn request_tiles(
        &mut self,
        ids: &[TileId],
        purpose: Purpose,
        order: DrawOrder,
        adapter: &FormatAdapter,
        desc: &mut PyramidDescriptor,
        is_cached: impl Fn(&TileId) -> bool,
    ) -> RequestOutcome {
        let mut outcome = RequestOutcome::default();
        for id in order_tiles(ids, order) {
            if is_cached(&id) || self.failed.contains(&id) {
                continue;
            }
            if let Some(entry) = self.outstanding.get_mut(&id) {
                entry.purposes.insert(purpose);
                continue;
            }
            let step = self.dispatch(id, Purposes::of(purpose), adapter, desc);
            outcome.merge(step);
        }

        if !outcome.dispatched.is_empty() || !outcome.parked.is_empty() {
            debug!(
                ?purpose,
                dispatched = outcome.dispatched.len(),
                parked = outcome.parked.len(),
                chunks = outcome.chunk_fetches.len(),
                sparse = outcome.sparse.len(),
                "requested tiles"
            );
        }
        outcome
    }

    /// Resolve one tile and act on its fetch descriptor.
    fn dispatch(
        &mut self,
        id: TileId,
        purposes: Purposes,
        adapter: &FormatAdapter,
        desc: &mut PyramidDescriptor,
    ) -> RequestOutcome {
        let mut outcome = RequestOutcome::default();
        let fetch = match adapter.resolve_tile(desc, id) {
            Ok(fetch) => fetch,
            Err(e) => {
                warn!(tile = %id, error = %e, "cannot resolve tile");
                self.failed.insert(id);
                outcome.failed.push((id, purposes));
                return outcome;
            }
        };

        match fetch {
            FetchDescriptor::Skip => {
                let (x, y) = adapter.tile_origin(desc, id);
                outcome.sparse.push((Arc::new(Tile::sparse(id, x, y)), purposes));
            }
            FetchDescriptor::Pending(requests) => {
                // Park under the first missing chunk; any second chunk is
                // fetched alongside and waited on after the first arrives.
                let Some(first) = requests.first().map(|r| r.key) else {
                    return outcome;
                };
                for request in requests {
                    if desc.chunks.mark_pending(request.key) {
                        self.loader.load_chunk(
                            self.generation,
                            adapter.data_path().to_string(),
                            request,
                        );
                        outcome.chunk_fetches.push(request.key);
                    }
                }
                self.outstanding.insert(
                    id,
                    Outstanding {
                        purposes,
                        state: LoadState::Parked(first),
                    },
                );
                self.parked.entry(first).or_default().push(id);
                outcome.parked.push(id);
            }
            fetch => {
                let origin = adapter.tile_origin(desc, id);
                self.loader.load_tile(self.generation, id, origin, fetch);
                self.outstanding.insert(
                    id,
                    Outstanding {
                        purposes,
                        state: LoadState::Loading {
                            started: Instant::now(),
                        },
                    },
                );
                outcome.dispatched.push(id);
            }
        }
        outcome
    }

    /// Install an arrived chunk and replay the tiles parked on it.
    ///
    /// A failed chunk fails its parked tiles.
    pub fn on_chunk(
        &mut self,
        key: ChunkKey,
        result: Result<Bytes, IoError>,
        adapter: &FormatAdapter,
        desc: &mut PyramidDescriptor,
    ) -> RequestOutcome {
        let waiting = self.parked.remove(&key).unwrap_or_default();
        let mut outcome = RequestOutcome::default();

        match result {
            Ok(bytes) => {
                desc.chunks.install(key, bytes);
                debug!(?key, replayed = waiting.len(), "chunk installed");
                for id in waiting {
                    let Some(entry) = self.outstanding.remove(&id) else {
                        continue;
                    };
                    let step = self.dispatch(id, entry.purposes, adapter, desc);
                    outcome.merge(step);
                }
            }
            Err(e) => {
                desc.chunks.clear_pending(&key);
                warn!(?key, error = %e, tiles = waiting.len(), "chunk failed");
                for id in waiting {
                    if let Some(entry) = self.outstanding.remove(&id) {
                        self.failed.insert(id);
                        outcome.failed.push((id, entry.purposes));
                    }
                }
            }
        }
        outcome
    }

    /// Record a finished load and return the purposes it satisfies.
    ///
    /// `None` means the tile was not outstanding (its batch was reset).
    pub fn on_tile_loaded(&mut self, id: TileId, ok: bool, elapsed: Duration) -> Option<Purposes> {
        let entry = self.outstanding.remove(&id)?;
        if ok {
            if self.load_times.len() == LOAD_TIME_WINDOW {
                self.load_times.pop_front();
            }
            self.load_times.push_back(elapsed);
        } else {
            self.failed.insert(id);
        }
        Some(entry.purposes)
    }

    pub fn is_outstanding(&self, id: &TileId) -> bool {
        self.outstanding.contains_key(id)
    }

    pub fn is_failed(&self, id: &TileId) -> bool {
        self.failed.contains(id)
    }

    /// Tiles loading or parked.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.outstanding
            .values()
            .filter(|o| matches!(o.state, LoadState::Loading { .. }))
            .count()
    }

    pub fn parked_count(&self) -> usize {
        self.outstanding.len() - self.in_flight_count()
    }

    /// Outstanding tiles wanted for `purpose`.
    pub fn outstanding_for(&self, purpose: Purpose) -> usize {
        self.outstanding
            .values()
            .filter(|o| o.purposes.contains(purpose))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Allow failed tiles to be requested again.
    pub fn clear_failed(&mut self) -> usize {
        let n = self.failed.len();
        self.failed.clear();
        n
    }

    /// Mean duration of recent successful loads.
    pub fn mean_load_time(&self) -> Option<Duration> {
        if self.load_times.is_empty() {
            return None;
        }
        let total: Duration = self.load_times.iter().sum();
        Some(total / self.load_times.len() as u32)
    }

    /// Age of the oldest tile still loading.
    pub fn oldest_in_flight(&self) -> Option<Duration> {
        self.outstanding
            .values()
            .filter_map(|o| match o.state {
                LoadState::Loading { started } => Some(started.elapsed()),
                LoadState::Parked(_) => None,
            })
            .max()
    }
}
