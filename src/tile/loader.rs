//! Bounded asynchronous tile and chunk loading.
//!
//! Every load runs on its own tokio task. A semaphore caps the number of
//! loads holding a connection; further loads queue on it in FIFO order
//! instead of being rejected. Results are posted back to the owning session
//! over an unbounded channel tagged with the image generation they were
//! issued for, so completions for a replaced image can be dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::decoder::decode_tile_blocking;
use super::model::{Tile, TileId, TileImage};
use crate::error::{IoError, TileError};
use crate::format::FetchDescriptor;
use crate::io::NetConnector;
use crate::pyramid::{ChunkKey, ChunkRequest};

/// Default cap on simultaneously running loads.
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 300;

/// Default timeout of a single fetch.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Completion of a load, delivered to the session.
#[derive(Debug)]
pub enum LoadEvent {
    Tile {
        generation: u64,
        id: TileId,
        result: Result<Tile, TileError>,
        elapsed: Duration,
    },
    Chunk {
        generation: u64,
        key: ChunkKey,
        result: Result<Bytes, IoError>,
    },
}

impl LoadEvent {
    pub fn generation(&self) -> u64 {
        match self {
            LoadEvent::Tile { generation, .. } | LoadEvent::Chunk { generation, .. } => *generation,
        }
    }
}

/// Issues fetches through a [`NetConnector`].
#[derive(Clone)]
pub struct TileLoader {
    connector: Arc<dyn NetConnector>,
    permits: Arc<Semaphore>,
    load_timeout: Duration,
    events: mpsc::UnboundedSender<LoadEvent>,
}

impl TileLoader {
    /// Create a loader and the receiving end of its completion channel.
    pub fn new(
        connector: Arc<dyn NetConnector>,
        max_concurrent_loads: usize,
        load_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<LoadEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let loader = Self {
            connector,
            permits: Arc::new(Semaphore::new(max_concurrent_loads.max(1))),
            load_timeout,
            events,
        };
        (loader, receiver)
    }

    pub fn connector(&self) -> &Arc<dyn NetConnector> {
        &self.connector
    }

    /// Loads currently allowed to start without waiting.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Fetch and decode a tile. `origin` is its top-left corner in tier pixels.
    pub fn load_tile(&self, generation: u64, id: TileId, origin: (i64, i64), fetch: FetchDescriptor) {
        let connector = Arc::clone(&self.connector);
        let permits = Arc::clone(&self.permits);
        let events = self.events.clone();
        let limit = self.load_timeout;

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let started = Instant::now();
            let name = id.name();

            let result = match timeout(limit, fetch_image(connector.as_ref(), &name, fetch)).await {
                Ok(Ok(image)) => Ok(Tile::loaded(id, origin.0, origin.1, image)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(TileError::Io(IoError::Timeout {
                    path: name,
                    millis: limit.as_millis() as u64,
                })),
            };
            if let Err(e) = &result {
                warn!(tile = %id, error = %e, "tile load failed");
            }

            // The receiver is gone once the session is dropped
            let _ = events.send(LoadEvent::Tile {
                generation,
                id,
                result,
                elapsed: started.elapsed(),
            });
        });
    }

    /// Fetch one lookup-table chunk of a packed file.
    pub fn load_chunk(&self, generation: u64, path: String, request: ChunkRequest) {
        let connector = Arc::clone(&self.connector);
        let permits = Arc::clone(&self.permits);
        let events = self.events.clone();
        let limit = self.load_timeout;

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            debug!(
                path = %path,
                key = ?request.key,
                start = request.range.start,
                len = request.range.len(),
                "fetching table chunk"
            );

            let result = match timeout(limit, connector.load_bytes(&path, request.range)).await {
                Ok(result) => result,
                Err(_) => Err(IoError::Timeout {
                    path: path.clone(),
                    millis: limit.as_millis() as u64,
                }),
            };
            if let Err(e) = &result {
                warn!(path = %path, key = ?request.key, error = %e, "chunk load failed");
            }

            let _ = events.send(LoadEvent::Chunk {
                generation,
                key: request.key,
                result,
            });
        });
    }
}

async fn fetch_image(
    connector: &dyn NetConnector,
    name: &str,
    fetch: FetchDescriptor,
) -> Result<TileImage, TileError> {
    match fetch {
        FetchDescriptor::Url(url) => connector.load_image(&url).await,
        FetchDescriptor::Range {
            path,
            range,
            headers,
        } => {
            let body = connector.load_bytes(&path, range).await?;
            let data = match headers {
                Some(table) => table.assemble(name, &body)?,
                None => body,
            };
            decode_tile_blocking(name.to_string(), data).await
        }
        FetchDescriptor::Pending(_) | FetchDescriptor::Skip => Err(TileError::Decode {
            name: name.to_string(),
            message: "tile has no fetchable data".to_string(),
        }),
    }
}
