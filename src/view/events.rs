//! Observable viewer events.

use tokio::sync::broadcast;

use crate::format::SourceFormat;
use crate::geometry::ZoomLimit;
use crate::tile::TileId;

/// Events buffered per subscriber before the oldest are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something observable happened in a viewer session.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    /// A pyramid header was parsed and the session is initialized
    ImageOpened {
        path: String,
        format: SourceFormat,
        width: u32,
        height: u32,
        tiers: usize,
    },
    /// The image could not be opened; the session stays uninitialized
    FormatInvalid { path: String, message: String },

    ViewPanned { x: f64, y: f64 },
    ViewZoomed { zoom: f64 },
    ViewRotated { rotation: f64 },
    /// Any committed change of the view pose
    ViewChanged {
        x: f64,
        y: f64,
        zoom: f64,
        rotation: f64,
    },

    /// A pan target was moved back inside the allowed area
    PanConstrained { x: f64, y: f64 },
    /// A zoom request fell outside `[min_zoom, max_zoom]`
    ZoomConstrained(ZoomLimit),

    TierChanged {
        tier: usize,
        backfill: usize,
        dynamic_backfill: bool,
    },

    /// Every required frontfill tile is resolved
    DisplayLoaded,
    /// Every required frontfill tile is drawn at full opacity
    DisplayDrawn,
    BackfillLoaded,
    BackfillDrawn,
    /// The static backfill tier is fully cached
    PrecacheLoaded,

    TileFailed { id: TileId, message: String },
    /// Recoverable problem worth showing to the user
    Message(String),
}

/// Fan-out of [`ViewerEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ViewerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ViewerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
