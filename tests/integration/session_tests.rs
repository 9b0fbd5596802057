//! Viewer session integration tests.
//!
//! Tests verify:
//! - Opening images in every packed and folder format and settling the view
//! - Status transitions and their events
//! - Generation tagging across image changes
//! - Validation retries for failed tiles
//! - Zoom and pan constraints, drags, resizes, animation and preloading

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use pyramid_viewer::geometry::ZoomLimit;
use pyramid_viewer::pyramid::halving_method;
use pyramid_viewer::view::{DrawCall, ViewPose};
use pyramid_viewer::{
    Layer, NetConnector, RasterSurface, RecordingSurface, Surface, TileBounds, TileId,
    UpdatePhase, ViewerConfig, ViewerError, ViewerEvent, ViewerSession,
};

use super::test_utils::{
    folder_source, folder_tile_path, shared, tier_color, MockConnector, PffBuilder, ZifBuilder,
};

const SETTLE: Duration = Duration::from_secs(5);

/// Fast fades and validation so sessions settle quickly.
fn test_config() -> ViewerConfig {
    ViewerConfig {
        fade_step: 0.5,
        fade_tick: Duration::from_millis(5),
        validation_interval: Duration::from_millis(40),
        load_timeout: Duration::from_secs(2),
        ..ViewerConfig::default()
    }
}

fn folder_connector() -> MockConnector {
    MockConnector::new().with_blobs(folder_source("img", 1000, 800, 256))
}

fn session_with<S: Surface>(
    config: ViewerConfig,
    connector: Arc<dyn NetConnector>,
    surface: S,
) -> ViewerSession<S> {
    ViewerSession::new(config, connector, surface, 400, 300).unwrap()
}

fn drain(events: &mut broadcast::Receiver<ViewerEvent>) -> Vec<ViewerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn count(events: &[ViewerEvent], wanted: &ViewerEvent) -> usize {
    events.iter().filter(|e| *e == wanted).count()
}

/// Open the 1000x800 folder image and wait for the initial view.
async fn settled_folder_session() -> (Arc<MockConnector>, ViewerSession<RecordingSurface>) {
    let (mock, connector) = shared(folder_connector());
    let mut session = session_with(test_config(), connector, RecordingSurface::new());
    session.set_image("img", None).await.unwrap();
    assert!(session.run_until_settled(SETTLE).await);
    (mock, session)
}

// =============================================================================
// Opening Images
// =============================================================================

#[tokio::test]
async fn test_open_folder_initial_view() {
    let (mock, connector) = shared(folder_connector());
    let mut session = session_with(test_config(), connector, RecordingSurface::new());
    let mut events = session.events();

    session.set_image("img", None).await.unwrap();
    assert!(session.initialized());

    // Whole image centered at the fit zoom: min(400/1000, 300/800)
    let view = session.view().clone();
    assert_eq!((view.x, view.y), (500.0, 400.0));
    assert!((view.zoom - 0.375).abs() < 1e-9);
    assert_eq!(view.min_zoom, view.zoom);
    assert_eq!(view.tier_current, 1);
    assert_eq!(view.tier_backfill, 0);
    assert!(!view.backfill_dynamic);

    assert!(session.run_until_settled(SETTLE).await);
    assert_eq!(session.phase(), UpdatePhase::Idle);

    let status = session.status();
    assert!(status.display_loaded && status.display_drawn);
    assert!(status.backfill_loaded && status.backfill_drawn);
    assert!(status.precache_loaded);

    for col in 0..2 {
        for row in 0..2 {
            assert!(session.cache().contains(&TileId::new(1, col, row)));
        }
    }
    assert!(session.backfill_cache().contains(&TileId::new(0, 0, 0)));
    // The precached tile doubles as backfill and is fetched once
    assert_eq!(mock.requests_for("img/TileGroup0/0-0-0.jpg"), 1);

    let drawn = session.surface().tiles_drawn(Layer::Frontfill);
    assert!(drawn.contains(&TileId::new(1, 1, 1)));

    let events = drain(&mut events);
    assert!(matches!(
        events[0],
        ViewerEvent::ImageOpened {
            width: 1000,
            height: 800,
            tiers: 3,
            ..
        }
    ));
    for wanted in [
        ViewerEvent::DisplayLoaded,
        ViewerEvent::DisplayDrawn,
        ViewerEvent::BackfillLoaded,
        ViewerEvent::BackfillDrawn,
        ViewerEvent::PrecacheLoaded,
    ] {
        assert_eq!(count(&events, &wanted), 1, "{:?}", wanted);
    }
    let loaded = events.iter().position(|e| *e == ViewerEvent::DisplayLoaded);
    let drawn = events.iter().position(|e| *e == ViewerEvent::DisplayDrawn);
    assert!(loaded <= drawn);
}

#[tokio::test]
async fn test_render_zif_to_raster() {
    let (_, connector) =
        shared(MockConnector::new().with_blob("img.zif", ZifBuilder::new(1000, 800, 256).build()));
    let mut session = session_with(test_config(), connector, RasterSurface::new(400, 300));
    session.set_image("img.zif", None).await.unwrap();
    assert!(session.run_until_settled(SETTLE).await);
    assert!(session.display_drawn());

    let out = session.surface().composite();
    assert_eq!(out.dimensions(), (400, 300));
    assert_eq!(out.get_pixel(200, 150).0, tier_color(1));
}

#[tokio::test]
async fn test_render_pff_with_split_headers() {
    let data = PffBuilder::new(1000, 800, 256).split_headers().build();
    let (_, connector) = shared(MockConnector::new().with_blob("img.pff", data));
    let mut session = session_with(test_config(), connector, RasterSurface::new(400, 300));
    session.set_image("img.pff", None).await.unwrap();
    assert!(session.run_until_settled(SETTLE).await);
    assert!(session.display_drawn());
    assert_eq!(session.scheduler().failed_count(), 0);

    let out = session.surface().composite();
    assert_eq!(out.get_pixel(200, 150).0, tier_color(1));
}

#[tokio::test]
async fn test_sparse_tiles_count_as_loaded() {
    let sparse = TileId::new(1, 1, 0);
    let data = ZifBuilder::new(1000, 800, 256).sparse(sparse).build();
    let (_, connector) = shared(MockConnector::new().with_blob("img.zif", data));
    let mut session = session_with(test_config(), connector, RecordingSurface::new());
    session.set_image("img.zif", None).await.unwrap();
    assert!(session.run_until_settled(SETTLE).await);

    assert!(session.display_loaded());
    assert!(session.cached_tile(&sparse).unwrap().is_sparse());
    assert!(!session
        .surface()
        .tiles_drawn(Layer::Frontfill)
        .contains(&sparse));
}

#[tokio::test]
async fn test_invalid_image_then_valid_image() {
    let (_, connector) = shared(folder_connector());
    let mut session = session_with(test_config(), connector, RecordingSurface::new());
    let mut events = session.events();

    let err = session.set_image("missing", None).await.unwrap_err();
    assert!(matches!(err, ViewerError::Format(_)));
    assert!(!session.initialized());
    let first = drain(&mut events);
    assert_eq!(first.len(), 1);
    assert!(matches!(first[0], ViewerEvent::FormatInvalid { .. }));

    session.set_image("img", None).await.unwrap();
    assert!(session.run_until_settled(SETTLE).await);
    assert!(session.display_drawn());
}

#[tokio::test]
async fn test_stale_loads_dropped_after_image_change() {
    let blobs = folder_source("a", 1000, 800, 256)
        .into_iter()
        .chain(folder_source("b", 200, 100, 256))
        .collect();
    let (_, connector) = shared(
        MockConnector::new()
            .with_blobs(blobs)
            .with_latency(Duration::from_millis(20)),
    );
    let mut session = session_with(test_config(), connector, RecordingSurface::new());

    session.set_image("a", None).await.unwrap();
    session.set_image("b", None).await.unwrap();
    assert_eq!(session.generation(), 2);
    assert!(session.run_until_settled(SETTLE).await);

    assert_eq!(session.descriptor().unwrap().tier_count(), 1);
    let tile = session.cached_tile(&TileId::new(0, 0, 0)).unwrap();
    let image = tile.image.as_ref().unwrap();
    assert_eq!((image.width(), image.height()), (200, 100));
    assert!(session.cached_tile(&TileId::new(1, 0, 0)).is_none());
    assert!(session.cache().is_empty());
}

// =============================================================================
// Failures and Validation
// =============================================================================

#[tokio::test]
async fn test_failed_tile_retried_then_given_up() {
    let tiers = halving_method(1000, 800, 256, 256);
    let failing = TileId::new(1, 1, 1);
    let path = folder_tile_path("img", &tiers, 256, failing);
    let (mock, connector) = shared(folder_connector());
    mock.fail(&path);

    let mut session = session_with(test_config(), connector, RecordingSurface::new());
    let mut events = session.events();
    session.set_image("img", None).await.unwrap();
    assert!(session.run_until_settled(SETTLE).await);

    // One load plus two retriggered retries
    assert_eq!(mock.requests_for(&path), 3);
    assert!(!session.display_loaded());
    assert_eq!(session.scheduler().failed_count(), 1);

    let events = drain(&mut events);
    let failures = events
        .iter()
        .filter(|e| matches!(e, ViewerEvent::TileFailed { id, .. } if *id == failing))
        .count();
    assert_eq!(failures, 3);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ViewerEvent::Message(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_failed_tile_recovers_on_retry() {
    let tiers = halving_method(1000, 800, 256, 256);
    let failing = TileId::new(1, 0, 1);
    let path = folder_tile_path("img", &tiers, 256, failing);
    let (mock, connector) = shared(folder_connector());
    mock.fail(&path);

    let config = ViewerConfig {
        validation_interval: Duration::from_millis(200),
        ..test_config()
    };
    let mut session = session_with(config, connector, RecordingSurface::new());
    session.set_image("img", None).await.unwrap();

    // Not settled while a retry is still owed
    assert!(!session.run_until_settled(Duration::from_millis(100)).await);
    assert!(session.scheduler().is_failed(&failing));

    mock.heal(&path);
    assert!(session.run_until_settled(SETTLE).await);
    assert!(session.display_loaded());
    assert!(session.cache().contains(&failing));
    assert_eq!(mock.requests_for(&path), 2);
}

// =============================================================================
// Interaction
// =============================================================================

#[tokio::test]
async fn test_zoom_constrained_once_per_request() {
    let (_, mut session) = settled_folder_session().await;
    let mut events = session.events();

    session.set_view_pose(ViewPose::new(500.0, 400.0, 5.0, 0.0), false);
    assert_eq!(session.get_zoom(), 1.0);
    let seen = drain(&mut events);
    assert_eq!(count(&seen, &ViewerEvent::ZoomConstrained(ZoomLimit::Max)), 1);
    assert_eq!(count(&seen, &ViewerEvent::ViewZoomed { zoom: 1.0 }), 1);

    // Asking for the bound itself is not a breach
    session.set_view_pose(ViewPose::new(500.0, 400.0, 1.0, 0.0), false);
    let seen = drain(&mut events);
    assert!(!seen.iter().any(|e| matches!(e, ViewerEvent::ZoomConstrained(_))));

    session.zoom_by(0.001);
    assert!((session.get_zoom() - 0.375).abs() < 1e-9);
    let seen = drain(&mut events);
    assert_eq!(count(&seen, &ViewerEvent::ZoomConstrained(ZoomLimit::Min)), 1);
}

#[tokio::test]
async fn test_api_zoom_percentages() {
    let (_, mut session) = settled_folder_session().await;
    session.set_view(500.0, 400.0, 50.0, 0.0, false);
    assert_eq!(session.get_zoom(), 0.5);
    assert_eq!(session.view().tier_current, 1);

    session.set_view(500.0, 400.0, 100.0, 0.0, false);
    assert_eq!(session.get_zoom(), 1.0);
    assert_eq!(session.view().tier_current, 2);
}

#[tokio::test]
async fn test_pan_constrained_inside_image() {
    let (_, mut session) = settled_folder_session().await;
    let mut events = session.events();

    session.set_view(-500.0, 400.0, 1.0, 0.0, false);
    let center = session.get_coordinates();
    assert!(center.x >= 0.0 && center.x <= 1000.0);
    let seen = drain(&mut events);
    assert!(seen
        .iter()
        .any(|e| matches!(e, ViewerEvent::PanConstrained { .. })));
}

#[tokio::test]
async fn test_drag_offset_baked_on_update() {
    let (_, mut session) = settled_folder_session().await;
    session.set_view(500.0, 400.0, 1.0, 0.0, false);
    session.surface_mut().take();

    session.drag_by(100.0, 0.0);
    assert_eq!(session.get_coordinates().x, 500.0);
    assert!(session.surface().calls().contains(&DrawCall::Offset {
        layer: Layer::Frontfill,
        dx: 100.0,
        dy: 0.0,
        scale: 1.0,
    }));

    session.update_view(false);
    assert!((session.get_coordinates().x - 400.0).abs() < 1e-9);
    assert!(session.surface().calls().contains(&DrawCall::Offset {
        layer: Layer::Frontfill,
        dx: 0.0,
        dy: 0.0,
        scale: 1.0,
    }));
}

#[tokio::test]
async fn test_pan_and_rotate() {
    let (_, mut session) = settled_folder_session().await;
    session.set_view(500.0, 400.0, 1.0, 0.0, false);

    session.pan_by(50.0, -20.0);
    let center = session.get_coordinates();
    assert!((center.x - 550.0).abs() < 1e-9);
    assert!((center.y - 380.0).abs() < 1e-9);

    // Rotation snaps to right angles
    session.rotate_by(100.0);
    assert_eq!(session.get_rotation(), 90.0);
    session.rotate_by(-90.0);
    assert_eq!(session.get_rotation(), 0.0);
}

#[tokio::test]
async fn test_return_to_prior_view() {
    let (_, mut session) = settled_folder_session().await;
    session.set_view(400.0, 300.0, 0.5, 0.0, false);
    session.set_view(600.0, 500.0, 1.0, 0.0, false);

    session.return_to_prior_view(false);
    let view = session.view();
    assert_eq!((view.x, view.y, view.zoom), (400.0, 300.0, 0.5));
}

#[tokio::test]
async fn test_animated_view_change() {
    let (_, mut session) = settled_folder_session().await;
    let mut events = session.events();

    session.set_view(500.0, 400.0, 1.0, 0.0, true);
    // Nothing moves until the animation ticks
    assert!((session.get_zoom() - 0.375).abs() < 1e-9);

    assert!(session.run_until_settled(SETTLE).await);
    assert!((session.get_zoom() - 1.0).abs() < 1e-9);
    let zooms = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ViewerEvent::ViewZoomed { .. }))
        .count();
    assert!(zooms > 1);
    assert!(session.display_loaded());
}

#[tokio::test]
async fn test_resize_recomputes_zoom_limits() {
    let (_, mut session) = settled_folder_session().await;
    session.resize(800, 600);

    assert!(session.surface().calls().contains(&DrawCall::Resize(800, 600)));
    // Fit zoom is now min(800/1000, 600/800)
    assert!((session.view().min_zoom - 0.75).abs() < 1e-9);
    assert!((session.get_zoom() - 0.75).abs() < 1e-9);
    assert_eq!(session.view().tier_current, 2);

    assert!(session.run_until_settled(SETTLE).await);
    assert!(session.display_drawn());
}

#[tokio::test]
async fn test_preload_region() {
    let (mock, mut session) = settled_folder_session().await;

    let requested = session.preload_region(2, TileBounds::new(0, 1, 0, 1));
    assert_eq!(requested, 4);
    assert!(session.run_until_settled(SETTLE).await);
    for col in 0..2 {
        for row in 0..2 {
            assert!(session.cache().contains(&TileId::new(2, col, row)));
        }
    }

    // Already cached, and clipped to the tier grid
    assert_eq!(session.preload_region(2, TileBounds::new(0, 1, 0, 1)), 0);
    assert_eq!(session.preload_region(2, TileBounds::new(3, 9, 3, 9)), 1);
    assert_eq!(session.preload_region(7, TileBounds::new(0, 0, 0, 0)), 0);
    assert!(session.run_until_settled(SETTLE).await);
    assert_eq!(mock.requests_for("img/TileGroup0/2-3-3.jpg"), 1);
}

#[tokio::test]
async fn test_cache_capacity_bounds_tiles() {
    let (_, connector) = shared(folder_connector());
    let config = ViewerConfig {
        tile_cache_capacity: 2,
        ..test_config()
    };
    let mut session = session_with(config, connector, RecordingSurface::new());
    session.set_image("img", None).await.unwrap();
    assert!(session.run_until_settled(SETTLE).await);

    assert_eq!(session.cache().len(), 2);
    // Backfill tiles are kept outside the bounded cache
    assert!(session.backfill_cache().contains(&TileId::new(0, 0, 0)));
}
