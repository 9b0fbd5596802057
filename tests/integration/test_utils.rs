//! Test utilities for integration tests.
//!
//! This module provides a request-tracking connector and builders for
//! byte-exact pyramids in every supported source format.

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pyramid_viewer::error::IoError;
use pyramid_viewer::io::{ByteRange, NetConnector};
use pyramid_viewer::pyramid::{halving_method, TierDims};
use pyramid_viewer::tile::TileId;

// =============================================================================
// Mock Connector with Request Tracking
// =============================================================================

/// A connector over in-memory blobs that records every request.
///
/// Paths can be made to fail or to stall after the connector has been
/// shared with a session, so retry behaviour can be exercised.
pub struct MockConnector {
    blobs: HashMap<String, Bytes>,
    byte_ranges: bool,
    latency: Duration,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    ranges: Mutex<Vec<(String, ByteRange)>>,
    resources: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            blobs: HashMap::new(),
            byte_ranges: true,
            latency: Duration::ZERO,
            failing: Mutex::new(HashSet::new()),
            stalled: Mutex::new(HashSet::new()),
            ranges: Mutex::new(Vec::new()),
            resources: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_blob(mut self, path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.blobs.insert(path.into(), data.into());
        self
    }

    pub fn with_blobs(mut self, blobs: Vec<(String, Vec<u8>)>) -> Self {
        for (path, data) in blobs {
            self.blobs.insert(path, Bytes::from(data));
        }
        self
    }

    /// Behave like a transport that can only fetch whole resources.
    pub fn without_byte_ranges(mut self) -> Self {
        self.byte_ranges = false;
        self
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn heal(&self, path: &str) {
        self.failing.lock().unwrap().remove(path);
    }

    /// Never answer requests for `path`.
    pub fn stall(&self, path: &str) {
        self.stalled.lock().unwrap().insert(path.to_string());
    }

    pub fn range_requests(&self) -> Vec<(String, ByteRange)> {
        self.ranges.lock().unwrap().clone()
    }

    pub fn resource_requests(&self) -> Vec<String> {
        self.resources.lock().unwrap().clone()
    }

    pub fn requests_for(&self, path: &str) -> usize {
        let ranges = self.ranges.lock().unwrap().iter().filter(|(p, _)| p == path).count();
        let resources = self.resources.lock().unwrap().iter().filter(|p| *p == path).count();
        ranges + resources
    }

    pub fn request_count(&self) -> usize {
        self.ranges.lock().unwrap().len() + self.resources.lock().unwrap().len()
    }

    /// Most requests that were ever being served at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn serve(&self, path: &str) -> Result<Bytes, IoError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.respond(path).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn respond(&self, path: &str) -> Result<Bytes, IoError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let stalled = self.stalled.lock().unwrap().contains(path);
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.lock().unwrap().contains(path) {
            return Err(IoError::Connection(format!("injected failure for {}", path)));
        }
        self.blobs
            .get(path)
            .cloned()
            .ok_or_else(|| IoError::NotFound(path.to_string()))
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetConnector for MockConnector {
    async fn load_bytes(&self, path: &str, range: ByteRange) -> Result<Bytes, IoError> {
        self.ranges.lock().unwrap().push((path.to_string(), range));
        let blob = self.serve(path).await?;
        if range.end > blob.len() as u64 {
            return Err(IoError::RangeOutOfBounds {
                offset: range.start,
                requested: range.len(),
                size: blob.len() as u64,
            });
        }
        Ok(blob.slice(range.start as usize..range.end as usize))
    }

    async fn load_resource(&self, path: &str) -> Result<Bytes, IoError> {
        self.resources.lock().unwrap().push(path.to_string());
        self.serve(path).await
    }

    fn supports_byte_ranges(&self) -> bool {
        self.byte_ranges
    }

    fn identifier(&self) -> &str {
        "mock://"
    }
}

/// Share a connector with a session while keeping a handle for assertions.
pub fn shared(connector: MockConnector) -> (Arc<MockConnector>, Arc<dyn NetConnector>) {
    let mock = Arc::new(connector);
    let dynamic: Arc<dyn NetConnector> = mock.clone();
    (mock, dynamic)
}

// =============================================================================
// Tile Images
// =============================================================================

/// Solid-color PNG tile.
pub fn png_tile(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Distinct opaque color per tier, so rendered output shows which tier drew.
pub fn tier_color(tier: usize) -> [u8; 4] {
    const COLORS: [[u8; 4]; 6] = [
        [200, 30, 30, 255],
        [30, 200, 30, 255],
        [30, 30, 200, 255],
        [200, 200, 30, 255],
        [30, 200, 200, 255],
        [200, 30, 200, 255],
    ];
    COLORS[tier % COLORS.len()]
}

/// Pixel size of a tile, clipped at the right and bottom tier edges.
pub fn tile_dims(tier: &TierDims, tile_size: u32, col: u32, row: u32) -> (u32, u32) {
    let w = (tier.width - col * tile_size).min(tile_size);
    let h = (tier.height - row * tile_size).min(tile_size);
    (w, h)
}

/// Every tile of a pyramid, thumbnail tier first and row-major.
pub fn all_tiles(tiers: &[TierDims], tile_size: u32) -> Vec<(TileId, u32, u32)> {
    let mut out = Vec::new();
    for (t, tier) in tiers.iter().enumerate() {
        for row in 0..tier.tiles_y(tile_size) {
            for col in 0..tier.tiles_x(tile_size) {
                let (w, h) = tile_dims(tier, tile_size, col, row);
                out.push((TileId::new(t, col, row), w, h));
            }
        }
    }
    out
}

// =============================================================================
// Tile Folder Sources
// =============================================================================

/// `ImageProperties.xml` plus `TileGroupN/` tiles under `root`.
pub fn folder_source(root: &str, width: u32, height: u32, tile_size: u32) -> Vec<(String, Vec<u8>)> {
    let tiers = halving_method(width, height, tile_size, tile_size);
    let tiles = all_tiles(&tiers, tile_size);
    let xml = format!(
        r#"<IMAGE_PROPERTIES WIDTH="{}" HEIGHT="{}" NUMTILES="{}" NUMIMAGES="1" VERSION="1.8" TILESIZE="{}" />"#,
        width,
        height,
        tiles.len(),
        tile_size
    );

    let mut blobs = vec![(format!("{}/ImageProperties.xml", root), xml.into_bytes())];
    for (index, (id, w, h)) in tiles.into_iter().enumerate() {
        let group = index / 256;
        blobs.push((
            format!("{}/TileGroup{}/{}.jpg", root, group, id),
            png_tile(w, h, tier_color(id.tier)),
        ));
    }
    blobs
}

/// Path of a folder tile, for injecting failures.
pub fn folder_tile_path(root: &str, tiers: &[TierDims], tile_size: u32, id: TileId) -> String {
    let index = all_tiles(tiers, tile_size)
        .iter()
        .position(|(t, _, _)| *t == id)
        .unwrap();
    format!("{}/TileGroup{}/{}.jpg", root, index / 256, id)
}

// =============================================================================
// Deep Zoom and Tile Server Sources
// =============================================================================

pub fn dzi_xml(width: u32, height: u32, tile_size: u32, overlap: u32, format: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008" TileSize="{}" Overlap="{}" Format="{}">
  <Size Width="{}" Height="{}"/>
</Image>"#,
        tile_size, overlap, format, width, height
    )
}

/// Slide metadata JSON with one level per tier, full resolution as level 0.
pub fn server_json(slide_id: &str, width: u32, height: u32, tile_size: u32) -> String {
    let tiers = halving_method(width, height, tile_size, tile_size);
    let levels: Vec<serde_json::Value> = tiers
        .iter()
        .rev()
        .enumerate()
        .map(|(level, tier)| {
            serde_json::json!({
                "level": level,
                "width": tier.width,
                "height": tier.height,
                "tile_width": tile_size,
                "tile_height": tile_size,
                "tiles_x": tier.tiles_x(tile_size),
                "tiles_y": tier.tiles_y(tile_size),
                "downsample": width as f64 / tier.width as f64,
            })
        })
        .collect();
    serde_json::json!({
        "slide_id": slide_id,
        "format": "aperio_svs",
        "width": width,
        "height": height,
        "level_count": levels.len(),
        "levels": levels,
    })
    .to_string()
}

// =============================================================================
// ZIF Files
// =============================================================================

const ZIF_MAGIC: [u8; 8] = [0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00];
const TYPE_LONG: u16 = 4;
const TYPE_LONG8: u16 = 16;

/// Builder for little-endian BigTIFF-style ZIF files.
///
/// Tile bodies come first, then the out-of-line offset and byte-count
/// tables, then one IFD per tier in full-resolution-first order.
pub struct ZifBuilder {
    width: u32,
    height: u32,
    tile_size: u32,
    sparse: HashSet<TileId>,
}

impl ZifBuilder {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        Self {
            width,
            height,
            tile_size,
            sparse: HashSet::new(),
        }
    }

    /// Store `id` with a zero byte count.
    pub fn sparse(mut self, id: TileId) -> Self {
        self.sparse.insert(id);
        self
    }

    pub fn tiers(&self) -> Vec<TierDims> {
        halving_method(self.width, self.height, self.tile_size, self.tile_size)
    }

    pub fn build(&self) -> Vec<u8> {
        let tiers = self.tiers();
        let mut out = ZIF_MAGIC.to_vec();
        out.extend_from_slice(&0u64.to_le_bytes());

        // (offset, length) per tile, per tier
        let mut locations: Vec<Vec<(u64, u32)>> = vec![Vec::new(); tiers.len()];
        for (id, w, h) in all_tiles(&tiers, self.tile_size) {
            if self.sparse.contains(&id) {
                locations[id.tier].push((0, 0));
                continue;
            }
            let png = png_tile(w, h, tier_color(id.tier));
            locations[id.tier].push((out.len() as u64, png.len() as u32));
            out.extend_from_slice(&png);
        }

        let mut directories = Vec::new();
        for tier in (0..tiers.len()).rev() {
            let dims = tiers[tier];
            let locs = &locations[tier];
            let count = locs.len() as u64;

            let offsets_value = if count == 1 {
                locs[0].0.to_le_bytes()
            } else {
                let at = out.len() as u64;
                for (offset, _) in locs {
                    out.extend_from_slice(&offset.to_le_bytes());
                }
                at.to_le_bytes()
            };
            let counts_value = if count <= 2 {
                let mut value = [0u8; 8];
                for (i, (_, len)) in locs.iter().enumerate() {
                    value[i * 4..i * 4 + 4].copy_from_slice(&len.to_le_bytes());
                }
                value
            } else {
                let at = out.len() as u64;
                for (_, len) in locs {
                    out.extend_from_slice(&len.to_le_bytes());
                }
                at.to_le_bytes()
            };

            directories.push(vec![
                entry(256, TYPE_LONG, 1, (dims.width as u64).to_le_bytes()),
                entry(257, TYPE_LONG, 1, (dims.height as u64).to_le_bytes()),
                entry(322, TYPE_LONG, 1, (self.tile_size as u64).to_le_bytes()),
                entry(323, TYPE_LONG, 1, (self.tile_size as u64).to_le_bytes()),
                entry(324, TYPE_LONG8, count, offsets_value),
                entry(325, TYPE_LONG, count, counts_value),
            ]);
        }

        let mut link_at = 8usize;
        for entries in directories {
            let at = out.len() as u64;
            out[link_at..link_at + 8].copy_from_slice(&at.to_le_bytes());
            out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
            for e in entries {
                out.extend_from_slice(&e);
            }
            link_at = out.len();
            out.extend_from_slice(&0u64.to_le_bytes());
        }
        out
    }
}

fn entry(tag: u16, field_type: u16, count: u64, value: [u8; 8]) -> [u8; 20] {
    let mut e = [0u8; 20];
    e[0..2].copy_from_slice(&tag.to_le_bytes());
    e[2..4].copy_from_slice(&field_type.to_le_bytes());
    e[4..12].copy_from_slice(&count.to_le_bytes());
    e[12..20].copy_from_slice(&value);
    e
}

// =============================================================================
// PFF Files
// =============================================================================

const PFF_HEADER_SIZE: usize = 1060;
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Builder for big-endian PFF files.
///
/// With split headers each tile body drops the 8-byte PNG signature and
/// ends with the index of the header entry that restores it.
pub struct PffBuilder {
    width: u32,
    height: u32,
    tile_size: u32,
    split_headers: bool,
    sparse: HashSet<TileId>,
}

impl PffBuilder {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        Self {
            width,
            height,
            tile_size,
            split_headers: false,
            sparse: HashSet::new(),
        }
    }

    pub fn split_headers(mut self) -> Self {
        self.split_headers = true;
        self
    }

    pub fn sparse(mut self, id: TileId) -> Self {
        self.sparse.insert(id);
        self
    }

    pub fn tiers(&self) -> Vec<TierDims> {
        halving_method(self.width, self.height, self.tile_size, self.tile_size)
    }

    /// Byte offset of the tile index.
    pub fn index_start(&self) -> u64 {
        (PFF_HEADER_SIZE + self.region().len()) as u64
    }

    fn region(&self) -> Vec<u8> {
        if !self.split_headers {
            return Vec::new();
        }
        let headers: [&[u8]; 2] = [b"unused", &PNG_SIGNATURE];
        let mut region = (headers.len() as u32).to_be_bytes().to_vec();
        for h in headers {
            region.extend_from_slice(&(h.len() as u32).to_be_bytes());
        }
        for h in headers {
            region.extend_from_slice(h);
        }
        region
    }

    pub fn build(&self) -> Vec<u8> {
        let tiers = self.tiers();
        let tiles = all_tiles(&tiers, self.tile_size);
        let region = self.region();

        let mut out = vec![0u8; PFF_HEADER_SIZE];
        for (at, value) in [
            (8usize, 2u32),
            (108, self.tile_size),
            (116, region.len() as u32),
            (124, tiles.len() as u32),
            (1052, self.width),
            (1056, self.height),
        ] {
            out[at..at + 4].copy_from_slice(&value.to_be_bytes());
        }
        out.extend_from_slice(&region);

        let index_start = out.len();
        out.resize(index_start + tiles.len() * 12, 0);

        for (i, (id, w, h)) in tiles.into_iter().enumerate() {
            let (offset, len) = if self.sparse.contains(&id) {
                (0u64, 0u32)
            } else {
                let png = png_tile(w, h, tier_color(id.tier));
                let body = if self.split_headers {
                    let mut body = png[PNG_SIGNATURE.len()..].to_vec();
                    body.push(1);
                    body
                } else {
                    png
                };
                let offset = out.len() as u64;
                out.extend_from_slice(&body);
                (offset, body.len() as u32)
            };
            let at = index_start + i * 12;
            out[at..at + 8].copy_from_slice(&offset.to_be_bytes());
            out[at + 8..at + 12].copy_from_slice(&len.to_be_bytes());
        }
        out
    }
}
