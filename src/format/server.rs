//! Slide tile server sources.
//!
//! The server publishes slide metadata as JSON and serves JPEG tiles:
//!
//! ```text
//! GET {server}/slides/{slide_id}                   -> SlideMetadata
//! GET {server}/tiles/{slide_id}/{level}/{x}/{y}.jpg
//! ```
//!
//! Server levels count down from full resolution (level 0), so pyramid tier
//! `t` is level `max_tier - t`.

use serde::Deserialize;

use super::FetchDescriptor;
use crate::error::FormatError;
use crate::io::NetConnector;
use crate::pyramid::{PyramidDescriptor, TierDims};
use crate::tile::TileId;

/// Metadata for a single server level.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SlideLevel {
    /// Level index (0 = highest resolution)
    pub level: usize,

    /// Width of this level in pixels
    pub width: u32,

    /// Height of this level in pixels
    pub height: u32,

    pub tile_width: u32,
    pub tile_height: u32,

    /// Number of tiles in X direction
    pub tiles_x: u32,

    /// Number of tiles in Y direction
    pub tiles_y: u32,

    /// Downsample factor relative to level 0
    #[serde(default)]
    pub downsample: f64,
}

/// Response of the slide metadata endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SlideMetadata {
    pub slide_id: String,

    /// Container format reported by the server
    #[serde(default)]
    pub format: String,

    pub width: u32,
    pub height: u32,
    pub level_count: usize,
    pub levels: Vec<SlideLevel>,
}

/// Adapter for slide tile servers.
#[derive(Debug, Clone)]
pub struct ServerAdapter {
    path: String,
    server: String,
    slide_id: String,
}

impl ServerAdapter {
    /// `path` is the metadata URL, `{server}/slides/{slide_id}`.
    pub fn new(path: &str) -> Self {
        let trimmed = path.trim_end_matches('/');
        let (server, slide_id) = trimmed
            .split_once("/slides/")
            .unwrap_or((trimmed, ""));
        Self {
            path: trimmed.to_string(),
            server: server.to_string(),
            slide_id: slide_id.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn slide_id(&self) -> &str {
        &self.slide_id
    }

    pub async fn parse(
        &mut self,
        connector: &dyn NetConnector,
    ) -> Result<PyramidDescriptor, FormatError> {
        if self.slide_id.is_empty() {
            return Err(FormatError::Properties(format!(
                "'{}' is not a /slides/{{id}} URL",
                self.path
            )));
        }

        let json = connector.load_properties(&self.path).await?;
        let meta: SlideMetadata = serde_json::from_str(&json)
            .map_err(|e| FormatError::Properties(format!("slide metadata: {}", e)))?;
        Self::descriptor_from(&meta)
    }

    /// Build a thumbnail-first descriptor from server levels.
    pub fn descriptor_from(meta: &SlideMetadata) -> Result<PyramidDescriptor, FormatError> {
        if meta.levels.is_empty() {
            return Err(FormatError::Properties("slide has no levels".to_string()));
        }
        if meta.levels.len() != meta.level_count {
            return Err(FormatError::Properties(format!(
                "level_count is {} but {} levels listed",
                meta.level_count,
                meta.levels.len()
            )));
        }

        let mut levels = meta.levels.clone();
        levels.sort_by_key(|l| std::cmp::Reverse(l.level));

        let tile_width = levels[0].tile_width;
        let tile_height = levels[0].tile_height;
        if tile_width == 0 || tile_height == 0 {
            return Err(FormatError::InvalidGeometry("zero tile size".to_string()));
        }

        let mut dims = Vec::with_capacity(levels.len());
        for level in &levels {
            if level.tile_width != tile_width || level.tile_height != tile_height {
                return Err(FormatError::InvalidGeometry(format!(
                    "level {} uses {}x{} tiles, expected {}x{}",
                    level.level, level.tile_width, level.tile_height, tile_width, tile_height
                )));
            }
            let tier = TierDims::new(level.width, level.height);
            if tier.tiles_x(tile_width) != level.tiles_x || tier.tiles_y(tile_height) != level.tiles_y
            {
                return Err(FormatError::InvalidGeometry(format!(
                    "level {} declares {}x{} tiles for {}x{} pixels",
                    level.level, level.tiles_x, level.tiles_y, level.width, level.height
                )));
            }
            dims.push(tier);
        }

        Ok(PyramidDescriptor::from_tiers(tile_width, tile_height, &dims))
    }

    pub fn resolve(&self, desc: &PyramidDescriptor, id: TileId) -> FetchDescriptor {
        let level = desc.max_tier() - id.tier;
        FetchDescriptor::Url(format!(
            "{}/tiles/{}/{}/{}/{}.jpg",
            self.server, self.slide_id, level, id.col, id.row
        ))
    }
}
