//! Tile folder sources.
//!
//! ```text
//! {root}/ImageProperties.xml
//! {root}/TileGroup0/0-0-0.jpg
//! {root}/TileGroup0/1-0-0.jpg
//! ...
//! ```
//!
//! Tiles are numbered thumbnail tier first, row-major within a tier, and
//! stored 256 to a `TileGroup` folder.

use tracing::debug;

use super::FetchDescriptor;
use crate::error::FormatError;
use crate::io::NetConnector;
use crate::pyramid::{calculate_tier_values, PyramidDescriptor};
use crate::tile::TileId;

/// Name of the properties document inside the folder.
pub const PROPERTIES_FILE: &str = "ImageProperties.xml";

/// Tiles per `TileGroup` folder.
pub const TILES_PER_GROUP: u64 = 256;

const DEFAULT_TILE_SIZE: u32 = 256;

/// Attributes of `ImageProperties.xml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProperties {
    pub width: u32,
    pub height: u32,
    pub num_tiles: u64,
    pub num_images: u32,
    pub tile_size: u32,
}

impl ImageProperties {
    /// Parse the `IMAGE_PROPERTIES` element.
    pub fn parse(xml: &str) -> Result<Self, FormatError> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| FormatError::Properties(format!("{}: {}", PROPERTIES_FILE, e)))?;
        let root = doc.root_element();
        if !root.tag_name().name().eq_ignore_ascii_case("IMAGE_PROPERTIES") {
            return Err(FormatError::Properties(format!(
                "expected IMAGE_PROPERTIES root, found {}",
                root.tag_name().name()
            )));
        }

        let attr = |name: &str| {
            root.attributes()
                .find(|a| a.name().eq_ignore_ascii_case(name))
                .map(|a| a.value().trim())
        };
        let required = |name: &str| -> Result<u64, FormatError> {
            let raw = attr(name)
                .ok_or_else(|| FormatError::Properties(format!("missing {} attribute", name)))?;
            raw.parse()
                .map_err(|_| FormatError::Properties(format!("invalid {} value '{}'", name, raw)))
        };
        let optional = |name: &str, default: u64| -> Result<u64, FormatError> {
            match attr(name) {
                Some(_) => required(name),
                None => Ok(default),
            }
        };

        let to_u32 = |name: &str, v: u64| {
            u32::try_from(v).map_err(|_| FormatError::Properties(format!("{} too large", name)))
        };

        Ok(Self {
            width: to_u32("WIDTH", required("WIDTH")?)?,
            height: to_u32("HEIGHT", required("HEIGHT")?)?,
            num_tiles: required("NUMTILES")?,
            num_images: to_u32("NUMIMAGES", optional("NUMIMAGES", 1)?)?,
            tile_size: to_u32("TILESIZE", optional("TILESIZE", DEFAULT_TILE_SIZE as u64)?)?,
        })
    }
}

/// Adapter for tile folders.
#[derive(Debug, Clone)]
pub struct FolderAdapter {
    root: String,
}

impl FolderAdapter {
    /// `path` is the folder itself or its `ImageProperties.xml`.
    pub fn new(path: &str) -> Self {
        let trimmed = path.trim_end_matches('/');
        let root = match trimmed.rsplit_once('/') {
            Some((parent, file)) if file.eq_ignore_ascii_case(PROPERTIES_FILE) => parent,
            None if trimmed.eq_ignore_ascii_case(PROPERTIES_FILE) => "",
            _ => trimmed,
        };
        Self {
            root: root.to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn properties_path(&self) -> String {
        self.join(PROPERTIES_FILE)
    }

    fn join(&self, rest: &str) -> String {
        if self.root.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{}", self.root, rest)
        }
    }

    pub async fn parse(
        &mut self,
        connector: &dyn NetConnector,
    ) -> Result<PyramidDescriptor, FormatError> {
        let xml = connector.load_properties(&self.properties_path()).await?;
        let props = ImageProperties::parse(&xml)?;
        debug!(?props, "image properties");

        if props.num_images != 1 {
            return Err(FormatError::Properties(format!(
                "NUMIMAGES is {}, only single-image folders are supported",
                props.num_images
            )));
        }

        let (tiers, _) = calculate_tier_values(
            props.width,
            props.height,
            props.tile_size,
            props.tile_size,
            Some(props.num_tiles),
        )?;
        Ok(PyramidDescriptor::from_tiers(
            props.tile_size,
            props.tile_size,
            &tiers,
        ))
    }

    /// `TileGroup` folder holding a tile.
    pub fn tile_group(desc: &PyramidDescriptor, id: TileId) -> u64 {
        desc.linear_index(id.tier, id.col, id.row).unwrap_or(0) / TILES_PER_GROUP
    }

    pub fn resolve(&self, desc: &PyramidDescriptor, id: TileId) -> FetchDescriptor {
        let group = Self::tile_group(desc, id);
        FetchDescriptor::Url(self.join(&format!("TileGroup{}/{}.jpg", group, id)))
    }
}
