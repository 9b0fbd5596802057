//! Deep Zoom sources.
//!
//! ```text
//! image.dzi
//! image_files/{level}/{col}_{row}.{format}
//! ```
//!
//! Deep Zoom numbers levels from a 1x1 image up to full resolution, so the
//! folders for the levels smaller than one tile exist but are never used.
//! Pyramid tier `t` lives in folder `t + skip`, where `skip` is the number of
//! those unused levels.

use super::FetchDescriptor;
use crate::error::FormatError;
use crate::io::NetConnector;
use crate::pyramid::{legacy_method, PyramidDescriptor, Rounding};
use crate::tile::TileId;

/// Contents of a `.dzi` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DziDescriptor {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub overlap: u32,
    pub format: String,
}

impl DziDescriptor {
    /// Parse `<Image TileSize Overlap Format><Size Width Height/></Image>`.
    ///
    /// Namespaces are ignored.
    pub fn parse(xml: &str) -> Result<Self, FormatError> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| FormatError::Properties(format!("DZI: {}", e)))?;
        let image = doc.root_element();
        if image.tag_name().name() != "Image" {
            return Err(FormatError::Properties(format!(
                "expected Image root, found {}",
                image.tag_name().name()
            )));
        }
        let size = image
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Size")
            .ok_or_else(|| FormatError::Properties("missing Size element".to_string()))?;

        let number = |node: roxmltree::Node, name: &str| -> Result<u32, FormatError> {
            let raw = node
                .attribute(name)
                .ok_or_else(|| FormatError::Properties(format!("missing {} attribute", name)))?;
            raw.trim()
                .parse()
                .map_err(|_| FormatError::Properties(format!("invalid {} value '{}'", name, raw)))
        };

        Ok(Self {
            width: number(size, "Width")?,
            height: number(size, "Height")?,
            tile_size: number(image, "TileSize")?,
            overlap: match image.attribute("Overlap") {
                Some(_) => number(image, "Overlap")?,
                None => 0,
            },
            format: image.attribute("Format").unwrap_or("jpg").to_string(),
        })
    }
}

/// Highest Deep Zoom level: `ceil(log2(max(width, height)))`.
pub fn max_dzi_level(width: u32, height: u32) -> usize {
    let max_dim = width.max(height) as f64;
    if max_dim <= 1.0 {
        return 0;
    }
    max_dim.log2().ceil() as usize
}

/// Adapter for Deep Zoom descriptors.
#[derive(Debug, Clone)]
pub struct DeepZoomAdapter {
    path: String,
    files_root: String,
    overlap: u32,
    format: String,
    skip: usize,
}

impl DeepZoomAdapter {
    pub fn new(path: &str) -> Self {
        let base = match path.rsplit_once('.') {
            Some((base, ext)) if !ext.contains('/') => base,
            _ => path,
        };
        Self {
            path: path.to_string(),
            files_root: format!("{}_files", base),
            overlap: 0,
            format: "jpg".to_string(),
            skip: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    /// Deep Zoom levels below pyramid tier 0.
    pub fn skip(&self) -> usize {
        self.skip
    }

    pub async fn parse(
        &mut self,
        connector: &dyn NetConnector,
    ) -> Result<PyramidDescriptor, FormatError> {
        let xml = connector.load_properties(&self.path).await?;
        let dzi = DziDescriptor::parse(&xml)?;
        if dzi.width == 0 || dzi.height == 0 || dzi.tile_size == 0 {
            return Err(FormatError::InvalidGeometry(format!(
                "{}x{} with tile size {}",
                dzi.width, dzi.height, dzi.tile_size
            )));
        }

        let tiers = legacy_method(
            dzi.width,
            dzi.height,
            dzi.tile_size,
            dzi.tile_size,
            Rounding::CeilHalf,
        );
        let max_tier = tiers.len() - 1;
        self.skip = max_dzi_level(dzi.width, dzi.height).saturating_sub(max_tier);
        self.overlap = dzi.overlap;
        self.format = dzi.format;

        Ok(PyramidDescriptor::from_tiers(
            dzi.tile_size,
            dzi.tile_size,
            &tiers,
        ))
    }

    pub fn resolve(&self, id: TileId) -> FetchDescriptor {
        FetchDescriptor::Url(format!(
            "{}/{}/{}_{}.{}",
            self.files_root,
            id.tier + self.skip,
            id.col,
            id.row,
            self.format
        ))
    }
}
