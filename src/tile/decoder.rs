//! Tile decoding.
//!
//! Tile bodies arrive as encoded JPEG or PNG. Packed files may store JPEG
//! headers apart from the tile bodies; such bodies carry a trailing one-byte
//! index into a shared [`JpegHeaderTable`] and are reassembled before
//! decoding.

use std::io::Cursor;

use bytes::{Bytes, BytesMut};
use image::ImageReader;

use super::model::TileImage;
use crate::error::TileError;

/// JPEG headers shared by many tile bodies of one packed file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JpegHeaderTable {
    headers: Vec<Bytes>,
}

impl JpegHeaderTable {
    pub fn new(headers: Vec<Bytes>) -> Self {
        Self { headers }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn get(&self, index: u8) -> Option<&Bytes> {
        self.headers.get(index as usize)
    }

    /// Rebuild a complete stream from a body ending in a header index byte.
    pub fn assemble(&self, name: &str, body: &[u8]) -> Result<Bytes, TileError> {
        let Some((&index, body)) = body.split_last() else {
            return Err(TileError::Decode {
                name: name.to_string(),
                message: "empty tile body".to_string(),
            });
        };
        let header = self.get(index).ok_or_else(|| TileError::MissingJpegHeader {
            name: name.to_string(),
            index,
        })?;

        let mut out = BytesMut::with_capacity(header.len() + body.len());
        out.extend_from_slice(header);
        out.extend_from_slice(body);
        Ok(out.freeze())
    }
}

/// Decode encoded tile bytes into RGBA pixels.
///
/// The container format is sniffed from the data.
pub fn decode_tile(name: &str, data: &[u8]) -> Result<TileImage, TileError> {
    let decode_err = |message: String| TileError::Decode {
        name: name.to_string(),
        message,
    };

    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?;
    if reader.format().is_none() {
        return Err(decode_err("unrecognized image format".to_string()));
    }

    let img = reader.decode().map_err(|e| decode_err(e.to_string()))?;
    Ok(TileImage::new(img.to_rgba8()))
}

/// [`decode_tile`] on the blocking thread pool.
pub async fn decode_tile_blocking(name: String, data: Bytes) -> Result<TileImage, TileError> {
    let task_name = name.clone();
    tokio::task::spawn_blocking(move || decode_tile(&task_name, &data))
        .await
        .map_err(|e| TileError::Decode {
            name,
            message: format!("decode task failed: {}", e),
        })?
}
