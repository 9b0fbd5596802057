use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{ByteRange, NetConnector};
use crate::error::IoError;

/// Local filesystem connector.
///
/// Relative paths are resolved against `root`. Byte ranges are served with a
/// seek and an exact read, which mirrors slicing a client-side file blob.
#[derive(Debug, Clone)]
pub struct FileConnector {
    root: PathBuf,
    identifier: String,
}

impl FileConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let identifier = format!("file://{}", root.display());
        Self { root, identifier }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    fn map_err(path: &Path, err: std::io::Error) -> IoError {
        if err.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(path.display().to_string())
        } else {
            IoError::Connection(format!("{}: {}", path.display(), err))
        }
    }
}

#[async_trait]
impl NetConnector for FileConnector {
    async fn load_bytes(&self, path: &str, range: ByteRange) -> Result<Bytes, IoError> {
        let full = self.resolve(path);
        let mut file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| Self::map_err(&full, e))?;

        let size = file
            .metadata()
            .await
            .map_err(|e| Self::map_err(&full, e))?
            .len();
        if range.end > size {
            return Err(IoError::RangeOutOfBounds {
                offset: range.start,
                requested: range.len(),
                size,
            });
        }
        if range.is_empty() {
            return Ok(Bytes::new());
        }

        file.seek(SeekFrom::Start(range.start))
            .await
            .map_err(|e| Self::map_err(&full, e))?;
        let mut buf = vec![0u8; range.len() as usize];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| Self::map_err(&full, e))?;

        Ok(Bytes::from(buf))
    }

    async fn load_resource(&self, path: &str) -> Result<Bytes, IoError> {
        let full = self.resolve(path);
        let data = tokio::fs::read(&full)
            .await
            .map_err(|e| Self::map_err(&full, e))?;
        Ok(Bytes::from(data))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
