use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{ByteRange, NetConnector};
use crate::error::IoError;

/// HTTP connector issuing `Range` requests through reqwest.
///
/// Paths are absolute URLs. A 200 answer to a ranged request is accepted only
/// when the server sent exactly the requested bytes (some static servers
/// ignore `Range` for tiny files); anything else that is not 206 is an error.
#[derive(Clone)]
pub struct HttpConnector {
    client: Client,
    identifier: String,
    /// Request timeout the client was built with, when known
    timeout: Option<Duration>,
}

impl HttpConnector {
    /// Create a connector whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, IoError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IoError::Connection(e.to_string()))?;
        Ok(Self {
            timeout: Some(timeout),
            ..Self::with_client(client)
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            identifier: "http".to_string(),
            timeout: None,
        }
    }

    fn map_send_error(&self, path: &str, err: reqwest::Error) -> IoError {
        if err.is_timeout() {
            self.timeout_error(path)
        } else {
            IoError::Connection(err.to_string())
        }
    }

    fn timeout_error(&self, path: &str) -> IoError {
        IoError::Timeout {
            path: path.to_string(),
            millis: self.timeout.map_or(0, |t| t.as_millis() as u64),
        }
    }
}

#[async_trait]
impl NetConnector for HttpConnector {
    async fn load_bytes(&self, path: &str, range: ByteRange) -> Result<Bytes, IoError> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }

        let resp = self
            .client
            .get(path)
            .header(RANGE, range.header_value())
            .send()
            .await
            .map_err(|e| self.map_send_error(path, e))?;

        let status = resp.status();
        match status {
            StatusCode::PARTIAL_CONTENT | StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(IoError::NotFound(path.to_string())),
            other => {
                return Err(IoError::Status {
                    status: other.as_u16(),
                    path: path.to_string(),
                })
            }
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| self.map_send_error(path, e))?;

        if status == StatusCode::OK && body.len() as u64 != range.len() {
            debug!(path, "server ignored Range header, slicing full body");
            if range.end > body.len() as u64 {
                return Err(IoError::RangeOutOfBounds {
                    offset: range.start,
                    requested: range.len(),
                    size: body.len() as u64,
                });
            }
            return Ok(body.slice(range.start as usize..range.end as usize));
        }

        if body.len() as u64 != range.len() {
            return Err(IoError::RangeOutOfBounds {
                offset: range.start,
                requested: range.len(),
                size: range.start + body.len() as u64,
            });
        }

        Ok(body)
    }

    async fn load_resource(&self, path: &str) -> Result<Bytes, IoError> {
        let resp = self
            .client
            .get(path)
            .send()
            .await
            .map_err(|e| self.map_send_error(path, e))?;

        match resp.status() {
            StatusCode::OK => resp
                .bytes()
                .await
                .map_err(|e| self.map_send_error(path, e)),
            StatusCode::NOT_FOUND => Err(IoError::NotFound(path.to_string())),
            other => Err(IoError::Status {
                status: other.as_u16(),
                path: path.to_string(),
            }),
        }
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
