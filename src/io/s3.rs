use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::{ByteRange, NetConnector};
use crate::error::IoError;

/// S3-backed connector.
///
/// Paths are object keys inside a single bucket. Byte ranges map onto ranged
/// `GetObject` requests, so packed pyramid files can be read tile by tile
/// without downloading them.
#[derive(Clone)]
pub struct S3Connector {
    client: Client,
    bucket: String,
    identifier: String,
}

impl S3Connector {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let identifier = format!("s3://{}", bucket);
        Self {
            client,
            bucket,
            identifier,
        }
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Bytes, IoError> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(range) = range {
            request = request.range(range.header_value());
        }

        let resp = request.send().await.map_err(|e| {
            let is_not_found = e
                .as_service_error()
                .map(|se| se.is_no_such_key())
                .unwrap_or(false);
            let status_is_404 = e
                .raw_response()
                .map(|r| r.status().as_u16() == 404)
                .unwrap_or(false);

            if is_not_found || status_is_404 {
                IoError::NotFound(format!("s3://{}/{}", self.bucket, key))
            } else {
                IoError::S3(e.to_string())
            }
        })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        Ok(data)
    }
}

#[async_trait]
impl NetConnector for S3Connector {
    async fn load_bytes(&self, path: &str, range: ByteRange) -> Result<Bytes, IoError> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }

        let data = self.get(path, Some(range)).await?;
        if data.len() as u64 != range.len() {
            return Err(IoError::RangeOutOfBounds {
                offset: range.start,
                requested: range.len(),
                size: range.start + data.len() as u64,
            });
        }
        Ok(data)
    }

    async fn load_resource(&self, path: &str) -> Result<Bytes, IoError> {
        self.get(path, None).await
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services usually need path-style addressing
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}

/// Split an `s3://bucket/key` URI into its bucket and key.
pub fn parse_s3_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}
