mod connector;
mod file;
mod http;
mod s3;

pub use connector::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, ByteRange,
    MemoryConnector, NetConnector,
};
pub use file::FileConnector;
pub use http::HttpConnector;
pub use s3::{create_s3_client, parse_s3_uri, S3Connector};
