use thiserror::Error;

/// I/O errors that can occur when fetching bytes or documents from a source
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Server answered with something other than 200/206
    #[error("Unexpected HTTP status {status} for {path}")]
    Status { status: u16, path: String },

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The fetch did not finish within the load timeout
    #[error("Timed out after {millis}ms: {path}")]
    Timeout { path: String, millis: u64 },
}

/// Errors raised while parsing the packed single-file formats (ZIF and PFF)
#[derive(Debug, Clone, Error)]
pub enum PackedError {
    /// Invalid magic bytes at the start of the file
    #[error("Invalid magic bytes: expected {expected}, got {actual}")]
    InvalidMagic {
        expected: &'static str,
        actual: String,
    },

    /// Unsupported container version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// Buffer too small to contain the structure being read
    #[error("Truncated data: need at least {required} bytes, got {actual}")]
    Truncated { required: u64, actual: u64 },

    /// IFD offset points somewhere unusable
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from an IFD
    #[error("Missing required tag {tag} in IFD {ifd}")]
    MissingTag { tag: &'static str, ifd: usize },

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors related to format detection and pyramid construction.
///
/// Every variant except `Io` is non-retryable for the image it concerns.
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the header or properties
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Binary container error
    #[error("Packed format error: {0}")]
    Packed(#[from] PackedError),

    /// Properties document could not be parsed
    #[error("Invalid properties document: {0}")]
    Properties(String),

    /// Neither tier reconstruction matched the declared tile count
    #[error("Tile count mismatch: declared {declared}, reconstructed {computed:?}")]
    TileCountMismatch { declared: u64, computed: Vec<u64> },

    /// Image geometry is unusable (zero size, zero tile size, ...)
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The runtime lacks a capability required by the source format
    #[error("Unsupported environment: {0}")]
    Environment(String),
}

/// Errors that can occur while loading an individual tile
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// I/O error while fetching the tile bytes
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Tile coordinates fall outside the tier grid
    #[error("Tile {tier}-{col}-{row} out of bounds")]
    OutOfBounds { tier: usize, col: u32, row: u32 },

    /// The tile bytes could not be decoded as an image
    #[error("Failed to decode tile {name}: {message}")]
    Decode { name: String, message: String },

    /// JPEG header index suffix refers to a header that does not exist
    #[error("Tile {name} refers to missing JPEG header {index}")]
    MissingJpegHeader { name: String, index: u8 },

    /// The tile's table entry points outside the file
    #[error("Tile {name} has an invalid location: {message}")]
    InvalidLocation { name: String, message: String },
}

/// Top-level errors surfaced by the viewer session
#[derive(Debug, Clone, Error)]
pub enum ViewerError {
    /// The pyramid could not be opened
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Operation requires an opened image
    #[error("No image is open")]
    NotInitialized,

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    Config(String),
}
