/// Error types shared across the crate
///
/// Recoverable parse anomalies are not errors here: they travel as
/// `FieldIssue` values on the parse result (see `metadata::fields`).

use std::path::PathBuf;
use thiserror::Error;

/// Result type for metadata reads and writes
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the metadata codec
#[derive(Error, Debug)]
pub enum MetadataError {
    /// The file could not be read, written or replaced
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Neither a JPEG nor a TIFF file
    #[error("Unsupported image container: {0}")]
    UnsupportedFormat(PathBuf),

    /// The JPEG segment structure is broken
    #[error("Malformed JPEG: {0}")]
    MalformedJpeg(String),

    /// The TIFF block inside the file is broken
    #[error("Malformed TIFF structure: {0}")]
    MalformedTiff(String),

    /// The rewritten Exif block does not fit into a single APP1 segment
    #[error("Exif block of {0} bytes exceeds the APP1 segment limit")]
    SegmentTooLarge(usize),

    /// The observation references a catalog entry that does not exist
    #[error("Unknown catalog entry: {0}")]
    UnknownEntity(String),
}

impl MetadataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MetadataError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Crate-wide error
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file exists but could not be understood
    #[error("Configuration error: {0}")]
    Config(String),

    /// Project catalog (JSON) could not be encoded or decoded
    #[error("Project file error: {0}")]
    Project(#[from] serde_json::Error),

    /// A background task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
