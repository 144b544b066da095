use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("hashing failed for {}: {message}", .path.display())]
    Hash { path: PathBuf, message: String },

    #[error("exiftool error: {0}")]
    Exif(String),

    #[error("catalog error: {0}")]
    Database(String),

    #[error("catalog version {found} is newer than supported version {supported}")]
    VersionTooNew { found: u32, supported: u32 },

    #[error("catalog not found: {}", .0.display())]
    DatabaseNotFound(PathBuf),

    #[error("source path does not exist: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("collection failed for {}: {message}", .path.display())]
    Collection { path: PathBuf, message: String },

    #[error("absolute subdirectory not supported: {}", .0.display())]
    AbsoluteSubdir(PathBuf),

    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("unknown storage class: {0}")]
    UnknownStorageClass(String),

    #[error("invalid timezone offset: {0}")]
    InvalidTimezone(String),
}

pub type Result<T> = std::result::Result<T, Error>;
