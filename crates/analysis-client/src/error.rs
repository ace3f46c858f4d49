//! Client-side errors outside the polling path.

use std::path::PathBuf;

use analysis_lifecycle::ApiError;
use thiserror::Error;

/// Errors from media validation, upload and report export
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Unsupported file type '{extension}' (allowed: mp4, mov, avi, mkv)")]
    UnsupportedFormat { extension: String },

    #[error("File is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("File is too large: {size} bytes (maximum {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
