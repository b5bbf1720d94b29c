//! Error types for the media renamer
//!
//! Only fatal conditions are errors. Per-file problems (metadata misses,
//! hash budget overruns, failed moves) are absorbed by the engine and
//! reported through [`crate::execute::ResultRecord`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media renamer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the media renamer
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source directory does not exist: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Source path is not a directory: {path}")]
    SourceNotDirectory { path: PathBuf },

    #[error("Source directory is not readable: {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot create output directory {path}: {source}")]
    OutputUncreatable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output path is not a directory: {path}")]
    OutputNotDirectory { path: PathBuf },

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Run was cancelled before planning completed")]
    Cancelled,
}
