//! Run options handed to the engine by its caller

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default per-file hash budget
pub const DEFAULT_HASH_BUDGET: Duration = Duration::from_secs(60);

/// Default timeout for one metadata subprocess
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_IMAGE_PREFIX: &str = "IMG-";
pub const DEFAULT_VIDEO_PREFIX: &str = "VID-";

/// Cooperative cancellation signal shared between the caller and a run.
///
/// Cloning yields another handle to the same flag. The engine only ever
/// reads it between discrete units of work.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Request cancellation, returning `true` only for the first request
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one run needs, fully populated before the run starts
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Directory tree to organize
    pub source_dir: PathBuf,

    /// Where renamed files go; `None` renames in place
    pub output_dir: Option<PathBuf>,

    /// Move duplicates into quarantine instead of deleting them
    pub keep_duplicates: bool,

    /// Wall-clock budget for hashing one file
    pub hash_budget: Duration,

    /// Timeout for one metadata subprocess invocation
    pub metadata_timeout: Duration,

    pub image_prefix: String,
    pub video_prefix: String,

    /// Simulate only; never touch the filesystem
    pub dry_run: bool,

    /// Worker threads for hashing and date resolution (0 = one per CPU)
    pub threads: usize,

    pub cancel: CancelFlag,
}

impl ExecOptions {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            output_dir: None,
            keep_duplicates: false,
            hash_budget: DEFAULT_HASH_BUDGET,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
            video_prefix: DEFAULT_VIDEO_PREFIX.to_string(),
            dry_run: false,
            threads: 0,
            cancel: CancelFlag::new(),
        }
    }

    /// Root under which renamed files and the quarantine directory live
    pub fn target_root(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.source_dir)
    }
}
