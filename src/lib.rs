//! Media Renamer - organize photos and videos by capture date
//!
//! This library provides the renaming engine:
//! - Directory scanning with quarantine exclusion
//! - Capture date resolution from filenames, metadata and timestamps
//! - BLAKE3 duplicate detection under a per-file time budget
//! - Deterministic, collision-free rename planning
//! - Crash-safe execution through temporary names, with dry runs and
//!   cooperative cancellation

pub mod cli;
pub mod config;
pub mod error;
pub mod execute;
pub mod hash;
pub mod options;
pub mod paths;
pub mod plan;
pub mod process;
pub mod scan;
pub mod time;

pub use cli::Cli;
pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use execute::{Execution, Outcome, ResultRecord};
pub use options::{CancelFlag, ExecOptions};
pub use process::{MediaRenamer, RunEvent, RunHandle, RunSummary};
pub use time::{MetadataBackend, MetadataSource};
