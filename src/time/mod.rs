//! Capture date resolution
//!
//! A file's date comes from the first tier that yields one:
//! - a date at the start of the filename (or after a known prefix)
//! - capture-time metadata, through a [`MetadataSource`]
//! - the file system modification time
//! - today's date

pub mod exif;
pub mod exiftool;
pub mod filename;

use crate::options::ExecOptions;
use crate::paths::{self, MediaKind};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Tier that produced a [`ResolvedDate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DateSource {
    Filename,
    Metadata,
    ModifiedTime,
    Today,
}

/// A capture date in compact `YYYYMMDD` form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDate {
    pub date: String,
    pub source: DateSource,
}

impl ResolvedDate {
    fn new(date: NaiveDate, source: DateSource) -> Self {
        Self {
            date: paths::compact_date(date),
            source,
        }
    }
}

/// Capability for reading a capture date from a file's embedded metadata.
///
/// Implementations must treat every failure as "no date".
pub trait MetadataSource: Send + Sync {
    fn capture_date(&self, path: &Path) -> Option<NaiveDate>;
}

/// Source that never finds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl MetadataSource for NoMetadata {
    fn capture_date(&self, _path: &Path) -> Option<NaiveDate> {
        None
    }
}

/// Tries each source in order and returns the first date found
#[derive(Default)]
pub struct Chain(Vec<Box<dyn MetadataSource>>);

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl MetadataSource + 'static) -> Self {
        self.0.push(Box::new(source));
        self
    }
}

impl MetadataSource for Chain {
    fn capture_date(&self, path: &Path) -> Option<NaiveDate> {
        self.0.iter().find_map(|source| source.capture_date(path))
    }
}

/// Which metadata reader a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    /// `exiftool` when installed, embedded EXIF otherwise
    #[default]
    Auto,
    /// Only the external `exiftool` program
    Exiftool,
    /// Only the in-process EXIF reader
    Exif,
    /// Skip the metadata tier entirely
    None,
}

/// Build the metadata source for `backend`
pub fn metadata_source(backend: MetadataBackend, timeout: Duration) -> Arc<dyn MetadataSource> {
    match backend {
        MetadataBackend::Auto => Arc::new(
            Chain::new()
                .with(exiftool::Exiftool::new(timeout))
                .with(exif::EmbeddedExif),
        ),
        MetadataBackend::Exiftool => Arc::new(exiftool::Exiftool::new(timeout)),
        MetadataBackend::Exif => Arc::new(exif::EmbeddedExif),
        MetadataBackend::None => Arc::new(NoMetadata),
    }
}

/// Resolve the capture date of one file. Never fails.
pub fn resolve_date(
    path: &Path,
    mtime: Option<SystemTime>,
    options: &ExecOptions,
    metadata: &dyn MetadataSource,
) -> ResolvedDate {
    let prefix = match paths::classify(path) {
        MediaKind::Image => Some(options.image_prefix.as_str()),
        MediaKind::Video => Some(options.video_prefix.as_str()),
        MediaKind::Unsupported => None,
    };

    if let Some(date) = filename::parse_filename_date(path, prefix) {
        debug!(?path, %date, "Date from filename");
        return ResolvedDate::new(date, DateSource::Filename);
    }

    if let Some(date) = metadata.capture_date(path) {
        debug!(?path, %date, "Date from metadata");
        return ResolvedDate::new(date, DateSource::Metadata);
    }

    if let Some(date) = mtime.and_then(local_date) {
        debug!(?path, %date, "Date from modification time");
        return ResolvedDate::new(date, DateSource::ModifiedTime);
    }

    debug!(?path, "No date found, using today");
    ResolvedDate::new(Local::now().date_naive(), DateSource::Today)
}

/// Local calendar date of a file timestamp, if representable
fn local_date(time: SystemTime) -> Option<NaiveDate> {
    let secs = match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).ok()?,
        Err(e) => -i64::try_from(e.duration().as_secs()).ok()?,
    };
    let utc = DateTime::from_timestamp(secs, 0)?;
    Some(utc.with_timezone(&Local).date_naive())
}
