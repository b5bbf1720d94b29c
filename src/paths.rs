//! Path helpers: media classification, leading-date parsing, collision-free
//! names, temporary sibling paths and moves that survive device boundaries.

use chrono::{Datelike, NaiveDate};
use filetime::FileTime;
use serde::Serialize;
use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reserved directory holding quarantined duplicates; never scanned
pub const QUARANTINE_DIR_NAME: &str = ".duplicates";

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "tif", "tiff", "bmp", "webp", "heic", "heif",
];

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "3gp", "webm"];

/// Oldest and newest year accepted from a filename
const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1900..=2100;

const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Media kind decided from the file extension alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Unsupported,
}

impl MediaKind {
    pub fn is_supported(self) -> bool {
        self != MediaKind::Unsupported
    }
}

/// Lowercased extension without the leading dot
pub fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Classify a path by its extension (case-insensitive). Staged files are
/// classified by the name they had before staging.
pub fn classify(path: &Path) -> MediaKind {
    match lowercase_extension(&unstaged_path(path)) {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Image,
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
        _ => MediaKind::Unsupported,
    }
}

/// Parse a date from the first eight characters of `name` when they are
/// digits forming a plausible `YYYYMMDD`.
pub fn leading_date(name: &str) -> Option<NaiveDate> {
    let token = name.get(..8)?;
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    plausible_date(&token[..4], &token[4..6], &token[6..8])
}

/// Build a calendar-valid date from its digit groups, rejecting
/// implausible years.
pub fn plausible_date(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;

    if !PLAUSIBLE_YEARS.contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Whether a date from metadata is believable as a capture date
pub fn is_plausible(date: NaiveDate) -> bool {
    PLAUSIBLE_YEARS.contains(&date.year())
}

/// Compact `YYYYMMDD` form used in generated names
pub fn compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// How alternates are spelled when a name is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionStyle {
    /// `name_1.ext`, `name_2.ext`, … (renamed files)
    Underscore,
    /// `name.ext.1`, `name.ext.2`, … (quarantined files)
    DotSuffix,
}

/// The `n`-th alternate spelling of `path`
pub fn alternate_path(path: &Path, n: u32, style: CollisionStyle) -> PathBuf {
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    match style {
        CollisionStyle::Underscore => {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let extension = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            parent.join(format!("{}_{}{}", stem, n, extension))
        }
        CollisionStyle::DotSuffix => {
            let name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            parent.join(format!("{}.{}", name, n))
        }
    }
}

/// First of `path`, then its alternates in increasing order, for which
/// `is_taken` returns false.
pub fn unique_path(
    path: PathBuf,
    style: CollisionStyle,
    mut is_taken: impl FnMut(&Path) -> bool,
) -> PathBuf {
    if !is_taken(&path) {
        return path;
    }
    let mut n = 1;
    loop {
        let candidate = alternate_path(&path, n, style);
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Temporary sibling for `source` inside `dir`, carrying a random suffix:
/// `.<name>.<8 hex digits>.tmp`
pub fn temp_path_for(source: &Path, dir: &Path) -> PathBuf {
    let name = unstaged_path(source)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let token = uuid::Uuid::new_v4().simple().to_string();
    dir.join(format!(".{}.{}.tmp", name, &token[..8]))
}

/// Original name inside a name produced by [`temp_path_for`]
pub fn unstaged_name(name: &str) -> Option<&str> {
    let inner = name.strip_prefix('.')?.strip_suffix(".tmp")?;
    let (original, token) = inner.rsplit_once('.')?;
    let is_token = token.len() == 8 && token.bytes().all(|b| b.is_ascii_hexdigit());
    (is_token && !original.is_empty()).then_some(original)
}

/// `path` itself, or the path it had before a run staged it and was
/// interrupted
pub fn unstaged_path(path: &Path) -> Cow<'_, Path> {
    match path.file_name().and_then(|n| n.to_str()).and_then(unstaged_name) {
        Some(name) => Cow::Owned(path.with_file_name(name)),
        None => Cow::Borrowed(path),
    }
}

pub fn is_staged(path: &Path) -> bool {
    matches!(unstaged_path(path), Cow::Owned(_))
}

/// How [`safe_move`] got the file there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Rename,
    CopyThenDelete,
}

/// Move `source` to `dest`, which must not exist yet.
///
/// Uses a rename when possible. When the rename fails because the paths sit
/// on different devices, the file is copied (timestamps preserved) and the
/// original removed only after the copy is flushed to disk.
pub fn safe_move(source: &Path, dest: &Path) -> io::Result<MoveMethod> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(MoveMethod::Rename),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(?source, ?dest, "Cross-device move, falling back to copy");
            move_by_copy(source, dest)
        }
        Err(e) => Err(e),
    }
}

/// Copy `source` to the new file `dest`, then delete `source`. On any
/// failure exactly one of the two files remains.
fn move_by_copy(source: &Path, dest: &Path) -> io::Result<MoveMethod> {
    copy_preserving_times(source, dest)?;
    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(dest);
        return Err(e);
    }
    Ok(MoveMethod::CopyThenDelete)
}

/// Copy `source` to a new file `dest`, carrying over access and
/// modification times. A partially written `dest` is removed on failure;
/// an already existing `dest` is left alone.
pub fn copy_preserving_times(source: &Path, dest: &Path) -> io::Result<()> {
    let metadata = fs::metadata(source)?;
    copy_file(source, dest)?;

    let mtime = FileTime::from_last_modification_time(&metadata);
    let atime = FileTime::from_last_access_time(&metadata);
    if let Err(e) = filetime::set_file_times(dest, atime, mtime) {
        let _ = fs::remove_file(dest);
        return Err(e);
    }
    Ok(())
}

/// Buffered copy into a file that must not already exist
fn copy_file(source: &Path, dest: &Path) -> io::Result<()> {
    let src_file = File::open(source)?;
    let dest_file = OpenOptions::new().write(true).create_new(true).open(dest)?;

    let result = copy_contents(src_file, dest_file);
    if result.is_err() {
        let _ = fs::remove_file(dest);
    }
    result
}

fn copy_contents(src_file: File, dest_file: File) -> io::Result<()> {
    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, src_file);
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, dest_file);

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read])?;
    }

    let dest_file = writer.into_inner().map_err(|e| e.into_error())?;
    dest_file.sync_all()
}
