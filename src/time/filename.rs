//! Filename date parsing

use crate::paths;
use chrono::NaiveDate;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::trace;

/// Camera and messenger names: `IMG_20240115_…`, `PXL_20240115…`,
/// `IMG-20240115-WA0001`, `Screenshot_20240115-…`
fn camera_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(?:IMG|VID|PXL|DSC|MVI|Screenshot)[-_]?(\d{4})(\d{2})(\d{2})")
            .expect("camera pattern is valid")
    })
}

/// Date carried by a filename, if any.
///
/// The stem is tried as is, then with the kind prefix removed, then against
/// common camera naming schemes.
pub fn parse_filename_date(path: &Path, prefix: Option<&str>) -> Option<NaiveDate> {
    let path = paths::unstaged_path(path);
    let stem = path.file_stem()?.to_str()?;

    if let Some(date) = paths::leading_date(stem) {
        trace!(stem, "Matched leading date");
        return Some(date);
    }

    if let Some(prefix) = prefix.filter(|p| !p.is_empty())
        && let Some(rest) = stem.strip_prefix(prefix)
        && let Some(date) = paths::leading_date(rest)
    {
        trace!(stem, prefix, "Matched date after prefix");
        return Some(date);
    }

    let caps = camera_pattern().captures(stem)?;
    let date = paths::plausible_date(&caps[1], &caps[2], &caps[3])?;
    trace!(stem, "Matched camera pattern");
    Some(date)
}
