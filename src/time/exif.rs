//! In-process EXIF date reading for images

use super::MetadataSource;
use crate::paths;
use chrono::{NaiveDate, NaiveDateTime};
use exif::{In, Reader, Tag};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::trace;

/// Capture-time tags, in priority order
const DATE_TAGS: &[Tag] = &[
    Tag::DateTimeOriginal,  // When the shutter fired
    Tag::DateTimeDigitized, // CreateDate
];

/// Reads dates straight from the file's EXIF block
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedExif;

impl MetadataSource for EmbeddedExif {
    fn capture_date(&self, path: &Path) -> Option<NaiveDate> {
        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        let exif = match Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(e) => {
                trace!(?path, error = %e, "No readable EXIF");
                return None;
            }
        };

        DATE_TAGS.iter().find_map(|tag| {
            let field = exif.get_field(*tag, In::PRIMARY)?;
            let datetime = parse_exif_datetime(&field.display_value().to_string())?;
            let date = datetime.date();
            if !paths::is_plausible(date) {
                return None;
            }
            trace!(?path, ?tag, %date, "Found EXIF date");
            Some(date)
        })
    }
}

/// Parse an EXIF datetime such as `2024:01:15 14:30:00`
fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_matches('"');

    let formats = [
        "%Y:%m:%d %H:%M:%S",
        "%Y:%m:%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];

    formats
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}
