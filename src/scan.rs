//! Source tree walk

use crate::paths::{self, MediaKind, QUARANTINE_DIR_NAME};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// One regular file found under the source directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub size: u64,
    /// `None` when the platform cannot report it
    pub mtime: Option<SystemTime>,
    pub kind: MediaKind,
}

/// Walk `root` and list every regular file, sorted by path.
///
/// Quarantine directories are pruned, symlinks are not followed, and
/// unreadable entries are logged and left out.
pub fn scan_source(root: &Path) -> Vec<ScanEntry> {
    let mut entries: Vec<ScanEntry> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_quarantine_dir(e))
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(path = ?err.path(), error = %err, "Skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| scan_entry(&e))
        .collect();

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(count = entries.len(), ?root, "Scan complete");
    entries
}

fn scan_entry(entry: &DirEntry) -> Option<ScanEntry> {
    let metadata = match entry.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(path = ?entry.path(), error = %e, "Cannot stat file, skipping");
            return None;
        }
    };
    let path = entry.path().to_path_buf();
    if paths::is_staged(&path) {
        warn!(?path, "Found a file staged by an interrupted run, recovering it");
    }
    Some(ScanEntry {
        kind: paths::classify(&path),
        size: metadata.len(),
        mtime: metadata.modified().ok(),
        path,
    })
}

fn is_quarantine_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name() == QUARANTINE_DIR_NAME
}
