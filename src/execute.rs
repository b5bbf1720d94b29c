//! Plan execution
//!
//! Every move goes through a temporary sibling in the destination directory
//! and is then renamed into place, so an interrupted run leaves either the
//! original file or a complete file under a temporary name, never a
//! half-written destination.

use crate::options::{CancelFlag, ExecOptions};
use crate::paths::{self, CollisionStyle, MoveMethod};
use crate::plan::{Decision, DuplicateAction, PlanItem, SkipReason};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What became of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "path", rename_all = "lowercase")]
pub enum Outcome {
    Renamed(PathBuf),
    Quarantined(PathBuf),
    Deleted,
    Unsupported,
    /// Left in place under its current name
    Unchanged(PathBuf),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Renamed(path) | Outcome::Quarantined(path) | Outcome::Unchanged(path) => {
                write!(f, "{}", path.display())
            }
            Outcome::Deleted => f.write_str("(deleted)"),
            Outcome::Unsupported => f.write_str("(unsupported)"),
        }
    }
}

/// Result of executing one plan item. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    pub original: PathBuf,
    /// On failure, the outcome that was attempted
    pub outcome: Outcome,
    pub error: Option<String>,
}

impl ResultRecord {
    fn ok(original: PathBuf, outcome: Outcome) -> Self {
        Self {
            original,
            outcome,
            error: None,
        }
    }

    fn failed(original: PathBuf, outcome: Outcome, error: String) -> Self {
        Self {
            original,
            outcome,
            error: Some(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Lazy, single-pass execution of a plan.
///
/// Each call to `next` checks the cancel flag, then carries out exactly one
/// plan item. Once cancelled, no further items are touched.
pub struct Execution {
    items: std::vec::IntoIter<PlanItem>,
    dry_run: bool,
    cancel: CancelFlag,
    cancelled: bool,
}

impl Execution {
    pub fn new(plan: Vec<PlanItem>, options: &ExecOptions) -> Self {
        Self {
            items: plan.into_iter(),
            dry_run: options.dry_run,
            cancel: options.cancel.clone(),
            cancelled: false,
        }
    }

    /// Whether execution stopped because of the cancel flag
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Plan items not yet executed
    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    fn execute(&self, item: PlanItem) -> ResultRecord {
        let PlanItem { source, decision, .. } = item;
        let record = match decision {
            Decision::Rename(dest) => {
                self.relocate(source, dest, CollisionStyle::Underscore, Outcome::Renamed)
            }
            Decision::Duplicate(DuplicateAction::Quarantine(dest)) => {
                self.relocate(source, dest, CollisionStyle::DotSuffix, Outcome::Quarantined)
            }
            Decision::Duplicate(DuplicateAction::Delete) => self.delete(source),
            Decision::Skip(SkipReason::Unsupported) => ResultRecord::ok(source, Outcome::Unsupported),
            Decision::Skip(_) => {
                let unchanged = Outcome::Unchanged(source.clone());
                ResultRecord::ok(source, unchanged)
            }
        };

        match &record.error {
            None => info!(original = ?record.original, result = %record.outcome, "Done"),
            Some(e) => warn!(original = ?record.original, error = %e, "Failed"),
        }
        record
    }

    fn relocate(
        &self,
        source: PathBuf,
        dest: PathBuf,
        style: CollisionStyle,
        outcome: fn(PathBuf) -> Outcome,
    ) -> ResultRecord {
        if self.dry_run {
            return ResultRecord::ok(source, outcome(dest));
        }
        match move_via_temp(&source, &dest, style) {
            Ok(final_path) => ResultRecord::ok(source, outcome(final_path)),
            Err(e) => ResultRecord::failed(source, outcome(dest), e),
        }
    }

    fn delete(&self, source: PathBuf) -> ResultRecord {
        if self.dry_run {
            return ResultRecord::ok(source, Outcome::Deleted);
        }
        match fs::remove_file(&source) {
            Ok(()) => ResultRecord::ok(source, Outcome::Deleted),
            Err(e) => ResultRecord::failed(source, Outcome::Deleted, e.to_string()),
        }
    }
}

impl Iterator for Execution {
    type Item = ResultRecord;

    fn next(&mut self) -> Option<ResultRecord> {
        if self.cancelled {
            return None;
        }
        if self.cancel.is_cancelled() {
            info!(remaining = self.items.len(), "Cancellation requested, stopping");
            self.cancelled = true;
            return None;
        }
        let item = self.items.next()?;
        Some(self.execute(item))
    }
}

/// Move `source` to `dest` (or its next free alternate) through a temporary
/// sibling of `dest`. Returns the final path.
///
/// If the final rename fails the file is moved back to `source`.
fn move_via_temp(source: &Path, dest: &Path, style: CollisionStyle) -> Result<PathBuf, String> {
    let dir = dest.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;

    let temp = paths::temp_path_for(source, dir);
    let method = paths::safe_move(source, &temp).map_err(|e| e.to_string())?;
    if method == MoveMethod::CopyThenDelete {
        debug!(?source, ?temp, "Copied across devices");
    }

    let final_path = paths::unique_path(dest.to_path_buf(), style, |p| p.exists());
    if final_path != dest {
        warn!(?dest, ?final_path, "Destination appeared since planning, using alternate");
    }

    finalize(&temp, &final_path, source)?;
    Ok(final_path)
}

/// Rename a staged file into place, rolling it back to `source` on failure
fn finalize(temp: &Path, final_path: &Path, source: &Path) -> Result<(), String> {
    let Err(e) = fs::rename(temp, final_path) else {
        return Ok(());
    };
    match roll_back(temp, source) {
        Ok(()) => Err(e.to_string()),
        Err(rollback) => {
            error!(?temp, ?source, error = %rollback, "Rollback failed");
            Err(format!("{}; file left at {}", e, temp.display()))
        }
    }
}

/// Return a staged file to where it came from, without overwriting anything
fn roll_back(temp: &Path, source: &Path) -> io::Result<()> {
    if source.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} was recreated", source.display()),
        ));
    }
    paths::safe_move(temp, source).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source: &Path, decision: Decision) -> PlanItem {
        PlanItem {
            source: source.to_path_buf(),
            kind: paths::classify(source),
            decision,
            sequence: None,
            duplicate_of: None,
        }
    }

    fn no_temp_files_left(dir: &Path) -> bool {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .all(|e| !e.file_name().to_string_lossy().ends_with(".tmp"))
    }

    #[test]
    fn test_rename_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("IMG_0001.jpg");
        let dest = dir.path().join("out/IMG-20240421-00001.jpg");
        fs::write(&source, b"photo").unwrap();

        let plan = vec![item(&source, Decision::Rename(dest.clone()))];
        let records: Vec<_> = Execution::new(plan, &ExecOptions::new(dir.path())).collect();

        assert_eq!(records, vec![ResultRecord::ok(source.clone(), Outcome::Renamed(dest.clone()))]);
        assert!(!source.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"photo");
        assert!(no_temp_files_left(dir.path()));
    }

    #[test]
    fn test_destination_appearing_late_is_not_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        let dest = dir.path().join("IMG-20240421-00001.jpg");
        fs::write(&source, b"new").unwrap();

        let plan = vec![item(&source, Decision::Rename(dest.clone()))];
        fs::write(&dest, b"sneaked in").unwrap();
        let records: Vec<_> = Execution::new(plan, &ExecOptions::new(dir.path())).collect();

        let alternate = dir.path().join("IMG-20240421-00001_1.jpg");
        assert_eq!(records[0].outcome, Outcome::Renamed(alternate.clone()));
        assert_eq!(fs::read(&dest).unwrap(), b"sneaked in");
        assert_eq!(fs::read(&alternate).unwrap(), b"new");
    }

    #[test]
    fn test_delete_and_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let doomed = root.join("copy.jpg");
        let kept = root.join("kept.jpg");
        let quarantined = root.join(".duplicates/kept.jpg");
        fs::write(&doomed, b"x").unwrap();
        fs::write(&kept, b"x").unwrap();

        let plan = vec![
            item(&doomed, Decision::Duplicate(DuplicateAction::Delete)),
            item(&kept, Decision::Duplicate(DuplicateAction::Quarantine(quarantined.clone()))),
        ];
        let records: Vec<_> = Execution::new(plan, &ExecOptions::new(root)).collect();

        assert_eq!(records[0].outcome, Outcome::Deleted);
        assert_eq!(records[0].outcome.to_string(), "(deleted)");
        assert_eq!(records[1].outcome, Outcome::Quarantined(quarantined.clone()));
        assert!(!doomed.exists());
        assert!(!kept.exists());
        assert!(quarantined.exists());
    }

    #[test]
    fn test_skips_touch_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        let named = dir.path().join("IMG-20240421-00001.jpg");
        fs::write(&notes, b"n").unwrap();
        fs::write(&named, b"i").unwrap();

        let plan = vec![
            item(&notes, Decision::Skip(SkipReason::Unsupported)),
            item(&named, Decision::Skip(SkipReason::AlreadyNamed)),
        ];
        let records: Vec<_> = Execution::new(plan, &ExecOptions::new(dir.path())).collect();

        assert_eq!(records[0].outcome.to_string(), "(unsupported)");
        assert_eq!(records[1].outcome, Outcome::Unchanged(named.clone()));
        assert!(records.iter().all(ResultRecord::succeeded));
        assert!(notes.exists() && named.exists());
    }

    #[test]
    fn test_dry_run_leaves_filesystem_alone() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let a = root.join("a.jpg");
        let b = root.join("b.jpg");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"a").unwrap();

        let mut options = ExecOptions::new(root);
        options.dry_run = true;
        let plan = vec![
            item(&a, Decision::Rename(root.join("out/IMG-1.jpg"))),
            item(&b, Decision::Duplicate(DuplicateAction::Delete)),
        ];
        let records: Vec<_> = Execution::new(plan, &options).collect();

        assert_eq!(records[0].outcome, Outcome::Renamed(root.join("out/IMG-1.jpg")));
        assert_eq!(records[1].outcome, Outcome::Deleted);
        assert!(a.exists() && b.exists());
        assert!(!root.join("out").exists());
    }

    #[test]
    fn test_failures_are_recorded_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.jpg");
        let present = dir.path().join("here.jpg");
        fs::write(&present, b"p").unwrap();

        let plan = vec![
            item(&missing, Decision::Rename(dir.path().join("IMG-a.jpg"))),
            item(&missing, Decision::Duplicate(DuplicateAction::Delete)),
            item(&present, Decision::Rename(dir.path().join("IMG-b.jpg"))),
        ];
        let records: Vec<_> = Execution::new(plan, &ExecOptions::new(dir.path())).collect();

        assert_eq!(records.len(), 3);
        assert!(!records[0].succeeded());
        assert!(!records[1].succeeded());
        assert!(records[2].succeeded());
        assert!(dir.path().join("IMG-b.jpg").exists());
        assert!(no_temp_files_left(dir.path()));
    }

    #[test]
    fn test_failed_finalize_returns_file_to_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"photo").unwrap();
        // Staging succeeds, the final name is too long for the filesystem
        let dest = dir.path().join(format!("{}.jpg", "x".repeat(300)));

        let plan = vec![item(&source, Decision::Rename(dest.clone()))];
        let records: Vec<_> = Execution::new(plan, &ExecOptions::new(dir.path())).collect();

        assert!(!records[0].succeeded());
        assert_eq!(records[0].outcome, Outcome::Renamed(dest));
        assert_eq!(fs::read(&source).unwrap(), b"photo");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.jpg")]);
    }

    #[test]
    fn test_rollback_keeps_recreated_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        let temp = paths::temp_path_for(&source, dir.path());
        fs::write(&temp, b"staged").unwrap();
        fs::write(&source, b"recreated").unwrap();

        assert!(roll_back(&temp, &source).is_err());
        assert_eq!(fs::read(&source).unwrap(), b"recreated");
        assert_eq!(fs::read(&temp).unwrap(), b"staged");
    }

    #[test]
    fn test_failed_finalize_names_stranded_temp() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        let temp = paths::temp_path_for(&source, dir.path());
        fs::write(&temp, b"staged").unwrap();
        fs::write(&source, b"recreated").unwrap();
        let dest = dir.path().join(format!("{}.jpg", "x".repeat(300)));

        let error = finalize(&temp, &dest, &source).unwrap_err();
        assert!(error.contains(&format!("file left at {}", temp.display())));
        assert_eq!(fs::read(&temp).unwrap(), b"staged");
        assert_eq!(fs::read(&source).unwrap(), b"recreated");
    }

    #[test]
    fn test_cancellation_between_items() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExecOptions::new(dir.path());
        let plan: Vec<_> = (0..5)
            .map(|i| {
                let source = dir.path().join(format!("{}.jpg", i));
                fs::write(&source, [i as u8]).unwrap();
                item(&source, Decision::Rename(dir.path().join(format!("IMG-{}.jpg", i))))
            })
            .collect();

        let mut execution = Execution::new(plan, &options);
        assert!(execution.next().is_some());
        assert!(execution.next().is_some());
        options.cancel.cancel();
        assert!(execution.next().is_none());
        assert!(execution.next().is_none());
        assert!(execution.was_cancelled());
        assert_eq!(execution.remaining(), 3);
        assert!(dir.path().join("2.jpg").exists());
        assert!(!dir.path().join("IMG-2.jpg").exists());
    }

    #[test]
    fn test_record_serializes_outcome() {
        let record = ResultRecord::ok(PathBuf::from("a.jpg"), Outcome::Renamed(PathBuf::from("IMG-1.jpg")));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["original"], "a.jpg");
        assert_eq!(json["outcome"]["status"], "renamed");
        assert_eq!(json["outcome"]["path"], "IMG-1.jpg");
        assert!(json["error"].is_null());

        let deleted = ResultRecord::ok(PathBuf::from("b.jpg"), Outcome::Deleted);
        let json = serde_json::to_value(&deleted).unwrap();
        assert_eq!(json["outcome"]["status"], "deleted");
    }
}
