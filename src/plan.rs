//! Rename planning
//!
//! Turns scan results, resolved dates and duplicate keys into one decision
//! per file. Planning only looks at the filesystem to check whether a
//! destination already exists, so the same plan drives both dry and real
//! runs.

use crate::hash::{DedupKey, SeenKeys};
use crate::options::ExecOptions;
use crate::paths::{self, CollisionStyle, MediaKind, QUARANTINE_DIR_NAME};
use crate::scan::ScanEntry;
use crate::time::ResolvedDate;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What happens to a duplicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateAction {
    /// Move into the quarantine directory at this path
    Quarantine(PathBuf),
    Delete,
}

/// Why a file is left where it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Extension is neither an image nor a video
    Unsupported,
    /// Already carries its canonical name in its destination directory
    AlreadyNamed,
    /// The caller supplied no date for this file
    NoDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Rename(PathBuf),
    Duplicate(DuplicateAction),
    Skip(SkipReason),
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Rename(dest) => write!(f, "rename to {}", dest.display()),
            Decision::Duplicate(DuplicateAction::Quarantine(dest)) => {
                write!(f, "quarantine to {}", dest.display())
            }
            Decision::Duplicate(DuplicateAction::Delete) => f.write_str("delete duplicate"),
            Decision::Skip(SkipReason::Unsupported) => f.write_str("skip (unsupported)"),
            Decision::Skip(SkipReason::AlreadyNamed) => f.write_str("skip (already named)"),
            Decision::Skip(SkipReason::NoDate) => f.write_str("skip (no date)"),
        }
    }
}

/// One decision for one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItem {
    pub source: PathBuf,
    pub kind: MediaKind,
    pub decision: Decision,
    /// Sequence number within the (date, kind) bucket, for renames
    pub sequence: Option<u32>,
    /// First occurrence of the same content, for duplicates
    pub duplicate_of: Option<PathBuf>,
}

impl PlanItem {
    fn new(entry: &ScanEntry, decision: Decision) -> Self {
        Self {
            source: entry.path.clone(),
            kind: entry.kind,
            decision,
            sequence: None,
            duplicate_of: None,
        }
    }
}

/// Matches names this planner produces: `<prefix><YYYYMMDD>-<NNNNN>[_N].<ext>`
struct CanonicalName(Option<Regex>);

impl CanonicalName {
    fn new(prefix: &str) -> Self {
        let pattern = format!(r"^{}(\d{{8}})-\d{{5}}(?:_\d+)?\.([a-z0-9]+)$", regex::escape(prefix));
        Self(Regex::new(&pattern).ok())
    }

    fn matches(&self, name: &str, date: &str, extension: &str) -> bool {
        let Some(regex) = &self.0 else {
            return false;
        };
        regex
            .captures(name)
            .is_some_and(|caps| &caps[1] == date && &caps[2] == extension)
    }
}

/// Produce the ordered plan.
///
/// Entries are processed in path order. The first file with a given key is
/// renamed; later files with the same key are duplicates. Files that already
/// carry their canonical name count as first occurrences ahead of everything
/// else, so a re-run never trades a named file for a new copy. Sequence
/// numbers start at 1 in every (date, kind) bucket and are never reused.
pub fn build_plan(
    entries: &[ScanEntry],
    dates: &HashMap<PathBuf, ResolvedDate>,
    keys: &HashMap<PathBuf, DedupKey>,
    options: &ExecOptions,
) -> Vec<PlanItem> {
    let mut ordered: Vec<&ScanEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let image_names = CanonicalName::new(&options.image_prefix);
    let video_names = CanonicalName::new(&options.video_prefix);
    let (image_names, video_names) = (&image_names, &video_names);
    let naming = move |kind: MediaKind| match kind {
        MediaKind::Image => Some((options.image_prefix.as_str(), image_names)),
        MediaKind::Video => Some((options.video_prefix.as_str(), video_names)),
        MediaKind::Unsupported => None,
    };
    let quarantine_dir = options.target_root().join(QUARANTINE_DIR_NAME);

    let already_named: HashSet<&Path> = ordered
        .iter()
        .copied()
        .filter(|entry| {
            naming(entry.kind).is_some_and(|(_, canonical)| {
                is_already_named(entry, dates.get(&entry.path), canonical, options)
            })
        })
        .map(|entry| entry.path.as_path())
        .collect();

    let mut seen = SeenKeys::new();
    let mut named_duplicates: HashMap<&Path, PathBuf> = HashMap::new();
    for entry in ordered.iter().copied().filter(|e| already_named.contains(e.path.as_path())) {
        if let Some(key) = keys.get(&entry.path)
            && let Some(first) = seen.observe(key, &entry.path)
        {
            named_duplicates.insert(entry.path.as_path(), first);
        }
    }

    let mut sequences: HashMap<(&str, MediaKind), u32> = HashMap::new();
    let mut reserved: HashSet<PathBuf> = HashSet::new();
    let mut plan = Vec::with_capacity(ordered.len());

    for entry in ordered {
        let Some((prefix, _)) = naming(entry.kind) else {
            plan.push(PlanItem::new(entry, Decision::Skip(SkipReason::Unsupported)));
            continue;
        };

        let is_named = already_named.contains(entry.path.as_path());
        let first = if is_named {
            named_duplicates.remove(entry.path.as_path())
        } else {
            keys.get(&entry.path).and_then(|key| seen.observe(key, &entry.path))
        };
        let original = paths::unstaged_path(&entry.path);

        if let Some(first) = first {
            let action = if options.keep_duplicates {
                let dest = reserve(
                    &mut reserved,
                    quarantine_dir.join(original.file_name().unwrap_or_default()),
                    CollisionStyle::DotSuffix,
                );
                DuplicateAction::Quarantine(dest)
            } else {
                DuplicateAction::Delete
            };
            debug!(source = ?entry.path, ?first, "Duplicate content");
            let mut item = PlanItem::new(entry, Decision::Duplicate(action));
            item.duplicate_of = Some(first);
            plan.push(item);
            continue;
        }

        let Some(date) = dates.get(&entry.path) else {
            warn!(source = ?entry.path, "No date resolved, leaving file alone");
            plan.push(PlanItem::new(entry, Decision::Skip(SkipReason::NoDate)));
            continue;
        };

        if is_named {
            reserved.insert(entry.path.clone());
            plan.push(PlanItem::new(entry, Decision::Skip(SkipReason::AlreadyNamed)));
            continue;
        }

        let sequence = sequences.entry((date.date.as_str(), entry.kind)).or_insert(0);
        *sequence += 1;

        let extension = paths::lowercase_extension(&original).unwrap_or_default();
        let name = format!("{}{}-{:05}.{}", prefix, date.date, sequence, extension);
        let dest_dir = destination_dir(entry, options);
        let dest = reserve(&mut reserved, dest_dir.join(name), CollisionStyle::Underscore);

        let mut item = PlanItem::new(entry, Decision::Rename(dest));
        item.sequence = Some(*sequence);
        plan.push(item);
    }

    plan
}

/// Whether `entry` already has its canonical name in the directory it
/// would be renamed into
fn is_already_named(
    entry: &ScanEntry,
    date: Option<&ResolvedDate>,
    canonical: &CanonicalName,
    options: &ExecOptions,
) -> bool {
    let Some(date) = date else {
        return false;
    };
    let name = entry.path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let extension = paths::lowercase_extension(&entry.path).unwrap_or_default();
    entry.path.parent() == Some(destination_dir(entry, options).as_path())
        && canonical.matches(name, &date.date, &extension)
}

/// Output directory when set, otherwise the file's own directory
fn destination_dir(entry: &ScanEntry, options: &ExecOptions) -> PathBuf {
    match &options.output_dir {
        Some(dir) => dir.clone(),
        None => entry.path.parent().map(Path::to_path_buf).unwrap_or_default(),
    }
}

/// Claim the first free spelling of `path`, free meaning neither on disk
/// nor claimed earlier in this plan
fn reserve(reserved: &mut HashSet<PathBuf>, path: PathBuf, style: CollisionStyle) -> PathBuf {
    let dest = paths::unique_path(path, style, |p| reserved.contains(p) || p.exists());
    reserved.insert(dest.clone());
    dest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::WeakKey;
    use crate::time::DateSource;
    use std::fs;

    struct Fixture {
        entries: Vec<ScanEntry>,
        dates: HashMap<PathBuf, ResolvedDate>,
        keys: HashMap<PathBuf, DedupKey>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                entries: Vec::new(),
                dates: HashMap::new(),
                keys: HashMap::new(),
            }
        }

        /// Add a file whose content is identified by `content`
        fn add(&mut self, path: &Path, date: &str, content: u8) -> &mut Self {
            fs::write(path, [content]).unwrap();
            let kind = paths::classify(path);
            self.entries.push(ScanEntry {
                path: path.to_path_buf(),
                size: 10,
                mtime: None,
                kind,
            });
            if kind.is_supported() {
                self.dates.insert(
                    path.to_path_buf(),
                    ResolvedDate {
                        date: date.to_string(),
                        source: DateSource::Metadata,
                    },
                );
                self.keys.insert(
                    path.to_path_buf(),
                    DedupKey::Strong {
                        digest: [content; 32],
                        weak: WeakKey {
                            size: 10,
                            mtime: content as i64,
                            prefix: content as u64,
                        },
                    },
                );
            }
            self
        }

        fn plan(&self, options: &ExecOptions) -> Vec<PlanItem> {
            build_plan(&self.entries, &self.dates, &self.keys, options)
        }
    }

    fn renamed_to(item: &PlanItem) -> &Path {
        match &item.decision {
            Decision::Rename(dest) => dest,
            other => panic!("expected rename, got {:?}", other),
        }
    }

    #[test]
    fn test_sequences_per_date_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut fixture = Fixture::new();
        fixture
            .add(&root.join("a.jpg"), "20240421", 1)
            .add(&root.join("b.JPG"), "20240421", 2)
            .add(&root.join("c.mp4"), "20240421", 3)
            .add(&root.join("d.png"), "20240422", 4);

        let plan = fixture.plan(&ExecOptions::new(root));
        assert_eq!(renamed_to(&plan[0]), root.join("IMG-20240421-00001.jpg"));
        assert_eq!(renamed_to(&plan[1]), root.join("IMG-20240421-00002.jpg"));
        assert_eq!(renamed_to(&plan[2]), root.join("VID-20240421-00001.mp4"));
        assert_eq!(renamed_to(&plan[3]), root.join("IMG-20240422-00001.png"));
        assert_eq!(plan[1].sequence, Some(2));
    }

    #[test]
    fn test_duplicates_deleted_or_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut fixture = Fixture::new();
        fixture
            .add(&root.join("IMG_0001.jpg"), "20240421", 7)
            .add(&root.join("IMG_0002.jpg"), "20240421", 7);

        let mut options = ExecOptions::new(root);
        let plan = fixture.plan(&options);
        assert_eq!(renamed_to(&plan[0]), root.join("IMG-20240421-00001.jpg"));
        assert_eq!(plan[1].decision, Decision::Duplicate(DuplicateAction::Delete));
        assert_eq!(plan[1].duplicate_of.as_deref(), Some(root.join("IMG_0001.jpg").as_path()));
        assert_eq!(plan[1].sequence, None);

        options.keep_duplicates = true;
        let plan = fixture.plan(&options);
        assert_eq!(
            plan[1].decision,
            Decision::Duplicate(DuplicateAction::Quarantine(
                root.join(QUARANTINE_DIR_NAME).join("IMG_0002.jpg")
            ))
        );
    }

    #[test]
    fn test_quarantine_collisions_get_dot_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let quarantine = root.join(QUARANTINE_DIR_NAME);
        fs::create_dir(&quarantine).unwrap();
        fs::write(quarantine.join("x.jpg"), b"old").unwrap();
        fs::create_dir(root.join("sub")).unwrap();

        let mut fixture = Fixture::new();
        fixture
            .add(&root.join("a.jpg"), "20240101", 1)
            .add(&root.join("sub/x.jpg"), "20240101", 1)
            .add(&root.join("x.jpg"), "20240101", 1);

        let mut options = ExecOptions::new(root);
        options.keep_duplicates = true;
        let plan = fixture.plan(&options);

        let quarantined: Vec<_> = plan[1..]
            .iter()
            .map(|item| match &item.decision {
                Decision::Duplicate(DuplicateAction::Quarantine(dest)) => dest.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(quarantined, vec![quarantine.join("x.jpg.1"), quarantine.join("x.jpg.2")]);
    }

    #[test]
    fn test_existing_destination_gets_underscore_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        let output = dir.path().join("out");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("IMG-20240421-00001.jpg"), b"earlier run").unwrap();

        let mut fixture = Fixture::new();
        fixture.add(&source.join("IMG_0003.jpg"), "20240421", 1);

        let mut options = ExecOptions::new(&source);
        options.output_dir = Some(output.clone());
        let plan = fixture.plan(&options);
        assert_eq!(renamed_to(&plan[0]), output.join("IMG-20240421-00001_1.jpg"));
        assert_eq!(plan[0].sequence, Some(1));
    }

    #[test]
    fn test_planned_destinations_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("one")).unwrap();
        fs::create_dir_all(root.join("two")).unwrap();
        let output = root.join("out");

        let mut fixture = Fixture::new();
        for (i, name) in ["one/a.jpg", "one/b.jpg", "two/a.jpg", "two/b.jpg"].iter().enumerate() {
            fixture.add(&root.join(name), "20240421", i as u8 + 1);
        }
        // Pre-existing names from an earlier run occupy the second sequence slot
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("IMG-20240421-00002.jpg"), b"x").unwrap();

        let mut options = ExecOptions::new(root);
        options.output_dir = Some(output.clone());
        let plan = fixture.plan(&options);

        let dests: HashSet<_> = plan.iter().map(|item| renamed_to(item).to_path_buf()).collect();
        assert_eq!(dests.len(), 4);
        assert!(dests.contains(&output.join("IMG-20240421-00002_1.jpg")));
        assert!(!dests.contains(&output.join("IMG-20240421-00002.jpg")));
    }

    #[test]
    fn test_already_named_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut fixture = Fixture::new();
        fixture
            .add(&root.join("IMG-20240421-00001.jpg"), "20240421", 1)
            .add(&root.join("IMG-20240421-00002_1.jpg"), "20240421", 2)
            .add(&root.join("IMG-20240101-00001.jpg"), "20240421", 3)
            .add(&root.join("VID-20240421-00001.JPG"), "20240421", 4);

        let plan = fixture.plan(&ExecOptions::new(root));
        // Wrong date for this file, and its first slot is taken on disk
        assert_eq!(renamed_to(&plan[0]), root.join("IMG-20240421-00001_1.jpg"));
        assert_eq!(plan[1].decision, Decision::Skip(SkipReason::AlreadyNamed));
        assert_eq!(plan[2].decision, Decision::Skip(SkipReason::AlreadyNamed));
        // An image carrying the video prefix is not canonical
        assert_eq!(renamed_to(&plan[3]), root.join("IMG-20240421-00002.jpg"));
        assert_eq!(plan[3].sequence, Some(2));
    }

    #[test]
    fn test_named_file_wins_over_new_copy() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut fixture = Fixture::new();
        fixture
            .add(&root.join("20240101_copy.jpg"), "20240101", 5)
            .add(&root.join("IMG-20240101-00001.jpg"), "20240101", 5)
            .add(&root.join("IMG-20240101-00002.jpg"), "20240101", 5);

        let plan = fixture.plan(&ExecOptions::new(root));
        let named = root.join("IMG-20240101-00001.jpg");
        assert_eq!(plan[0].decision, Decision::Duplicate(DuplicateAction::Delete));
        assert_eq!(plan[0].duplicate_of.as_deref(), Some(named.as_path()));
        assert_eq!(plan[1].decision, Decision::Skip(SkipReason::AlreadyNamed));
        // Two named copies of one content still keep only the first
        assert_eq!(plan[2].decision, Decision::Duplicate(DuplicateAction::Delete));
        assert_eq!(plan[2].duplicate_of.as_deref(), Some(named.as_path()));
    }

    #[test]
    fn test_staged_file_is_planned_under_its_original_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let staged = root.join(".20240101_a.JPG.1a2b3c4d.tmp");
        let mut fixture = Fixture::new();
        fixture
            .add(&staged, "20240101", 1)
            .add(&root.join(".20240101_b.jpg.0000beef.tmp"), "20240101", 1);
        assert_eq!(fixture.entries[0].kind, MediaKind::Image);

        let mut options = ExecOptions::new(root);
        options.keep_duplicates = true;
        let plan = fixture.plan(&options);
        assert_eq!(plan[0].source, staged);
        assert_eq!(renamed_to(&plan[0]), root.join("IMG-20240101-00001.jpg"));
        assert_eq!(
            plan[1].decision,
            Decision::Duplicate(DuplicateAction::Quarantine(
                root.join(QUARANTINE_DIR_NAME).join("20240101_b.jpg")
            ))
        );
    }

    #[test]
    fn test_already_named_elsewhere_is_moved_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let output = root.join("out");
        let mut fixture = Fixture::new();
        fixture.add(&root.join("IMG-20240421-00001.jpg"), "20240421", 1);

        let mut options = ExecOptions::new(root);
        options.output_dir = Some(output.clone());
        let plan = fixture.plan(&options);
        assert_eq!(renamed_to(&plan[0]), output.join("IMG-20240421-00001.jpg"));
    }

    #[test]
    fn test_unsupported_and_missing_dates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut fixture = Fixture::new();
        fixture.add(&root.join("notes.txt"), "", 0).add(&root.join("a.jpg"), "20240421", 1);
        fixture.dates.clear();

        let plan = fixture.plan(&ExecOptions::new(root));
        assert_eq!(plan[0].decision, Decision::Skip(SkipReason::NoDate));
        assert_eq!(plan[1].decision, Decision::Skip(SkipReason::Unsupported));
    }

    #[test]
    fn test_plan_is_deterministic_regardless_of_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut fixture = Fixture::new();
        fixture
            .add(&root.join("c.jpg"), "20240421", 1)
            .add(&root.join("a.jpg"), "20240421", 1)
            .add(&root.join("b.mov"), "20240421", 2);

        let first = fixture.plan(&ExecOptions::new(root));
        fixture.entries.reverse();
        let second = fixture.plan(&ExecOptions::new(root));
        assert_eq!(first, second);
        assert_eq!(first[0].source, root.join("a.jpg"));
        assert_eq!(first[2].decision, Decision::Duplicate(DuplicateAction::Delete));
    }
}
