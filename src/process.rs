//! Run orchestration
//!
//! Handles one run end to end:
//! - Checking the source and output directories
//! - Scanning the source tree
//! - Resolving dates and duplicate keys on a Rayon pool
//! - Planning, then executing the plan item by item

use crate::error::{Error, Result};
use crate::execute::{Execution, Outcome, ResultRecord};
use crate::hash::{self, DedupKey};
use crate::options::{CancelFlag, ExecOptions};
use crate::plan::{self, PlanItem};
use crate::scan::{self, ScanEntry};
use crate::time::{self, MetadataBackend, MetadataSource, ResolvedDate};
use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::UNIX_EPOCH;
use tracing::{Level, debug, error, info, span};

/// Per-run tallies, built from the result records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub renamed: usize,
    pub unchanged: usize,
    pub quarantined: usize,
    pub deleted: usize,
    pub unsupported: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: &ResultRecord) {
        if !record.succeeded() {
            self.failed += 1;
            return;
        }
        match record.outcome {
            Outcome::Renamed(_) => self.renamed += 1,
            Outcome::Quarantined(_) => self.quarantined += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Unsupported => self.unsupported += 1,
            Outcome::Unchanged(_) => self.unchanged += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.renamed + self.unchanged + self.quarantined + self.deleted + self.unsupported + self.failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {}, Renamed: {}, Unchanged: {}, Quarantined: {}, Deleted: {}, Unsupported: {}, Failed: {}",
            self.total(),
            self.renamed,
            self.unchanged,
            self.quarantined,
            self.deleted,
            self.unsupported,
            self.failed
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

/// A checked and planned run, ready to execute
#[derive(Debug)]
pub struct Prepared {
    /// Options with the source and output directories made absolute
    pub options: ExecOptions,
    /// Files found by the scan
    pub scanned: usize,
    pub plan: Vec<PlanItem>,
}

impl Prepared {
    pub fn execute(self) -> Execution {
        Execution::new(self.plan, &self.options)
    }
}

/// Progress of a run started with [`MediaRenamer::spawn`]
#[derive(Debug, Clone)]
pub enum RunEvent {
    Scanned { files: usize },
    Planned { items: usize },
    Record(ResultRecord),
    Finished(RunSummary),
    Cancelled(RunSummary),
    /// A fatal precondition failed; nothing was touched
    Failed(String),
}

/// Handle to a run on a worker thread
pub struct RunHandle {
    events: Receiver<RunEvent>,
    cancel: CancelFlag,
    worker: JoinHandle<()>,
}

impl RunHandle {
    pub fn events(&self) -> &Receiver<RunEvent> {
        &self.events
    }

    /// Ask the run to stop after the file it is working on
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn join(self) {
        if self.worker.join().is_err() {
            error!("Run worker panicked");
        }
    }
}

/// Owns everything about one run
pub struct MediaRenamer {
    options: ExecOptions,
    metadata: Arc<dyn MetadataSource>,
}

impl MediaRenamer {
    /// Create a renamer reading metadata with `exiftool` when available
    pub fn new(options: ExecOptions) -> Self {
        let metadata = time::metadata_source(MetadataBackend::Auto, options.metadata_timeout);
        Self { options, metadata }
    }

    pub fn with_metadata_source(mut self, metadata: Arc<dyn MetadataSource>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    /// Check preconditions, scan, analyze and plan without executing.
    ///
    /// In a real run the output directory is created here; a dry run
    /// creates nothing.
    pub fn prepare(&self) -> Result<Prepared> {
        let _span = span!(Level::INFO, "prepare", source = ?self.options.source_dir).entered();

        let options = self.checked_options()?;

        info!("Scanning source directory...");
        let entries = scan::scan_source(&options.source_dir);
        info!(count = entries.len(), "Found files");

        info!("Resolving dates and computing duplicate keys...");
        let (dates, keys) = self.analyze(&entries, &options)?;

        let plan = plan::build_plan(&entries, &dates, &keys, &options);
        info!(items = plan.len(), "Plan ready");

        Ok(Prepared {
            options,
            scanned: entries.len(),
            plan,
        })
    }

    /// Prepare, then hand back the lazy execution
    pub fn run(&self) -> Result<Execution> {
        Ok(self.prepare()?.execute())
    }

    /// Run on a worker thread, streaming progress over a channel
    pub fn spawn(self) -> RunHandle {
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = self.options.cancel.clone();
        let worker = thread::spawn(move || self.run_to_channel(&tx));
        RunHandle {
            events: rx,
            cancel,
            worker,
        }
    }

    fn run_to_channel(&self, tx: &Sender<RunEvent>) {
        let mut summary = RunSummary::new();
        let prepared = match self.prepare() {
            Ok(prepared) => prepared,
            Err(Error::Cancelled) => {
                summary.cancelled = true;
                let _ = tx.send(RunEvent::Cancelled(summary));
                return;
            }
            Err(e) => {
                error!(error = %e, "Run failed");
                let _ = tx.send(RunEvent::Failed(e.to_string()));
                return;
            }
        };

        let _ = tx.send(RunEvent::Scanned {
            files: prepared.scanned,
        });
        let _ = tx.send(RunEvent::Planned {
            items: prepared.plan.len(),
        });

        let mut execution = prepared.execute();
        for record in execution.by_ref() {
            summary.record(&record);
            if tx.send(RunEvent::Record(record)).is_err() {
                debug!("Event receiver dropped, stopping run");
                return;
            }
        }

        info!("{}", summary);
        let event = if execution.was_cancelled() {
            summary.cancelled = true;
            RunEvent::Cancelled(summary)
        } else {
            RunEvent::Finished(summary)
        };
        let _ = tx.send(event);
    }

    /// Validate the directories and return options with absolute paths
    fn checked_options(&self) -> Result<ExecOptions> {
        let mut options = self.options.clone();

        let source = &options.source_dir;
        let metadata = fs::metadata(source).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::SourceMissing {
                path: source.clone(),
            },
            _ => Error::SourceUnreadable {
                path: source.clone(),
                source: e,
            },
        })?;
        if !metadata.is_dir() {
            return Err(Error::SourceNotDirectory {
                path: source.clone(),
            });
        }
        if let Err(e) = fs::read_dir(source) {
            return Err(Error::SourceUnreadable {
                path: source.clone(),
                source: e,
            });
        }
        options.source_dir = fs::canonicalize(source)?;

        if let Some(output) = options.output_dir.take() {
            options.output_dir = Some(prepare_output(&output, options.dry_run)?);
        }

        Ok(options)
    }

    /// Resolve dates and keys for every supported file in parallel
    fn analyze(
        &self,
        entries: &[ScanEntry],
        options: &ExecOptions,
    ) -> Result<(HashMap<PathBuf, ResolvedDate>, HashMap<PathBuf, DedupKey>)> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads)
            .build()?;
        let cancel = &options.cancel;
        let metadata = self.metadata.as_ref();

        let analyzed: Vec<(PathBuf, ResolvedDate, DedupKey)> = pool.install(|| {
            entries
                .par_iter()
                .filter(|entry| entry.kind.is_supported())
                .filter_map(|entry| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let _span = span!(Level::DEBUG, "analyze", path = ?entry.path).entered();
                    let date = time::resolve_date(&entry.path, entry.mtime, options, metadata);
                    let key = hash::compute_key(
                        &entry.path,
                        entry.size,
                        entry.mtime.unwrap_or(UNIX_EPOCH),
                        options.hash_budget,
                    );
                    Some((entry.path.clone(), date, key))
                })
                .collect()
        });

        if cancel.is_cancelled() {
            info!("Cancelled before planning");
            return Err(Error::Cancelled);
        }

        let mut dates = HashMap::with_capacity(analyzed.len());
        let mut keys = HashMap::with_capacity(analyzed.len());
        for (path, date, key) in analyzed {
            dates.insert(path.clone(), date);
            keys.insert(path, key);
        }
        Ok((dates, keys))
    }
}

/// Check the output directory, creating it unless this is a dry run
fn prepare_output(output: &Path, dry_run: bool) -> Result<PathBuf> {
    if output.exists() {
        if !output.is_dir() {
            return Err(Error::OutputNotDirectory {
                path: output.to_path_buf(),
            });
        }
        return Ok(fs::canonicalize(output)?);
    }
    if dry_run {
        return Ok(std::path::absolute(output)?);
    }
    fs::create_dir_all(output).map_err(|e| Error::OutputUncreatable {
        path: output.to_path_buf(),
        source: e,
    })?;
    Ok(fs::canonicalize(output)?)
}
