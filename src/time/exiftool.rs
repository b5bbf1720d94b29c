//! Capture dates via the external `exiftool` program

use super::MetadataSource;
use crate::paths;
use chrono::NaiveDate;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Tags asked for, in order of preference
const PREFERRED_TAGS: &[&str] = &["DateTimeOriginal", "CreateDate", "MediaCreateDate"];

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs `exiftool` once per file with a hard timeout.
///
/// Whether the program exists is learned on first use and remembered for
/// the lifetime of this value.
#[derive(Debug)]
pub struct Exiftool {
    program: PathBuf,
    timeout: Duration,
    available: OnceLock<bool>,
}

impl Exiftool {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("exiftool", timeout)
    }

    pub fn with_program(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            available: OnceLock::new(),
        }
    }

    fn spawn(&self, path: &Path) -> io::Result<Child> {
        Command::new(&self.program)
            .args(["-s", "-q", "-q", "-m", "-fast2"])
            .args(["-api", "LargeFileSupport=1", "-d", "%Y%m%d"])
            .args(PREFERRED_TAGS.iter().map(|tag| format!("-{}", tag)))
            .arg("--")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
    }

    /// Stdout of a successful run, or `None` on any failure
    fn run(&self, path: &Path) -> Option<String> {
        if self.available.get() == Some(&false) {
            return None;
        }

        let mut child = match self.spawn(path) {
            Ok(child) => {
                let _ = self.available.set(true);
                child
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.available.set(false).is_ok() {
                    debug!(program = ?self.program, "exiftool not found, metadata tier disabled");
                }
                return None;
            }
            Err(e) => {
                warn!(?path, error = %e, "Failed to start exiftool");
                return None;
            }
        };

        let status = wait_with_timeout(&mut child, self.timeout, path)?;
        if !status.success() {
            trace!(?path, ?status, "exiftool exited unsuccessfully");
            return None;
        }

        let mut output = String::new();
        child.stdout.take()?.read_to_string(&mut output).ok()?;
        Some(output)
    }
}

impl MetadataSource for Exiftool {
    fn capture_date(&self, path: &Path) -> Option<NaiveDate> {
        let output = self.run(path)?;
        parse_tag_output(&output)
    }
}

/// Poll until the child exits, killing it once `timeout` has passed
fn wait_with_timeout(child: &mut Child, timeout: Duration, path: &Path) -> Option<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if start.elapsed() >= timeout => {
                warn!(?path, ?timeout, "exiftool timed out");
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!(?path, error = %e, "Failed waiting for exiftool");
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }
}

/// Pick the most preferred tag from `Tag : value` lines
fn parse_tag_output(output: &str) -> Option<NaiveDate> {
    let values: Vec<(&str, &str)> = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(tag, value)| (tag.trim(), value.trim()))
        .collect();

    PREFERRED_TAGS.iter().find_map(|wanted| {
        values
            .iter()
            .filter(|(tag, _)| tag == wanted)
            .find_map(|(_, value)| paths::leading_date(value))
    })
}
