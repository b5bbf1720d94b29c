//! Content keys for duplicate detection
//!
//! A strong key is a BLAKE3 digest of the whole file. When the per-file time
//! budget runs out before the read completes, or the file cannot be read, a
//! weak key is used instead: size, whole-second mtime and an xxh3 hash of the
//! first megabyte. Hashing never fails; every file gets some key.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};
use xxhash_rust::xxh3::xxh3_64;

/// Bytes covered by the prefix hash
pub const PREFIX_SIZE: usize = 1024 * 1024;

/// Read size while streaming the rest of the file
const CHUNK_SIZE: usize = 1024 * 1024;

/// Cheap fingerprint: `size@mtime` plus a prefix hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakKey {
    pub size: u64,
    /// Modification time in whole seconds since the Unix epoch
    pub mtime: i64,
    pub prefix: u64,
}

impl fmt::Display for WeakKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "weak-{}@{}:{:016x}", self.size, self.mtime, self.prefix)
    }
}

/// Which kind of key a file ended up with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Strong,
    Weak,
}

/// Duplicate-detection key for one file
#[derive(Debug, Clone)]
pub enum DedupKey {
    /// Full-content digest; the weak fingerprint of the same file rides
    /// along so it can be matched against files that only have a weak key.
    Strong { digest: [u8; 32], weak: WeakKey },
    Weak(WeakKey),
}

impl DedupKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            DedupKey::Strong { .. } => KeyKind::Strong,
            DedupKey::Weak(_) => KeyKind::Weak,
        }
    }

    pub fn strong_digest(&self) -> Option<&[u8; 32]> {
        match self {
            DedupKey::Strong { digest, .. } => Some(digest),
            DedupKey::Weak(_) => None,
        }
    }

    pub fn weak(&self) -> &WeakKey {
        match self {
            DedupKey::Strong { weak, .. } => weak,
            DedupKey::Weak(weak) => weak,
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKey::Strong { digest, .. } => {
                write!(f, "blake3:{}", blake3::Hash::from(*digest).to_hex())
            }
            DedupKey::Weak(weak) => weak.fmt(f),
        }
    }
}

/// Whole seconds since the epoch, negative for pre-1970 timestamps
pub fn mtime_secs(mtime: SystemTime) -> i64 {
    match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

enum Contents {
    Complete { digest: [u8; 32], prefix: u64 },
    Partial { prefix: u64 },
}

/// Compute the duplicate key for one file within `budget`.
///
/// The budget is checked after every chunk, so the call returns at most one
/// chunk read after the budget has elapsed.
pub fn compute_key(path: &Path, size: u64, mtime: SystemTime, budget: Duration) -> DedupKey {
    let start = Instant::now();
    let mtime = mtime_secs(mtime);

    match hash_contents(path, start, budget) {
        Ok(Contents::Complete { digest, prefix }) => {
            trace!(?path, elapsed = ?start.elapsed(), "Computed full content hash");
            DedupKey::Strong {
                digest,
                weak: WeakKey { size, mtime, prefix },
            }
        }
        Ok(Contents::Partial { prefix }) => {
            debug!(?path, ?budget, "Hash budget exceeded or read failed, using weak key");
            DedupKey::Weak(WeakKey { size, mtime, prefix })
        }
        Err(e) => {
            debug!(?path, error = %e, "File unreadable, deriving weak key from path");
            DedupKey::Weak(WeakKey {
                size,
                mtime,
                prefix: xxh3_64(path.as_os_str().as_encoded_bytes()),
            })
        }
    }
}

/// Stream the file through BLAKE3. Errors are only returned when not even
/// the prefix could be read.
fn hash_contents(path: &Path, start: Instant, budget: Duration) -> io::Result<Contents> {
    let mut file = File::open(path)?;

    let mut head = Vec::with_capacity(PREFIX_SIZE);
    (&mut file).take(PREFIX_SIZE as u64).read_to_end(&mut head)?;
    let prefix = xxh3_64(&head);

    let mut hasher = blake3::Hasher::new();
    hasher.update(&head);

    if head.len() == PREFIX_SIZE {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            if start.elapsed() >= budget {
                return Ok(Contents::Partial { prefix });
            }
            let bytes_read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(?path, error = %e, "Read failed mid-file");
                    return Ok(Contents::Partial { prefix });
                }
            };
            hasher.update(&buffer[..bytes_read]);
        }
    }

    Ok(Contents::Complete {
        digest: *hasher.finalize().as_bytes(),
        prefix,
    })
}

/// Run-scoped record of which key was seen first, and where.
///
/// Two files are duplicates when their strong digests match, or when
/// either lacks a strong digest and their weak keys match.
#[derive(Debug, Default)]
pub struct SeenKeys {
    strong: HashMap<[u8; 32], PathBuf>,
    weak_any: HashMap<WeakKey, PathBuf>,
    weak_only: HashMap<WeakKey, PathBuf>,
}

impl SeenKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `key` against earlier first occurrences. Returns the path of
    /// the earlier file when `key` is a repeat; otherwise records `path` as
    /// the first occurrence and returns `None`.
    pub fn observe(&mut self, key: &DedupKey, path: &Path) -> Option<PathBuf> {
        let weak = key.weak();
        let earlier = match key.strong_digest() {
            Some(digest) => self
                .strong
                .get(digest)
                .or_else(|| self.weak_only.get(weak)),
            None => self.weak_any.get(weak),
        };
        if let Some(earlier) = earlier {
            return Some(earlier.clone());
        }

        self.weak_any.entry(*weak).or_insert_with(|| path.to_path_buf());
        match key.strong_digest() {
            Some(digest) => {
                self.strong.insert(*digest, path.to_path_buf());
            }
            None => {
                self.weak_only.entry(*weak).or_insert_with(|| path.to_path_buf());
            }
        }
        None
    }
}
