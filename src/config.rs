//! Persisted settings
//!
//! Read once by the binary before a run starts and turned into
//! [`ExecOptions`]. The engine itself never touches this file.

use crate::options::{
    DEFAULT_HASH_BUDGET, DEFAULT_IMAGE_PREFIX, DEFAULT_METADATA_TIMEOUT, DEFAULT_VIDEO_PREFIX,
    ExecOptions,
};
use crate::time::MetadataBackend;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration for the media renamer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix for renamed images
    pub image_prefix: String,

    /// Prefix for renamed videos
    pub video_prefix: String,

    /// Seconds spent hashing one file before falling back to a weak key
    pub hash_budget_secs: u64,

    /// Seconds one metadata lookup may take
    pub metadata_timeout_secs: u64,

    /// Worker threads for hashing and date lookup (0 = auto)
    pub threads: usize,

    /// Where capture dates come from
    pub metadata: MetadataBackend,

    /// Source directory of the last remembered run
    pub last_source: Option<PathBuf>,

    /// Output directory of the last remembered run
    pub last_output: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
            video_prefix: DEFAULT_VIDEO_PREFIX.to_string(),
            hash_budget_secs: DEFAULT_HASH_BUDGET.as_secs(),
            metadata_timeout_secs: DEFAULT_METADATA_TIMEOUT.as_secs(),
            threads: 0,
            metadata: MetadataBackend::default(),
            last_source: None,
            last_output: None,
        }
    }
}

impl Config {
    /// Per-user config file location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "media-renamer").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(config)
    }

    /// Load from `path`, or defaults when the file does not exist yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            source: e,
        })?;

        fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    pub fn image_prefix(&self) -> &str {
        non_blank_or(&self.image_prefix, DEFAULT_IMAGE_PREFIX)
    }

    pub fn video_prefix(&self) -> &str {
        non_blank_or(&self.video_prefix, DEFAULT_VIDEO_PREFIX)
    }

    /// Run options for `source`, with everything else taken from this config
    pub fn exec_options(&self, source: impl Into<PathBuf>) -> ExecOptions {
        let mut options = ExecOptions::new(source);
        options.image_prefix = self.image_prefix().to_string();
        options.video_prefix = self.video_prefix().to_string();
        options.hash_budget = Duration::from_secs(self.hash_budget_secs);
        options.metadata_timeout = Duration::from_secs(self.metadata_timeout_secs);
        options.threads = self.threads;
        options
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# Media Renamer Configuration File
# This file uses TOML format (https://toml.io)

# Prefixes for renamed files: <prefix><YYYYMMDD>-<NNNNN>.<ext>
# Blank values fall back to the defaults
image_prefix = "IMG-"
video_prefix = "VID-"

# Seconds spent hashing one file before using a cheaper size/time key
hash_budget_secs = 60

# Seconds one metadata lookup may take before it is abandoned
metadata_timeout_secs = 10

# Number of threads for hashing and date lookup (0 = auto-detect)
threads = 0

# Where capture dates come from: "auto", "exiftool", "exif" or "none"
# - auto: exiftool when installed, the built-in EXIF reader otherwise
metadata = "auto"

# Filled in by --remember
# last_source = "/home/me/Pictures/inbox"
# last_output = "/home/me/Pictures/sorted"
"#
        .to_string()
    }
}

fn non_blank_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() { default } else { value }
}

/// Errors that can occur when loading or saving configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read configuration file
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse configuration file
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to write configuration file
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to serialize configuration
    SerializeError { source: toml::ser::Error },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError { path, source } => {
                write!(f, "Failed to read config file '{}': {}", path.display(), source)
            }
            ConfigError::ParseError { path, source } => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), source)
            }
            ConfigError::WriteError { path, source } => {
                write!(f, "Failed to write config file '{}': {}", path.display(), source)
            }
            ConfigError::SerializeError { source } => {
                write!(f, "Failed to serialize config: {}", source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::WriteError { source, .. } => Some(source),
            ConfigError::SerializeError { source } => Some(source),
        }
    }
}
