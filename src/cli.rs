//! CLI argument parsing with clap

use crate::config::Config;
use crate::options::ExecOptions;
use crate::time::MetadataBackend;
use clap::Parser;
use std::path::PathBuf;

/// Media Renamer - rename photos and videos by capture date
///
/// Gives every image and video a name built from its capture date
/// (`IMG-20240421-00001.jpg`), removes or quarantines duplicate content and
/// moves files through temporary names so an interrupted run never loses
/// data.
#[derive(Parser, Debug)]
#[command(name = "media-renamer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory to organize (defaults to the remembered one)
    pub source: Option<PathBuf>,

    /// Move renamed files here instead of renaming them in place
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Move duplicates into `.duplicates` instead of deleting them
    #[arg(short, long)]
    pub keep_duplicates: bool,

    /// Show what would happen without touching any file
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Seconds spent hashing one file before using a weaker key
    #[arg(long, value_name = "SECS")]
    pub hash_budget: Option<u64>,

    /// Seconds one metadata lookup may take
    #[arg(long, value_name = "SECS")]
    pub metadata_timeout: Option<u64>,

    /// Prefix for renamed images
    #[arg(long)]
    pub image_prefix: Option<String>,

    /// Prefix for renamed videos
    #[arg(long)]
    pub video_prefix: Option<String>,

    /// Where capture dates come from
    #[arg(long, value_enum)]
    pub metadata: Option<MetadataBackend>,

    /// Number of threads for hashing and date lookup (0 = auto)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Path to configuration file (TOML format)
    ///
    /// Defaults to the per-user configuration directory. CLI arguments
    /// override config file settings.
    #[arg(short = 'C', long, env = "MEDIA_RENAMER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Save the directories and prefixes of this run to the config file
    #[arg(long)]
    pub remember: bool,

    /// Print one JSON object per file instead of a table
    #[arg(long)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Output log format as JSON
    #[arg(long)]
    pub json_log: bool,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Config file to use: `--config`, else the per-user default
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Config::default_path)
    }

    /// Merge CLI arguments with config from file
    /// CLI arguments take precedence over config file settings
    pub fn merge_with_config(&self, mut config: Config) -> Config {
        if let Some(ref prefix) = self.image_prefix {
            config.image_prefix = prefix.clone();
        }
        if let Some(ref prefix) = self.video_prefix {
            config.video_prefix = prefix.clone();
        }
        if let Some(secs) = self.hash_budget {
            config.hash_budget_secs = secs;
        }
        if let Some(secs) = self.metadata_timeout {
            config.metadata_timeout_secs = secs;
        }
        if let Some(metadata) = self.metadata {
            config.metadata = metadata;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        config
    }

    /// Source and output directories for this run. Without a SOURCE
    /// argument the remembered pair is used.
    pub fn directories(&self, config: &Config) -> Option<(PathBuf, Option<PathBuf>)> {
        match &self.source {
            Some(source) => Some((source.clone(), self.output.clone())),
            None => {
                let source = config.last_source.clone()?;
                let output = self.output.clone().or_else(|| config.last_output.clone());
                Some((source, output))
            }
        }
    }

    /// Build run options from the merged config
    pub fn to_options(&self, config: &Config, source: PathBuf, output: Option<PathBuf>) -> ExecOptions {
        let mut options = config.exec_options(source);
        options.output_dir = output;
        options.keep_duplicates = self.keep_duplicates;
        options.dry_run = self.dry_run;
        options
    }
}
