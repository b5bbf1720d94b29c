//! Media Renamer - rename photos and videos by capture date
//!
//! Command line front end: loads the config, builds the run options,
//! starts the run on a worker thread and prints one row per file.

use anyhow::Result;
use clap::Parser;
use media_renamer::execute::{Outcome, ResultRecord};
use media_renamer::process::{RunEvent, RunSummary};
use media_renamer::{CancelFlag, Cli, Config, MediaRenamer, time};
use std::process::ExitCode;
use tracing::{Level, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit status after an interrupted run
const EXIT_INTERRUPTED: u8 = 130;

mod cli_output {
    //! Styled terminal rows

    use crossterm::queue;
    use crossterm::style::{Color, Print, PrintStyledContent, Stylize};
    use std::io::{self, StdoutLock, Write, stdout};

    pub const SUCCESS: Color = Color::Green;
    pub const WARNING: Color = Color::Yellow;
    pub const ERROR: Color = Color::Red;
    pub const MUTED: Color = Color::DarkGrey;
    pub const ACCENT: Color = Color::Cyan;

    const WIDTH: usize = 60;

    fn emit(write: impl FnOnce(&mut StdoutLock<'static>) -> io::Result<()>) {
        let mut out = stdout().lock();
        let _ = write(&mut out).and_then(|()| out.flush());
    }

    /// `title` with enough leading spaces to sit in the middle of a rule
    pub fn centered(title: &str) -> String {
        let padding = WIDTH.saturating_sub(title.chars().count()) / 2;
        format!("{}{}", " ".repeat(padding), title)
    }

    pub fn rule() {
        emit(|out| queue!(out, PrintStyledContent("─".repeat(WIDTH).with(MUTED)), Print("\n")));
    }

    pub fn heading(title: &str) {
        emit(|out| queue!(out, PrintStyledContent(centered(title).bold()), Print("\n")));
    }

    pub fn field(label: &str, value: &str, color: Color) {
        emit(|out| {
            queue!(
                out,
                Print("  "),
                PrintStyledContent(format!("{label}:").with(MUTED)),
                Print(" "),
                PrintStyledContent(value.with(color).bold()),
                Print("\n")
            )
        });
    }

    /// Marker, original path, then what happened to it
    pub fn row(marker: &str, color: Color, original: &str, detail: &str) {
        emit(|out| {
            queue!(
                out,
                Print("  "),
                PrintStyledContent(marker.with(color).bold()),
                Print(" "),
                PrintStyledContent(original.italic()),
                Print(" "),
                PrintStyledContent(detail.with(MUTED)),
                Print("\n")
            )
        });
    }

    pub fn notice(marker: &str, color: Color, message: &str) {
        emit(|out| {
            queue!(
                out,
                PrintStyledContent(marker.with(color).bold()),
                Print(" "),
                Print(message),
                Print("\n")
            )
        });
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Cannot set up logging: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let status = match run(&cli) {
        Ok(status) => status,
        Err(e) => {
            error!(error = %e, "Run failed");
            cli_output::notice("✗", cli_output::ERROR, &format!("{:#}", e));
            1
        }
    };

    // Flushes the log file writer
    drop(guard);
    ExitCode::from(status)
}

fn run(cli: &Cli) -> Result<u8> {
    info!(version = env!("CARGO_PKG_VERSION"), "Media Renamer starting");

    let config_path = cli.config_path();
    let file_config = match &config_path {
        Some(path) => {
            info!(config_file = %path.display(), "Loading configuration");
            Config::load_or_default(path)?
        }
        None => Config::default(),
    };
    let mut config = cli.merge_with_config(file_config);
    if cli.verbose {
        info!(?config, "Configuration loaded");
    }

    let Some((source, output)) = cli.directories(&config) else {
        anyhow::bail!("No source directory given and none remembered; pass SOURCE");
    };

    let options = cli.to_options(&config, source.clone(), output.clone());
    let metadata = time::metadata_source(config.metadata, options.metadata_timeout);
    let renamer = MediaRenamer::new(options).with_metadata_source(metadata);
    install_interrupt_handler(renamer.options().cancel.clone());

    if !cli.json {
        use cli_output::*;
        rule();
        field("Source", &source.display().to_string(), crossterm::style::Color::Reset);
        if let Some(ref output) = output {
            field("Output", &output.display().to_string(), crossterm::style::Color::Reset);
        }
        rule();
    }

    let handle = renamer.spawn();
    let mut final_summary: Option<RunSummary> = None;
    let mut fatal: Option<String> = None;

    for event in handle.events().iter() {
        match event {
            RunEvent::Scanned { files } => info!(files, "Scan finished"),
            RunEvent::Planned { items } => info!(items, "Plan ready"),
            RunEvent::Record(record) => {
                if cli.json {
                    println!("{}", serde_json::to_string(&record)?);
                } else {
                    print_record(&record, cli.dry_run);
                }
            }
            RunEvent::Finished(summary) | RunEvent::Cancelled(summary) => {
                final_summary = Some(summary);
            }
            RunEvent::Failed(message) => fatal = Some(message),
        }
    }
    handle.join();

    if let Some(message) = fatal {
        anyhow::bail!(message);
    }

    if cli.remember {
        config.last_source = Some(source);
        config.last_output = output;
        match &config_path {
            Some(path) => {
                config.save_to_file(path)?;
                info!(config_file = %path.display(), "Remembered directories");
            }
            None => warn!("No configuration directory on this platform, nothing remembered"),
        }
    }

    let summary = final_summary.unwrap_or_default();
    if !cli.json {
        print_summary(&summary, cli.dry_run);
    }
    Ok(exit_status(&summary))
}

/// First Ctrl-C lets the current file finish and stops the run; a second
/// one exits immediately.
fn install_interrupt_handler(cancel: CancelFlag) {
    let installed = ctrlc::set_handler(move || {
        if cancel.request() {
            warn!("Interrupted, stopping after the current file (Ctrl-C again to abort)");
        } else {
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    });
    if let Err(e) = installed {
        warn!(error = %e, "Cannot install Ctrl-C handler");
    }
}

/// 1 when any file failed, 130 when the run was interrupted, else 0
fn exit_status(summary: &RunSummary) -> u8 {
    if summary.failed > 0 {
        1
    } else if summary.cancelled {
        EXIT_INTERRUPTED
    } else {
        0
    }
}

fn print_record(record: &ResultRecord, dry_run: bool) {
    use cli_output::*;

    let original = record.original.display().to_string();
    if let Some(ref error) = record.error {
        row("✗", ERROR, &original, &format!("{} ({})", record.outcome, error));
        return;
    }

    let (marker, color) = match record.outcome {
        _ if dry_run => ("~", ACCENT),
        Outcome::Renamed(_) => ("✓", SUCCESS),
        Outcome::Quarantined(_) | Outcome::Deleted => ("≡", ACCENT),
        Outcome::Unsupported | Outcome::Unchanged(_) => ("⊘", WARNING),
    };
    row(marker, color, &original, &format!("→ {}", record.outcome));
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    use cli_output::*;

    rule();
    heading(if summary.cancelled { "Run cancelled" } else { "Run complete" });
    rule();

    for (label, count, color) in [
        ("Renamed", summary.renamed, SUCCESS),
        ("Unchanged", summary.unchanged, WARNING),
        ("Quarantined", summary.quarantined, ACCENT),
        ("Deleted", summary.deleted, ACCENT),
        ("Unsupported", summary.unsupported, WARNING),
        ("Failed", summary.failed, ERROR),
    ] {
        field(label, &count.to_string(), color);
    }

    if dry_run {
        rule();
        notice("⚠", WARNING, "Dry run: no files were changed");
    }
}

/// Logging to stderr, plus a log file when `--log-file` is given
fn setup_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let (file_writer, guard) = match &cli.log_file {
        Some(log_path) => {
            if let Some(parent) = log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            (Some(non_blocking), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if cli.json_log {
        subscriber
            .with(file_writer.map(|w| fmt::layer().json().with_ansi(false).with_writer(w)))
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(guard)
}
